//! Run events: the structured record of what the engine decided.
//!
//! RULE: Every corrective action (outlier filtering, a rejected candidate
//! family, a repaired correlation matrix) is recorded here as well as
//! logged, so callers can inspect it without scraping log output.

use crate::{
    correlation::CorrelationMethod, data::Variable, distribution::DistributionFamily,
    sampling::SamplingMethod,
};
use serde::{Deserialize, Serialize};

/// Where a correlation repair happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStage {
    /// The estimated matrix was not PSD.
    Estimation,
    /// Cholesky failed on the matrix handed to the sampler.
    Sampling,
}

/// Every event emitted while preparing and running a simulation.
/// Variants are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    DataLoaded {
        records: usize,
        subjects: usize,
    },
    PlanLoaded {
        plan_id: String,
    },
    OutliersRemoved {
        variable: Variable,
        removed: usize,
    },
    CandidateRejected {
        variable: Variable,
        family: DistributionFamily,
        reason: String,
    },
    DistributionFitted {
        variable: Variable,
        family: DistributionFamily,
        p_value: Option<f64>,
    },
    CorrelationEstimated {
        variables: Vec<Variable>,
        method: CorrelationMethod,
    },
    CorrelationRepaired {
        stage: RepairStage,
        min_eigenvalue: f64,
    },
    CorrelationSupplied {
        variables: Vec<Variable>,
    },
    RunCompleted {
        seed: u64,
        iterations: u64,
        rows: usize,
        sampling: SamplingMethod,
    },
}

impl RunEvent {
    /// Stable name of the variant, matching its serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataLoaded { .. } => "data_loaded",
            Self::PlanLoaded { .. } => "plan_loaded",
            Self::OutliersRemoved { .. } => "outliers_removed",
            Self::CandidateRejected { .. } => "candidate_rejected",
            Self::DistributionFitted { .. } => "distribution_fitted",
            Self::CorrelationEstimated { .. } => "correlation_estimated",
            Self::CorrelationRepaired { .. } => "correlation_repaired",
            Self::CorrelationSupplied { .. } => "correlation_supplied",
            Self::RunCompleted { .. } => "run_completed",
        }
    }
}
