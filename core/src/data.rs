//! Historical performance records and the variables the engine reads from them.
//!
//! The core never parses files. Records arrive already validated from an
//! external loader; this module only defines their shape.

use crate::{error::SimError, types::SubjectId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One (subject, period) observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub subject_id: SubjectId,
    pub period: String,
    pub quota: f64,
    pub actual_outcome: f64,
    #[serde(default)]
    pub deal_count: Option<u32>,
    #[serde(default)]
    pub avg_deal_size: Option<f64>,
}

impl PerformanceRecord {
    pub fn new(
        subject_id: impl Into<SubjectId>,
        period: impl Into<String>,
        quota: f64,
        actual_outcome: f64,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            period: period.into(),
            quota,
            actual_outcome,
            deal_count: None,
            avg_deal_size: None,
        }
    }

    pub fn with_deals(mut self, deal_count: u32, avg_deal_size: f64) -> Self {
        self.deal_count = Some(deal_count);
        self.avg_deal_size = Some(avg_deal_size);
        self
    }

    pub fn quota_attainment(&self) -> f64 {
        self.actual_outcome / self.quota
    }

    pub fn value(&self, variable: Variable) -> Option<f64> {
        match variable {
            Variable::Quota => Some(self.quota),
            Variable::ActualOutcome => Some(self.actual_outcome),
            Variable::QuotaAttainment => Some(self.quota_attainment()),
            Variable::DealCount => self.deal_count.map(f64::from),
            Variable::AvgDealSize => self.avg_deal_size,
        }
    }
}

/// A numeric performance variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    Quota,
    #[serde(alias = "actual_sales")]
    ActualOutcome,
    QuotaAttainment,
    DealCount,
    AvgDealSize,
}

impl Variable {
    /// Variables the scenario generator samples, in stable slot order.
    /// NEVER reorder or remove entries; only append.
    /// The slot index feeds seed derivation.
    pub const SAMPLED: [Variable; 3] = [
        Variable::QuotaAttainment,
        Variable::DealCount,
        Variable::AvgDealSize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Quota => "quota",
            Self::ActualOutcome => "actual_outcome",
            Self::QuotaAttainment => "quota_attainment",
            Self::DealCount => "deal_count",
            Self::AvgDealSize => "avg_deal_size",
        }
    }

    /// Stable seed slot for sampled variables.
    pub fn slot(&self) -> u64 {
        match self {
            Self::QuotaAttainment => 0,
            Self::DealCount => 1,
            Self::AvgDealSize => 2,
            Self::Quota => 100,
            Self::ActualOutcome => 101,
        }
    }

    /// Extract every present, finite value of this variable.
    pub fn column(&self, records: &[PerformanceRecord]) -> Vec<f64> {
        records
            .iter()
            .filter_map(|r| r.value(*self))
            .filter(|v| v.is_finite())
            .collect()
    }

    /// True when every record carries a value for this variable.
    pub fn present_in_all(&self, records: &[PerformanceRecord]) -> bool {
        !records.is_empty() && records.iter().all(|r| r.value(*self).is_some())
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Variable {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quota" => Ok(Self::Quota),
            "actual_outcome" | "actual_sales" => Ok(Self::ActualOutcome),
            "quota_attainment" => Ok(Self::QuotaAttainment),
            "deal_count" => Ok(Self::DealCount),
            "avg_deal_size" => Ok(Self::AvgDealSize),
            other => Err(SimError::UnknownVariable { name: other.to_string() }),
        }
    }
}
