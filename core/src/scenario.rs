//! Synthetic scenario generation.
//!
//! RULE: Randomness for a (subject, batch) pair comes only from
//! `derive_seed(seed, [subject_index, batch_start])`; variable streams are
//! split from that inside the sampler. Execution order never affects the
//! numbers, which is what makes batches safe to run in any order.

use crate::{
    compensation::Performance,
    data::{PerformanceRecord, Variable},
    error::{SimError, SimResult},
    multivariate::MultivariateSampler,
    rng::derive_seed,
    types::{ScenarioId, Seed, SubjectId},
};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One synthetic (scenario, subject) row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRow {
    pub scenario_id:      ScenarioId,
    pub subject_id:       SubjectId,
    pub quota:            f64,
    pub quota_attainment: f64,
    pub actual_outcome:   f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_count:       Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_deal_size:    Option<f64>,
}

impl ScenarioRow {
    pub fn value(&self, variable: Variable) -> Option<f64> {
        match variable {
            Variable::Quota => Some(self.quota),
            Variable::ActualOutcome => Some(self.actual_outcome),
            Variable::QuotaAttainment => Some(self.quota_attainment),
            Variable::DealCount => self.deal_count,
            Variable::AvgDealSize => self.avg_deal_size,
        }
    }
}

impl Performance for ScenarioRow {
    fn quota(&self) -> f64 {
        self.quota
    }

    fn actual_outcome(&self) -> f64 {
        self.actual_outcome
    }

    fn metric(&self, variable: Variable) -> Option<f64> {
        self.value(variable)
    }

    fn scenario_id(&self) -> ScenarioId {
        self.scenario_id
    }
}

/// Per-subject constants carried into every scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectProfile {
    pub subject_id: SubjectId,
    /// Mean historical quota.
    pub quota:      f64,
}

/// Subjects in sorted id order with their mean quota.
pub fn subject_profiles(records: &[PerformanceRecord]) -> Vec<SubjectProfile> {
    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for r in records {
        let entry = sums.entry(r.subject_id.as_str()).or_insert((0.0, 0));
        entry.0 += r.quota;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(id, (total, n))| SubjectProfile {
            subject_id: id.to_string(),
            quota:      total / n as f64,
        })
        .collect()
}

pub struct ScenarioGenerator<'a> {
    subjects:      Vec<SubjectProfile>,
    sampler:       &'a MultivariateSampler,
    seed:          Seed,
    attainment:    usize,
    deal_count:    Option<usize>,
    avg_deal_size: Option<usize>,
}

impl<'a> ScenarioGenerator<'a> {
    pub fn new(
        subjects: Vec<SubjectProfile>,
        sampler: &'a MultivariateSampler,
        seed: Seed,
    ) -> SimResult<Self> {
        if subjects.is_empty() {
            return Err(SimError::Simulation("no subjects to simulate".into()));
        }
        let column = |v: Variable| sampler.variables().iter().position(|s| *s == v);
        let attainment = column(Variable::QuotaAttainment).ok_or_else(|| {
            SimError::Simulation("quota_attainment has no fitted distribution".into())
        })?;
        Ok(Self {
            subjects,
            sampler,
            seed,
            attainment,
            deal_count: column(Variable::DealCount),
            avg_deal_size: column(Variable::AvgDealSize),
        })
    }

    pub fn subjects(&self) -> &[SubjectProfile] {
        &self.subjects
    }

    /// `iterations x subjects` rows, scenario-major. `batch_size` defaults
    /// to all iterations in one batch.
    pub fn generate(&self, iterations: u64, batch_size: Option<u64>) -> SimResult<Vec<ScenarioRow>> {
        if iterations == 0 {
            return Err(SimError::InvalidArgument("iterations must be positive".into()));
        }
        let batch = batch_size.unwrap_or(iterations).min(iterations);
        if batch == 0 {
            return Err(SimError::InvalidArgument("batch_size must be positive".into()));
        }

        let capacity = usize::try_from(iterations)
            .ok()
            .and_then(|n| n.checked_mul(self.subjects.len()))
            .ok_or_else(|| SimError::Simulation("scenario table too large".into()))?;
        let mut rows = Vec::with_capacity(capacity);

        let mut start = 0u64;
        while start < iterations {
            let len = batch.min(iterations - start);
            self.generate_batch(start, len as usize, &mut rows)?;
            log::debug!("Generated scenarios {start}..{}", start + len);
            start += len;
        }
        log::info!("Generated {} scenario rows ({} subjects)", rows.len(), self.subjects.len());
        Ok(rows)
    }

    fn generate_batch(&self, start: u64, len: usize, rows: &mut Vec<ScenarioRow>) -> SimResult<()> {
        let samples: Vec<DMatrix<f64>> = (0..self.subjects.len())
            .map(|s| self.sampler.sample(len, derive_seed(self.seed, &[s as u64, start])))
            .collect();

        for j in 0..len {
            let scenario_id = start + j as u64;
            for (subject, sample) in self.subjects.iter().zip(&samples) {
                let raw = sample[(j, self.attainment)];
                if !raw.is_finite() {
                    return Err(SimError::Simulation(format!(
                        "non-finite quota attainment for {} in scenario {scenario_id}",
                        subject.subject_id
                    )));
                }
                let quota_attainment = raw.max(0.0);
                rows.push(ScenarioRow {
                    scenario_id,
                    subject_id: subject.subject_id.clone(),
                    quota: subject.quota,
                    quota_attainment,
                    actual_outcome: subject.quota * quota_attainment,
                    deal_count: self.deal_count.map(|c| sample[(j, c)].round().max(0.0)),
                    avg_deal_size: self.avg_deal_size.map(|c| sample[(j, c)].max(0.0)),
                });
            }
        }
        Ok(())
    }
}
