//! Simulation results and the read-only risk views over them.
//!
//! Every view is computed from the owned scenario table. `risk_metrics` is
//! cached on first access; everything else is recomputed per call.

use crate::{
    compensation::Payout,
    error::{SimError, SimResult},
    event::RunEvent,
    scenario::ScenarioRow,
    stats,
    types::ScenarioId,
};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PERCENTILES: [f64; 6] = [5.0, 25.0, 50.0, 75.0, 95.0, 99.0];

/// A numeric column of the scenario table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Quota,
    QuotaAttainment,
    #[serde(alias = "actual_sales")]
    ActualOutcome,
    DealCount,
    AvgDealSize,
    Commission,
    Bonuses,
    Spifs,
    TotalPayout,
}

impl Column {
    pub const ALL: [Column; 9] = [
        Column::Quota,
        Column::QuotaAttainment,
        Column::ActualOutcome,
        Column::DealCount,
        Column::AvgDealSize,
        Column::Commission,
        Column::Bonuses,
        Column::Spifs,
        Column::TotalPayout,
    ];

    /// Performance columns: the default sensitivity inputs.
    pub const INPUTS: [Column; 5] = [
        Column::Quota,
        Column::QuotaAttainment,
        Column::ActualOutcome,
        Column::DealCount,
        Column::AvgDealSize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Quota => "quota",
            Self::QuotaAttainment => "quota_attainment",
            Self::ActualOutcome => "actual_outcome",
            Self::DealCount => "deal_count",
            Self::AvgDealSize => "avg_deal_size",
            Self::Commission => "commission",
            Self::Bonuses => "bonuses",
            Self::Spifs => "spifs",
            Self::TotalPayout => "total_payout",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Column {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "actual_sales" {
            return Ok(Self::ActualOutcome);
        }
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| SimError::UnknownVariable { name: s.to_string() })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityMethod {
    /// Absolute Pearson correlation.
    #[default]
    Correlation,
    /// Absolute Spearman correlation.
    RankCorrelation,
}

impl FromStr for SensitivityMethod {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "correlation" | "pearson" => Ok(Self::Correlation),
            "rank_correlation" | "spearman" => Ok(Self::RankCorrelation),
            other => Err(SimError::InvalidArgument(format!(
                "unknown sensitivity method '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub column:      Column,
    pub count:       usize,
    pub mean:        f64,
    pub median:      f64,
    /// Sample standard deviation (n - 1).
    pub std_dev:     f64,
    pub min:         f64,
    pub max:         f64,
    /// `(percentile, value)` pairs, percentiles in 0..=100.
    pub percentiles: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sensitivity {
    pub variable:    Column,
    pub coefficient: f64,
}

/// Headline risk figures for `total_payout`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskMetrics {
    pub expected_payout:          f64,
    pub median_payout:            f64,
    pub std_dev:                  f64,
    pub var_95:                   f64,
    pub var_99:                   f64,
    pub cvar_95:                  f64,
    pub cvar_99:                  f64,
    pub min_payout:               f64,
    pub max_payout:               f64,
    pub coefficient_of_variation: f64,
}

/// Plan cost of one scenario, summed over subjects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScenarioTotal {
    pub scenario_id:  ScenarioId,
    pub commission:   f64,
    pub bonuses:      f64,
    pub spifs:        f64,
    pub total_payout: f64,
}

/// Serialisable bundle for external exporters.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenarios:    usize,
    pub rows:         usize,
    pub risk_metrics: RiskMetrics,
    pub summary:      Vec<ColumnSummary>,
    pub sensitivity:  Vec<Sensitivity>,
    pub events:       Vec<RunEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationResults {
    rows:         Vec<ScenarioRow>,
    payouts:      Vec<Payout>,
    events:       Vec<RunEvent>,
    #[serde(skip)]
    risk_metrics: OnceCell<RiskMetrics>,
}

impl SimulationResults {
    pub fn new(rows: Vec<ScenarioRow>, payouts: Vec<Payout>, events: Vec<RunEvent>) -> SimResult<Self> {
        if rows.is_empty() {
            return Err(SimError::Simulation("simulation produced no scenarios".into()));
        }
        if rows.len() != payouts.len() {
            return Err(SimError::Simulation(format!(
                "{} scenario rows but {} payouts",
                rows.len(),
                payouts.len()
            )));
        }
        Ok(Self { rows, payouts, events, risk_metrics: OnceCell::new() })
    }

    pub fn rows(&self) -> &[ScenarioRow] {
        &self.rows
    }

    pub fn payouts(&self) -> &[Payout] {
        &self.payouts
    }

    /// Structured record of the decisions made while preparing the run.
    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of distinct scenario ids.
    pub fn scenario_count(&self) -> usize {
        let mut ids: Vec<ScenarioId> = self.rows.iter().map(|r| r.scenario_id).collect();
        ids.dedup();
        ids.len()
    }

    /// True when every row carries a value for `column`.
    pub fn has_column(&self, column: Column) -> bool {
        self.rows.iter().zip(&self.payouts).all(|(r, p)| cell(r, p, column).is_some())
    }

    /// All values of a column, or `None` when the column is not present.
    pub fn column(&self, column: Column) -> Option<Vec<f64>> {
        self.rows
            .iter()
            .zip(&self.payouts)
            .map(|(r, p)| cell(r, p, column))
            .collect()
    }

    fn require(&self, column: Column) -> SimResult<Vec<f64>> {
        self.column(column)
            .ok_or_else(|| SimError::UnknownVariable { name: column.name().to_string() })
    }

    /// Per-column statistics with the requested percentiles (0..=100).
    pub fn summary(&self, percentiles: &[f64]) -> SimResult<Vec<ColumnSummary>> {
        if let Some(p) = percentiles.iter().find(|p| !(0.0..=100.0).contains(*p)) {
            return Err(SimError::InvalidArgument(format!("percentile {p} outside 0..=100")));
        }
        Ok(Column::ALL
            .into_iter()
            .filter_map(|c| self.column(c).map(|values| (c, values)))
            .map(|(column, values)| {
                let sorted = stats::sorted(&values);
                ColumnSummary {
                    column,
                    count: sorted.len(),
                    mean: stats::mean(&sorted),
                    median: stats::quantile_sorted(&sorted, 0.5),
                    std_dev: stats::std_dev(&sorted, 1),
                    min: sorted[0],
                    max: sorted[sorted.len() - 1],
                    percentiles: percentiles
                        .iter()
                        .map(|&p| (p, stats::quantile_sorted(&sorted, p / 100.0)))
                        .collect(),
                }
            })
            .collect())
    }

    /// Empirical quantile of `column` at `confidence`.
    pub fn var(&self, confidence: f64, column: Column) -> SimResult<f64> {
        check_confidence(confidence)?;
        let sorted = stats::sorted(&self.require(column)?);
        Ok(stats::quantile_sorted(&sorted, confidence))
    }

    /// Mean of the values at or above the VaR threshold.
    pub fn cvar(&self, confidence: f64, column: Column) -> SimResult<f64> {
        check_confidence(confidence)?;
        let sorted = stats::sorted(&self.require(column)?);
        Ok(tail_mean(&sorted, confidence))
    }

    /// Fraction of rows strictly above `threshold`.
    pub fn prob_exceed(&self, threshold: f64, column: Column) -> SimResult<f64> {
        let values = self.require(column)?;
        let above = values.iter().filter(|v| **v > threshold).count();
        Ok(above as f64 / values.len() as f64)
    }

    /// Rank inputs by absolute correlation with `output`, descending.
    /// Inputs default to the performance columns present in the table;
    /// inputs with zero variance are skipped.
    pub fn sensitivity_analysis(
        &self,
        output: Column,
        inputs: Option<&[Column]>,
        method: SensitivityMethod,
    ) -> SimResult<Vec<Sensitivity>> {
        let y = self.require(output)?;
        let inputs = inputs.unwrap_or(&Column::INPUTS);

        let mut ranked = Vec::new();
        for &input in inputs.iter().filter(|c| **c != output) {
            let Some(x) = self.column(input) else {
                log::debug!("Sensitivity: column {input} not present, skipped");
                continue;
            };
            let r = match method {
                SensitivityMethod::Correlation => stats::pearson(&x, &y),
                SensitivityMethod::RankCorrelation => stats::spearman(&x, &y),
            };
            if r.is_nan() {
                log::debug!("Sensitivity: column {input} has zero variance, skipped");
                continue;
            }
            ranked.push(Sensitivity { variable: input, coefficient: r.abs() });
        }
        ranked.sort_by(|a, b| b.coefficient.total_cmp(&a.coefficient));
        Ok(ranked)
    }

    pub fn risk_metrics(&self) -> &RiskMetrics {
        self.risk_metrics.get_or_init(|| {
            let totals: Vec<f64> = self.payouts.iter().map(|p| p.total_payout).collect();
            let sorted = stats::sorted(&totals);
            let mean = stats::mean(&sorted);
            let std_dev = stats::std_dev(&sorted, 1);
            RiskMetrics {
                expected_payout: mean,
                median_payout: stats::quantile_sorted(&sorted, 0.5),
                std_dev,
                var_95: stats::quantile_sorted(&sorted, 0.95),
                var_99: stats::quantile_sorted(&sorted, 0.99),
                cvar_95: tail_mean(&sorted, 0.95),
                cvar_99: tail_mean(&sorted, 0.99),
                min_payout: sorted[0],
                max_payout: sorted[sorted.len() - 1],
                coefficient_of_variation: if mean != 0.0 { std_dev / mean } else { f64::NAN },
            }
        })
    }

    /// Payouts summed per scenario, in scenario order.
    pub fn scenario_totals(&self) -> Vec<ScenarioTotal> {
        let mut totals: BTreeMap<ScenarioId, ScenarioTotal> = BTreeMap::new();
        for (row, payout) in self.rows.iter().zip(&self.payouts) {
            let t = totals.entry(row.scenario_id).or_insert(ScenarioTotal {
                scenario_id:  row.scenario_id,
                commission:   0.0,
                bonuses:      0.0,
                spifs:        0.0,
                total_payout: 0.0,
            });
            t.commission += payout.commission;
            t.bonuses += payout.bonuses;
            t.spifs += payout.spifs;
            t.total_payout += payout.total_payout;
        }
        totals.into_values().collect()
    }

    pub fn report(&self) -> SimResult<SimulationReport> {
        Ok(SimulationReport {
            scenarios:    self.scenario_count(),
            rows:         self.rows.len(),
            risk_metrics: self.risk_metrics().clone(),
            summary:      self.summary(&DEFAULT_PERCENTILES)?,
            sensitivity:  self.sensitivity_analysis(
                Column::TotalPayout,
                None,
                SensitivityMethod::Correlation,
            )?,
            events:       self.events.clone(),
        })
    }
}

fn cell(row: &ScenarioRow, payout: &Payout, column: Column) -> Option<f64> {
    match column {
        Column::Quota => Some(row.quota),
        Column::QuotaAttainment => Some(row.quota_attainment),
        Column::ActualOutcome => Some(row.actual_outcome),
        Column::DealCount => row.deal_count,
        Column::AvgDealSize => row.avg_deal_size,
        Column::Commission => Some(payout.commission),
        Column::Bonuses => Some(payout.bonuses),
        Column::Spifs => Some(payout.spifs),
        Column::TotalPayout => Some(payout.total_payout),
    }
}

fn check_confidence(confidence: f64) -> SimResult<()> {
    if confidence > 0.0 && confidence < 1.0 {
        Ok(())
    } else {
        Err(SimError::InvalidArgument(format!(
            "confidence must lie in (0, 1), got {confidence}"
        )))
    }
}

/// Mean of the sorted values at or above their `q` quantile.
fn tail_mean(sorted: &[f64], q: f64) -> f64 {
    let threshold = stats::quantile_sorted(sorted, q);
    let start = sorted.partition_point(|v| *v < threshold).min(sorted.len().saturating_sub(1));
    // Summation rounding can put the mean of a flat tail an ulp below it.
    stats::mean(&sorted[start..]).max(threshold)
}
