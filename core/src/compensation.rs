//! Compensation plan and payout calculation.
//!
//! RULE: `calculate` is a pure function of (plan, performance row). It never
//! reads engine state, and `total_payout` is always the sum of the three
//! components.
//!
//! Tiers are marginal bands over quota attainment `[min, max)`: a
//! percentage tier on total sales pays its rate only on the slice of sales
//! that falls inside its band, so a plan's tiers stack like tax brackets.

use crate::{
    data::{PerformanceRecord, Variable},
    error::{SimError, SimResult},
    types::ScenarioId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Anything the calculator can price: a historical record or a synthetic
/// scenario row.
pub trait Performance {
    fn quota(&self) -> f64;
    fn actual_outcome(&self) -> f64;
    /// Value of a metric, `None` when the row does not carry it.
    fn metric(&self, variable: Variable) -> Option<f64>;
    fn scenario_id(&self) -> ScenarioId {
        0
    }
}

impl Performance for PerformanceRecord {
    fn quota(&self) -> f64 {
        self.quota
    }

    fn actual_outcome(&self) -> f64 {
        self.actual_outcome
    }

    fn metric(&self, variable: Variable) -> Option<f64> {
        self.value(variable)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateKind {
    #[default]
    Percentage,
    Flat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierBasis {
    Quota,
    #[default]
    TotalSales,
    IncrementalSales,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerCondition {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
}

impl TriggerCondition {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
        }
    }

    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Ge => value >= threshold,
            Self::Lt => value < threshold,
            Self::Le => value <= threshold,
            Self::Eq => value == threshold,
        }
    }
}

impl fmt::Display for TriggerCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.symbol())
    }
}

impl FromStr for TriggerCondition {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            "==" => Ok(Self::Eq),
            other => Err(SimError::InvalidArgument(format!(
                "unknown trigger condition '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutKind {
    #[default]
    Flat,
    /// `payout` is a fraction of the row's actual outcome.
    PercentOfOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionTier {
    pub name:           String,
    pub attainment_min: f64,
    /// `None` means the band is open-ended.
    #[serde(default)]
    pub attainment_max: Option<f64>,
    pub rate:           f64,
    #[serde(default)]
    pub rate_kind:      RateKind,
    #[serde(default)]
    pub basis:          TierBasis,
}

impl CommissionTier {
    pub fn percentage(
        name: impl Into<String>,
        attainment_min: f64,
        attainment_max: Option<f64>,
        rate: f64,
        basis: TierBasis,
    ) -> Self {
        Self {
            name: name.into(),
            attainment_min,
            attainment_max,
            rate,
            rate_kind: RateKind::Percentage,
            basis,
        }
    }

    pub fn flat(
        name: impl Into<String>,
        attainment_min: f64,
        attainment_max: Option<f64>,
        amount: f64,
    ) -> Self {
        Self {
            name: name.into(),
            attainment_min,
            attainment_max,
            rate: amount,
            rate_kind: RateKind::Flat,
            basis: TierBasis::Quota,
        }
    }

    /// True when `attainment` lies in `[min, max)`.
    pub fn contains(&self, attainment: f64) -> bool {
        attainment >= self.attainment_min
            && self.attainment_max.map_or(true, |max| attainment < max)
    }

    pub fn commission(&self, quota: f64, outcome: f64) -> f64 {
        let attainment = if quota > 0.0 { outcome / quota } else { 0.0 };
        match (self.rate_kind, self.basis) {
            (RateKind::Flat, _) => {
                if self.contains(attainment) {
                    self.rate
                } else {
                    0.0
                }
            }
            (RateKind::Percentage, TierBasis::Quota) => {
                if self.contains(attainment) {
                    self.rate * quota
                } else {
                    0.0
                }
            }
            (RateKind::Percentage, TierBasis::TotalSales) => {
                let lo = self.attainment_min * quota;
                self.rate * self.band_portion(lo, quota, outcome)
            }
            (RateKind::Percentage, TierBasis::IncrementalSales) => {
                let lo = (self.attainment_min * quota).max(quota);
                self.rate * self.band_portion(lo, quota, outcome)
            }
        }
    }

    /// Sales inside `[lo, max * quota)`.
    fn band_portion(&self, lo: f64, quota: f64, outcome: f64) -> f64 {
        let hi = self.attainment_max.map_or(f64::INFINITY, |max| max * quota);
        if hi <= lo {
            return 0.0;
        }
        (outcome.min(hi) - lo).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bonus {
    pub name:              String,
    pub trigger_metric:    Variable,
    pub trigger_condition: TriggerCondition,
    pub trigger_value:     f64,
    pub payout:            f64,
    #[serde(default)]
    pub payout_kind:       PayoutKind,
}

impl Bonus {
    pub fn new(
        name: impl Into<String>,
        trigger_metric: Variable,
        trigger_condition: TriggerCondition,
        trigger_value: f64,
        payout: f64,
    ) -> Self {
        Self {
            name: name.into(),
            trigger_metric,
            trigger_condition,
            trigger_value,
            payout,
            payout_kind: PayoutKind::Flat,
        }
    }

    /// Build from a textual trigger such as `"quota_attainment >= 1.0"`.
    pub fn parse(name: impl Into<String>, trigger: &str, payout: f64) -> SimResult<Self> {
        let parts: Vec<&str> = trigger.split_whitespace().collect();
        let &[metric, condition, value] = parts.as_slice() else {
            return Err(SimError::InvalidArgument(format!(
                "trigger must read '<metric> <condition> <value>', got '{trigger}'"
            )));
        };
        let value: f64 = value.parse().map_err(|_| {
            SimError::InvalidArgument(format!("trigger value '{value}' is not a number"))
        })?;
        Ok(Self::new(name, metric.parse()?, condition.parse()?, value, payout))
    }

    pub fn with_payout_kind(mut self, kind: PayoutKind) -> Self {
        self.payout_kind = kind;
        self
    }

    pub fn evaluate<P: Performance + ?Sized>(&self, row: &P) -> f64 {
        let Some(value) = row.metric(self.trigger_metric) else {
            return 0.0;
        };
        if !self.trigger_condition.holds(value, self.trigger_value) {
            return 0.0;
        }
        match self.payout_kind {
            PayoutKind::Flat => self.payout,
            PayoutKind::PercentOfOutcome => self.payout * row.actual_outcome(),
        }
    }
}

/// Sales performance incentive: a fixed payout once `metric >= target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spif {
    pub name:   String,
    pub metric: Variable,
    pub target: f64,
    pub payout: f64,
}

impl Spif {
    pub fn new(name: impl Into<String>, metric: Variable, target: f64, payout: f64) -> Self {
        Self { name: name.into(), metric, target, payout }
    }

    pub fn evaluate<P: Performance + ?Sized>(&self, row: &P) -> f64 {
        match row.metric(self.metric) {
            Some(v) if v >= self.target => self.payout,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationPlan {
    pub plan_id: String,
    pub name:    String,
    #[serde(default)]
    pub tiers:   Vec<CommissionTier>,
    #[serde(default)]
    pub bonuses: Vec<Bonus>,
    #[serde(default)]
    pub spifs:   Vec<Spif>,
}

impl CompensationPlan {
    pub fn new(plan_id: impl Into<String>) -> Self {
        let plan_id = plan_id.into();
        Self {
            name: plan_id.clone(),
            plan_id,
            tiers: Vec::new(),
            bonuses: Vec::new(),
            spifs: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn add_tier(mut self, tier: CommissionTier) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn add_bonus(mut self, bonus: Bonus) -> Self {
        self.bonuses.push(bonus);
        self
    }

    pub fn add_spif(mut self, spif: Spif) -> Self {
        self.spifs.push(spif);
        self
    }

    /// Reject plans the calculator cannot price consistently.
    pub fn validate(&self) -> SimResult<()> {
        for tier in &self.tiers {
            if !tier.attainment_min.is_finite() || !tier.rate.is_finite() {
                return Err(SimError::Configuration(format!(
                    "tier '{}' has a non-finite bound or rate",
                    tier.name
                )));
            }
            if let Some(max) = tier.attainment_max {
                if max.is_nan() || max < tier.attainment_min {
                    return Err(SimError::Configuration(format!(
                        "tier '{}' has max {max} below min {}",
                        tier.name, tier.attainment_min
                    )));
                }
            }
        }
        if let Some(b) = self.bonuses.iter().find(|b| !b.payout.is_finite()) {
            return Err(SimError::Configuration(format!("bonus '{}' has a non-finite payout", b.name)));
        }
        if let Some(s) = self.spifs.iter().find(|s| !s.payout.is_finite()) {
            return Err(SimError::Configuration(format!("SPIF '{}' has a non-finite payout", s.name)));
        }
        Ok(())
    }
}

/// Payout breakdown for one row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub commission:   f64,
    pub bonuses:      f64,
    pub spifs:        f64,
    pub total_payout: f64,
}

/// Price one performance row against a plan.
pub fn calculate<P: Performance + ?Sized>(plan: &CompensationPlan, row: &P) -> Payout {
    let quota = row.quota();
    let outcome = row.actual_outcome();
    let commission: f64 = plan.tiers.iter().map(|t| t.commission(quota, outcome)).sum();
    let bonuses: f64 = plan.bonuses.iter().map(|b| b.evaluate(row)).sum();
    let spifs: f64 = plan.spifs.iter().map(|s| s.evaluate(row)).sum();
    Payout {
        commission,
        bonuses,
        spifs,
        total_payout: commission + bonuses + spifs,
    }
}

/// Batch calculator. Rows are priced scenario by scenario; the output
/// keeps the input row order.
pub struct CompensationEngine<'a> {
    plan: &'a CompensationPlan,
}

impl<'a> CompensationEngine<'a> {
    pub fn new(plan: &'a CompensationPlan) -> Self {
        Self { plan }
    }

    pub fn calculate<P: Performance>(&self, row: &P) -> Payout {
        calculate(self.plan, row)
    }

    pub fn calculate_batch<P: Performance>(&self, rows: &[P]) -> Vec<Payout> {
        let mut groups: BTreeMap<ScenarioId, Vec<usize>> = BTreeMap::new();
        for (i, row) in rows.iter().enumerate() {
            groups.entry(row.scenario_id()).or_default().push(i);
        }

        let mut payouts = vec![Payout::default(); rows.len()];
        for (scenario, indices) in &groups {
            let mut scenario_total = 0.0;
            for &i in indices {
                let payout = self.calculate(&rows[i]);
                scenario_total += payout.total_payout;
                payouts[i] = payout;
            }
            log::debug!(
                "scenario={scenario} plan={}: {} rows, total payout {scenario_total:.2}",
                self.plan.plan_id,
                indices.len()
            );
        }
        payouts
    }
}
