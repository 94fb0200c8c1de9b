//! Payout calculation against known plans.

use comp_risk_core::{
    calculate,
    compensation::{
        Bonus, CommissionTier, CompensationEngine, PayoutKind, Spif, TierBasis, TriggerCondition,
    },
    data::{PerformanceRecord, Variable},
    scenario::ScenarioRow,
    CompensationPlan,
};

fn four_tier_plan() -> CompensationPlan {
    CompensationPlan::new("standard")
        .add_tier(CommissionTier::percentage("base", 0.0, Some(0.75), 0.02, TierBasis::TotalSales))
        .add_tier(CommissionTier::percentage("target", 0.75, Some(1.0), 0.03, TierBasis::TotalSales))
        .add_tier(CommissionTier::percentage("stretch", 1.0, Some(1.25), 0.045, TierBasis::TotalSales))
        .add_tier(CommissionTier::percentage("excellence", 1.25, None, 0.06, TierBasis::TotalSales))
}

fn row(scenario_id: u64, subject: &str, quota: f64, attainment: f64) -> ScenarioRow {
    ScenarioRow {
        scenario_id,
        subject_id: subject.to_string(),
        quota,
        quota_attainment: attainment,
        actual_outcome: quota * attainment,
        deal_count: None,
        avg_deal_size: None,
    }
}

#[test]
fn single_flat_rate_tier_pays_five_percent_of_sales() {
    let plan = CompensationPlan::new("flat")
        .add_tier(CommissionTier::percentage("all", 0.0, None, 0.05, TierBasis::TotalSales));
    let record = PerformanceRecord::new("rep-1", "2024-Q1", 100_000.0, 100_000.0);

    let payout = calculate(&plan, &record);
    assert_eq!(payout.commission, 5_000.0);
    assert_eq!(payout.bonuses, 0.0);
    assert_eq!(payout.total_payout, 5_000.0);
}

#[test]
fn four_tier_plan_at_exactly_quota() {
    let record = PerformanceRecord::new("rep-1", "2024-Q1", 100_000.0, 100_000.0);
    let payout = calculate(&four_tier_plan(), &record);
    assert!((payout.commission - 2_250.0).abs() < 1e-9, "{}", payout.commission);
}

#[test]
fn four_tier_plan_accelerates_above_quota() {
    let record = PerformanceRecord::new("rep-1", "2024-Q1", 100_000.0, 150_000.0);
    let payout = calculate(&four_tier_plan(), &record);
    // 1,500 + 750 + 25,000 * 4.5% + 25,000 * 6%
    assert!((payout.commission - 4_875.0).abs() < 1e-9, "{}", payout.commission);
}

#[test]
fn quota_basis_and_flat_tiers_pay_when_in_band() {
    let plan = CompensationPlan::new("mixed")
        .add_tier(CommissionTier::percentage("quota-kicker", 1.0, None, 0.01, TierBasis::Quota))
        .add_tier(CommissionTier::flat("participation", 0.5, Some(1.0), 250.0));

    let below = calculate(&plan, &PerformanceRecord::new("r", "p", 50_000.0, 40_000.0));
    assert_eq!(below.commission, 250.0);

    let above = calculate(&plan, &PerformanceRecord::new("r", "p", 50_000.0, 60_000.0));
    assert_eq!(above.commission, 500.0);

    let nothing = calculate(&plan, &PerformanceRecord::new("r", "p", 50_000.0, 10_000.0));
    assert_eq!(nothing.commission, 0.0);
}

#[test]
fn bonuses_and_spifs_add_to_the_total() {
    let plan = four_tier_plan()
        .add_bonus(Bonus::parse("club", "quota_attainment >= 1.0", 1_000.0).unwrap())
        .add_bonus(
            Bonus::new("kicker", Variable::ActualOutcome, TriggerCondition::Gt, 120_000.0, 0.01)
                .with_payout_kind(PayoutKind::PercentOfOutcome),
        )
        .add_spif(Spif::new("volume", Variable::DealCount, 20.0, 300.0));

    let record = PerformanceRecord::new("rep-1", "2024-Q1", 100_000.0, 130_000.0).with_deals(25, 5_200.0);
    let payout = calculate(&plan, &record);
    assert_eq!(payout.bonuses, 1_000.0 + 1_300.0);
    assert_eq!(payout.spifs, 300.0);
    assert!((payout.total_payout - (payout.commission + payout.bonuses + payout.spifs)).abs() < 1e-9);
}

#[test]
fn missing_metric_never_triggers() {
    let plan = CompensationPlan::new("spif-only").add_spif(Spif::new("volume", Variable::DealCount, 0.0, 300.0));
    let payout = calculate(&plan, &PerformanceRecord::new("rep-1", "p", 100.0, 100.0));
    assert_eq!(payout.spifs, 0.0);
}

#[test]
fn batch_output_keeps_row_order() {
    let plan = four_tier_plan();
    let rows = vec![
        row(0, "a", 100_000.0, 1.0),
        row(0, "b", 100_000.0, 0.5),
        row(1, "a", 100_000.0, 0.5),
        row(1, "b", 100_000.0, 1.0),
    ];
    let payouts = CompensationEngine::new(&plan).calculate_batch(&rows);
    assert_eq!(payouts.len(), 4);
    assert_eq!(payouts[0], payouts[3]);
    assert_eq!(payouts[1], payouts[2]);
    assert!(payouts[0].total_payout > payouts[1].total_payout);
}

#[test]
fn plan_deserializes_from_json() {
    let plan: CompensationPlan = serde_json::from_str(
        r#"{
            "plan_id": "fy25-ae",
            "name": "FY25 Account Executive",
            "tiers": [
                {"name": "base", "attainment_min": 0.0, "attainment_max": 1.0, "rate": 0.05},
                {"name": "accel", "attainment_min": 1.0, "rate": 0.08, "basis": "incremental_sales"}
            ],
            "bonuses": [
                {"name": "club", "trigger_metric": "quota_attainment", "trigger_condition": ">=",
                 "trigger_value": 1.1, "payout": 2500.0}
            ],
            "spifs": [
                {"name": "logos", "metric": "deal_count", "target": 10, "payout": 500.0}
            ]
        }"#,
    )
    .unwrap();
    plan.validate().unwrap();
    assert_eq!(plan.tiers[1].basis, TierBasis::IncrementalSales);
    assert_eq!(plan.tiers[1].attainment_max, None);
    assert_eq!(plan.bonuses[0].trigger_condition, TriggerCondition::Ge);

    let payout = calculate(&plan, &PerformanceRecord::new("r", "p", 100_000.0, 120_000.0));
    assert!((payout.commission - (5_000.0 + 1_600.0)).abs() < 1e-9);
    assert_eq!(payout.bonuses, 2_500.0);
}
