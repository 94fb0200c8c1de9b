//! Correlation estimation, validation and nearest-PSD repair.

use comp_risk_core::{
    correlation::{self, CorrelationMatrix, CorrelationMethod, PSD_TOLERANCE},
    data::{PerformanceRecord, Variable},
    CorrelationMatrixError, SimError,
};
use nalgebra::DMatrix;
use proptest::prelude::*;

/// Records where deal count tracks attainment closely and deal size does not.
fn records() -> Vec<PerformanceRecord> {
    (0..60)
        .map(|i| {
            let attainment = 0.5 + f64::from(i) / 60.0;
            let deals = (attainment * 20.0).round() as u32 + (i % 3) as u32;
            let size = 1_000.0 + f64::from((i * 37) % 11) * 25.0;
            PerformanceRecord::new(format!("rep-{}", i % 4), format!("p{i}"), 10_000.0, attainment * 10_000.0)
                .with_deals(deals, size)
        })
        .collect()
}

fn correlation_matrix(seed_rows: &[Vec<f64>]) -> DMatrix<f64> {
    let n = seed_rows.len();
    let a = DMatrix::from_fn(n, seed_rows[0].len(), |i, j| seed_rows[i][j]);
    let gram = &a * a.transpose() + DMatrix::identity(n, n) * 0.1;
    DMatrix::from_fn(n, n, |i, j| gram[(i, j)] / (gram[(i, i)] * gram[(j, j)]).sqrt())
}

#[test]
fn only_requested_variables_are_estimated() {
    let vars = [Variable::QuotaAttainment, Variable::DealCount];
    let m = correlation::estimate(&records(), &vars, CorrelationMethod::Pearson, 0.0).unwrap();
    assert_eq!(m.dim(), 2);
    assert_eq!(m.variables(), &vars);
    assert!(m.get(Variable::QuotaAttainment, Variable::DealCount).unwrap() > 0.9);
    assert!(m.get(Variable::QuotaAttainment, Variable::AvgDealSize).is_none());
    assert!(!m.is_repaired());
}

#[test]
fn threshold_zeroes_weak_entries_but_keeps_diagonal() {
    let vars = Variable::SAMPLED;
    let loose = correlation::estimate(&records(), &vars, CorrelationMethod::Spearman, 0.0).unwrap();
    let strict = correlation::estimate(&records(), &vars, CorrelationMethod::Spearman, 0.5).unwrap();

    for i in 0..3 {
        assert_eq!(strict.values()[(i, i)], 1.0);
        for j in 0..3 {
            let before = loose.values()[(i, j)];
            let after = strict.values()[(i, j)];
            if i != j && before.abs() < 0.5 {
                assert_eq!(after, 0.0);
            } else {
                assert_eq!(after, before);
            }
        }
    }
}

#[test]
fn zero_variance_column_is_degenerate() {
    let flat: Vec<PerformanceRecord> = records()
        .into_iter()
        .map(|r| {
            let size = r.avg_deal_size.unwrap_or(0.0);
            r.with_deals(5, size)
        })
        .collect();
    let err = correlation::estimate(
        &flat,
        &[Variable::QuotaAttainment, Variable::DealCount],
        CorrelationMethod::Pearson,
        0.0,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        SimError::CorrelationMatrix(CorrelationMatrixError::Degenerate { ref variable }) if variable == "deal_count"
    ));
}

#[test]
fn malformed_matrices_are_rejected_at_construction() {
    let vars = vec![Variable::QuotaAttainment, Variable::DealCount];
    assert!(matches!(
        CorrelationMatrix::new(vars.clone(), vec![vec![1.0, 0.3]]),
        Err(CorrelationMatrixError::Shape { .. })
    ));
    assert!(matches!(
        CorrelationMatrix::new(vars.clone(), vec![vec![0.9, 0.3], vec![0.3, 1.0]]),
        Err(CorrelationMatrixError::Diagonal { index: 0, .. })
    ));
    assert!(matches!(
        CorrelationMatrix::new(vars, vec![vec![1.0, 0.3], vec![0.2, 1.0]]),
        Err(CorrelationMatrixError::Asymmetric { .. })
    ));
}

#[test]
fn inconsistent_matrix_is_repaired_and_flagged() {
    let m = CorrelationMatrix::new(
        Variable::SAMPLED.to_vec(),
        vec![vec![1.0, 0.9, -0.9], vec![0.9, 1.0, 0.9], vec![-0.9, 0.9, 1.0]],
    )
    .unwrap();
    assert!(!m.is_positive_semi_definite());
    assert_eq!(m.cholesky(), Err(CorrelationMatrixError::NotPositiveDefinite));

    let fixed = m.repaired();
    assert!(fixed.is_repaired());
    assert!(fixed.repaired_from().unwrap() < PSD_TOLERANCE);
    assert!(fixed.is_positive_semi_definite());
    assert!(fixed.cholesky().is_ok());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn repair_is_idempotent_on_valid_matrices(
        rows in prop::collection::vec(prop::collection::vec(-1.0f64..1.0, 4), 2..6)
    ) {
        let m = correlation_matrix(&rows);
        prop_assert_eq!(correlation::validate(&m), Ok(true));

        let once = correlation::nearest_positive_definite(&m);
        let twice = correlation::nearest_positive_definite(&once);
        for (a, b) in once.iter().zip(twice.iter()) {
            prop_assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
        // Already PSD: the repair leaves it where it was.
        for (a, b) in m.iter().zip(once.iter()) {
            prop_assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
    }
}
