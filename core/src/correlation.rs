//! Correlation estimation, validation and repair.
//!
//! A matrix handed to the sampler must be symmetric, unit-diagonal,
//! bounded by [-1, 1] and positive semi-definite. Estimated matrices that
//! fail only the PSD check are replaced by the nearest PSD matrix (eigen
//! floor + diagonal rescale); the replacement is logged and flagged on the
//! matrix. Structural failures are errors.

use crate::{
    data::{PerformanceRecord, Variable},
    error::{CorrelationMatrixError, SimError, SimResult},
    stats,
};
use nalgebra::{Cholesky, DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Eigenvalues at or above this count as PSD (numerical slack).
pub const PSD_TOLERANCE: f64 = -1e-10;
/// Floor applied to eigenvalues during repair.
pub const EIGEN_FLOOR: f64 = 1e-8;
const STRUCTURE_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
    Kendall,
}

impl CorrelationMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pearson => "pearson",
            Self::Spearman => "spearman",
            Self::Kendall => "kendall",
        }
    }

    pub fn coefficient(&self, x: &[f64], y: &[f64]) -> f64 {
        match self {
            Self::Pearson => stats::pearson(x, y),
            Self::Spearman => stats::spearman(x, y),
            Self::Kendall => stats::kendall(x, y),
        }
    }
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for CorrelationMethod {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pearson" | "linear" => Ok(Self::Pearson),
            "spearman" | "rank" => Ok(Self::Spearman),
            "kendall" => Ok(Self::Kendall),
            other => Err(SimError::InvalidArgument(format!(
                "unknown correlation method '{other}'"
            ))),
        }
    }
}

/// A labelled correlation matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    variables: Vec<Variable>,
    values: DMatrix<f64>,
    /// Smallest eigenvalue before repair, when a repair happened.
    repaired_from: Option<f64>,
}

impl CorrelationMatrix {
    /// Build from row-major values. Checks shape, symmetry, diagonal and
    /// range; positive definiteness is checked later, at factorization.
    pub fn new(
        variables: Vec<Variable>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, CorrelationMatrixError> {
        let n = variables.len();
        if rows.len() != n || rows.iter().any(|r| r.len() != n) {
            return Err(CorrelationMatrixError::Shape {
                expected: n,
                rows: rows.len(),
                cols: rows.first().map_or(0, Vec::len),
            });
        }
        Self::from_matrix(variables, DMatrix::from_fn(n, n, |i, j| rows[i][j]))
    }

    pub fn from_matrix(
        variables: Vec<Variable>,
        values: DMatrix<f64>,
    ) -> Result<Self, CorrelationMatrixError> {
        check_structure(&values, variables.len())?;
        Ok(Self { variables, values, repaired_from: None })
    }

    pub fn identity(variables: Vec<Variable>) -> Self {
        let n = variables.len();
        Self { variables, values: DMatrix::identity(n, n), repaired_from: None }
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.variables.len()
    }

    pub fn get(&self, a: Variable, b: Variable) -> Option<f64> {
        let i = self.variables.iter().position(|v| *v == a)?;
        let j = self.variables.iter().position(|v| *v == b)?;
        Some(self.values[(i, j)])
    }

    pub fn is_repaired(&self) -> bool {
        self.repaired_from.is_some()
    }

    /// Minimum eigenvalue observed before the repair, if one happened.
    pub fn repaired_from(&self) -> Option<f64> {
        self.repaired_from
    }

    pub fn min_eigenvalue(&self) -> f64 {
        min_eigenvalue(&self.values)
    }

    pub fn is_positive_semi_definite(&self) -> bool {
        self.min_eigenvalue() >= PSD_TOLERANCE
    }

    /// The nearest PSD correlation matrix, flagged as repaired when it was
    /// not PSD to begin with.
    pub fn repaired(&self) -> Self {
        let before = self.min_eigenvalue();
        Self {
            variables: self.variables.clone(),
            values: nearest_positive_definite(&self.values),
            repaired_from: self.repaired_from.or((before < PSD_TOLERANCE).then_some(before)),
        }
    }

    /// Lower Cholesky factor.
    pub fn cholesky(&self) -> Result<DMatrix<f64>, CorrelationMatrixError> {
        cholesky(&self.values)
    }
}

fn check_structure(m: &DMatrix<f64>, expected: usize) -> Result<(), CorrelationMatrixError> {
    if m.nrows() != expected || m.ncols() != expected {
        return Err(CorrelationMatrixError::Shape {
            expected,
            rows: m.nrows(),
            cols: m.ncols(),
        });
    }
    for i in 0..expected {
        let d = m[(i, i)];
        if (d - 1.0).abs() > STRUCTURE_TOLERANCE {
            return Err(CorrelationMatrixError::Diagonal { index: i, value: d });
        }
        for j in 0..expected {
            let v = m[(i, j)];
            if !v.is_finite() || v.abs() > 1.0 + STRUCTURE_TOLERANCE {
                return Err(CorrelationMatrixError::OutOfRange { row: i, col: j, value: v });
            }
            if j > i && (v - m[(j, i)]).abs() > STRUCTURE_TOLERANCE {
                return Err(CorrelationMatrixError::Asymmetric { row: i, col: j });
            }
        }
    }
    Ok(())
}

/// Validate a raw matrix. Structural problems are errors; `Ok(false)`
/// means the matrix is well-formed but not positive semi-definite.
pub fn validate(m: &DMatrix<f64>) -> Result<bool, CorrelationMatrixError> {
    check_structure(m, m.nrows())?;
    let min_eig = min_eigenvalue(m);
    if min_eig < PSD_TOLERANCE {
        log::warn!("Correlation matrix is not positive semi-definite (min eigenvalue {min_eig:.3e})");
        return Ok(false);
    }
    Ok(true)
}

pub fn min_eigenvalue(m: &DMatrix<f64>) -> f64 {
    let sym = (m + m.transpose()) * 0.5;
    SymmetricEigen::new(sym)
        .eigenvalues
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min)
}

/// Nearest PSD correlation matrix: symmetrize, floor the eigenvalues,
/// reconstruct, then rescale so the diagonal is exactly one.
pub fn nearest_positive_definite(m: &DMatrix<f64>) -> DMatrix<f64> {
    let n = m.nrows();
    let sym = (m + m.transpose()) * 0.5;
    let eigen = SymmetricEigen::new(sym);
    let floored = eigen.eigenvalues.map(|v| v.max(EIGEN_FLOOR));
    let rebuilt =
        &eigen.eigenvectors * DMatrix::from_diagonal(&floored) * eigen.eigenvectors.transpose();

    let inv_sqrt: Vec<f64> = (0..n).map(|i| 1.0 / rebuilt[(i, i)].sqrt()).collect();
    let mut out = DMatrix::from_fn(n, n, |i, j| rebuilt[(i, j)] * inv_sqrt[i] * inv_sqrt[j]);

    // Exact symmetry and unit diagonal, whatever the rounding did.
    for i in 0..n {
        out[(i, i)] = 1.0;
        for j in (i + 1)..n {
            let v = (0.5 * (out[(i, j)] + out[(j, i)])).clamp(-1.0, 1.0);
            out[(i, j)] = v;
            out[(j, i)] = v;
        }
    }
    log::info!("Adjusted to nearest positive definite matrix");
    out
}

/// Lower Cholesky factor. Shape/range problems keep their own variants;
/// only a genuine factorization failure is `NotPositiveDefinite`.
pub fn cholesky(m: &DMatrix<f64>) -> Result<DMatrix<f64>, CorrelationMatrixError> {
    check_structure(m, m.nrows())?;
    Cholesky::new(m.clone())
        .map(|c| c.l())
        .ok_or(CorrelationMatrixError::NotPositiveDefinite)
}

/// Estimate the correlation matrix of the requested variables only.
///
/// Off-diagonal entries with |r| < `min_correlation` are zeroed after
/// estimation. A non-PSD result is repaired and flagged, never replaced by
/// the identity.
pub fn estimate(
    records: &[PerformanceRecord],
    variables: &[Variable],
    method: CorrelationMethod,
    min_correlation: f64,
) -> SimResult<CorrelationMatrix> {
    let n = variables.len();
    if n == 0 {
        return Err(SimError::InvalidArgument("no variables requested".into()));
    }
    log::info!("Estimating {method} correlation matrix for {n} variables");

    let mut values = DMatrix::identity(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let (x, y) = paired_columns(records, variables[i], variables[j]);
            let r = method.coefficient(&x, &y);
            if r.is_nan() {
                let culprit = if x.len() < 2 || stats::variance(&x, 0) == 0.0 {
                    variables[i]
                } else {
                    variables[j]
                };
                return Err(CorrelationMatrixError::Degenerate {
                    variable: culprit.name().to_string(),
                }
                .into());
            }
            let r = if r.abs() < min_correlation { 0.0 } else { r };
            values[(i, j)] = r;
            values[(j, i)] = r;
        }
    }

    let matrix = CorrelationMatrix::from_matrix(variables.to_vec(), values)?;
    if validate(matrix.values())? {
        return Ok(matrix);
    }
    let repaired = matrix.repaired();
    log::warn!(
        "Estimated correlation matrix replaced by nearest PSD matrix (min eigenvalue was {:.3e})",
        repaired.repaired_from().unwrap_or(f64::NAN)
    );
    Ok(repaired)
}

/// Pairwise-complete observations of two variables.
fn paired_columns(records: &[PerformanceRecord], a: Variable, b: Variable) -> (Vec<f64>, Vec<f64>) {
    records
        .iter()
        .filter_map(|r| match (r.value(a), r.value(b)) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some((x, y)),
            _ => None,
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_errors_are_distinct_from_pd_failure() {
        let asym = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.2, 1.0]);
        assert!(matches!(cholesky(&asym), Err(CorrelationMatrixError::Asymmetric { .. })));

        let range = DMatrix::from_row_slice(2, 2, &[1.0, 1.5, 1.5, 1.0]);
        assert!(matches!(cholesky(&range), Err(CorrelationMatrixError::OutOfRange { .. })));

        let not_pd = DMatrix::from_row_slice(
            3,
            3,
            &[1.0, 0.9, -0.9, 0.9, 1.0, 0.9, -0.9, 0.9, 1.0],
        );
        assert_eq!(cholesky(&not_pd), Err(CorrelationMatrixError::NotPositiveDefinite));
    }

    #[test]
    fn repair_restores_unit_diagonal_and_psd() {
        let bad = DMatrix::from_row_slice(
            3,
            3,
            &[1.0, 0.9, -0.9, 0.9, 1.0, 0.9, -0.9, 0.9, 1.0],
        );
        assert_eq!(validate(&bad), Ok(false));
        let fixed = nearest_positive_definite(&bad);
        for i in 0..3 {
            assert_eq!(fixed[(i, i)], 1.0);
            for j in 0..3 {
                assert_eq!(fixed[(i, j)], fixed[(j, i)]);
            }
        }
        assert!(min_eigenvalue(&fixed) >= PSD_TOLERANCE);
        assert!(cholesky(&fixed).is_ok());
    }
}
