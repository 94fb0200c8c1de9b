//! Correlated multivariate sampling via a Gaussian copula.
//!
//! Each variable is sampled on its own stream, pushed through its CDF and
//! the standard normal quantile, mixed with the Cholesky factor of the
//! target correlation matrix, and pulled back through the normal CDF and the
//! variable's own quantile. Marginals are preserved; the rank structure
//! follows the target correlation.

use crate::{
    correlation::{self, CorrelationMatrix},
    data::Variable,
    distribution::{std_normal_cdf, std_normal_quantile, Marginal},
    error::{CorrelationMatrixError, SimResult},
    rng::derive_seed,
    sampling::SamplingStrategy,
};
use nalgebra::DMatrix;

/// Uniforms are kept this far from 0 and 1 before the normal quantile.
const UNIT_CLIP: f64 = 1e-12;

pub struct MultivariateSampler {
    variables: Vec<Variable>,
    marginals: Vec<Marginal>,
    /// Lower Cholesky factor, present only for correlated sampling.
    factor: Option<DMatrix<f64>>,
    repaired_from: Option<f64>,
    strategy: Box<dyn SamplingStrategy>,
}

impl MultivariateSampler {
    /// `correlation` may list its variables in any order and may cover more
    /// variables than are sampled; every sampled variable must appear in it.
    pub fn new(
        marginals: Vec<(Variable, Marginal)>,
        correlation: Option<&CorrelationMatrix>,
        strategy: Box<dyn SamplingStrategy>,
    ) -> SimResult<Self> {
        let (variables, marginals): (Vec<_>, Vec<_>) = marginals.into_iter().unzip();
        let mut sampler = Self {
            variables,
            marginals,
            factor: None,
            repaired_from: None,
            strategy,
        };
        if let Some(matrix) = correlation {
            if sampler.variables.len() > 1 {
                sampler.resolve_factor(matrix)?;
            }
        }
        Ok(sampler)
    }

    fn resolve_factor(&mut self, matrix: &CorrelationMatrix) -> SimResult<()> {
        let k = self.variables.len();
        let positions = self
            .variables
            .iter()
            .map(|v| matrix.variables().iter().position(|m| m == v))
            .collect::<Option<Vec<usize>>>()
            .ok_or(CorrelationMatrixError::Shape {
                expected: k,
                rows: matrix.dim(),
                cols: matrix.dim(),
            })?;
        let sub = DMatrix::from_fn(k, k, |i, j| matrix.values()[(positions[i], positions[j])]);

        let factor = match correlation::cholesky(&sub) {
            Ok(l) => l,
            Err(CorrelationMatrixError::NotPositiveDefinite) => {
                let min_eig = correlation::min_eigenvalue(&sub);
                log::warn!(
                    "Correlation matrix not positive definite (min eigenvalue {min_eig:.3e}); \
                     sampling with nearest PD matrix"
                );
                let fixed = correlation::nearest_positive_definite(&sub);
                self.repaired_from = Some(min_eig);
                correlation::cholesky(&fixed)?
            }
            Err(other) => return Err(other.into()),
        };
        self.factor = Some(factor);
        Ok(())
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn is_correlated(&self) -> bool {
        self.factor.is_some()
    }

    /// True when the sampler substituted a repaired matrix for the one it
    /// was given.
    pub fn correlation_repaired(&self) -> bool {
        self.repaired_from.is_some()
    }

    /// Smallest eigenvalue of the matrix that had to be repaired.
    pub fn repaired_from(&self) -> Option<f64> {
        self.repaired_from
    }

    /// `count x variables` matrix of samples; column order follows
    /// `variables()`.
    pub fn sample(&self, count: usize, seed: u64) -> DMatrix<f64> {
        let k = self.variables.len();
        let mut samples = DMatrix::zeros(count, k);
        for (col, (variable, marginal)) in self.variables.iter().zip(&self.marginals).enumerate() {
            let stream = derive_seed(seed, &[variable.slot()]);
            let values = self.strategy.sample(marginal, count, stream);
            samples.set_column(col, &nalgebra::DVector::from_vec(values));
        }

        let Some(factor) = &self.factor else {
            return samples;
        };

        let normals = DMatrix::from_fn(count, k, |r, c| {
            let u = self.marginals[c].cdf(samples[(r, c)]);
            std_normal_quantile(u.clamp(UNIT_CLIP, 1.0 - UNIT_CLIP))
        });
        let correlated = normals * factor.transpose();
        let out = DMatrix::from_fn(count, k, |r, c| {
            let u = std_normal_cdf(correlated[(r, c)]);
            self.marginals[c].quantile(u.clamp(UNIT_CLIP, 1.0 - UNIT_CLIP))
        });
        log::debug!("Applied correlation to {k} variables over {count} samples");
        out
    }
}
