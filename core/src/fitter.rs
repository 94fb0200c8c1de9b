//! Distribution fitting: estimate each candidate family from empirical
//! data, score it with a Kolmogorov-Smirnov test, and pick the best.
//!
//! Selection rule: highest KS p-value wins. On an exact tie the family
//! examined first (in `DistributionFamily::ALL` order, or the caller's
//! candidate order) is kept.

use crate::{
    data::{PerformanceRecord, Variable},
    distribution::{DistributionFamily, Marginal},
    error::{SimError, SimResult},
    stats,
};
use serde::Serialize;
use statrs::function::gamma::digamma;
use std::collections::BTreeMap;
use std::f64::consts::PI;

pub const DEFAULT_MIN_DATA_POINTS: usize = 30;
pub const DEFAULT_OUTLIER_SIGMA: f64 = 3.0;

/// One-sample KS test outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GoodnessOfFit {
    pub statistic: f64,
    pub p_value: f64,
    pub sample_size: usize,
}

/// A family fitted to one variable. Never mutated; a refit replaces it.
#[derive(Debug, Clone, Serialize)]
pub struct FittedDistribution {
    pub variable_name: String,
    pub family: DistributionFamily,
    pub parameters: BTreeMap<String, f64>,
    pub goodness_of_fit: Option<GoodnessOfFit>,
    pub outliers_removed: usize,
    #[serde(skip)]
    marginal: Marginal,
}

impl FittedDistribution {
    fn new(
        marginal: Marginal,
        goodness_of_fit: Option<GoodnessOfFit>,
        outliers_removed: usize,
    ) -> Self {
        Self {
            variable_name: "value".to_string(),
            family: marginal.family(),
            parameters: marginal.parameters(),
            goodness_of_fit,
            outliers_removed,
            marginal,
        }
    }

    /// A hand-specified distribution with no goodness-of-fit attached.
    pub fn specified(variable_name: impl Into<String>, marginal: Marginal) -> Self {
        Self::new(marginal, None, 0).named(variable_name)
    }

    pub fn named(mut self, variable_name: impl Into<String>) -> Self {
        self.variable_name = variable_name.into();
        self
    }

    pub fn marginal(&self) -> &Marginal {
        &self.marginal
    }

    pub fn p_value(&self) -> Option<f64> {
        self.goodness_of_fit.map(|g| g.p_value)
    }

    pub fn cdf(&self, x: f64) -> f64 {
        self.marginal.cdf(x)
    }

    pub fn quantile(&self, p: f64) -> f64 {
        self.marginal.quantile(p)
    }
}

/// Auto-fit outcome: the winner plus what happened to every candidate.
#[derive(Debug, Clone)]
pub struct AutoFit {
    pub best: FittedDistribution,
    /// p-value of every family that fitted, in examination order.
    pub scores: Vec<(DistributionFamily, f64)>,
    /// Families that failed to fit, with the reason.
    pub rejected: Vec<(DistributionFamily, String)>,
}

#[derive(Debug, Clone)]
pub struct DistributionFitter {
    pub min_data_points: usize,
    pub outlier_sigma: f64,
}

impl Default for DistributionFitter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DATA_POINTS)
    }
}

impl DistributionFitter {
    pub fn new(min_data_points: usize) -> Self {
        Self {
            min_data_points,
            outlier_sigma: DEFAULT_OUTLIER_SIGMA,
        }
    }

    pub fn with_outlier_sigma(mut self, sigma: f64) -> Self {
        self.outlier_sigma = sigma;
        self
    }

    /// Fit one specific family.
    pub fn fit(
        &self,
        data: &[f64],
        family: DistributionFamily,
        remove_outliers: bool,
        test_fit: bool,
    ) -> SimResult<FittedDistribution> {
        let (clean, removed) = self.prepare(data, remove_outliers)?;
        fit_prepared(&clean, family, removed, test_fit)
    }

    /// Try every candidate (all families when `None`) and keep the best.
    pub fn auto_fit(
        &self,
        data: &[f64],
        candidates: Option<&[DistributionFamily]>,
    ) -> SimResult<FittedDistribution> {
        self.auto_fit_detailed(data, candidates, false).map(|fit| fit.best)
    }

    pub fn auto_fit_detailed(
        &self,
        data: &[f64],
        candidates: Option<&[DistributionFamily]>,
        remove_outliers: bool,
    ) -> SimResult<AutoFit> {
        let candidates = candidates.unwrap_or(&DistributionFamily::ALL);
        let (clean, removed) = self.prepare(data, remove_outliers)?;
        log::info!("Auto-fitting {} candidate families to {} points", candidates.len(), clean.len());

        let mut best: Option<(f64, FittedDistribution)> = None;
        let mut scores = Vec::new();
        let mut rejected = Vec::new();

        for &family in candidates {
            match fit_prepared(&clean, family, removed, true) {
                Ok(fitted) => {
                    let p = fitted.p_value().filter(|p| !p.is_nan()).unwrap_or(-1.0);
                    log::debug!("{family}: p-value = {p:.4}");
                    scores.push((family, p));
                    // Strict comparison: ties keep the earlier family.
                    let better = best.as_ref().map_or(true, |(best_p, _)| p > *best_p);
                    if better {
                        best = Some((p, fitted));
                    }
                }
                Err(e) => {
                    log::warn!("Failed to fit {family}: {e}");
                    rejected.push((family, e.to_string()));
                }
            }
        }

        let (best_p, best) = best.ok_or_else(|| {
            SimError::DistributionFitting(format!(
                "no candidate family could be fitted ({} tried)",
                candidates.len()
            ))
        })?;
        log::info!("Best fit: {} (p={best_p:.4})", best.family);

        Ok(AutoFit { best, scores, rejected })
    }

    /// Fit a record column: a fixed family, auto-selection, or normal.
    pub fn fit_variable(
        &self,
        records: &[PerformanceRecord],
        variable: Variable,
        family: Option<DistributionFamily>,
        auto: bool,
    ) -> SimResult<FittedDistribution> {
        let data = variable.column(records);
        let fitted = match (family, auto) {
            (Some(family), _) => self.fit(&data, family, false, true)?,
            (None, true) => self.auto_fit(&data, None)?,
            (None, false) => self.fit(&data, DistributionFamily::Normal, false, true)?,
        };
        Ok(fitted.named(variable.name()))
    }

    /// Drop non-finite points, enforce the minimum, optionally filter outliers.
    /// Returns the cleaned data and the number of outliers removed.
    pub fn prepare(&self, data: &[f64], remove_outliers: bool) -> SimResult<(Vec<f64>, usize)> {
        let clean: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
        if clean.len() < self.min_data_points {
            return Err(SimError::InsufficientData {
                found: clean.len(),
                required: self.min_data_points,
            });
        }
        if !remove_outliers {
            return Ok((clean, 0));
        }
        let (kept, removed) = remove_outliers_sigma(&clean, self.outlier_sigma);
        if removed > 0 {
            log::info!("Removed {removed} outliers (>{} std dev)", self.outlier_sigma);
        }
        Ok((kept, removed))
    }
}

/// Keep points within `n_std` population standard deviations of the mean.
pub fn remove_outliers_sigma(data: &[f64], n_std: f64) -> (Vec<f64>, usize) {
    let m = stats::mean(data);
    let sd = stats::std_dev(data, 0);
    let kept: Vec<f64> = data
        .iter()
        .copied()
        .filter(|x| (x - m).abs() <= n_std * sd)
        .collect();
    let removed = data.len() - kept.len();
    (kept, removed)
}

fn fit_prepared(
    data: &[f64],
    family: DistributionFamily,
    outliers_removed: usize,
    test_fit: bool,
) -> SimResult<FittedDistribution> {
    let marginal = estimate(family, data)?;
    log::debug!("Fitted {family}: {:?}", marginal.parameters());
    let gof = test_fit.then(|| ks_test(data, |x| marginal.cdf(x)));
    Ok(FittedDistribution::new(marginal, gof, outliers_removed))
}

fn fail(family: DistributionFamily, reason: &str) -> SimError {
    SimError::DistributionFitting(format!("cannot fit {family}: {reason}"))
}

/// Parameter estimation for one family.
pub fn estimate(family: DistributionFamily, data: &[f64]) -> SimResult<Marginal> {
    let n = data.len();
    if n < 2 {
        return Err(fail(family, "need at least two points"));
    }
    let sorted = stats::sorted(data);
    let (min, max) = (sorted[0], sorted[n - 1]);
    let range = max - min;
    if range <= 0.0 {
        return Err(fail(family, "data has zero variance"));
    }
    // Endpoint padding for bounded families: the expected gap between the
    // sample extremes and the true support edges.
    let pad = range / (n - 1) as f64;

    match family {
        DistributionFamily::Normal => {
            Marginal::normal(stats::mean(data), stats::std_dev(data, 0))
        }
        DistributionFamily::Lognormal => {
            if min <= 0.0 {
                return Err(fail(family, "requires strictly positive data"));
            }
            let logs: Vec<f64> = data.iter().map(|x| x.ln()).collect();
            let sigma = stats::std_dev(&logs, 0);
            if sigma <= 0.0 {
                return Err(fail(family, "log data has zero variance"));
            }
            Marginal::lognormal(stats::mean(&logs), sigma)
        }
        DistributionFamily::Gamma => {
            if min <= 0.0 {
                return Err(fail(family, "requires strictly positive data"));
            }
            let m = stats::mean(data);
            let mean_log = data.iter().map(|x| x.ln()).sum::<f64>() / n as f64;
            let shape = gamma_shape_mle(m.ln() - mean_log)
                .ok_or_else(|| fail(family, "shape estimate did not converge"))?;
            Marginal::gamma(shape, m / shape)
        }
        DistributionFamily::Beta => {
            let loc = min - pad;
            let scale = range + 2.0 * pad;
            let scaled: Vec<f64> = data.iter().map(|x| (x - loc) / scale).collect();
            let m = stats::mean(&scaled);
            let v = stats::variance(&scaled, 0);
            let common = m * (1.0 - m) / v - 1.0;
            if !(common > 0.0 && common.is_finite()) {
                return Err(fail(family, "sample variance too large for a beta shape"));
            }
            Marginal::beta(m * common, (1.0 - m) * common, loc, scale)
        }
        DistributionFamily::Uniform => Marginal::uniform(min, max),
        DistributionFamily::Triangular => {
            let lo = min - pad;
            let hi = max + pad;
            let mode = (3.0 * stats::mean(data) - lo - hi).clamp(lo, hi);
            Marginal::triangular(lo, mode, hi)
        }
    }
}

/// Gamma shape MLE from s = ln(mean) - mean(ln x).
/// Minka's closed-form start, refined with Newton steps.
fn gamma_shape_mle(s: f64) -> Option<f64> {
    if !(s > 0.0 && s.is_finite()) {
        return None;
    }
    let mut k = (3.0 - s + ((s - 3.0).powi(2) + 24.0 * s).sqrt()) / (12.0 * s);
    for _ in 0..100 {
        let f = k.ln() - digamma(k) - s;
        let df = 1.0 / k - trigamma(k);
        if df == 0.0 {
            break;
        }
        let mut next = k - f / df;
        if next <= 0.0 {
            next = k / 2.0;
        }
        let done = (next - k).abs() <= 1e-12 * k;
        k = next;
        if done {
            break;
        }
    }
    (k > 0.0 && k.is_finite()).then_some(k)
}

/// Polygamma of order 1: recurrence up to x >= 10, then the asymptotic series.
pub(crate) fn trigamma(x: f64) -> f64 {
    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc + inv
        + inv2 / 2.0
        + inv * inv2 * (1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 / 30.0)))
}

/// Two-sided one-sample Kolmogorov-Smirnov test against `cdf`.
pub fn ks_test(data: &[f64], cdf: impl Fn(f64) -> f64) -> GoodnessOfFit {
    let sorted = stats::sorted(data);
    let n = sorted.len() as f64;
    let statistic = sorted.iter().enumerate().fold(0.0_f64, |d, (i, &x)| {
        let f = cdf(x);
        let above = (i + 1) as f64 / n - f;
        let below = f - i as f64 / n;
        d.max(above).max(below)
    });
    let sqrt_n = n.sqrt();
    let lambda = (sqrt_n + 0.12 + 0.11 / sqrt_n) * statistic;
    GoodnessOfFit {
        statistic,
        p_value: kolmogorov_survival(lambda),
        sample_size: sorted.len(),
    }
}

/// P(K > lambda) for the Kolmogorov distribution.
fn kolmogorov_survival(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }
    if lambda < 1.18 {
        // Jacobi theta form converges fast for small lambda.
        let y = -PI * PI / (8.0 * lambda * lambda);
        let cdf: f64 = (1..=6)
            .map(|j| {
                let k = (2 * j - 1) as f64;
                (y * k * k).exp()
            })
            .sum::<f64>()
            * (2.0 * PI).sqrt()
            / lambda;
        return (1.0 - cdf).clamp(0.0, 1.0);
    }
    let a = -2.0 * lambda * lambda;
    let mut sum = 0.0;
    let mut sign = 1.0;
    for j in 1..=100 {
        let jf = j as f64;
        let term = sign * 2.0 * (a * jf * jf).exp();
        sum += term;
        if term.abs() < 1e-16 {
            break;
        }
        sign = -sign;
    }
    sum.clamp(0.0, 1.0)
}
