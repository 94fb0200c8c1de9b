//! Candidate distribution families and the concrete fitted marginal.
//!
//! Every sampling strategy maps unit-interval draws through
//! [`Marginal::quantile`]; the copula maps back through [`Marginal::cdf`].
//! Those two functions are the only contact points between sampling and
//! distribution families.

use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};
use statrs::distribution::{
    Beta, ContinuousCDF, Gamma, LogNormal, Normal, Triangular, Uniform,
};
use statrs::statistics::Distribution;
use statrs::function::erf::{erfc, erfc_inv};
use std::collections::BTreeMap;
use std::f64::consts::SQRT_2;
use std::fmt;
use std::str::FromStr;

/// The fixed set of supported families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionFamily {
    Normal,
    Lognormal,
    Gamma,
    Beta,
    Uniform,
    Triangular,
}

impl DistributionFamily {
    /// Candidate order used by auto-fit. Ties on p-value go to the family
    /// listed first, so this order is part of the fitting contract.
    pub const ALL: [DistributionFamily; 6] = [
        DistributionFamily::Normal,
        DistributionFamily::Lognormal,
        DistributionFamily::Gamma,
        DistributionFamily::Beta,
        DistributionFamily::Uniform,
        DistributionFamily::Triangular,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Lognormal => "lognormal",
            Self::Gamma => "gamma",
            Self::Beta => "beta",
            Self::Uniform => "uniform",
            Self::Triangular => "triangular",
        }
    }
}

impl fmt::Display for DistributionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for DistributionFamily {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" | "norm" => Ok(Self::Normal),
            "lognormal" | "lognorm" => Ok(Self::Lognormal),
            "gamma" => Ok(Self::Gamma),
            "beta" => Ok(Self::Beta),
            "uniform" => Ok(Self::Uniform),
            "triangular" | "triang" => Ok(Self::Triangular),
            other => Err(SimError::InvalidArgument(format!(
                "unsupported distribution '{other}'"
            ))),
        }
    }
}

/// Standard normal CDF.
pub fn std_normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / SQRT_2)
}

/// Standard normal quantile. Infinite at 0 and 1.
pub fn std_normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    -SQRT_2 * erfc_inv(2.0 * p)
}

/// A fully parameterised continuous distribution.
#[derive(Debug, Clone)]
pub enum Marginal {
    Normal { mean: f64, std_dev: f64, dist: Normal },
    Lognormal { mu: f64, sigma: f64, dist: LogNormal },
    /// Shape/scale parameterisation; statrs stores the rate.
    Gamma { shape: f64, scale: f64, dist: Gamma },
    /// Standard beta stretched onto [loc, loc + scale].
    Beta { a: f64, b: f64, loc: f64, scale: f64, dist: Beta },
    Uniform { lo: f64, hi: f64, dist: Uniform },
    Triangular { lo: f64, mode: f64, hi: f64, dist: Triangular },
}

fn invalid(family: DistributionFamily, detail: impl fmt::Display) -> SimError {
    SimError::DistributionFitting(format!("invalid {family} parameters: {detail}"))
}

impl Marginal {
    pub fn normal(mean: f64, std_dev: f64) -> SimResult<Self> {
        let dist = Normal::new(mean, std_dev)
            .map_err(|e| invalid(DistributionFamily::Normal, e))?;
        if std_dev <= 0.0 {
            return Err(invalid(DistributionFamily::Normal, "std_dev must be > 0"));
        }
        Ok(Self::Normal { mean, std_dev, dist })
    }

    pub fn lognormal(mu: f64, sigma: f64) -> SimResult<Self> {
        let dist = LogNormal::new(mu, sigma)
            .map_err(|e| invalid(DistributionFamily::Lognormal, e))?;
        Ok(Self::Lognormal { mu, sigma, dist })
    }

    pub fn gamma(shape: f64, scale: f64) -> SimResult<Self> {
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(invalid(DistributionFamily::Gamma, "scale must be > 0"));
        }
        let dist = Gamma::new(shape, 1.0 / scale)
            .map_err(|e| invalid(DistributionFamily::Gamma, e))?;
        Ok(Self::Gamma { shape, scale, dist })
    }

    pub fn beta(a: f64, b: f64, loc: f64, scale: f64) -> SimResult<Self> {
        if !(scale > 0.0 && scale.is_finite() && loc.is_finite()) {
            return Err(invalid(DistributionFamily::Beta, "scale must be > 0"));
        }
        let dist = Beta::new(a, b).map_err(|e| invalid(DistributionFamily::Beta, e))?;
        Ok(Self::Beta { a, b, loc, scale, dist })
    }

    pub fn uniform(lo: f64, hi: f64) -> SimResult<Self> {
        let dist = Uniform::new(lo, hi).map_err(|e| invalid(DistributionFamily::Uniform, e))?;
        Ok(Self::Uniform { lo, hi, dist })
    }

    /// statrs takes (min, max, mode); this keeps the lo/mode/hi reading order.
    pub fn triangular(lo: f64, mode: f64, hi: f64) -> SimResult<Self> {
        let dist = Triangular::new(lo, hi, mode)
            .map_err(|e| invalid(DistributionFamily::Triangular, e))?;
        Ok(Self::Triangular { lo, mode, hi, dist })
    }

    pub fn family(&self) -> DistributionFamily {
        match self {
            Self::Normal { .. } => DistributionFamily::Normal,
            Self::Lognormal { .. } => DistributionFamily::Lognormal,
            Self::Gamma { .. } => DistributionFamily::Gamma,
            Self::Beta { .. } => DistributionFamily::Beta,
            Self::Uniform { .. } => DistributionFamily::Uniform,
            Self::Triangular { .. } => DistributionFamily::Triangular,
        }
    }

    /// Named parameters in location/scale/shape form.
    pub fn parameters(&self) -> BTreeMap<String, f64> {
        let pairs: Vec<(&str, f64)> = match *self {
            Self::Normal { mean, std_dev, .. } => vec![("loc", mean), ("scale", std_dev)],
            Self::Lognormal { mu, sigma, .. } => {
                vec![("s", sigma), ("loc", 0.0), ("scale", mu.exp())]
            }
            Self::Gamma { shape, scale, .. } => vec![("a", shape), ("loc", 0.0), ("scale", scale)],
            Self::Beta { a, b, loc, scale, .. } => {
                vec![("a", a), ("b", b), ("loc", loc), ("scale", scale)]
            }
            Self::Uniform { lo, hi, .. } => vec![("loc", lo), ("scale", hi - lo)],
            Self::Triangular { lo, mode, hi, .. } => {
                vec![("c", (mode - lo) / (hi - lo)), ("loc", lo), ("scale", hi - lo)]
            }
        };
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    pub fn cdf(&self, x: f64) -> f64 {
        match self {
            Self::Normal { dist, .. } => dist.cdf(x),
            Self::Lognormal { dist, .. } => {
                if x <= 0.0 { 0.0 } else { dist.cdf(x) }
            }
            Self::Gamma { dist, .. } => {
                if x <= 0.0 { 0.0 } else { dist.cdf(x) }
            }
            Self::Beta { loc, scale, dist, .. } => {
                let y = (x - loc) / scale;
                if y <= 0.0 {
                    0.0
                } else if y >= 1.0 {
                    1.0
                } else {
                    dist.cdf(y)
                }
            }
            Self::Uniform { dist, .. } => dist.cdf(x),
            Self::Triangular { dist, .. } => dist.cdf(x),
        }
    }

    /// Inverse CDF. `p` outside (0, 1), or NaN, maps to the support
    /// endpoints; statrs panics on those.
    pub fn quantile(&self, p: f64) -> f64 {
        let (lo, hi) = self.support();
        if !(p > 0.0) {
            return lo;
        }
        if p >= 1.0 {
            return hi;
        }
        match self {
            Self::Normal { dist, .. } => dist.inverse_cdf(p),
            Self::Lognormal { dist, .. } => dist.inverse_cdf(p),
            Self::Gamma { dist, .. } => dist.inverse_cdf(p),
            Self::Beta { loc, scale, dist, .. } => loc + scale * dist.inverse_cdf(p),
            Self::Uniform { dist, .. } => dist.inverse_cdf(p),
            Self::Triangular { dist, .. } => dist.inverse_cdf(p),
        }
    }

    pub fn support(&self) -> (f64, f64) {
        match *self {
            Self::Normal { .. } => (f64::NEG_INFINITY, f64::INFINITY),
            Self::Lognormal { .. } | Self::Gamma { .. } => (0.0, f64::INFINITY),
            Self::Beta { loc, scale, .. } => (loc, loc + scale),
            Self::Uniform { lo, hi, .. } => (lo, hi),
            Self::Triangular { lo, hi, .. } => (lo, hi),
        }
    }

    pub fn mean(&self) -> f64 {
        let mean = match self {
            Self::Normal { dist, .. } => dist.mean(),
            Self::Lognormal { dist, .. } => dist.mean(),
            Self::Gamma { dist, .. } => dist.mean(),
            Self::Beta { loc, scale, dist, .. } => dist.mean().map(|m| loc + scale * m),
            Self::Uniform { dist, .. } => dist.mean(),
            Self::Triangular { dist, .. } => dist.mean(),
        };
        mean.unwrap_or(f64::NAN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_round_trip(m: &Marginal) {
        for &p in &[0.001, 0.05, 0.25, 0.5, 0.75, 0.95, 0.999] {
            let x = m.quantile(p);
            let back = m.cdf(x);
            assert!((back - p).abs() < 1e-9, "{:?}: p={p} x={x} cdf={back}", m.family());
        }
    }

    #[test]
    fn quantile_inverts_cdf_for_every_family() {
        assert_round_trip(&Marginal::normal(100.0, 15.0).unwrap());
        assert_round_trip(&Marginal::lognormal(0.1, 0.4).unwrap());
        assert_round_trip(&Marginal::gamma(2.5, 0.4).unwrap());
        assert_round_trip(&Marginal::beta(2.0, 5.0, 0.2, 1.5).unwrap());
        assert_round_trip(&Marginal::uniform(-1.0, 3.0).unwrap());
        assert_round_trip(&Marginal::triangular(0.0, 0.8, 2.0).unwrap());
    }

    #[test]
    fn quantiles_match_reference_values() {
        let gamma = Marginal::gamma(2.0, 1.0).unwrap();
        assert!((gamma.quantile(0.5) - 1.678_346_990_016_661).abs() < 1e-8);
        // Symmetric beta stretched onto [1, 5] has its median at the centre.
        let beta = Marginal::beta(2.0, 2.0, 1.0, 4.0).unwrap();
        assert!((beta.quantile(0.5) - 3.0).abs() < 1e-9);
        let tri = Marginal::triangular(0.0, 1.0, 2.0).unwrap();
        assert!((tri.quantile(0.5) - 1.0).abs() < 1e-12);
        assert!((tri.quantile(0.125) - 0.5).abs() < 1e-12);
        assert_eq!(Marginal::uniform(-1.0, 3.0).unwrap().quantile(0.25), 0.0);
        assert!(gamma.quantile(f64::NAN).abs() < f64::EPSILON);
    }

    #[test]
    fn means_follow_parameters() {
        assert!((Marginal::uniform(2.0, 4.0).unwrap().mean() - 3.0).abs() < 1e-12);
        assert!((Marginal::triangular(0.0, 0.6, 3.0).unwrap().mean() - 1.2).abs() < 1e-12);
        assert!((Marginal::beta(2.0, 6.0, 1.0, 4.0).unwrap().mean() - 2.0).abs() < 1e-12);
        assert!((Marginal::gamma(2.5, 0.4).unwrap().mean() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn standard_normal_helpers_agree() {
        assert!((std_normal_cdf(0.0) - 0.5).abs() < 1e-15);
        assert!((std_normal_quantile(0.975) - 1.959_963_984_540_054).abs() < 1e-9);
        assert!((std_normal_cdf(std_normal_quantile(0.123)) - 0.123).abs() < 1e-12);
    }

    #[test]
    fn quantile_endpoints_follow_support() {
        let m = Marginal::uniform(2.0, 4.0).unwrap();
        assert_eq!(m.quantile(0.0), 2.0);
        assert_eq!(m.quantile(1.0), 4.0);
        let g = Marginal::gamma(2.0, 1.0).unwrap();
        assert_eq!(g.quantile(0.0), 0.0);
        assert!(g.quantile(1.0).is_infinite());
    }

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(Marginal::normal(0.0, 0.0).is_err());
        assert!(Marginal::uniform(1.0, 1.0).is_err());
        assert!(Marginal::triangular(0.0, 2.0, 1.0).is_err());
        assert!(Marginal::gamma(1.0, -1.0).is_err());
    }

    #[test]
    fn family_names_parse() {
        for family in DistributionFamily::ALL {
            assert_eq!(family.name().parse::<DistributionFamily>().unwrap(), family);
        }
        assert!("cauchy".parse::<DistributionFamily>().is_err());
    }
}
