//! Sampling strategies.
//!
//! RULE: A strategy only produces points in the open unit interval.
//! Turning those points into values always goes through the target
//! distribution's quantile function (see `SamplingStrategy::sample`), so
//! any strategy works with any fitted family.

use crate::{
    distribution::Marginal,
    error::SimError,
    rng::SimRng,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The contract every sampling strategy fulfils. Strategies are stateless:
/// identical `(count, seed)` always yields identical points.
pub trait SamplingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `count` points strictly inside (0, 1).
    fn unit_points(&self, count: usize, seed: u64) -> Vec<f64>;

    /// `count` samples from `distribution`.
    fn sample(&self, distribution: &Marginal, count: usize, seed: u64) -> Vec<f64> {
        self.unit_points(count, seed)
            .into_iter()
            .map(|u| distribution.quantile(u))
            .collect()
    }
}

/// Independent draws: inverse-transform variates from a seeded stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleRandom;

impl SamplingStrategy for SimpleRandom {
    fn name(&self) -> &'static str {
        "monte_carlo"
    }

    fn unit_points(&self, count: usize, seed: u64) -> Vec<f64> {
        let mut rng = SimRng::new(seed).with_name("monte_carlo");
        (0..count).map(|_| rng.next_open01()).collect()
    }
}

/// One point in each of `count` equal-probability strata, in random order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatinHypercube;

impl SamplingStrategy for LatinHypercube {
    fn name(&self) -> &'static str {
        "latin_hypercube"
    }

    fn unit_points(&self, count: usize, seed: u64) -> Vec<f64> {
        let mut rng = SimRng::new(seed).with_name("latin_hypercube");
        let mut strata: Vec<usize> = (0..count).collect();
        rng.shuffle(&mut strata);
        let width = 1.0 / count as f64;
        strata
            .into_iter()
            .map(|k| {
                // Clamp keeps the point inside its stratum despite rounding.
                let lo = k as f64 * width;
                let hi = (k + 1) as f64 * width;
                (lo + rng.next_open01() * width).clamp(lo, hi).min(1.0 - f64::EPSILON / 2.0)
            })
            .collect()
    }
}

/// Owen-scrambled base-2 radical inverse (the first Sobol dimension).
/// Any prefix of length 2^m puts exactly one point in each 1/2^m stratum.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuasiRandom;

impl SamplingStrategy for QuasiRandom {
    fn name(&self) -> &'static str {
        "quasi_random"
    }

    fn unit_points(&self, count: usize, seed: u64) -> Vec<f64> {
        let mut rng = SimRng::new(seed).with_name("quasi_random");
        let scramble = rng.next_u32();
        (0..count)
            .map(|i| {
                let bits = sobol_scrambled(i as u32, scramble);
                (bits as f64 + 0.5) / 4_294_967_296.0
            })
            .collect()
    }
}

/// Laine-Karras hash: a bijection whose bit k depends only on bits <= k.
fn laine_karras_permutation(mut x: u32, seed: u32) -> u32 {
    x = x.wrapping_add(seed);
    x ^= x.wrapping_mul(0x6c50_b47c);
    x ^= x.wrapping_mul(0xb82f_1e52);
    x ^= x.wrapping_mul(0xc7af_e638);
    x ^= x.wrapping_mul(0x8d22_f6e6);
    x
}

/// Point `index` of the scrambled sequence as a 32-bit binary fraction.
/// The radical inverse of `index` is `index.reverse_bits()`; scrambling in
/// reversed-bit space makes each output digit depend only on the digits
/// before it, which is a nested uniform scramble.
fn sobol_scrambled(index: u32, seed: u32) -> u32 {
    laine_karras_permutation(index, seed).reverse_bits()
}

/// Strategy selector used by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    #[default]
    #[serde(alias = "simple_random", alias = "random")]
    MonteCarlo,
    #[serde(alias = "lhs")]
    LatinHypercube,
    #[serde(alias = "sobol")]
    QuasiRandom,
}

impl SamplingMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MonteCarlo => "monte_carlo",
            Self::LatinHypercube => "latin_hypercube",
            Self::QuasiRandom => "quasi_random",
        }
    }

    pub fn strategy(&self) -> Box<dyn SamplingStrategy> {
        match self {
            Self::MonteCarlo => Box::new(SimpleRandom),
            Self::LatinHypercube => Box::new(LatinHypercube),
            Self::QuasiRandom => Box::new(QuasiRandom),
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for SamplingMethod {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monte_carlo" | "simple_random" | "random" => Ok(Self::MonteCarlo),
            "latin_hypercube" | "lhs" => Ok(Self::LatinHypercube),
            "quasi_random" | "sobol" => Ok(Self::QuasiRandom),
            other => Err(SimError::InvalidArgument(format!(
                "unknown sampling strategy '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrambled_prefix_is_stratified() {
        for seed in [0u32, 1, 0xdead_beef] {
            let mut seen = [false; 64];
            for i in 0..64u32 {
                let stratum = (sobol_scrambled(i, seed) >> 26) as usize;
                assert!(!seen[stratum], "seed {seed}: stratum {stratum} hit twice");
                seen[stratum] = true;
            }
        }
    }

    #[test]
    fn scramble_depends_on_seed() {
        let a: Vec<u32> = (0..8).map(|i| sobol_scrambled(i, 1)).collect();
        let b: Vec<u32> = (0..8).map(|i| sobol_scrambled(i, 2)).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn method_names_parse() {
        assert_eq!("lhs".parse::<SamplingMethod>().unwrap(), SamplingMethod::LatinHypercube);
        assert_eq!("sobol".parse::<SamplingMethod>().unwrap(), SamplingMethod::QuasiRandom);
        assert_eq!(
            serde_json::from_str::<SamplingMethod>("\"lhs\"").unwrap(),
            SamplingMethod::LatinHypercube
        );
        assert!("importance".parse::<SamplingMethod>().is_err());
    }
}
