//! Monte Carlo risk engine for sales compensation plans.
//!
//! Historical performance is fitted to parametric marginals, joined with an
//! estimated correlation structure, resampled into synthetic scenarios and
//! priced against a compensation plan. `SimulationResults` exposes the
//! payout distribution.

pub mod compensation;
pub mod config;
pub mod correlation;
pub mod data;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod event;
pub mod fitter;
pub mod multivariate;
pub mod results;
pub mod rng;
pub mod sampling;
pub mod scenario;
pub mod stats;
pub mod types;

pub use compensation::{calculate, CompensationPlan, Payout};
pub use config::SimulationConfig;
pub use engine::{CorrelationSource, FitOptions, MonteCarloEngine, SimulationStage};
pub use error::{CorrelationMatrixError, SimError, SimResult};
pub use results::SimulationResults;
