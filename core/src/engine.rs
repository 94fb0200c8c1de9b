//! The simulation orchestrator.
//!
//! STAGES (validated, in order):
//!   Created -> DataLoaded -> PlanLoaded -> DistributionsFit -> CorrelationsSet -> Completed
//!
//! RULES:
//!   - `run` without data or without a plan is a Configuration error.
//!   - Skipped fitting runs automatically with default options.
//!   - Skipped correlation runs automatically when more than one variable
//!     is fitted.
//!   - Reloading data or refitting discards every fit and estimated
//!     correlation derived from it. A caller-supplied matrix is kept.
//!   - Every corrective action is recorded as a `RunEvent`.

use crate::{
    compensation::{CompensationEngine, CompensationPlan},
    config::SimulationConfig,
    correlation::{self, CorrelationMatrix, CorrelationMethod},
    data::{PerformanceRecord, Variable},
    distribution::DistributionFamily,
    error::{SimError, SimResult},
    event::{RepairStage, RunEvent},
    fitter::{DistributionFitter, FittedDistribution},
    multivariate::MultivariateSampler,
    results::SimulationResults,
    scenario::{subject_profiles, ScenarioGenerator},
};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStage {
    Created,
    DataLoaded,
    PlanLoaded,
    DistributionsFit,
    CorrelationsSet,
    Completed,
}

/// How `fit_distributions` treats each variable.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Auto-select the family for variables without an explicit one.
    pub auto:      bool,
    /// Explicit family per variable; overrides `auto`.
    pub families:  BTreeMap<Variable, DistributionFamily>,
    pub test_fit:  bool,
    /// Variables to fit. `None` fits quota attainment plus every optional
    /// sampled variable that all records carry.
    pub variables: Option<Vec<Variable>>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            auto:      true,
            families:  BTreeMap::new(),
            test_fit:  true,
            variables: None,
        }
    }
}

/// Where the current correlation matrix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationSource {
    /// Handed in through `set_correlation_matrix`.
    Supplied,
    /// Estimated from the loaded records.
    Estimated,
}

pub struct MonteCarloEngine {
    config:        SimulationConfig,
    stage:         SimulationStage,
    records:       Vec<PerformanceRecord>,
    plan:          Option<CompensationPlan>,
    distributions: BTreeMap<Variable, FittedDistribution>,
    correlation:   Option<(CorrelationMatrix, CorrelationSource)>,
    events:        Vec<RunEvent>,
}

impl MonteCarloEngine {
    /// Fails with `SimError::Configuration` when `config` does not validate.
    pub fn new(config: SimulationConfig) -> SimResult<Self> {
        config.validate()?;
        log::info!(
            "Initialized MonteCarloEngine (seed={}, strategy={})",
            config.seed,
            config.sampling
        );
        Ok(Self {
            config,
            stage: SimulationStage::Created,
            records: Vec::new(),
            plan: None,
            distributions: BTreeMap::new(),
            correlation: None,
            events: Vec::new(),
        })
    }

    pub fn stage(&self) -> SimulationStage {
        self.stage
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn records(&self) -> &[PerformanceRecord] {
        &self.records
    }

    pub fn plan(&self) -> Option<&CompensationPlan> {
        self.plan.as_ref()
    }

    pub fn distributions(&self) -> &BTreeMap<Variable, FittedDistribution> {
        &self.distributions
    }

    pub fn correlation(&self) -> Option<&CorrelationMatrix> {
        self.correlation.as_ref().map(|(matrix, _)| matrix)
    }

    pub fn correlation_source(&self) -> Option<CorrelationSource> {
        self.correlation.as_ref().map(|(_, source)| *source)
    }

    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    fn emit(&mut self, event: RunEvent) {
        log::debug!("event: {}", event.kind());
        self.events.push(event);
    }

    fn require_data(&self, action: &str) -> SimResult<()> {
        if self.records.is_empty() {
            return Err(SimError::Configuration(format!(
                "no performance data loaded; call load_data before {action}"
            )));
        }
        Ok(())
    }

    fn discard_estimated_correlation(&mut self) {
        if self.correlation_source() == Some(CorrelationSource::Estimated) {
            self.correlation = None;
        }
    }

    /// Stage reached after a fit; a kept supplied matrix still counts.
    fn fitted_stage(&self) -> SimulationStage {
        if self.correlation.is_some() {
            SimulationStage::CorrelationsSet
        } else {
            SimulationStage::DistributionsFit
        }
    }

    fn ensure_covers_fitted(&self, matrix: &CorrelationMatrix) -> SimResult<()> {
        match self.distributions.keys().find(|v| !matrix.variables().contains(v)) {
            Some(missing) => Err(SimError::UnknownVariable { name: missing.name().to_string() }),
            None => Ok(()),
        }
    }

    /// Stage reached once both inputs are present.
    fn inputs_stage(&self) -> SimulationStage {
        if self.plan.is_some() && !self.records.is_empty() {
            SimulationStage::PlanLoaded
        } else if !self.records.is_empty() {
            SimulationStage::DataLoaded
        } else {
            SimulationStage::Created
        }
    }

    pub fn load_data(&mut self, records: Vec<PerformanceRecord>) -> SimResult<&mut Self> {
        if records.is_empty() {
            return Err(SimError::InvalidArgument("performance data is empty".into()));
        }
        if let Some(bad) = records.iter().find(|r| !(r.quota > 0.0 && r.quota.is_finite())) {
            return Err(SimError::InvalidArgument(format!(
                "subject {} period {} has non-positive quota {}",
                bad.subject_id, bad.period, bad.quota
            )));
        }
        let subjects = subject_profiles(&records).len();
        log::info!("Loaded {} performance records for {subjects} subjects", records.len());

        self.emit(RunEvent::DataLoaded { records: records.len(), subjects });
        self.records = records;
        self.distributions.clear();
        self.discard_estimated_correlation();
        self.stage = self.inputs_stage();
        Ok(self)
    }

    pub fn load_plan(&mut self, plan: CompensationPlan) -> SimResult<&mut Self> {
        plan.validate()?;
        log::info!("Loaded plan '{}'", plan.plan_id);
        self.emit(RunEvent::PlanLoaded { plan_id: plan.plan_id.clone() });
        self.plan = Some(plan);
        if self.stage < SimulationStage::PlanLoaded || self.stage == SimulationStage::Completed {
            self.stage = self.inputs_stage();
        }
        Ok(self)
    }

    fn default_variables(&self) -> Vec<Variable> {
        Variable::SAMPLED
            .into_iter()
            .filter(|v| *v == Variable::QuotaAttainment || v.present_in_all(&self.records))
            .collect()
    }

    pub fn fit_distributions(&mut self, options: FitOptions) -> SimResult<&mut Self> {
        self.require_data("fit_distributions")?;
        let variables = options.variables.clone().unwrap_or_else(|| self.default_variables());
        if let Some(v) = variables.iter().find(|v| !Variable::SAMPLED.contains(v)) {
            return Err(SimError::InvalidArgument(format!("{v} cannot be simulated directly")));
        }
        log::info!("Fitting distributions for {} variables", variables.len());

        let fitter = DistributionFitter::new(self.config.min_data_points)
            .with_outlier_sigma(self.config.outlier_sigma);
        let remove_outliers = self.config.remove_outliers;
        let mut fitted = BTreeMap::new();

        for variable in variables {
            let data = variable.column(&self.records);
            let dist = match (options.families.get(&variable), options.auto) {
                (Some(&family), _) => {
                    fitter.fit(&data, family, remove_outliers, options.test_fit)?
                }
                (None, true) => {
                    let auto = fitter.auto_fit_detailed(
                        &data,
                        Some(self.config.candidate_families.as_slice()),
                        remove_outliers,
                    )?;
                    for (family, reason) in auto.rejected {
                        self.emit(RunEvent::CandidateRejected { variable, family, reason });
                    }
                    auto.best
                }
                (None, false) => fitter.fit(
                    &data,
                    DistributionFamily::Normal,
                    remove_outliers,
                    options.test_fit,
                )?,
            };
            let dist = dist.named(variable.name());

            if dist.outliers_removed > 0 {
                self.emit(RunEvent::OutliersRemoved { variable, removed: dist.outliers_removed });
            }
            log::info!("{variable}: {} (p={:?})", dist.family, dist.p_value());
            self.emit(RunEvent::DistributionFitted {
                variable,
                family: dist.family,
                p_value: dist.p_value(),
            });
            fitted.insert(variable, dist);
        }

        self.distributions = fitted;
        self.discard_estimated_correlation();
        self.stage = self.fitted_stage();
        Ok(self)
    }

    /// Use a hand-specified distribution for one variable.
    pub fn set_distribution(
        &mut self,
        variable: Variable,
        distribution: FittedDistribution,
    ) -> SimResult<&mut Self> {
        self.require_data("set_distribution")?;
        if !Variable::SAMPLED.contains(&variable) {
            return Err(SimError::InvalidArgument(format!("{variable} cannot be simulated directly")));
        }
        self.emit(RunEvent::DistributionFitted {
            variable,
            family: distribution.family,
            p_value: distribution.p_value(),
        });
        self.distributions.insert(variable, distribution.named(variable.name()));
        self.discard_estimated_correlation();
        self.stage = self.fitted_stage();
        Ok(self)
    }

    /// Estimate correlations across the fitted variables. `None` arguments
    /// fall back to the configured method and threshold.
    pub fn set_correlations(
        &mut self,
        method: Option<CorrelationMethod>,
        min_correlation: Option<f64>,
    ) -> SimResult<&mut Self> {
        self.require_data("set_correlations")?;
        if self.distributions.is_empty() {
            self.fit_distributions(FitOptions::default())?;
        }
        let variables: Vec<Variable> = self.distributions.keys().copied().collect();
        if variables.len() < 2 {
            log::info!("Single variable fitted; sampling without correlation");
            self.correlation = None;
            self.stage = SimulationStage::CorrelationsSet;
            return Ok(self);
        }

        let method = method.unwrap_or(self.config.correlation_method);
        let threshold = min_correlation.unwrap_or(self.config.min_correlation);
        let matrix = correlation::estimate(&self.records, &variables, method, threshold)?;

        self.emit(RunEvent::CorrelationEstimated { variables, method });
        if let Some(min_eigenvalue) = matrix.repaired_from() {
            self.emit(RunEvent::CorrelationRepaired {
                stage: RepairStage::Estimation,
                min_eigenvalue,
            });
        }
        self.correlation = Some((matrix, CorrelationSource::Estimated));
        self.stage = SimulationStage::CorrelationsSet;
        Ok(self)
    }

    /// Use a caller-supplied correlation matrix. It must cover every
    /// fitted variable; a non-PD matrix is repaired at sampling time.
    /// The matrix survives refits, including the auto-fit inside `run`.
    pub fn set_correlation_matrix(&mut self, matrix: CorrelationMatrix) -> SimResult<&mut Self> {
        self.ensure_covers_fitted(&matrix)?;
        log::info!("Using supplied correlation matrix over {} variables", matrix.dim());
        self.emit(RunEvent::CorrelationSupplied { variables: matrix.variables().to_vec() });
        self.correlation = Some((matrix, CorrelationSource::Supplied));
        if self.stage >= SimulationStage::DistributionsFit {
            self.stage = SimulationStage::CorrelationsSet;
        }
        Ok(self)
    }

    /// Generate `iterations` scenarios per subject and price them.
    /// `batch_size` overrides the configured one.
    pub fn run(&mut self, iterations: u64, batch_size: Option<u64>) -> SimResult<SimulationResults> {
        if self.records.is_empty() {
            return Err(SimError::Configuration(
                "no performance data loaded; call load_data before run".into(),
            ));
        }
        let Some(plan) = self.plan.clone() else {
            return Err(SimError::Configuration(
                "no compensation plan loaded; call load_plan before run".into(),
            ));
        };
        if iterations == 0 {
            return Err(SimError::Configuration("iterations must be positive".into()));
        }

        if self.distributions.is_empty() {
            log::info!("Distributions not fitted; auto-fitting");
            self.fit_distributions(FitOptions::default())?;
        }
        if let Some((matrix, _)) = &self.correlation {
            self.ensure_covers_fitted(matrix)?;
        }
        if self.correlation.is_none()
            && self.distributions.len() > 1
            && self.stage < SimulationStage::CorrelationsSet
        {
            log::info!("Correlations not set; estimating from data");
            self.set_correlations(None, None)?;
        }

        if self.config.parallel {
            log::info!(
                "parallel requested (workers={:?}); batches run sequentially with order-independent seeds",
                self.config.workers
            );
        }

        let marginals = self
            .distributions
            .iter()
            .map(|(v, d)| (*v, d.marginal().clone()))
            .collect();
        let sampler = MultivariateSampler::new(
            marginals,
            self.correlation(),
            self.config.sampling.strategy(),
        )?;
        if let Some(min_eigenvalue) = sampler.repaired_from() {
            self.emit(RunEvent::CorrelationRepaired { stage: RepairStage::Sampling, min_eigenvalue });
        }

        log::info!(
            "Running {iterations} iterations with {} sampling",
            self.config.sampling
        );
        let generator = ScenarioGenerator::new(subject_profiles(&self.records), &sampler, self.config.seed)?;
        let rows = generator.generate(iterations, batch_size.or(self.config.batch_size))?;
        let payouts = CompensationEngine::new(&plan).calculate_batch(&rows);

        self.emit(RunEvent::RunCompleted {
            seed: self.config.seed,
            iterations,
            rows: rows.len(),
            sampling: self.config.sampling,
        });
        self.stage = SimulationStage::Completed;
        log::info!("Simulation complete: {} rows", rows.len());

        SimulationResults::new(rows, payouts, self.events.clone())
    }
}
