//! risk-runner: headless Monte Carlo run of a compensation plan.
//!
//! Usage:
//!   risk-runner --data perf.json --plan plan.json
//!   risk-runner --data perf.json --plan plan.json --config cfg.json \
//!               --seed 7 --iterations 20000 --strategy lhs --out report.json

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comp_risk_core::{
    data::PerformanceRecord,
    results::{Column, SensitivityMethod, SimulationReport},
    sampling::SamplingMethod,
    CompensationPlan, MonteCarloEngine, SimulationConfig,
};
use std::env;

/// Performance input: a bare array or an object with a `records` field.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum PerformanceFile {
    Records(Vec<PerformanceRecord>),
    Wrapped { records: Vec<PerformanceRecord> },
}

#[derive(serde::Serialize)]
struct RunReport {
    run_id:       String,
    generated_at: DateTime<Utc>,
    plan_id:      String,
    seed:         u64,
    iterations:   u64,
    sampling:     SamplingMethod,
    #[serde(flatten)]
    results:      SimulationReport,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let data_path = string_arg(&args, "--data").context("--data <file> is required")?;
    let plan_path = string_arg(&args, "--plan").context("--plan <file> is required")?;

    let mut config = match string_arg(&args, "--config") {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };
    config.seed = parse_arg(&args, "--seed", config.seed);
    config.iterations = parse_arg(&args, "--iterations", config.iterations);
    if let Some(strategy) = string_arg(&args, "--strategy") {
        config.sampling = strategy.parse()?;
    }

    let records = load_records(data_path)?;
    let plan = load_plan(plan_path)?;

    println!("Compensation risk run");
    println!("  plan:        {} ({})", plan.name, plan.plan_id);
    println!("  records:     {}", records.len());
    println!("  seed:        {}", config.seed);
    println!("  iterations:  {}", config.iterations);
    println!("  sampling:    {}", config.sampling);
    println!();

    let (seed, iterations, sampling) = (config.seed, config.iterations, config.sampling);
    let plan_id = plan.plan_id.clone();
    let mut engine = MonteCarloEngine::new(config)?;
    engine.load_data(records)?.load_plan(plan)?;
    let results = engine.run(iterations, None)?;
    log::info!("run finished: {} rows over {} scenarios", results.len(), results.scenario_count());

    print_summary(&engine, &results)?;

    if let Some(out) = string_arg(&args, "--out") {
        let report = RunReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            plan_id,
            seed,
            iterations,
            sampling,
            results: results.report()?,
        };
        std::fs::write(out, serde_json::to_string_pretty(&report)?)
            .map_err(|e| anyhow::anyhow!("Cannot write {out}: {e}"))?;
        println!();
        println!("Report written to {out} (run {})", report.run_id);
    }

    Ok(())
}

fn load_records(path: &str) -> Result<Vec<PerformanceRecord>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    let file: PerformanceFile = serde_json::from_str(&content)
        .with_context(|| format!("{path} is not a list of performance records"))?;
    Ok(match file {
        PerformanceFile::Records(records) | PerformanceFile::Wrapped { records } => records,
    })
}

fn load_plan(path: &str) -> Result<CompensationPlan> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    let plan = serde_json::from_str(&content)
        .with_context(|| format!("{path} is not a compensation plan"))?;
    Ok(plan)
}

fn print_summary(
    engine: &MonteCarloEngine,
    results: &comp_risk_core::SimulationResults,
) -> Result<()> {
    println!("Fitted distributions");
    for (variable, dist) in engine.distributions() {
        let p = dist.p_value().map_or("-".to_string(), |p| format!("{p:.4}"));
        println!("  {variable:<18} {:<12} p={p}", dist.family);
    }
    if let Some(matrix) = engine.correlation() {
        let note = if matrix.is_repaired() { " (repaired to nearest PSD)" } else { "" };
        println!("  correlation over {} variables{note}", matrix.dim());
    }
    println!();

    let m = results.risk_metrics();
    println!("Payout per subject-scenario");
    println!("  expected:    {:>14.2}", m.expected_payout);
    println!("  median:      {:>14.2}", m.median_payout);
    println!("  std dev:     {:>14.2}", m.std_dev);
    println!("  VaR 95%:     {:>14.2}", m.var_95);
    println!("  CVaR 95%:    {:>14.2}", m.cvar_95);
    println!("  VaR 99%:     {:>14.2}", m.var_99);
    println!("  CVaR 99%:    {:>14.2}", m.cvar_99);
    println!("  range:       {:.2} .. {:.2}", m.min_payout, m.max_payout);

    let totals: Vec<f64> = results.scenario_totals().iter().map(|t| t.total_payout).collect();
    let plan_cost = totals.iter().sum::<f64>() / totals.len().max(1) as f64;
    println!("  plan cost per scenario (mean): {plan_cost:.2}");
    println!();

    println!("Sensitivity of total payout");
    for s in results
        .sensitivity_analysis(Column::TotalPayout, None, SensitivityMethod::Correlation)?
        .iter()
        .take(5)
    {
        println!("  {:<18} {:.3}", s.variable, s.coefficient);
    }
    Ok(())
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
