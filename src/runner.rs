//! Measurement loop driving one load manager run

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use loadgen_backends::{HttpBackendFactory, SyntheticBackendFactory, SyntheticConfig};
use loadgen_core::{
    ClientBackendFactory, LoadManager, LoadManagerBuilder, MeasurementSummary, ModelDescriptor,
    ModelParser, TimestampVector,
};
use loadgen_inputs::InputDataManager;

use crate::cli::{LoadMode, RunArgs};
use crate::report::{RunReport, Totals};

/// How often the pool's health is checked inside a window
const HEALTH_POLL: Duration = Duration::from_millis(100);

/// Run the load described by `args` and collect one summary per window
pub fn run(args: &RunArgs) -> Result<RunReport> {
    let config = args.load_config()?;
    config.validate().context("invalid load configuration")?;

    let descriptor = ModelDescriptor::from_json_file(&args.model)
        .with_context(|| format!("failed to load model {}", args.model.display()))?;
    let model: Arc<dyn ModelParser> = Arc::new(descriptor);

    let factory: Arc<dyn ClientBackendFactory> = match &args.url {
        Some(url) => {
            let mut factory = HttpBackendFactory::new(url, args.http_config())?;
            if let Some(version) = model.model_version() {
                factory = factory.with_model_version(version);
            }
            Arc::new(factory)
        }
        None => {
            tracing::warn!("No --url given, using the synthetic backend");
            Arc::new(SyntheticBackendFactory::new(SyntheticConfig::default())?)
        }
    };

    let mut loader = InputDataManager::new(Arc::clone(&model), config.batch_size);
    if let Some(seed) = config.seed {
        loader = loader.with_seed(seed);
    }

    let budget = config.request_budget;
    let mut manager = LoadManagerBuilder::new()
        .config(config)
        .policy(args.policy())
        .model(Arc::clone(&model))
        .backend_factory(factory)
        .data_loader(Box::new(loader))
        .build()?;

    manager.init_manager(&args.input_options(), &args.sequence_options())?;

    let mode = args.load_mode();
    match mode {
        LoadMode::Concurrency(level) => manager.change_concurrency_level(level)?,
        LoadMode::RequestRate(rate) => manager.change_request_rate(rate)?,
        LoadMode::Intervals => {
            let rate = manager.custom_request_rate()?;
            tracing::info!(rate, "Replaying custom intervals");
            manager.start_custom_intervals()?;
        }
    }

    let interval = Duration::from_millis(args.measurement_interval_ms);
    let windows = measure(&manager, interval, args.measurements, budget);
    let pool = manager.pool_stats();
    let client = manager.accumulated_client_stat();
    manager.stop_worker_threads();

    Ok(RunReport {
        model: model.model_name().to_string(),
        policy: manager.policy_name().to_string(),
        mode: format!("{:?}", mode),
        windows: windows?,
        totals: Totals::new(&pool, client),
    })
}

fn measure(
    manager: &LoadManager,
    interval: Duration,
    count: usize,
    budget: Option<usize>,
) -> Result<Vec<MeasurementSummary>> {
    let mut windows = Vec::with_capacity(count);
    let mut records = TimestampVector::new();

    for index in 0..count {
        let start = Instant::now();
        let exhausted = wait_window(manager, start + interval, budget)?;

        manager.swap_timestamps(&mut records)?;
        let summary = MeasurementSummary::from_records(&records, start.elapsed());
        tracing::info!(
            window = index,
            requests = summary.request_count,
            failed = summary.failed_count,
            throughput = summary.throughput,
            p50_ms = summary.latency.p50,
            p99_ms = summary.latency.p99,
            "Measurement window complete"
        );
        windows.push(summary);

        if exhausted {
            tracing::info!(window = index, "Request budget exhausted");
            break;
        }
    }
    Ok(windows)
}

/// Sleep until `deadline`, checking health; true once the budget is spent
fn wait_window(manager: &LoadManager, deadline: Instant, budget: Option<usize>) -> Result<bool> {
    loop {
        if let Err(e) = manager.check_health() {
            bail!("load generation failed: {}", e);
        }
        if matches!(budget, Some(limit) if manager.pool_stats().total_requests() >= limit) {
            return Ok(true);
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        std::thread::sleep(HEALTH_POLL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::io::Write;

    fn model_file(sequence: bool) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"name": "simple", "max_batch_size": 4, "sequence": {}, "inputs": [{{"name": "INPUT0", "datatype": "FP32", "shape": [8]}}]}}"#,
            sequence
        )
        .unwrap();
        file
    }

    fn args(model: &tempfile::NamedTempFile, extra: &[&str]) -> RunArgs {
        let path = model.path().to_str().unwrap().to_string();
        let base = [
            "infer-loadgen",
            "run",
            "--model",
            path.as_str(),
            "--measurement-interval-ms",
            "50",
        ];
        match Cli::try_parse_from(base.iter().chain(extra)).unwrap().command {
            Commands::Run(args) => args,
            Commands::Validate { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_synthetic_concurrency_run() {
        let model = model_file(false);
        let report = run(&args(&model, &["--concurrency", "4", "--max-threads", "2", "--measurements", "2"])).unwrap();

        assert_eq!(report.model, "simple");
        assert_eq!(report.policy, "concurrency");
        assert_eq!(report.windows.len(), 2);
        assert!(report.totals.completed > 0);
        assert_eq!(report.totals.failed, 0);
    }

    #[test]
    fn test_budget_ends_run_early() {
        let model = model_file(true);
        let report = run(&args(
            &model,
            &[
                "--concurrency",
                "2",
                "--request-count",
                "20",
                "--measurements",
                "100",
                "--sequence-id-range",
                "4",
            ],
        ))
        .unwrap();

        assert!(report.windows.len() < 100);
        assert_eq!(report.totals.completed, 20);
        let collected: usize = report.windows.iter().map(|w| w.request_count).sum();
        assert_eq!(collected, 20);
    }

    #[test]
    fn test_request_rate_run() {
        let model = model_file(false);
        let report = run(&args(&model, &["--request-rate", "200", "--seed", "3", "--measurements", "2"])).unwrap();
        assert_eq!(report.policy, "request-rate");
        assert!(report.totals.completed > 0);
    }

    #[test]
    fn test_missing_model_fails() {
        let model = model_file(false);
        let mut run_args = args(&model, &[]);
        run_args.model = "/nonexistent/model.json".into();
        assert!(run(&run_args).is_err());
    }
}
