//! Command-line front end: builds a scenario from a file and flags, runs the
//! kernel and writes its results.

pub mod args;
pub mod export;

use std::fs;
use std::io::Write;
use std::path::Path;

use pipeline_sim::metrics::MetricsReport;
use pipeline_sim::{KernelHandle, RunSummary, ScenarioConfig};
use tracing::info;

pub use args::Args;

/// Reads a scenario JSON file. Fields it leaves out keep their baseline values.
pub fn load_config(path: impl AsRef<Path>) -> Result<ScenarioConfig, Box<dyn std::error::Error>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|err| format!("cannot read {}: {err}", path.display()))?;
    let config = serde_json::from_str(&text)
        .map_err(|err| format!("cannot parse {}: {err}", path.display()))?;
    Ok(config)
}

/// Applies the command-line overrides on top of `config`.
pub fn apply_overrides(mut config: ScenarioConfig, args: &Args) -> ScenarioConfig {
    if let Some(horizon) = args.horizon {
        config = config.with_horizon_secs(horizon);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(mean) = args.arrival_mean {
        config = config.with_arrival_mean_secs(mean);
    }
    if let Some((mtbf, mttr)) = args.failures {
        config = config.with_failures(mtbf, mttr);
    }
    if let Some(routing) = args.routing {
        config = config.with_routing(routing.into());
    }
    if let Some(policy) = args.failure_policy {
        config = config.with_failure_policy(policy.into());
    }
    config
}

/// Builds the scenario `args` describe.
pub fn scenario_from_args(args: &Args) -> Result<ScenarioConfig, Box<dyn std::error::Error>> {
    let base = match &args.config {
        Some(path) => load_config(path)?,
        None => ScenarioConfig::default(),
    };
    Ok(apply_overrides(base, args))
}

/// Runs the scenario, prints the summary to `out` and writes the requested exports.
pub fn execute(args: &Args, out: &mut impl Write) -> Result<(), Box<dyn std::error::Error>> {
    let config = scenario_from_args(args)?;
    let mut kernel = KernelHandle::construct(&config)?;
    let summary = kernel.run()?;
    let report = kernel.get_metrics();

    print_summary(&summary, &report, out)?;

    if let Some(path) = &args.report_json {
        export::export_report_json(&summary, &report, path)?;
        info!(path = %path.display(), "wrote metrics report");
    }
    if let Some(path) = &args.devices_csv {
        export::export_devices_csv(&report.devices, path)?;
        info!(path = %path.display(), "wrote device metrics");
    }
    if let Some(path) = &args.telemetry_json {
        export::export_telemetry_json(kernel.telemetry_history(), path)?;
        info!(
            path = %path.display(),
            snapshots = kernel.telemetry_history().len(),
            "wrote telemetry history"
        );
    }
    Ok(())
}

pub fn print_summary(
    summary: &RunSummary,
    report: &MetricsReport,
    out: &mut impl Write,
) -> std::io::Result<()> {
    let run = &report.run;
    writeln!(
        out,
        "--- Run ({:.0} s simulated, {} events) ---",
        run.elapsed_secs, summary.events_processed
    )?;
    writeln!(
        out,
        "Batches: {} created, {} completed, {} failed, {} incomplete",
        run.batches_created, run.completed, run.failed, run.incomplete
    )?;
    writeln!(
        out,
        "Completion rate: {:.1}%  throughput: {:.2}/h",
        run.completion_rate * 100.0,
        run.throughput_per_hour
    )?;
    writeln!(
        out,
        "Cycle time: mean {:.0} s  median {:.0} s  p90 {:.0} s",
        run.average_cycle_time_secs, run.median_cycle_time_secs, run.p90_cycle_time_secs
    )?;
    for (reason, count) in &run.failure_reasons {
        writeln!(out, "  rejected {reason}: {count}")?;
    }

    writeln!(
        out,
        "\n{:<22} {:>5} {:>7} {:>9} {:>6} {:>8}",
        "stage", "units", "util", "processed", "queue", "failures"
    )?;
    for stage in &report.stages {
        writeln!(
            out,
            "{:<22} {:>5} {:>6.1}% {:>9} {:>6} {:>8}",
            stage.stage.as_str(),
            stage.units,
            stage.mean_utilization * 100.0,
            stage.processed_count,
            stage.queue_length,
            stage.failure_count
        )?;
    }
    match report.bottleneck_stage {
        Some(stage) => writeln!(out, "\nBottleneck: {stage}"),
        None => writeln!(out, "\nNo stage did any work"),
    }
}
