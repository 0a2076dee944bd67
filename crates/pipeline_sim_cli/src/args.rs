use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use pipeline_sim::pool::{FailurePolicy, RoutingPolicy};

#[derive(Debug, Parser)]
#[command(
    name = "pipeline-sim",
    about = "Run the platelet pipeline simulation for one scenario",
    long_about = "Runs one scenario of the platelet processing line to its horizon,\n\
                  prints a summary and optionally exports the metrics report,\n\
                  per-device metrics and telemetry history."
)]
pub struct Args {
    /// Scenario JSON file; the baseline line is used when omitted
    #[arg(long, env = "PIPELINE_SIM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Simulated duration in seconds
    #[arg(long)]
    pub horizon: Option<f64>,

    /// Seed for every random draw of the run
    #[arg(long)]
    pub seed: Option<u64>,

    /// Mean seconds between batch arrivals (exponential)
    #[arg(long)]
    pub arrival_mean: Option<f64>,

    /// Enable failures on every stage as MTBF,MTTR in seconds
    #[arg(long, value_name = "MTBF,MTTR", value_parser = parse_failures)]
    pub failures: Option<(f64, f64)>,

    /// How a batch picks among the units of a stage
    #[arg(long, value_enum)]
    pub routing: Option<RoutingArg>,

    /// What happens to batches in service when a device fails
    #[arg(long, value_enum)]
    pub failure_policy: Option<FailurePolicyArg>,

    /// Write the run summary and metrics report as JSON
    #[arg(long)]
    pub report_json: Option<PathBuf>,

    /// Write per-device metrics as CSV
    #[arg(long)]
    pub devices_csv: Option<PathBuf>,

    /// Write the periodic telemetry snapshots as JSON
    #[arg(long)]
    pub telemetry_json: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoutingArg {
    ShortestQueue,
    Random,
}

impl From<RoutingArg> for RoutingPolicy {
    fn from(arg: RoutingArg) -> Self {
        match arg {
            RoutingArg::ShortestQueue => RoutingPolicy::ShortestQueue,
            RoutingArg::Random => RoutingPolicy::Random,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicyArg {
    FinishInFlight,
    RestartInFlight,
}

impl From<FailurePolicyArg> for FailurePolicy {
    fn from(arg: FailurePolicyArg) -> Self {
        match arg {
            FailurePolicyArg::FinishInFlight => FailurePolicy::FinishInFlight,
            FailurePolicyArg::RestartInFlight => FailurePolicy::RestartInFlight,
        }
    }
}

fn parse_failures(value: &str) -> Result<(f64, f64), String> {
    let (mtbf, mttr) = value
        .split_once(',')
        .ok_or_else(|| format!("expected MTBF,MTTR, got `{value}`"))?;
    let mtbf = mtbf
        .trim()
        .parse::<f64>()
        .map_err(|err| format!("invalid MTBF `{mtbf}`: {err}"))?;
    let mttr = mttr
        .trim()
        .parse::<f64>()
        .map_err(|err| format!("invalid MTTR `{mttr}`: {err}"))?;
    Ok((mtbf, mttr))
}
