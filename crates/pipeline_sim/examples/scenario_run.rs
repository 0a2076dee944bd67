//! Run one 8-hour shift of the baseline line with failures enabled and print
//! per-stage results.
//!
//! Run with: cargo run -p pipeline_sim --example scenario_run

use pipeline_sim::scenario::ScenarioConfig;
use pipeline_sim::KernelHandle;

fn main() {
    const SHIFT_HOURS: f64 = 8.0;
    const SEED: u64 = 123;

    let config = ScenarioConfig::default()
        .with_seed(SEED)
        .with_horizon_secs(SHIFT_HOURS * 3600.0)
        .with_failures(14_400.0, 1_800.0);

    let mut kernel = match KernelHandle::construct(&config) {
        Ok(kernel) => kernel,
        Err(err) => {
            eprintln!("invalid scenario: {err}");
            std::process::exit(1);
        }
    };
    let summary = match kernel.run() {
        Ok(summary) => summary,
        Err(err) => {
            eprintln!("run aborted: {err}");
            std::process::exit(1);
        }
    };
    let report = kernel.get_metrics();
    let run = &report.run;

    println!("--- Scenario run ({SHIFT_HOURS}h shift, failures on, seed {SEED}) ---");
    println!("Events processed: {}", summary.events_processed);
    println!(
        "Batches: {} created, {} completed, {} failed, {} incomplete",
        run.batches_created, run.completed, run.failed, run.incomplete
    );
    println!(
        "Completion rate: {:.1}%  throughput: {:.2}/h  mean cycle: {:.0} s",
        run.completion_rate * 100.0,
        run.throughput_per_hour,
        run.average_cycle_time_secs
    );

    println!("\n{:<22} {:>5} {:>6} {:>9} {:>6} {:>8}", "stage", "units", "util", "processed", "queue", "failures");
    for stage in &report.stages {
        println!(
            "{:<22} {:>5} {:>5.1}% {:>9} {:>6} {:>8}",
            stage.stage.as_str(),
            stage.units,
            stage.mean_utilization * 100.0,
            stage.processed_count,
            stage.queue_length,
            stage.failure_count
        );
    }

    match report.bottleneck_stage {
        Some(stage) => println!("\nBottleneck: {stage}"),
        None => println!("\nNo stage did any work."),
    }
}
