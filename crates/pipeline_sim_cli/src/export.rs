//! Result export: metrics report and telemetry as JSON, per-device metrics as CSV.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use pipeline_sim::metrics::{DeviceMetrics, MetricsReport};
use pipeline_sim::telemetry::TelemetrySnapshot;
use pipeline_sim::RunSummary;
use serde::Serialize;

#[derive(Serialize)]
struct RunReport<'a> {
    summary: &'a RunSummary,
    metrics: &'a MetricsReport,
}

fn create_output_file(path: impl AsRef<Path>) -> Result<BufWriter<File>, Box<dyn std::error::Error>> {
    Ok(BufWriter::new(File::create(path)?))
}

/// Export the run summary and metrics report as one JSON object.
///
/// # Errors
///
/// Returns an error if file creation or JSON serialization fails.
pub fn export_report_json(
    summary: &RunSummary,
    report: &MetricsReport,
    path: impl AsRef<Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = create_output_file(path)?;
    serde_json::to_writer_pretty(
        &mut file,
        &RunReport {
            summary,
            metrics: report,
        },
    )?;
    file.flush()?;
    Ok(())
}

/// Export the telemetry snapshot history as a JSON array, oldest first.
///
/// # Errors
///
/// Returns an error if file creation or JSON serialization fails.
pub fn export_telemetry_json(
    history: &VecDeque<TelemetrySnapshot>,
    path: impl AsRef<Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = create_output_file(path)?;
    serde_json::to_writer_pretty(&mut file, history)?;
    file.flush()?;
    Ok(())
}

/// Export one CSV row per device.
///
/// # Errors
///
/// Returns an error if there are no devices or file creation or CSV writing fails.
pub fn export_devices_csv(
    devices: &[DeviceMetrics],
    path: impl AsRef<Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    if devices.is_empty() {
        return Err("No devices to export".into());
    }
    let mut wtr = csv::Writer::from_writer(create_output_file(path)?);

    wtr.write_record([
        "device_id",
        "stage",
        "stage_index",
        "capacity",
        "utilization",
        "processed_count",
        "interrupted_count",
        "failure_count",
        "repair_count",
        "downtime_secs",
        "busy_time_secs",
        "average_queue_wait_secs",
        "mean_service_time_secs",
        "queue_length",
        "gate_passed",
        "gate_rejected",
    ])?;

    for device in devices {
        let gate = device.gate.as_ref();
        wtr.write_record([
            device.device_id.clone(),
            device.stage.as_str().to_string(),
            device.stage_index.to_string(),
            device.capacity.to_string(),
            format!("{:.6}", device.utilization),
            device.processed_count.to_string(),
            device.interrupted_count.to_string(),
            device.failure_count.to_string(),
            device.repair_count.to_string(),
            format!("{:.3}", device.downtime_secs),
            format!("{:.3}", device.busy_time_secs),
            format!("{:.3}", device.average_queue_wait_secs),
            format!("{:.3}", device.mean_service_time_secs),
            device.queue_length.to_string(),
            gate.map(|g| g.passed.to_string()).unwrap_or_default(),
            gate.map(|g| g.rejected.to_string()).unwrap_or_default(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
