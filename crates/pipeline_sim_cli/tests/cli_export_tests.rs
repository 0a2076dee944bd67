use std::fs;

use clap::Parser;
use pipeline_sim::pool::FailurePolicy;
use pipeline_sim_cli::{execute, load_config, scenario_from_args, Args};
use tempfile::tempdir;

#[test]
fn config_file_is_overridden_by_flags() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("scenario.json");
    fs::write(&path, r#"{ "horizon_secs": 7200.0, "seed": 5 }"#).expect("write config");

    let loaded = load_config(&path).expect("load");
    assert_eq!(loaded.horizon_secs, 7200.0);
    assert_eq!(loaded.seed, 5);

    let args = Args::try_parse_from([
        "pipeline-sim",
        "--config",
        path.to_str().expect("utf-8 path"),
        "--seed",
        "9",
        "--failure-policy",
        "restart-in-flight",
    ])
    .expect("valid arguments");
    let config = scenario_from_args(&args).expect("scenario");
    assert_eq!(config.horizon_secs, 7200.0);
    assert_eq!(config.seed, 9);
    assert_eq!(config.failure_policy, FailurePolicy::RestartInFlight);
}

#[test]
fn unreadable_config_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("missing.json");
    assert!(load_config(&missing).is_err());

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{ not json").expect("write");
    assert!(load_config(&broken).is_err());
}

#[test]
fn run_writes_every_requested_export() {
    let dir = tempdir().expect("tempdir");
    let report = dir.path().join("report.json");
    let devices = dir.path().join("devices.csv");
    let telemetry = dir.path().join("telemetry.json");

    let args = Args::try_parse_from([
        "pipeline-sim",
        "--horizon",
        "7200",
        "--failures",
        "7200,600",
        "--report-json",
        report.to_str().expect("utf-8 path"),
        "--devices-csv",
        devices.to_str().expect("utf-8 path"),
        "--telemetry-json",
        telemetry.to_str().expect("utf-8 path"),
    ])
    .expect("valid arguments");

    let mut out = Vec::new();
    execute(&args, &mut out).expect("run succeeds");
    let printed = String::from_utf8(out).expect("utf-8 output");
    assert!(printed.contains("Batches:"));
    assert!(printed.contains("quality_control"));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).expect("report")).expect("json");
    assert_eq!(json["summary"]["horizon_ms"], 7_200_000);
    assert!(json["metrics"]["run"]["batches_created"].as_u64().is_some());
    assert_eq!(json["metrics"]["devices"].as_array().map(Vec::len), Some(13));

    let mut reader = csv::Reader::from_path(&devices).expect("csv");
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(&headers[0], "device_id");
    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>().expect("rows");
    assert_eq!(rows.len(), 13);
    assert_eq!(&rows[0][0], "blood_bag_scanner_1");
    assert_eq!(&rows[1][0], "centrifuge_1");

    let snapshots: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&telemetry).expect("telemetry")).expect("json");
    let snapshots = snapshots.as_array().expect("array");
    assert!(!snapshots.is_empty());
    assert_eq!(snapshots[0]["devices"].as_array().map(Vec::len), Some(13));
}

#[test]
fn invalid_override_fails_before_running() {
    let args = Args::try_parse_from(["pipeline-sim", "--horizon", "0"]).expect("valid arguments");
    let mut out = Vec::new();
    let err = execute(&args, &mut out).expect_err("horizon must be positive");
    assert!(err.to_string().contains("horizon"));
    assert!(out.is_empty());
}
