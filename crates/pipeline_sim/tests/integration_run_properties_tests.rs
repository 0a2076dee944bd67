mod support;

use pipeline_sim::ecs::{StageOutcome, TerminalState};
use pipeline_sim::pool::{DevicePools, FailurePolicy};
use pipeline_sim::scenario::ScenarioConfig;
use pipeline_sim::KernelHandle;
use support::scenarios::{held_ms_by_device, run_kernel, HOUR_SECS};

fn failing_line() -> ScenarioConfig {
    ScenarioConfig::default()
        .with_horizon_secs(6.0 * HOUR_SECS)
        .with_failures(7_200.0, 600.0)
}

#[test]
fn same_seed_gives_identical_results() {
    let config = failing_line();
    let first = run_kernel(&config);
    let second = run_kernel(&config);

    assert_eq!(first.get_metrics(), second.get_metrics());
    assert_eq!(first.archived_batches(), second.archived_batches());
    assert_eq!(first.snapshot_telemetry(), second.snapshot_telemetry());
}

#[test]
fn different_seeds_diverge() {
    let first = run_kernel(&failing_line());
    let second = run_kernel(&failing_line().with_seed(7));
    assert_ne!(first.archived_batches(), second.archived_batches());
}

#[test]
fn clock_never_moves_backwards_and_pools_stay_within_capacity() {
    let mut kernel = KernelHandle::construct(&failing_line()).expect("valid scenario");
    let mut last_ms = 0;
    let mut checked = 0u64;
    kernel
        .run_with_hook(|world, event| {
            assert!(event.timestamp >= last_ms, "clock went backwards");
            last_ms = event.timestamp;
            for pool in world.resource::<DevicePools>().iter() {
                assert!(
                    pool.busy_count() <= pool.capacity,
                    "{} holds {} of {}",
                    pool.name,
                    pool.busy_count(),
                    pool.capacity
                );
            }
            checked += 1;
        })
        .expect("run completes");

    assert_eq!(checked, kernel.event_counts().total);
}

#[test]
fn held_time_matches_pool_busy_time() {
    for policy in [FailurePolicy::FinishInFlight, FailurePolicy::RestartInFlight] {
        let kernel = run_kernel(&failing_line().with_failure_policy(policy));
        let held = held_ms_by_device(kernel.archived_batches());

        for pool in kernel.pools().iter() {
            assert_eq!(
                held.get(&pool.id).copied().unwrap_or(0),
                pool.cumulative_busy_ms(),
                "{} under {:?}",
                pool.name,
                policy
            );
        }
    }
}

#[test]
fn every_batch_ends_in_exactly_one_terminal_state() {
    let kernel = run_kernel(&failing_line());
    let report = kernel.get_metrics();
    let run = &report.run;

    assert!(run.batches_created > 0);
    assert_eq!(run.batches_created, run.completed + run.failed + run.incomplete);
    assert_eq!(run.in_flight, 0);

    let ledger = kernel.archived_batches();
    assert_eq!(ledger.len() as u64, run.batches_created);
    let incomplete = ledger
        .iter()
        .filter(|batch| batch.terminal_state == TerminalState::Incomplete)
        .count() as u64;
    let completed = ledger
        .iter()
        .filter(|batch| batch.terminal_state == TerminalState::Completed)
        .count() as u64;
    assert_eq!(incomplete, run.incomplete);
    assert_eq!(completed, run.completed);
    assert_eq!(run.failed, run.failure_reasons.values().sum::<u64>());
}

#[test]
fn completed_batches_visit_every_stage_in_order() {
    let kernel = run_kernel(&ScenarioConfig::default());
    let completed: Vec<_> = kernel
        .archived_batches()
        .iter()
        .filter(|batch| batch.terminal_state == TerminalState::Completed)
        .collect();
    assert!(!completed.is_empty());

    for batch in completed {
        let stages: Vec<usize> = batch
            .process_history
            .iter()
            .map(|step| step.stage.position())
            .collect();
        assert_eq!(stages, (0..12).collect::<Vec<_>>(), "{}", batch.id);
        assert!(batch
            .process_history
            .iter()
            .all(|step| step.outcome == Some(StageOutcome::Processed)));
        assert_eq!(batch.quality_metrics.get("qc_passed"), Some(&1.0));
    }
}

#[test]
fn restart_policy_interrupts_and_retries_holders() {
    let kernel = run_kernel(
        &ScenarioConfig::default()
            .with_horizon_secs(20_000.0)
            .with_failures(7_200.0, 600.0)
            .with_failure_policy(FailurePolicy::RestartInFlight),
    );
    let report = kernel.get_metrics();
    let interrupted: u64 = report.devices.iter().map(|d| d.interrupted_count).sum();
    assert!(interrupted > 0);

    let interrupted_steps = kernel
        .archived_batches()
        .iter()
        .flat_map(|batch| batch.process_history.iter())
        .filter(|step| step.outcome == Some(StageOutcome::Interrupted))
        .count() as u64;
    assert_eq!(interrupted_steps, interrupted);
}
