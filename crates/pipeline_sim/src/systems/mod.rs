pub mod arrival;
pub mod failure;
pub mod simulation_started;
pub mod telemetry_snapshot;
pub mod workflow;
