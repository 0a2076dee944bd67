pub mod clock;
pub mod distributions;
pub mod ecs;
pub mod error;
pub mod kernel;
pub mod metrics;
pub mod pool;
pub mod runner;
pub mod scenario;
pub mod stages;
pub mod systems;
pub mod telemetry;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;

pub use error::{ConfigurationError, InvariantViolation, KernelError};
pub use kernel::{KernelHandle, RunSummary};
pub use scenario::ScenarioConfig;
