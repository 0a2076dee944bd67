mod support;

use pipeline_sim::distributions::DistributionSpec;
use pipeline_sim::pool::RoutingPolicy;
use pipeline_sim::scenario::ScenarioConfig;
use pipeline_sim::stages::StageKind;
use pipeline_sim::{ConfigurationError, KernelHandle};

fn construct_error(config: ScenarioConfig) -> ConfigurationError {
    match KernelHandle::construct(&config) {
        Ok(_) => panic!("configuration should be rejected"),
        Err(err) => err,
    }
}

#[test]
fn non_positive_horizon_is_rejected() {
    assert_eq!(
        construct_error(ScenarioConfig::default().with_horizon_secs(0.0)),
        ConfigurationError::NonPositiveHorizon(0.0)
    );
    assert!(matches!(
        construct_error(ScenarioConfig::default().with_horizon_secs(-5.0)),
        ConfigurationError::NonPositiveHorizon(_)
    ));
}

#[test]
fn horizon_that_rounds_to_zero_ms_is_rejected() {
    assert_eq!(
        construct_error(ScenarioConfig::default().with_horizon_secs(0.0004)),
        ConfigurationError::NonPositiveHorizon(0.0004)
    );
    let kernel = KernelHandle::construct(&ScenarioConfig::default().with_horizon_secs(0.001))
        .expect("one millisecond is a valid horizon");
    assert_eq!(kernel.horizon_ms(), 1);
}

#[test]
fn missing_stage_is_reported_at_its_position() {
    let mut config = ScenarioConfig::default();
    config.stages.remove(StageKind::Macopress.position());
    assert_eq!(
        construct_error(config),
        ConfigurationError::StageOrder {
            position: 3,
            expected: StageKind::Macopress,
            found: Some(StageKind::PlateletAgitator),
        }
    );
}

#[test]
fn zero_capacity_is_rejected() {
    assert_eq!(
        construct_error(ScenarioConfig::default().with_capacity(StageKind::QualityControl, 0)),
        ConfigurationError::NoCapacity {
            stage: StageKind::QualityControl
        }
    );
}

#[test]
fn non_positive_rates_are_rejected() {
    assert!(matches!(
        construct_error(ScenarioConfig::default().with_arrival_mean_secs(0.0)),
        ConfigurationError::ArrivalInterval(_)
    ));
    assert!(matches!(
        construct_error(ScenarioConfig::default().with_service_time(
            StageKind::Centrifuge,
            DistributionSpec::exponential(-1.0)
        )),
        ConfigurationError::ServiceTime {
            stage: StageKind::Centrifuge,
            ..
        }
    ));
    assert!(matches!(
        construct_error(ScenarioConfig::default().with_stage_failures(
            StageKind::Macopress,
            0.0,
            600.0
        )),
        ConfigurationError::NonPositiveMtbf {
            stage: StageKind::Macopress,
            ..
        }
    ));
}

#[test]
fn json_overrides_keep_the_baseline_for_everything_else() {
    let config: ScenarioConfig = serde_json::from_str(
        r#"{
            "horizon_secs": 3600.0,
            "seed": 7,
            "routing": "random",
            "arrival_interval": { "kind": "exponential", "mean_secs": 120.0 }
        }"#,
    )
    .expect("valid json");

    assert_eq!(config.horizon_secs, 3600.0);
    assert_eq!(config.seed, 7);
    assert_eq!(config.routing, RoutingPolicy::Random);
    assert_eq!(config.arrival_interval, DistributionSpec::exponential(120.0));
    assert_eq!(config.stages, ScenarioConfig::default().stages);
    assert!(KernelHandle::construct(&config).is_ok());
}

#[test]
fn stage_fields_can_be_overridden_through_json() {
    let mut baseline = serde_json::to_value(ScenarioConfig::default()).expect("serialize");
    baseline["stages"][3]["unit_count"] = serde_json::json!(3);
    let config: ScenarioConfig = serde_json::from_value(baseline).expect("deserialize");

    assert_eq!(
        config.stage(StageKind::Macopress).map(|stage| stage.unit_count),
        Some(3)
    );
    let kernel = KernelHandle::construct(&config).expect("valid");
    assert_eq!(kernel.pools().len(), 15);
}
