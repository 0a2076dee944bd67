//! The stage catalog: what each of the twelve pipeline stages does, expressed as data.
//!
//! A stage is a composition of samplers chosen by configuration: a service-time
//! sampler, an optional quality gate, an optional failure model and a list of
//! recorded measurements. Nothing here is specific to one device type beyond the
//! default values in [StageConfig::for_stage].

use std::collections::BTreeMap;
use std::fmt;

use bevy_ecs::prelude::Resource;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::clock::secs_to_ms;
use crate::distributions::{
    stream_rng, DistributionSpec, DurationSampler, ExponentialDuration, RngStream,
};
use crate::error::ConfigurationError;
use crate::pool::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    BloodBagScanner,
    Centrifuge,
    PlasmaExtractor,
    Macopress,
    PlateletAgitator,
    SterileConnector,
    PoolingStation,
    QualityControl,
    LabelingStation,
    StorageRefrigerator,
    BarcodeReader,
    ShippingPrep,
}

impl StageKind {
    /// Fixed traversal order of the pipeline.
    pub const PIPELINE: [StageKind; 12] = [
        StageKind::BloodBagScanner,
        StageKind::Centrifuge,
        StageKind::PlasmaExtractor,
        StageKind::Macopress,
        StageKind::PlateletAgitator,
        StageKind::SterileConnector,
        StageKind::PoolingStation,
        StageKind::QualityControl,
        StageKind::LabelingStation,
        StageKind::StorageRefrigerator,
        StageKind::BarcodeReader,
        StageKind::ShippingPrep,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::BloodBagScanner => "blood_bag_scanner",
            StageKind::Centrifuge => "centrifuge",
            StageKind::PlasmaExtractor => "plasma_extractor",
            StageKind::Macopress => "macopress",
            StageKind::PlateletAgitator => "platelet_agitator",
            StageKind::SterileConnector => "sterile_connector",
            StageKind::PoolingStation => "pooling_station",
            StageKind::QualityControl => "quality_control",
            StageKind::LabelingStation => "labeling_station",
            StageKind::StorageRefrigerator => "storage_refrigerator",
            StageKind::BarcodeReader => "barcode_reader",
            StageKind::ShippingPrep => "shipping_prep",
        }
    }

    /// Position of this stage in [StageKind::PIPELINE].
    pub fn position(self) -> usize {
        Self::PIPELINE
            .iter()
            .position(|kind| *kind == self)
            .unwrap_or_default()
    }

    pub fn default_telemetry(self) -> TelemetryProfile {
        match self {
            StageKind::QualityControl => TelemetryProfile::Inspection,
            StageKind::PlateletAgitator | StageKind::StorageRefrigerator => {
                TelemetryProfile::Storage
            }
            _ => TelemetryProfile::Processing,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which gauge set a stage's devices report in telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryProfile {
    Processing,
    Inspection,
    Storage,
}

/// Thresholds of the quality-control gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGateConfig {
    pub platelet_count_low: f64,
    pub platelet_count_high: f64,
    pub platelet_count_min: f64,
    pub ph_low: f64,
    pub ph_high: f64,
    pub ph_min: f64,
    pub ph_max: f64,
    pub bacterial_pass_probability: f64,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            platelet_count_low: 2.5e11,
            platelet_count_high: 4.0e11,
            platelet_count_min: 3.0e11,
            ph_low: 6.8,
            ph_high: 7.4,
            ph_min: 6.9,
            ph_max: 7.3,
            bacterial_pass_probability: 0.999,
        }
    }
}

impl QualityGateConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !(self.platelet_count_low > 0.0 && self.platelet_count_low <= self.platelet_count_high)
        {
            return Err("platelet count range must be positive and ordered");
        }
        if !(self.ph_low > 0.0 && self.ph_low <= self.ph_high) {
            return Err("pH sampling range must be positive and ordered");
        }
        if self.ph_min > self.ph_max {
            return Err("pH acceptance window is inverted");
        }
        if !(0.0..=1.0).contains(&self.bacterial_pass_probability) {
            return Err("bacterial pass probability must be within [0, 1]");
        }
        Ok(())
    }
}

/// Why the quality gate discarded a batch. The first failing check wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityRejection {
    LowPlateletCount,
    PhOutOfRange,
    BacterialContamination,
}

impl QualityRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityRejection::LowPlateletCount => "low_platelet_count",
            QualityRejection::PhOutOfRange => "ph_out_of_range",
            QualityRejection::BacterialContamination => "bacterial_contamination",
        }
    }
}

impl fmt::Display for QualityRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one quality inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    pub rejection: Option<QualityRejection>,
    pub platelet_count: f64,
    pub ph_level: f64,
    pub quality_score: f64,
}

impl Inspection {
    pub fn passed(&self) -> bool {
        self.rejection.is_none()
    }

    /// Writes the inspection readings into a batch's quality metrics.
    pub fn record(&self, metrics: &mut BTreeMap<String, f64>) {
        metrics.insert("platelet_count".to_string(), self.platelet_count);
        metrics.insert("ph_level".to_string(), self.ph_level);
        metrics.insert("qc_passed".to_string(), if self.passed() { 1.0 } else { 0.0 });
        metrics.insert("quality_score".to_string(), self.quality_score);
    }
}

/// Shared capability for pass/fail inspections.
pub trait QualitySampler: Send + Sync + fmt::Debug {
    fn inspect(&self, rng: &mut StdRng) -> Inspection;
}

/// Threshold checks on sampled platelet count, pH and bacterial screen.
#[derive(Debug, Clone)]
pub struct ThresholdQualityGate {
    pub config: QualityGateConfig,
}

impl QualitySampler for ThresholdQualityGate {
    fn inspect(&self, rng: &mut StdRng) -> Inspection {
        let c = &self.config;
        let platelet_count = sample_range(rng, c.platelet_count_low, c.platelet_count_high);
        let ph_level = sample_range(rng, c.ph_low, c.ph_high);
        let bacterial_clear = rng.gen::<f64>() < c.bacterial_pass_probability;

        let rejection = if platelet_count < c.platelet_count_min {
            Some(QualityRejection::LowPlateletCount)
        } else if !(c.ph_min..=c.ph_max).contains(&ph_level) {
            Some(QualityRejection::PhOutOfRange)
        } else if !bacterial_clear {
            Some(QualityRejection::BacterialContamination)
        } else {
            None
        };
        let quality_score = if rejection.is_none() {
            rng.gen_range(0.85..0.99)
        } else {
            rng.gen_range(0.50..0.84)
        };

        Inspection {
            rejection,
            platelet_count,
            ph_level,
            quality_score,
        }
    }
}

fn sample_range(rng: &mut StdRng, low: f64, high: f64) -> f64 {
    if high > low {
        rng.gen_range(low..high)
    } else {
        low
    }
}

/// A reading recorded on every batch a stage processes, sampled uniformly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSpec {
    pub name: String,
    pub low: f64,
    pub high: f64,
}

impl MeasurementSpec {
    pub fn new(name: &str, low: f64, high: f64) -> Self {
        Self {
            name: name.to_string(),
            low,
            high,
        }
    }
}

fn default_unit_count() -> u32 {
    1
}

fn default_capacity() -> u32 {
    1
}

fn default_mtbf_secs() -> f64 {
    14_400.0
}

fn default_mttr_secs() -> f64 {
    1_800.0
}

/// Configuration of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub stage: StageKind,
    #[serde(default = "default_unit_count")]
    pub unit_count: u32,
    #[serde(default = "default_capacity")]
    pub capacity_per_unit: u32,
    pub service_time: DistributionSpec,
    #[serde(default)]
    pub enable_failures: bool,
    #[serde(default = "default_mtbf_secs")]
    pub mtbf_secs: f64,
    #[serde(default = "default_mttr_secs")]
    pub mttr_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_gate: Option<QualityGateConfig>,
    #[serde(default)]
    pub measurements: Vec<MeasurementSpec>,
    /// Gauge set for telemetry; defaults to the stage kind's usual profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetryProfile>,
}

impl StageConfig {
    fn new(stage: StageKind, unit_count: u32, capacity_per_unit: u32, service_time: DistributionSpec) -> Self {
        Self {
            stage,
            unit_count,
            capacity_per_unit,
            service_time,
            enable_failures: false,
            mtbf_secs: default_mtbf_secs(),
            mttr_secs: default_mttr_secs(),
            quality_gate: None,
            measurements: Vec::new(),
            telemetry: None,
        }
    }

    fn measuring(mut self, name: &str, low: f64, high: f64) -> Self {
        self.measurements.push(MeasurementSpec::new(name, low, high));
        self
    }

    /// Reference line defaults for one stage.
    pub fn for_stage(stage: StageKind) -> Self {
        use DistributionSpec as D;
        match stage {
            StageKind::BloodBagScanner => Self::new(stage, 1, 1, D::normal_min(5.0, 0.5, 1.0))
                .measuring("scan_quality", 0.85, 1.0),
            StageKind::Centrifuge => Self::new(
                stage,
                2,
                4,
                D::Phased {
                    phases: vec![
                        D::uniform(15.0, 25.0),
                        D::Normal {
                            mean_secs: 180.0,
                            std_dev_secs: 10.0,
                            min_secs: Some(120.0),
                            max_secs: Some(240.0),
                        },
                        D::uniform(20.0, 30.0),
                    ],
                },
            )
            .measuring("separation_quality", 0.90, 0.99)
            .measuring("platelet_yield", 0.85, 0.95),
            StageKind::PlasmaExtractor => Self::new(stage, 1, 2, D::normal_min(90.0, 5.0, 60.0))
                .measuring("plasma_volume", 200.0, 280.0),
            StageKind::Macopress => Self::new(stage, 1, 1, D::normal_min(120.0, 8.0, 90.0))
                .measuring("platelet_volume", 45.0, 65.0),
            StageKind::PlateletAgitator => {
                Self::new(stage, 1, 8, D::normal_min(3600.0, 180.0, 3000.0))
                    .measuring("platelet_viability", 0.92, 0.99)
            }
            StageKind::SterileConnector => Self::new(stage, 1, 1, D::normal_min(45.0, 5.0, 30.0))
                .measuring("connection_quality", 0.95, 1.0),
            StageKind::PoolingStation => Self::new(stage, 1, 1, D::normal_min(300.0, 20.0, 240.0))
                .measuring("pooled_volume", 200.0, 250.0),
            StageKind::QualityControl => {
                let mut config = Self::new(stage, 1, 2, D::normal_min(240.0, 15.0, 180.0));
                config.quality_gate = Some(QualityGateConfig::default());
                config
            }
            StageKind::LabelingStation => Self::new(stage, 1, 1, D::normal_min(60.0, 5.0, 45.0))
                .measuring("label_quality", 0.95, 1.0),
            StageKind::StorageRefrigerator => {
                Self::new(stage, 1, 20, D::normal_min(7200.0, 600.0, 3600.0))
                    .measuring("storage_temperature", 21.5, 22.5)
            }
            StageKind::BarcodeReader => Self::new(stage, 1, 1, D::normal_min(8.0, 1.0, 5.0))
                .measuring("read_quality", 0.90, 1.0),
            StageKind::ShippingPrep => Self::new(stage, 1, 2, D::normal_min(180.0, 15.0, 120.0)),
        }
    }

    /// All twelve stages with reference defaults, in pipeline order.
    pub fn baseline_pipeline() -> Vec<Self> {
        StageKind::PIPELINE
            .iter()
            .map(|kind| Self::for_stage(*kind))
            .collect()
    }

    pub fn telemetry_profile(&self) -> TelemetryProfile {
        self.telemetry
            .unwrap_or_else(|| self.stage.default_telemetry())
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let stage = self.stage;
        if self.unit_count == 0 {
            return Err(ConfigurationError::NoUnits { stage });
        }
        if self.capacity_per_unit == 0 {
            return Err(ConfigurationError::NoCapacity { stage });
        }
        self.service_time
            .validate()
            .map_err(|reason| ConfigurationError::ServiceTime { stage, reason })?;
        if !(self.mtbf_secs.is_finite() && self.mtbf_secs > 0.0) {
            return Err(ConfigurationError::NonPositiveMtbf {
                stage,
                value: self.mtbf_secs,
            });
        }
        if !(self.mttr_secs.is_finite() && self.mttr_secs > 0.0) {
            return Err(ConfigurationError::NonPositiveMttr {
                stage,
                value: self.mttr_secs,
            });
        }
        for measurement in &self.measurements {
            if !(measurement.low.is_finite()
                && measurement.high.is_finite()
                && measurement.low <= measurement.high)
            {
                return Err(ConfigurationError::Measurement {
                    stage,
                    name: measurement.name.clone(),
                });
            }
        }
        if let Some(gate) = &self.quality_gate {
            gate.validate()
                .map_err(|reason| ConfigurationError::QualityGate { stage, reason })?;
        }
        Ok(())
    }
}

/// Exponential time-to-failure and time-to-repair for one stage's devices.
#[derive(Debug, Clone)]
pub struct FailureModel {
    pub time_to_failure: ExponentialDuration,
    pub time_to_repair: ExponentialDuration,
}

impl FailureModel {
    pub fn new(mtbf_secs: f64, mttr_secs: f64) -> Self {
        Self {
            time_to_failure: ExponentialDuration::new(mtbf_secs),
            time_to_repair: ExponentialDuration::new(mttr_secs),
        }
    }

    /// Uptime before failure number `cycle` of `device`.
    pub fn sample_uptime_ms(&self, seed: u64, device: DeviceId, cycle: u64) -> u64 {
        let mut rng = stream_rng(seed, RngStream::Failure, &[device.0 as u64, cycle]);
        secs_to_ms(self.time_to_failure.sample_secs(&mut rng)).max(1)
    }

    /// Repair duration after failure number `cycle` of `device`.
    pub fn sample_repair_ms(&self, seed: u64, device: DeviceId, cycle: u64) -> u64 {
        let mut rng = stream_rng(seed, RngStream::Repair, &[device.0 as u64, cycle]);
        secs_to_ms(self.time_to_repair.sample_secs(&mut rng)).max(1)
    }
}

/// Runtime form of a stage: its samplers plus the devices that serve it.
#[derive(Debug)]
pub struct StageProcess {
    pub kind: StageKind,
    pub index: usize,
    pub telemetry: TelemetryProfile,
    pub failure: Option<FailureModel>,
    pub devices: Vec<DeviceId>,
    service: Box<dyn DurationSampler>,
    quality: Option<Box<dyn QualitySampler>>,
    measurements: Vec<MeasurementSpec>,
}

impl StageProcess {
    pub fn from_config(index: usize, config: &StageConfig) -> Self {
        let quality = config.quality_gate.as_ref().map(|gate| {
            Box::new(ThresholdQualityGate {
                config: gate.clone(),
            }) as Box<dyn QualitySampler>
        });
        let failure = config
            .enable_failures
            .then(|| FailureModel::new(config.mtbf_secs, config.mttr_secs));
        Self {
            kind: config.stage,
            index,
            telemetry: config.telemetry_profile(),
            failure,
            devices: Vec::new(),
            service: config.service_time.build(),
            quality,
            measurements: config.measurements.clone(),
        }
    }

    pub fn has_quality_gate(&self) -> bool {
        self.quality.is_some()
    }

    pub fn mean_service_secs(&self) -> f64 {
        self.service.mean_secs()
    }

    /// Service duration for one attempt of a batch at this stage, at least 1 ms.
    pub fn sample_service_ms(&self, seed: u64, batch_serial: u64, attempt: u32) -> u64 {
        let mut rng = stream_rng(
            seed,
            RngStream::Service,
            &[self.index as u64, batch_serial, u64::from(attempt)],
        );
        secs_to_ms(self.service.sample_secs(&mut rng)).max(1)
    }

    /// Runs the quality gate, if this stage has one.
    pub fn inspect(&self, seed: u64, batch_serial: u64) -> Option<Inspection> {
        let gate = self.quality.as_ref()?;
        let mut rng = stream_rng(
            seed,
            RngStream::Quality,
            &[self.index as u64, batch_serial],
        );
        Some(gate.inspect(&mut rng))
    }

    pub fn record_measurements(
        &self,
        seed: u64,
        batch_serial: u64,
        metrics: &mut BTreeMap<String, f64>,
    ) {
        if self.measurements.is_empty() {
            return;
        }
        let mut rng = stream_rng(
            seed,
            RngStream::Measurement,
            &[self.index as u64, batch_serial],
        );
        for measurement in &self.measurements {
            let value = sample_range(&mut rng, measurement.low, measurement.high);
            metrics.insert(measurement.name.clone(), value);
        }
    }
}

/// The configured stages in traversal order.
#[derive(Debug, Default, Resource)]
pub struct Pipeline {
    pub stages: Vec<StageProcess>,
}

impl Pipeline {
    pub fn stage(&self, index: usize) -> Option<&StageProcess> {
        self.stages.get(index)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
