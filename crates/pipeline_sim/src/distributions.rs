//! Duration samplers used for service times, arrival intervals and failure models.
//!
//! Every draw takes its own `StdRng`, seeded by [stream_rng] from the scenario
//! seed plus the identity of the draw (stream, stage, batch, attempt). A batch's
//! service time therefore does not depend on how many other events happened
//! before it, which keeps comparisons between scenarios meaningful.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Shared capability for anything that yields a duration in seconds.
pub trait DurationSampler: Send + Sync + std::fmt::Debug {
    /// Sample one duration in seconds. Never negative.
    fn sample_secs(&self, rng: &mut StdRng) -> f64;

    /// Expected value in seconds (before clamping).
    fn mean_secs(&self) -> f64;
}

/// Always returns the same duration.
#[derive(Debug, Clone)]
pub struct ConstantDuration {
    pub secs: f64,
}

impl DurationSampler for ConstantDuration {
    fn sample_secs(&self, _rng: &mut StdRng) -> f64 {
        self.secs.max(0.0)
    }

    fn mean_secs(&self) -> f64 {
        self.secs
    }
}

/// Exponential distribution: memoryless intervals (Poisson arrivals, MTBF/MTTR).
#[derive(Debug, Clone)]
pub struct ExponentialDuration {
    pub mean_secs: f64,
}

impl ExponentialDuration {
    pub fn new(mean_secs: f64) -> Self {
        Self {
            mean_secs: mean_secs.max(0.0),
        }
    }
}

impl DurationSampler for ExponentialDuration {
    fn sample_secs(&self, rng: &mut StdRng) -> f64 {
        if self.mean_secs <= 0.0 {
            return 0.0;
        }
        // -ln(U) * mean, where U is uniform (0, 1]
        let u: f64 = rng.gen();
        let u = u.max(1e-10);
        -u.ln() * self.mean_secs
    }

    fn mean_secs(&self) -> f64 {
        self.mean_secs
    }
}

#[derive(Debug, Clone)]
pub struct UniformDuration {
    pub low_secs: f64,
    pub high_secs: f64,
}

impl DurationSampler for UniformDuration {
    fn sample_secs(&self, rng: &mut StdRng) -> f64 {
        if self.high_secs <= self.low_secs {
            return self.low_secs.max(0.0);
        }
        rng.gen_range(self.low_secs..self.high_secs).max(0.0)
    }

    fn mean_secs(&self) -> f64 {
        (self.low_secs + self.high_secs) / 2.0
    }
}

/// Normal distribution (Box–Muller) with optional clamping to `[min, max]`.
#[derive(Debug, Clone)]
pub struct NormalDuration {
    pub mean_secs: f64,
    pub std_dev_secs: f64,
    pub min_secs: Option<f64>,
    pub max_secs: Option<f64>,
}

impl NormalDuration {
    pub fn new(mean_secs: f64, std_dev_secs: f64) -> Self {
        Self {
            mean_secs,
            std_dev_secs,
            min_secs: None,
            max_secs: None,
        }
    }

    pub fn with_min(mut self, min_secs: f64) -> Self {
        self.min_secs = Some(min_secs);
        self
    }

    pub fn with_max(mut self, max_secs: f64) -> Self {
        self.max_secs = Some(max_secs);
        self
    }
}

impl DurationSampler for NormalDuration {
    fn sample_secs(&self, rng: &mut StdRng) -> f64 {
        let u1: f64 = rng.gen::<f64>().max(1e-10);
        let u2: f64 = rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        let mut value = self.mean_secs + z * self.std_dev_secs;
        if let Some(min) = self.min_secs {
            value = value.max(min);
        }
        if let Some(max) = self.max_secs {
            value = value.min(max);
        }
        value.max(0.0)
    }

    fn mean_secs(&self) -> f64 {
        self.mean_secs
    }
}

/// Sum of sequential phases, e.g. spin-up, spin and spin-down of a centrifuge.
#[derive(Debug)]
pub struct PhasedDuration {
    pub phases: Vec<Box<dyn DurationSampler>>,
}

impl DurationSampler for PhasedDuration {
    fn sample_secs(&self, rng: &mut StdRng) -> f64 {
        self.phases.iter().map(|phase| phase.sample_secs(rng)).sum()
    }

    fn mean_secs(&self) -> f64 {
        self.phases.iter().map(|phase| phase.mean_secs()).sum()
    }
}

/// Serializable description of a duration distribution (seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistributionSpec {
    Constant {
        secs: f64,
    },
    Exponential {
        mean_secs: f64,
    },
    Uniform {
        low_secs: f64,
        high_secs: f64,
    },
    Normal {
        mean_secs: f64,
        std_dev_secs: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_secs: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_secs: Option<f64>,
    },
    Phased {
        phases: Vec<DistributionSpec>,
    },
}

impl DistributionSpec {
    pub fn exponential(mean_secs: f64) -> Self {
        Self::Exponential { mean_secs }
    }

    pub fn uniform(low_secs: f64, high_secs: f64) -> Self {
        Self::Uniform {
            low_secs,
            high_secs,
        }
    }

    pub fn normal(mean_secs: f64, std_dev_secs: f64) -> Self {
        Self::Normal {
            mean_secs,
            std_dev_secs,
            min_secs: None,
            max_secs: None,
        }
    }

    /// Normal clamped from below, the common shape for device service times.
    pub fn normal_min(mean_secs: f64, std_dev_secs: f64, min_secs: f64) -> Self {
        Self::Normal {
            mean_secs,
            std_dev_secs,
            min_secs: Some(min_secs),
            max_secs: None,
        }
    }

    /// Checks that every parameter is positive and every range is well formed.
    pub fn validate(&self) -> Result<(), &'static str> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        match self {
            Self::Constant { secs } => {
                if !positive(*secs) {
                    return Err("constant duration must be positive");
                }
            }
            Self::Exponential { mean_secs } => {
                if !positive(*mean_secs) {
                    return Err("exponential mean must be positive");
                }
            }
            Self::Uniform {
                low_secs,
                high_secs,
            } => {
                if !positive(*low_secs) || !positive(*high_secs) {
                    return Err("uniform bounds must be positive");
                }
                if low_secs > high_secs {
                    return Err("uniform low bound exceeds high bound");
                }
            }
            Self::Normal {
                mean_secs,
                std_dev_secs,
                min_secs,
                max_secs,
            } => {
                if !positive(*mean_secs) {
                    return Err("normal mean must be positive");
                }
                if !positive(*std_dev_secs) {
                    return Err("normal standard deviation must be positive");
                }
                if min_secs.is_some_and(|min| !positive(min)) {
                    return Err("normal minimum must be positive");
                }
                if max_secs.is_some_and(|max| !positive(max)) {
                    return Err("normal maximum must be positive");
                }
                if let (Some(min), Some(max)) = (min_secs, max_secs) {
                    if min > max {
                        return Err("normal minimum exceeds maximum");
                    }
                }
            }
            Self::Phased { phases } => {
                if phases.is_empty() {
                    return Err("phased duration needs at least one phase");
                }
                for phase in phases {
                    phase.validate()?;
                }
            }
        }
        Ok(())
    }

    pub fn build(&self) -> Box<dyn DurationSampler> {
        match self {
            Self::Constant { secs } => Box::new(ConstantDuration { secs: *secs }),
            Self::Exponential { mean_secs } => Box::new(ExponentialDuration::new(*mean_secs)),
            Self::Uniform {
                low_secs,
                high_secs,
            } => Box::new(UniformDuration {
                low_secs: *low_secs,
                high_secs: *high_secs,
            }),
            Self::Normal {
                mean_secs,
                std_dev_secs,
                min_secs,
                max_secs,
            } => Box::new(NormalDuration {
                mean_secs: *mean_secs,
                std_dev_secs: *std_dev_secs,
                min_secs: *min_secs,
                max_secs: *max_secs,
            }),
            Self::Phased { phases } => Box::new(PhasedDuration {
                phases: phases.iter().map(DistributionSpec::build).collect(),
            }),
        }
    }
}

/// Independent random streams. Each purpose draws from its own stream so that
/// enabling one feature (e.g. failures) does not shift the draws of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RngStream {
    Arrival,
    Service,
    Quality,
    Measurement,
    Routing,
    Failure,
    Repair,
}

impl RngStream {
    fn salt(self) -> u64 {
        match self {
            Self::Arrival => 0xA11C_E5ED,
            Self::Service => 0x5E4F_1CE0,
            Self::Quality => 0x0C0A_117E,
            Self::Measurement => 0x3EA5_0BE5,
            Self::Routing => 0x4007_1E55,
            Self::Failure => 0xFA11_0BAD,
            Self::Repair => 0x4E9A_1400,
        }
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Derives a reproducible RNG for one draw identified by `parts` within `stream`.
pub fn stream_rng(seed: u64, stream: RngStream, parts: &[u64]) -> StdRng {
    let mut state = splitmix64(seed ^ stream.salt());
    for part in parts {
        state = splitmix64(state ^ part);
    }
    StdRng::seed_from_u64(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mean(sampler: &dyn DurationSampler, n: u64) -> f64 {
        let total: f64 = (0..n)
            .map(|i| sampler.sample_secs(&mut stream_rng(7, RngStream::Service, &[i])))
            .sum();
        total / n as f64
    }

    #[test]
    fn exponential_mean_is_close_to_configured() {
        let sampler = ExponentialDuration::new(300.0);
        let mean = sample_mean(&sampler, 20_000);
        assert!((mean - 300.0).abs() < 15.0, "mean {mean}");
    }

    #[test]
    fn normal_respects_clamp() {
        let sampler = NormalDuration::new(100.0, 50.0).with_min(90.0).with_max(110.0);
        for i in 0..2_000 {
            let value = sampler.sample_secs(&mut stream_rng(1, RngStream::Service, &[i]));
            assert!((90.0..=110.0).contains(&value), "value {value}");
        }
    }

    #[test]
    fn uniform_stays_in_range() {
        let sampler = UniformDuration {
            low_secs: 15.0,
            high_secs: 25.0,
        };
        for i in 0..2_000 {
            let value = sampler.sample_secs(&mut stream_rng(3, RngStream::Service, &[i]));
            assert!((15.0..25.0).contains(&value));
        }
    }

    #[test]
    fn phased_sums_its_phases() {
        let spec = DistributionSpec::Phased {
            phases: vec![
                DistributionSpec::Constant { secs: 20.0 },
                DistributionSpec::Constant { secs: 180.0 },
                DistributionSpec::Constant { secs: 25.0 },
            ],
        };
        let sampler = spec.build();
        let mut rng = stream_rng(0, RngStream::Service, &[]);
        assert_eq!(sampler.sample_secs(&mut rng), 225.0);
        assert_eq!(sampler.mean_secs(), 225.0);
    }

    #[test]
    fn stream_rng_is_reproducible_and_stream_specific() {
        let a: u64 = stream_rng(42, RngStream::Service, &[1, 2, 3]).gen();
        let b: u64 = stream_rng(42, RngStream::Service, &[1, 2, 3]).gen();
        let c: u64 = stream_rng(42, RngStream::Quality, &[1, 2, 3]).gen();
        let d: u64 = stream_rng(42, RngStream::Service, &[1, 2, 4]).gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn validation_rejects_non_positive_parameters() {
        assert!(DistributionSpec::exponential(0.0).validate().is_err());
        assert!(DistributionSpec::uniform(10.0, 5.0).validate().is_err());
        assert!(DistributionSpec::normal(10.0, -1.0).validate().is_err());
        assert!(DistributionSpec::Phased { phases: vec![] }
            .validate()
            .is_err());
        assert!(DistributionSpec::normal_min(5.0, 0.5, 1.0).validate().is_ok());
    }

    #[test]
    fn spec_deserializes_from_tagged_json() {
        let spec: DistributionSpec =
            serde_json::from_str(r#"{"kind":"normal","mean_secs":5.0,"std_dev_secs":0.5,"min_secs":1.0}"#)
                .expect("parse");
        assert_eq!(spec, DistributionSpec::normal_min(5.0, 0.5, 1.0));
    }
}
