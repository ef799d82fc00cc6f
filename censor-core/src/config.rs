//! Tunables named in the external interface contract. `censor-server`
//! layers file/env/CLI sources on top of [`EngineConfig::default`]; the
//! engine itself only ever sees the resolved struct.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_wait_ms: u64,
    pub max_size: usize,
    pub max_in_flight: usize,
    pub min_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: 30,
            max_size: 8,
            max_in_flight: 15,
            min_size: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    pub enabled: bool,
    pub process_noise: f64,
    pub measurement_noise: f64,
    pub miss_budget: u32,
    pub max_age_ms: i64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            process_noise: 0.01,
            measurement_noise: 0.1,
            miss_budget: 15,
            max_age_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub rate: f64,
    pub min_confidence: f64,
    pub dilation_px: f64,
    pub association_iou_threshold: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            rate: 0.85,
            min_confidence: 0.3,
            dilation_px: 8.0,
            association_iou_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlurMethod {
    Pixelation,
    Gaussian,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlurConfig {
    pub method: BlurMethod,
    pub pixel_size: u32,
    pub gaussian_radius: u32,
    pub gaussian_passes: u32,
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            method: BlurMethod::Pixelation,
            pixel_size: 20,
            gaussian_radius: 15,
            gaussian_passes: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub timeout_ms: u64,
    pub score_threshold: f32,
    pub downscale_width: u32,
    pub downscale_height: u32,
    pub health_probe_interval_ms: u64,
    pub health_probe_failures_before_unhealthy: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            score_threshold: 0.5,
            downscale_width: 320,
            downscale_height: 180,
            health_probe_interval_ms: 2_000,
            health_probe_failures_before_unhealthy: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    pub publish_latency_budget_ms: f64,
    pub degrade_threshold_ms: f64,
    pub recover_threshold_ms: f64,
    pub recover_sustain_ms: i64,
    pub ewma_window: usize,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            publish_latency_budget_ms: 30.0,
            degrade_threshold_ms: 25.0,
            recover_threshold_ms: 18.0,
            recover_sustain_ms: 5_000,
            ewma_window: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub batch: BatchConfig,
    pub kalman: KalmanConfig,
    pub decay: DecayConfig,
    pub blur: BlurConfig,
    pub detector: DetectorConfig,
    pub degradation: DegradationConfig,
    pub drain_deadline_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            kalman: KalmanConfig::default(),
            decay: DecayConfig::default(),
            blur: BlurConfig::default(),
            detector: DetectorConfig::default(),
            degradation: DegradationConfig::default(),
            drain_deadline_ms: 2_000,
        }
    }
}
