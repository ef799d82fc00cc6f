//! Layered configuration loading: built-in defaults (every default named
//! in spec.md §6) < an optional TOML file (`censor.toml`, override via
//! `--config`/`CENSOR_CONFIG`) < environment variables
//! (`CENSOR_BATCH__MAX_SIZE` etc.) < CLI flags. Mirrors the teacher's
//! file/env/CLI composition in `ferrex-server::infra::config::loader`,
//! narrowed to the handful of knobs this crate owns — no database/auth
//! sections to carry over, since the engine itself is in-memory only.

use censor_core::config::{BlurMethod, EngineConfig};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Host/port for the introspection HTTP API. Not part of [`EngineConfig`]
/// since it is a `censor-server` process concern, not an engine tunable.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8088,
        }
    }
}

/// Fully resolved configuration the rest of the process consumes.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub worker_pool_size: usize,
}

/// Command-line surface. Only the handful of knobs an operator is likely
/// to flip per-invocation get a flag; everything else lives in the file
/// and environment layers — the same split the teacher's `main.rs` makes
/// between `Args` (host/port only) and the full `Config` loaded from env.
#[derive(Debug, Parser)]
#[command(
    name = "censor-server",
    version,
    about = "Introspection host for the real-time video censorship engine"
)]
pub struct Cli {
    /// Path to a censor.toml configuration file.
    #[arg(long, env = "CENSOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind host for the introspection HTTP API.
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port for the introspection HTTP API.
    #[arg(long)]
    pub port: Option<u16>,

    /// Number of process-wide inference worker tasks. Defaults to
    /// `detector.max_in_flight` if unset, so the pool's concurrency
    /// matches the configured in-flight bound.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Optional `.env` file to load before reading environment variables.
    #[arg(long)]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    server: FileServerConfig,
    batch: FileBatchConfig,
    kalman: FileKalmanConfig,
    decay: FileDecayConfig,
    blur: FileBlurConfig,
    detector: FileDetectorConfig,
    degradation: FileDegradationConfig,
    drain_deadline_ms: Option<u64>,
    workers: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileServerConfig {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileBatchConfig {
    max_wait_ms: Option<u64>,
    max_size: Option<usize>,
    max_in_flight: Option<usize>,
    min_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileKalmanConfig {
    enabled: Option<bool>,
    process_noise: Option<f64>,
    measurement_noise: Option<f64>,
    miss_budget: Option<u32>,
    max_age_ms: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileDecayConfig {
    rate: Option<f64>,
    min_confidence: Option<f64>,
    dilation_px: Option<f64>,
    association_iou_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileBlurConfig {
    method: Option<String>,
    pixel_size: Option<u32>,
    gaussian_radius: Option<u32>,
    gaussian_passes: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileDetectorConfig {
    timeout_ms: Option<u64>,
    score_threshold: Option<f32>,
    downscale_width: Option<u32>,
    downscale_height: Option<u32>,
    health_probe_interval_ms: Option<u64>,
    health_probe_failures_before_unhealthy: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileDegradationConfig {
    publish_latency_budget_ms: Option<f64>,
    degrade_threshold_ms: Option<f64>,
    recover_threshold_ms: Option<f64>,
    recover_sustain_ms: Option<i64>,
    ewma_window: Option<usize>,
}

/// Environment-sourced overrides, one field per engine knob, named
/// `CENSOR_<SECTION>__<FIELD>` (double underscore separates section from
/// field, matching the teacher's nested-env-var convention).
#[derive(Debug, Default, Clone)]
struct EnvConfig {
    server_host: Option<String>,
    server_port: Option<u16>,
    batch_max_wait_ms: Option<u64>,
    batch_max_size: Option<usize>,
    batch_max_in_flight: Option<usize>,
    batch_min_size: Option<usize>,
    kalman_enabled: Option<bool>,
    kalman_process_noise: Option<f64>,
    kalman_measurement_noise: Option<f64>,
    kalman_miss_budget: Option<u32>,
    kalman_max_age_ms: Option<i64>,
    decay_rate: Option<f64>,
    decay_min_confidence: Option<f64>,
    decay_dilation_px: Option<f64>,
    decay_association_iou_threshold: Option<f64>,
    blur_method: Option<String>,
    blur_pixel_size: Option<u32>,
    blur_gaussian_radius: Option<u32>,
    blur_gaussian_passes: Option<u32>,
    detector_timeout_ms: Option<u64>,
    detector_score_threshold: Option<f32>,
    detector_downscale_width: Option<u32>,
    detector_downscale_height: Option<u32>,
    detector_health_probe_interval_ms: Option<u64>,
    detector_health_probe_failures_before_unhealthy: Option<u32>,
    degradation_publish_latency_budget_ms: Option<f64>,
    degradation_degrade_threshold_ms: Option<f64>,
    degradation_recover_threshold_ms: Option<f64>,
    degradation_recover_sustain_ms: Option<i64>,
    degradation_ewma_window: Option<usize>,
    drain_deadline_ms: Option<u64>,
    workers: Option<usize>,
}

fn env_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl EnvConfig {
    fn gather() -> Self {
        Self {
            server_host: std::env::var("CENSOR_SERVER__HOST").ok(),
            server_port: env_var("CENSOR_SERVER__PORT"),
            batch_max_wait_ms: env_var("CENSOR_BATCH__MAX_WAIT_MS"),
            batch_max_size: env_var("CENSOR_BATCH__MAX_SIZE"),
            batch_max_in_flight: env_var("CENSOR_BATCH__MAX_IN_FLIGHT"),
            batch_min_size: env_var("CENSOR_BATCH__MIN_SIZE"),
            kalman_enabled: env_var("CENSOR_KALMAN__ENABLED"),
            kalman_process_noise: env_var("CENSOR_KALMAN__PROCESS_NOISE"),
            kalman_measurement_noise: env_var("CENSOR_KALMAN__MEASUREMENT_NOISE"),
            kalman_miss_budget: env_var("CENSOR_KALMAN__MISS_BUDGET"),
            kalman_max_age_ms: env_var("CENSOR_KALMAN__MAX_AGE_MS"),
            decay_rate: env_var("CENSOR_DECAY__RATE"),
            decay_min_confidence: env_var("CENSOR_DECAY__MIN_CONFIDENCE"),
            decay_dilation_px: env_var("CENSOR_DECAY__DILATION_PX"),
            decay_association_iou_threshold: env_var("CENSOR_DECAY__ASSOCIATION_IOU_THRESHOLD"),
            blur_method: std::env::var("CENSOR_BLUR__METHOD").ok(),
            blur_pixel_size: env_var("CENSOR_BLUR__PIXEL_SIZE"),
            blur_gaussian_radius: env_var("CENSOR_BLUR__GAUSSIAN_RADIUS"),
            blur_gaussian_passes: env_var("CENSOR_BLUR__GAUSSIAN_PASSES"),
            detector_timeout_ms: env_var("CENSOR_DETECTOR__TIMEOUT_MS"),
            detector_score_threshold: env_var("CENSOR_DETECTOR__SCORE_THRESHOLD"),
            detector_downscale_width: env_var("CENSOR_DETECTOR__DOWNSCALE_WIDTH"),
            detector_downscale_height: env_var("CENSOR_DETECTOR__DOWNSCALE_HEIGHT"),
            detector_health_probe_interval_ms: env_var("CENSOR_DETECTOR__HEALTH_PROBE_INTERVAL_MS"),
            detector_health_probe_failures_before_unhealthy: env_var(
                "CENSOR_DETECTOR__HEALTH_PROBE_FAILURES_BEFORE_UNHEALTHY",
            ),
            degradation_publish_latency_budget_ms: env_var("CENSOR_DEGRADATION__PUBLISH_LATENCY_BUDGET_MS"),
            degradation_degrade_threshold_ms: env_var("CENSOR_DEGRADATION__DEGRADE_THRESHOLD_MS"),
            degradation_recover_threshold_ms: env_var("CENSOR_DEGRADATION__RECOVER_THRESHOLD_MS"),
            degradation_recover_sustain_ms: env_var("CENSOR_DEGRADATION__RECOVER_SUSTAIN_MS"),
            degradation_ewma_window: env_var("CENSOR_DEGRADATION__EWMA_WINDOW"),
            drain_deadline_ms: env_var("CENSOR_DRAIN_DEADLINE_MS"),
            workers: env_var("CENSOR_WORKERS"),
        }
    }
}

fn parse_blur_method(raw: &str) -> Option<BlurMethod> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pixelation" => Some(BlurMethod::Pixelation),
        "gaussian" => Some(BlurMethod::Gaussian),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Composes [`ResolvedConfig`] from defaults, an optional TOML file, the
/// environment, and CLI flags, in that precedence order.
pub struct ConfigLoader<'a> {
    cli: &'a Cli,
}

impl<'a> ConfigLoader<'a> {
    pub fn new(cli: &'a Cli) -> Self {
        Self { cli }
    }

    pub fn load(&self) -> Result<ResolvedConfig, ConfigLoadError> {
        if let Some(env_path) = &self.cli.env_file {
            let _ = dotenvy::from_path(env_path);
        } else {
            let _ = dotenvy::dotenv();
        }

        let file = self.load_file()?;
        let env = EnvConfig::gather();

        let server = ServerConfig {
            host: self
                .cli
                .host
                .clone()
                .or(env.server_host.clone())
                .or(file.server.host.clone())
                .unwrap_or_else(|| ServerConfig::default().host),
            port: self
                .cli
                .port
                .or(env.server_port)
                .or(file.server.port)
                .unwrap_or_else(|| ServerConfig::default().port),
        };

        let mut engine = EngineConfig::default();

        engine.batch.max_wait_ms = env
            .batch_max_wait_ms
            .or(file.batch.max_wait_ms)
            .unwrap_or(engine.batch.max_wait_ms);
        engine.batch.max_size = env
            .batch_max_size
            .or(file.batch.max_size)
            .unwrap_or(engine.batch.max_size);
        engine.batch.max_in_flight = env
            .batch_max_in_flight
            .or(file.batch.max_in_flight)
            .unwrap_or(engine.batch.max_in_flight);
        engine.batch.min_size = env
            .batch_min_size
            .or(file.batch.min_size)
            .unwrap_or(engine.batch.min_size);

        engine.kalman.enabled = env
            .kalman_enabled
            .or(file.kalman.enabled)
            .unwrap_or(engine.kalman.enabled);
        engine.kalman.process_noise = env
            .kalman_process_noise
            .or(file.kalman.process_noise)
            .unwrap_or(engine.kalman.process_noise);
        engine.kalman.measurement_noise = env
            .kalman_measurement_noise
            .or(file.kalman.measurement_noise)
            .unwrap_or(engine.kalman.measurement_noise);
        engine.kalman.miss_budget = env
            .kalman_miss_budget
            .or(file.kalman.miss_budget)
            .unwrap_or(engine.kalman.miss_budget);
        engine.kalman.max_age_ms = env
            .kalman_max_age_ms
            .or(file.kalman.max_age_ms)
            .unwrap_or(engine.kalman.max_age_ms);

        engine.decay.rate = env.decay_rate.or(file.decay.rate).unwrap_or(engine.decay.rate);
        engine.decay.min_confidence = env
            .decay_min_confidence
            .or(file.decay.min_confidence)
            .unwrap_or(engine.decay.min_confidence);
        engine.decay.dilation_px = env
            .decay_dilation_px
            .or(file.decay.dilation_px)
            .unwrap_or(engine.decay.dilation_px);
        engine.decay.association_iou_threshold = env
            .decay_association_iou_threshold
            .or(file.decay.association_iou_threshold)
            .unwrap_or(engine.decay.association_iou_threshold);

        if let Some(method) = env
            .blur_method
            .as_deref()
            .and_then(parse_blur_method)
            .or_else(|| file.blur.method.as_deref().and_then(parse_blur_method))
        {
            engine.blur.method = method;
        }
        engine.blur.pixel_size = env
            .blur_pixel_size
            .or(file.blur.pixel_size)
            .unwrap_or(engine.blur.pixel_size);
        engine.blur.gaussian_radius = env
            .blur_gaussian_radius
            .or(file.blur.gaussian_radius)
            .unwrap_or(engine.blur.gaussian_radius);
        engine.blur.gaussian_passes = env
            .blur_gaussian_passes
            .or(file.blur.gaussian_passes)
            .unwrap_or(engine.blur.gaussian_passes);

        engine.detector.timeout_ms = env
            .detector_timeout_ms
            .or(file.detector.timeout_ms)
            .unwrap_or(engine.detector.timeout_ms);
        engine.detector.score_threshold = env
            .detector_score_threshold
            .or(file.detector.score_threshold)
            .unwrap_or(engine.detector.score_threshold);
        engine.detector.downscale_width = env
            .detector_downscale_width
            .or(file.detector.downscale_width)
            .unwrap_or(engine.detector.downscale_width);
        engine.detector.downscale_height = env
            .detector_downscale_height
            .or(file.detector.downscale_height)
            .unwrap_or(engine.detector.downscale_height);
        engine.detector.health_probe_interval_ms = env
            .detector_health_probe_interval_ms
            .or(file.detector.health_probe_interval_ms)
            .unwrap_or(engine.detector.health_probe_interval_ms);
        engine.detector.health_probe_failures_before_unhealthy = env
            .detector_health_probe_failures_before_unhealthy
            .or(file.detector.health_probe_failures_before_unhealthy)
            .unwrap_or(engine.detector.health_probe_failures_before_unhealthy);

        engine.degradation.publish_latency_budget_ms = env
            .degradation_publish_latency_budget_ms
            .or(file.degradation.publish_latency_budget_ms)
            .unwrap_or(engine.degradation.publish_latency_budget_ms);
        engine.degradation.degrade_threshold_ms = env
            .degradation_degrade_threshold_ms
            .or(file.degradation.degrade_threshold_ms)
            .unwrap_or(engine.degradation.degrade_threshold_ms);
        engine.degradation.recover_threshold_ms = env
            .degradation_recover_threshold_ms
            .or(file.degradation.recover_threshold_ms)
            .unwrap_or(engine.degradation.recover_threshold_ms);
        engine.degradation.recover_sustain_ms = env
            .degradation_recover_sustain_ms
            .or(file.degradation.recover_sustain_ms)
            .unwrap_or(engine.degradation.recover_sustain_ms);
        engine.degradation.ewma_window = env
            .degradation_ewma_window
            .or(file.degradation.ewma_window)
            .unwrap_or(engine.degradation.ewma_window);

        engine.drain_deadline_ms = env
            .drain_deadline_ms
            .or(file.drain_deadline_ms)
            .unwrap_or(engine.drain_deadline_ms);

        let worker_pool_size = self
            .cli
            .workers
            .or(env.workers)
            .or(file.workers)
            .unwrap_or(engine.batch.max_in_flight);

        Ok(ResolvedConfig {
            server,
            engine,
            worker_pool_size,
        })
    }

    fn load_file(&self) -> Result<FileConfig, ConfigLoadError> {
        let explicit = self.cli.config.clone();
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigLoadError::MissingConfig { path });
                }
                Some(path)
            }
            None => {
                let default = PathBuf::from("censor.toml");
                if default.exists() { Some(default) } else { None }
            }
        };

        let Some(path) = path else {
            return Ok(FileConfig::default());
        };

        self.parse_file(&path)
    }

    fn parse_file(&self, path: &Path) -> Result<FileConfig, ConfigLoadError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
