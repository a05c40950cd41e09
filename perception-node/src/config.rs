use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PerceptionError, Result};

/// Peripheral selection bits, matched against `peripheral_mask`.
pub const SENSOR_CAMERA: u8 = 0x01;
pub const SENSOR_LIDAR: u8 = 0x02;
pub const SENSOR_AUDIO: u8 = 0x04;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// The reference design: LiDAR segmentation plus priority-driven dispatch.
    Cps,
    /// The improved design: every detector over the full frame, in parallel.
    Sge,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PerceptionConfig {
    pub engine: EngineKind,
    /// Number of frames to process before termination.
    pub frame_count: usize,
    /// Frame deadline in milliseconds.
    pub sensing_period_ms: u64,
    /// Tombstone value and priority normalizer for the CPS segmentation.
    pub lidar_range_max: f32,
    /// Which sensors to sample each frame.
    pub peripheral_mask: u8,
    /// Which models of the variant's canonical set to register.
    pub model_mask: u32,
    pub dataset_path: PathBuf,
    pub model_path: PathBuf,
    pub label_path: PathBuf,
    pub inference: InferenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct InferenceConfig {
    /// Intra-op thread count handed to the ONNX runtime session.
    pub intra_threads: i16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of `error`, `warn`, `info`, `debug`, `verbose`.
    pub level: String,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Cps,
            frame_count: 10,
            sensing_period_ms: 100,
            lidar_range_max: 75.0,
            peripheral_mask: SENSOR_CAMERA | SENSOR_LIDAR,
            model_mask: 0x0f,
            dataset_path: PathBuf::from("dataset/segment-10243642118467607790_880_000_900_000"),
            model_path: PathBuf::from("models"),
            label_path: PathBuf::from("models"),
            inference: InferenceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self { intra_threads: 8 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PerceptionConfig {
    /// Load from an optional YAML file overlaid with `ROADSIGHT`-prefixed
    /// environment variables. Missing file plus no overrides yields the
    /// defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("ROADSIGHT").separator("__"))
            .build()
            .map_err(|e| PerceptionError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| PerceptionError::Config(e.to_string()))
    }

    pub fn sensing_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sensing_period_ms)
    }

    pub fn camera_enabled(&self) -> bool {
        self.peripheral_mask & SENSOR_CAMERA != 0
    }

    pub fn lidar_enabled(&self) -> bool {
        self.peripheral_mask & SENSOR_LIDAR != 0
    }

    pub fn audio_enabled(&self) -> bool {
        self.peripheral_mask & SENSOR_AUDIO != 0
    }
}

impl LoggingConfig {
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "verbose" | "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_canonical_benchmark() {
        let cfg = PerceptionConfig::default();
        assert_eq!(cfg.frame_count, 10);
        assert_eq!(cfg.sensing_period_ms, 100);
        assert_eq!(cfg.lidar_range_max, 75.0);
        assert!(cfg.camera_enabled());
        assert!(cfg.lidar_enabled());
        assert!(!cfg.audio_enabled());
    }

    #[test]
    fn verbose_maps_to_trace() {
        let logging = LoggingConfig {
            level: "verbose".into(),
        };
        assert_eq!(logging.tracing_level(), tracing::Level::TRACE);
    }
}
