//! Experiment configuration.
//!
//! All settings are plain serde structs with defaults, loadable from a TOML
//! file merged with `IMAGERY_`-prefixed environment variables via `figment`.
//! Validation is a separate, explicit step ([`ExperimentConfig::validate`])
//! run by the engine during setup, so a config that parses but is logically
//! wrong is caught before any hardware is touched.
//!
//! The audio backend is configured exclusively through [`AudioSettings`]
//! passed to the adapter constructor. There is no process-global audio
//! preference state anywhere in this crate; callers must configure before
//! first use.

use crate::error::{EngineError, Result};
use crate::stimulus::{ShapeKind, Stimulus};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Camera acquisition parameters. The core only forwards these to the
/// recording adapter and the session summary; it never talks to the sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub model_name: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub exposure_time_us: f64,
    pub gain_db: f64,
    pub target_frame_rate: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            model_name: "acA1440-220um".to_string(),
            width: 128,
            height: 128,
            pixel_format: "Mono8".to_string(),
            exposure_time_us: 1000.0,
            gain_db: 17.7,
            target_frame_rate: 500.0,
        }
    }
}

impl CameraSettings {
    /// One-line summary for the session monitor.
    pub fn summary(&self) -> String {
        format!(
            "{}x{} {} {}us {}dB {}fps",
            self.width,
            self.height,
            self.pixel_format,
            self.exposure_time_us,
            self.gain_db,
            self.target_frame_rate
        )
    }
}

/// Phase durations in seconds and per-trial repetition counts.
///
/// Durations are converted to frame counts exactly once per session, after
/// the display refresh rate has been measured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub training_shape_secs: f64,
    pub training_blank_secs: f64,
    pub training_repetitions: u32,
    pub measurement_beep_secs: f64,
    pub measurement_silence_secs: f64,
    pub measurement_repetitions: u32,
    /// Extra delay between training and measurement; 0 disables the phase.
    pub training_to_measurement_delay_secs: f64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            training_shape_secs: 1.5,
            training_blank_secs: 0.5,
            training_repetitions: 5,
            measurement_beep_secs: 1.5,
            measurement_silence_secs: 0.5,
            measurement_repetitions: 5,
            training_to_measurement_delay_secs: 0.0,
        }
    }
}

/// Audio backend configuration, handed to the audio adapter constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub beep_frequency_hz: f64,
    pub beep_volume: f64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            beep_frequency_hz: 440.0,
            beep_volume: 0.5,
        }
    }
}

/// What to present: geometric shapes or image files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StimulusSettings {
    pub color_hex: String,
    pub use_images: bool,
    pub image_paths: Vec<PathBuf>,
}

impl Default for StimulusSettings {
    fn default() -> Self {
        Self {
            color_hex: "#FFFFFF".to_string(),
            use_images: false,
            image_paths: Vec::new(),
        }
    }
}

/// Top-level experiment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub shapes: Vec<String>,
    pub repetitions: u32,
    pub shape_reps_per_subsession: u32,
    pub output_base_dir: PathBuf,
    pub instruction_audio_dir: PathBuf,
    pub camera: CameraSettings,
    pub timing: TimingSettings,
    pub audio: AudioSettings,
    pub stimulus: StimulusSettings,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            shapes: vec![
                "circle".to_string(),
                "square".to_string(),
                "triangle".to_string(),
                "star".to_string(),
            ],
            repetitions: 5,
            shape_reps_per_subsession: 1,
            output_base_dir: default_output_dir(),
            instruction_audio_dir: PathBuf::from("instruction_recordings"),
            camera: CameraSettings::default(),
            timing: TimingSettings::default(),
            audio: AudioSettings::default(),
            stimulus: StimulusSettings::default(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("imagery_experiment_output")
}

impl ExperimentConfig {
    /// Load from a TOML file, with `IMAGERY_`-prefixed environment variables
    /// layered on top.
    pub fn load(path: &Path) -> Result<Self> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("IMAGERY_").split("__"))
            .extract()
            .map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Semantic validation, run before any hardware is created.
    pub fn validate(&self) -> Result<()> {
        if self.stimulus.use_images {
            if self.stimulus.image_paths.is_empty() {
                return Err(EngineError::Config(
                    "at least one image is required in image mode".into(),
                ));
            }
        } else if self.shapes.is_empty() {
            return Err(EngineError::Config(
                "at least one shape must be selected".into(),
            ));
        }
        if self.repetitions < 1 {
            return Err(EngineError::Config("repetitions must be >= 1".into()));
        }
        if self.shape_reps_per_subsession < 1 {
            return Err(EngineError::Config(
                "shape reps per sub-session must be >= 1".into(),
            ));
        }
        if self.camera.width < 16 || self.camera.height < 16 {
            return Err(EngineError::Config("camera ROI must be at least 16x16".into()));
        }
        if self.camera.exposure_time_us <= 0.0 {
            return Err(EngineError::Config("exposure time must be positive".into()));
        }
        if self.camera.target_frame_rate <= 0.0 {
            return Err(EngineError::Config("capture frame rate must be positive".into()));
        }
        let t = &self.timing;
        if t.training_repetitions < 1 {
            return Err(EngineError::Config("training repetitions must be >= 1".into()));
        }
        if t.measurement_repetitions < 1 {
            return Err(EngineError::Config(
                "measurement repetitions must be >= 1".into(),
            ));
        }
        for (name, secs) in [
            ("training shape duration", t.training_shape_secs),
            ("training blank duration", t.training_blank_secs),
            ("measurement beep duration", t.measurement_beep_secs),
            ("measurement silence duration", t.measurement_silence_secs),
        ] {
            if secs <= 0.0 {
                return Err(EngineError::Config(format!("{name} must be positive")));
            }
        }
        if t.training_to_measurement_delay_secs < 0.0 {
            return Err(EngineError::Config(
                "training-to-measurement delay must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the configured stimulus set.
    pub fn stimuli(&self) -> Result<Vec<Stimulus>> {
        if self.stimulus.use_images && !self.stimulus.image_paths.is_empty() {
            return Ok(self
                .stimulus
                .image_paths
                .iter()
                .cloned()
                .map(Stimulus::Image)
                .collect());
        }
        self.shapes
            .iter()
            .map(|name| {
                ShapeKind::from_name(name)
                    .map(Stimulus::Shape)
                    .ok_or_else(|| EngineError::Config(format!("unknown shape: {name}")))
            })
            .collect()
    }
}
