use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use rollcall_vision::{model, PipelineOptions};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("ROLLCALL_CONFIG_PATH").unwrap_or("/usr/local/etc/rollcall/config.toml"))
});

pub static MODEL_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("ROLLCALL_MODEL_PREFIX").unwrap_or("/usr/local/share/rollcall"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest embedding distance still accepted as a match (exclusive)
    pub threshold: f32,
    /// Flat directory of `<identity>.<ext>` reference photos
    pub photo_dir: PathBuf,
    pub gallery_path: PathBuf,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    pub detection_score: f32,
    pub nms_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            photo_dir: PathBuf::from("fotos"),
            gallery_path: PathBuf::from("rostos.bin"),
            detector_model: MODEL_PREFIX.join(model::DETECTOR_MODEL_FILE),
            recognizer_model: MODEL_PREFIX.join(model::RECOGNIZER_MODEL_FILE),
            detection_score: 0.6,
            nms_threshold: 0.3,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            anyhow::bail!("threshold must be a positive number, got {}", self.threshold);
        }
        if !(0.0..=1.0).contains(&self.detection_score) {
            anyhow::bail!(
                "detection_score must be within [0, 1], got {}",
                self.detection_score
            );
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            anyhow::bail!(
                "nms_threshold must be within [0, 1], got {}",
                self.nms_threshold
            );
        }
        Ok(())
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            score_threshold: self.detection_score,
            nms_threshold: self.nms_threshold,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
