use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use trinket_vision::cascade::{DEFAULT_MIN_NEIGHBORS, DEFAULT_SCALE_FACTOR};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("TRINKET_CONFIG_PATH").unwrap_or("/usr/local/etc/trinket/config.toml"))
});

pub static ASSET_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("TRINKET_ASSET_PREFIX").unwrap_or("/usr/local/share/trinket"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub frame: FrameConfig,
    /// Accessory manifest.
    pub catalog: PathBuf,
    pub detector: DetectorConfig,
    pub camera: String,
    /// Directory processed captures are written to.
    pub captures: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Cascade,
    Yunet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub kind: DetectorKind,
    /// Cascade model, OpenCV XML or JSON; used by `kind = "cascade"`.
    pub cascade: PathBuf,
    pub scale_factor: f64,
    pub min_neighbors: usize,
    /// ONNX model, used by `kind = "yunet"`.
    pub model: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            catalog: ASSET_PREFIX.join("catalog.toml"),
            detector: DetectorConfig::default(),
            camera: "/dev/video0".to_string(),
            captures: PathBuf::from("captures"),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            width: trinket_vision::WIDTH,
            height: trinket_vision::HEIGHT,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: DetectorKind::Cascade,
            cascade: ASSET_PREFIX.join("haarcascade_frontalface_default.xml"),
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            model: ASSET_PREFIX.join("face_detection_yunet_2023mar.onnx"),
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

impl Config {
    /// Make relative asset paths relative to `base` instead of the working
    /// directory.
    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.catalog,
            &mut self.captures,
            &mut self.detector.cascade,
            &mut self.detector.model,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let mut cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    if let Some(base) = path.parent() {
        cfg.resolve_paths(base);
    }
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
