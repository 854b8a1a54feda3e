use anyhow::{Context, Result};
use image::RgbImage;
use trinket_vision::{CascadeDetector, CascadeModel, Catalog, FaceDetector, Pipeline, VisionError};

use crate::config::{Config, DetectorKind, DetectorConfig};

/// Everything a try-on session needs: the accessory catalog with its current
/// selection and the frame pipeline.
pub struct TryOn {
    pub catalog: Catalog,
    pub pipeline: Pipeline,
}

impl TryOn {
    pub fn new(catalog: Catalog, pipeline: Pipeline) -> Self {
        Self { catalog, pipeline }
    }

    /// Load the detector and catalog named by `cfg`. Any failure here is
    /// fatal for the caller.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let detector = build_detector(&cfg.detector)?;
        let pipeline = Pipeline::new(detector)
            .with_frame_size(cfg.frame.width, cfg.frame.height)
            .context("configuring frame size")?;
        let catalog = Catalog::load(&cfg.catalog)
            .with_context(|| format!("loading catalog {}", cfg.catalog.display()))?;

        log::info!(
            "{} accessories ready, starting with `{}`",
            catalog.len(),
            catalog.current_id()
        );
        Ok(Self::new(catalog, pipeline))
    }

    /// Run one encoded frame through the pipeline with the current accessory.
    pub fn process(&self, raw: &[u8]) -> std::result::Result<RgbImage, VisionError> {
        self.pipeline.process(raw, &self.catalog)
    }

    /// Switch to the next accessory and return its id.
    pub fn next(&self) -> String {
        self.catalog.advance().id.clone()
    }

    /// Switch to the previous accessory and return its id.
    pub fn previous(&self) -> String {
        self.catalog.retreat().id.clone()
    }

    pub fn select(&self, id: &str) -> Result<()> {
        match self.catalog.select(id) {
            Some(_) => Ok(()),
            None => anyhow::bail!(
                "unknown accessory `{}` (available: {})",
                id,
                self.catalog.ids().collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

pub fn build_detector(cfg: &DetectorConfig) -> Result<Box<dyn FaceDetector>> {
    match cfg.kind {
        DetectorKind::Cascade => {
            let model = CascadeModel::load(&cfg.cascade)
                .with_context(|| format!("loading cascade {}", cfg.cascade.display()))?;
            log::debug!(
                "cascade: {} stages, scale factor {}, min neighbors {}",
                model.stages.len(),
                cfg.scale_factor,
                cfg.min_neighbors
            );
            Ok(Box::new(CascadeDetector::new(
                model,
                cfg.scale_factor,
                cfg.min_neighbors,
            )?))
        }
        #[cfg(feature = "yunet")]
        DetectorKind::Yunet => Ok(Box::new(trinket_vision::YuNetDetector::load(
            &cfg.model,
            cfg.score_threshold,
            cfg.nms_threshold,
        )?)),
        #[cfg(not(feature = "yunet"))]
        DetectorKind::Yunet => {
            anyhow::bail!("the yunet detector needs trinket built with the `yunet` feature")
        }
    }
}
