use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbImage};

use crate::catalog::Catalog;
use crate::compositor;
use crate::error::{Result, VisionError};
use crate::locator::{FaceDetector, FaceLocator};

pub const WIDTH: u32 = 720;
pub const HEIGHT: u32 = 640;

/// Full pipeline: resize → detect → overlay the current accessory
pub struct Pipeline {
    locator: FaceLocator,
    width: u32,
    height: u32,
}

impl Pipeline {
    pub fn new(detector: Box<dyn FaceDetector>) -> Self {
        Self {
            locator: FaceLocator::new(detector),
            width: WIDTH,
            height: HEIGHT,
        }
    }

    /// Override the output frame size. Zero dimensions are rejected.
    pub fn with_frame_size(mut self, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(VisionError::InvalidFrame(format!(
                "output size {width}x{height} is empty"
            )));
        }
        self.width = width;
        self.height = height;
        Ok(self)
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Decode an encoded image (PNG, JPEG, ...) and process it.
    pub fn process(&self, raw: &[u8], catalog: &Catalog) -> Result<RgbImage> {
        if raw.is_empty() {
            return Err(VisionError::InvalidFrame("empty frame buffer".into()));
        }
        let img = image::load_from_memory(raw)
            .map_err(|e| VisionError::InvalidFrame(format!("decoding frame: {e}")))?;
        self.process_image(&img, catalog)
    }

    /// Resize `img` to the output size and overlay the catalog's current
    /// accessory when exactly one face is found. Any other face count passes
    /// the resized frame through.
    pub fn process_image(&self, img: &DynamicImage, catalog: &Catalog) -> Result<RgbImage> {
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return Err(VisionError::InvalidFrame(format!("frame is {w}x{h}")));
        }

        let frame = img
            .resize_exact(self.width, self.height, FilterType::Triangle)
            .into_rgb8();
        let gray = imageops::grayscale(&frame);

        match self.locator.locate(&gray)? {
            Some(face) => {
                let accessory = catalog.current();
                Ok(compositor::composite(frame, &face, &accessory))
            }
            None => Ok(frame),
        }
    }
}
