pub mod cascade;
pub mod catalog;
pub mod compositor;
pub mod error;
pub mod locator;
pub mod pipeline;
#[cfg(feature = "camera")]
pub mod video;
#[cfg(feature = "yunet")]
pub mod yunet;

// Re-export commonly used types
pub use cascade::{CascadeDetector, CascadeModel};
pub use catalog::{AccessoryItem, Catalog};
pub use error::VisionError;
pub use locator::{FaceBox, FaceDetector, FaceLocator};
pub use pipeline::{Pipeline, HEIGHT, WIDTH};
#[cfg(feature = "camera")]
pub use video::Camera;
#[cfg(feature = "yunet")]
pub use yunet::YuNetDetector;
