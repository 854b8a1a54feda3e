pub mod app;
pub mod captures;
pub mod config;

// Re-export vision types for convenience
pub use app::TryOn;
pub use trinket_vision::{
    compositor, pipeline, AccessoryItem, Catalog, FaceBox, FaceDetector, Pipeline, VisionError,
};
