use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("failed to load asset: {0}")]
    AssetLoad(String),

    #[error("catalog has no accessories")]
    EmptyCatalog,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("face detector failed: {0}")]
    Detector(String),

    #[error("camera capture failed: {0}")]
    Capture(String),
}

pub type Result<T> = std::result::Result<T, VisionError>;
