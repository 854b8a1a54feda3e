use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Store an already encoded JPEG as `capture_<uuid>.jpg` under `dir`.
pub fn save_capture_bytes(dir: &Path, jpeg: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("capture_{}.jpg", uuid::Uuid::new_v4()));
    std::fs::write(&path, jpeg).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

pub fn save_capture(dir: &Path, frame: &RgbImage) -> Result<PathBuf> {
    let mut jpeg = Vec::new();
    frame
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .context("encoding capture")?;
    save_capture_bytes(dir, &jpeg)
}
