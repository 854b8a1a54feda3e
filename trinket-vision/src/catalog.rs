//! Accessory catalog with a cyclic current-selection pointer.
//!
//! The catalog is loaded once and shared between request handlers. Items are
//! immutable and handed out as `Arc` snapshots; only the selection index
//! changes, and it is guarded by a single mutex so that readers always get an
//! item whose image and placement parameters belong together.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::RgbaImage;
use serde::Deserialize;

use crate::error::{Result, VisionError};

/// A placeable accessory image with its placement parameters.
#[derive(Debug, Clone)]
pub struct AccessoryItem {
    pub id: String,
    /// RGBA pixels; alpha 0 marks cut-out pixels.
    pub image: RgbaImage,
    /// Horizontal pixel offset applied after placement.
    pub anchor_x: i32,
    /// Vertical pixel offset applied after placement.
    pub anchor_y: i32,
    /// Placed width as a fraction of the face width.
    pub width_ratio: f64,
    /// Placed height as a fraction of the face width.
    pub height_ratio: f64,
}

/// One `[[item]]` entry of a catalog manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessoryDescriptor {
    pub id: String,
    /// Image path, relative to the manifest's directory.
    pub image: PathBuf,
    #[serde(default)]
    pub anchor_x: i32,
    #[serde(default)]
    pub anchor_y: i32,
    pub width_ratio: f64,
    pub height_ratio: f64,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "item", default)]
    items: Vec<AccessoryDescriptor>,
}

/// Ordered, cyclically navigable collection of accessories.
#[derive(Debug)]
pub struct Catalog {
    items: Vec<Arc<AccessoryItem>>,
    cursor: Mutex<usize>,
}

impl Catalog {
    /// Load a TOML manifest and every image it references.
    pub fn load(manifest: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(manifest).map_err(|e| {
            VisionError::AssetLoad(format!("reading manifest {}: {e}", manifest.display()))
        })?;
        let parsed: Manifest = toml::from_str(&raw).map_err(|e| {
            VisionError::AssetLoad(format!("parsing manifest {}: {e}", manifest.display()))
        })?;
        let base = manifest.parent().unwrap_or_else(|| Path::new("."));

        let items = parsed
            .items
            .into_iter()
            .map(|d| load_item(base, d))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "loaded {} accessories from {}",
            items.len(),
            manifest.display()
        );
        Self::from_items(items)
    }

    /// Build a catalog from already decoded items. The first item starts
    /// selected.
    pub fn from_items(items: Vec<AccessoryItem>) -> Result<Self> {
        if items.is_empty() {
            return Err(VisionError::EmptyCatalog);
        }

        let mut seen = HashSet::new();
        for item in &items {
            validate(item)?;
            if !seen.insert(item.id.as_str()) {
                return Err(VisionError::AssetLoad(format!(
                    "duplicate accessory id `{}`",
                    item.id
                )));
            }
        }

        Ok(Self {
            items: items.into_iter().map(Arc::new).collect(),
            cursor: Mutex::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always false; construction rejects empty catalogs.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.id.as_str())
    }

    pub fn current(&self) -> Arc<AccessoryItem> {
        let cursor = self.lock();
        Arc::clone(&self.items[*cursor])
    }

    pub fn current_id(&self) -> String {
        self.current().id.clone()
    }

    /// Select the next item, wrapping to the first after the last.
    pub fn advance(&self) -> Arc<AccessoryItem> {
        let mut cursor = self.lock();
        *cursor = (*cursor + 1) % self.items.len();
        Arc::clone(&self.items[*cursor])
    }

    /// Select the previous item, wrapping to the last before the first.
    pub fn retreat(&self) -> Arc<AccessoryItem> {
        let mut cursor = self.lock();
        let len = self.items.len();
        *cursor = (*cursor + len - 1) % len;
        Arc::clone(&self.items[*cursor])
    }

    /// Jump to the item with the given id. Unknown ids leave the selection
    /// untouched.
    pub fn select(&self, id: &str) -> Option<Arc<AccessoryItem>> {
        let index = self.items.iter().position(|item| item.id == id)?;
        let mut cursor = self.lock();
        *cursor = index;
        Some(Arc::clone(&self.items[index]))
    }

    // The guarded value is a plain index that is always valid, so a panic in
    // another holder cannot leave it inconsistent.
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_item(base: &Path, descriptor: AccessoryDescriptor) -> Result<AccessoryItem> {
    let path = base.join(&descriptor.image);
    let image = image::open(&path)
        .map_err(|e| {
            VisionError::AssetLoad(format!(
                "accessory `{}`: reading {}: {e}",
                descriptor.id,
                path.display()
            ))
        })?
        .to_rgba8();

    log::debug!(
        "accessory `{}`: {}x{} from {}",
        descriptor.id,
        image.width(),
        image.height(),
        path.display()
    );

    Ok(AccessoryItem {
        id: descriptor.id,
        image,
        anchor_x: descriptor.anchor_x,
        anchor_y: descriptor.anchor_y,
        width_ratio: descriptor.width_ratio,
        height_ratio: descriptor.height_ratio,
    })
}

fn validate(item: &AccessoryItem) -> Result<()> {
    if item.id.is_empty() {
        return Err(VisionError::AssetLoad("accessory with empty id".into()));
    }
    if item.image.width() == 0 || item.image.height() == 0 {
        return Err(VisionError::AssetLoad(format!(
            "accessory `{}` has an empty image",
            item.id
        )));
    }
    for (name, ratio) in [
        ("width_ratio", item.width_ratio),
        ("height_ratio", item.height_ratio),
    ] {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(VisionError::AssetLoad(format!(
                "accessory `{}`: {name} must be a positive number, got {ratio}",
                item.id
            )));
        }
    }
    Ok(())
}
