//! Places an accessory below a detected face and pastes it with a hard alpha
//! cutout: pixels with alpha 0 are skipped, every other pixel replaces the
//! frame pixel outright. Nothing is blended.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage, RgbaImage};

use crate::catalog::AccessoryItem;
use crate::locator::FaceBox;

/// Placed accessory size. Both dimensions scale off the face width.
pub fn placed_size(face: &FaceBox, accessory: &AccessoryItem) -> (u32, u32) {
    let face_width = face.width as f64;
    (
        (face_width * accessory.width_ratio).floor() as u32,
        (face_width * accessory.height_ratio).floor() as u32,
    )
}

/// Top-left corner of the placed accessory: left-aligned with the face and
/// hanging from the bottom edge of the face box, shifted by the anchors.
pub fn placed_origin(face: &FaceBox, accessory: &AccessoryItem) -> (i64, i64) {
    (
        face.x as i64 + accessory.anchor_x as i64,
        face.bottom() + accessory.anchor_y as i64,
    )
}

/// Composite `accessory` onto `frame` relative to `face`.
///
/// Off-frame parts of the accessory are dropped; this never fails.
pub fn composite(frame: RgbImage, face: &FaceBox, accessory: &AccessoryItem) -> RgbImage {
    let (width, height) = placed_size(face, accessory);
    if width == 0 || height == 0 {
        log::debug!(
            "accessory `{}` collapses to {}x{} for face {:?}",
            accessory.id,
            width,
            height,
            face
        );
        return frame;
    }

    let resized = imageops::resize(&accessory.image, width, height, FilterType::Triangle);
    let (origin_x, origin_y) = placed_origin(face, accessory);

    let mut canvas = DynamicImage::ImageRgb8(frame).into_rgba8();
    let written = paste_cutout(&mut canvas, &resized, origin_x, origin_y);
    log::debug!(
        "accessory `{}` placed {}x{} at ({}, {}), {} pixels written",
        accessory.id,
        width,
        height,
        origin_x,
        origin_y,
        written
    );

    DynamicImage::ImageRgba8(canvas).into_rgb8()
}

/// Copy every non-transparent pixel of `overlay` onto `canvas` with the
/// overlay's top-left at `(origin_x, origin_y)`. Returns the number of pixels
/// written.
pub fn paste_cutout(
    canvas: &mut RgbaImage,
    overlay: &RgbaImage,
    origin_x: i64,
    origin_y: i64,
) -> usize {
    let (canvas_w, canvas_h) = (canvas.width() as i64, canvas.height() as i64);
    let (overlay_w, overlay_h) = (overlay.width() as i64, overlay.height() as i64);

    // Overlay rows/columns that land inside the canvas.
    let cols = (-origin_x).max(0)..(canvas_w - origin_x).min(overlay_w);
    let rows = (-origin_y).max(0)..(canvas_h - origin_y).min(overlay_h);
    if cols.is_empty() || rows.is_empty() {
        return 0;
    }

    let mut written = 0;
    for i in rows {
        for j in cols.clone() {
            let px = overlay.get_pixel(j as u32, i as u32);
            if px[3] == 0 {
                continue;
            }
            canvas.put_pixel((origin_x + j) as u32, (origin_y + i) as u32, *px);
            written += 1;
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    fn accessory(image: RgbaImage, width_ratio: f64, height_ratio: f64) -> AccessoryItem {
        AccessoryItem {
            id: "test".into(),
            image,
            anchor_x: 0,
            anchor_y: 0,
            width_ratio,
            height_ratio,
        }
    }

    #[test]
    fn test_placed_size_uses_face_width() {
        let item = accessory(RgbaImage::new(1, 1), 0.9, 0.3);
        let face = FaceBox::new(100, 100, 200, 150);
        assert_eq!(placed_size(&face, &item), (180, 60));

        // floor, not round
        let face = FaceBox::new(0, 0, 7, 1000);
        let item = accessory(RgbaImage::new(1, 1), 0.5, 0.99);
        assert_eq!(placed_size(&face, &item), (3, 6));
    }

    #[test]
    fn test_paste_clips_every_edge() {
        let overlay = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));

        let mut canvas = RgbaImage::new(6, 6);
        assert_eq!(paste_cutout(&mut canvas, &overlay, -2, -2), 4);
        assert_eq!(canvas.get_pixel(0, 0), &Rgba([1, 2, 3, 255]));
        assert_eq!(canvas.get_pixel(2, 2), &Rgba([0, 0, 0, 0]));

        let mut canvas = RgbaImage::new(6, 6);
        assert_eq!(paste_cutout(&mut canvas, &overlay, 4, 5), 2);
        assert_eq!(canvas.get_pixel(5, 5), &Rgba([1, 2, 3, 255]));

        let mut canvas = RgbaImage::new(6, 6);
        assert_eq!(paste_cutout(&mut canvas, &overlay, 6, 0), 0);
        assert_eq!(paste_cutout(&mut canvas, &overlay, 0, -4), 0);
        assert!(canvas.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_transparent_pixels_are_skipped() {
        // Left column fully transparent, right column translucent.
        let overlay = RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgba([200, 200, 200, 0])
            } else {
                Rgba([10, 20, 30, 1])
            }
        });
        let mut canvas = RgbaImage::from_pixel(2, 1, Rgba([9, 9, 9, 255]));
        assert_eq!(paste_cutout(&mut canvas, &overlay, 0, 0), 1);
        assert_eq!(canvas.get_pixel(0, 0), &Rgba([9, 9, 9, 255]));
        // Translucent pixels replace the frame pixel, no mixing.
        assert_eq!(canvas.get_pixel(1, 0), &Rgba([10, 20, 30, 1]));
    }

    #[test]
    fn test_zero_sized_placement_is_noop() {
        let frame = RgbImage::from_pixel(10, 10, Rgb([5, 5, 5]));
        let item = accessory(RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255])), 0.1, 0.1);
        let out = composite(frame.clone(), &FaceBox::new(0, 0, 5, 5), &item);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_negative_anchor_drops_rows_above_frame() {
        let frame = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        let mut item = accessory(RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])), 1.0, 1.0);
        item.anchor_y = -8;
        // origin row = 0 + 4 - 8 = -4 -> every row lands above the frame
        let out = composite(frame.clone(), &FaceBox::new(0, 0, 4, 4), &item);
        assert_eq!(out, frame);
    }
}
