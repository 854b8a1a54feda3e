use image::{Rgb, RgbImage, Rgba, RgbaImage};
use trinket_vision::compositor::{composite, placed_origin, placed_size};
use trinket_vision::{AccessoryItem, FaceBox, HEIGHT, WIDTH};

fn frame() -> RgbImage {
    RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 7) as u8])
    })
}

/// Checkerboard-ish accessory where every third pixel is cut out.
fn patterned(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let alpha = if (x + y) % 3 == 0 { 0 } else { 128 + (x % 100) as u8 };
        Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 200, alpha])
    })
}

fn item(image: RgbaImage, anchor_x: i32, anchor_y: i32) -> AccessoryItem {
    AccessoryItem {
        id: "pendant".into(),
        image,
        anchor_x,
        anchor_y,
        width_ratio: 0.9,
        height_ratio: 0.3,
    }
}

/// Written pixels equal the accessory pixel; cut-out and uncovered pixels keep
/// the frame value.
fn check(face: FaceBox, accessory: &AccessoryItem) {
    let base = frame();
    let out = composite(base.clone(), &face, accessory);
    assert_eq!(out.dimensions(), base.dimensions());

    let (w, h) = placed_size(&face, accessory);
    assert_eq!((w, h), accessory.image.dimensions(), "fixture must be pre-sized");
    let (ox, oy) = placed_origin(&face, accessory);

    for (x, y, px) in out.enumerate_pixels() {
        let (j, i) = (x as i64 - ox, y as i64 - oy);
        let covered = (0..w as i64).contains(&j) && (0..h as i64).contains(&i);
        let src = covered.then(|| accessory.image.get_pixel(j as u32, i as u32));
        match src {
            Some(a) if a[3] != 0 => assert_eq!(px, &Rgb([a[0], a[1], a[2]]), "({x}, {y})"),
            _ => assert_eq!(px, base.get_pixel(x, y), "({x}, {y})"),
        }
    }
}

#[test]
fn test_cutout_inside_frame() {
    let face = FaceBox::new(100, 100, 200, 150);
    check(face, &item(patterned(180, 60), 0, 10));
}

#[test]
fn test_cutout_across_left_and_bottom_edges() {
    let face = FaceBox::new(0, 450, 200, 150);
    check(face, &item(patterned(180, 60), -50, 10));
}

#[test]
fn test_cutout_across_right_edge() {
    let face = FaceBox::new(620, 300, 200, 100);
    check(face, &item(patterned(180, 60), 0, -20));
}

#[test]
fn test_placement_geometry() {
    let face = FaceBox::new(100, 100, 200, 150);
    let accessory = item(RgbaImage::new(1, 1), 0, 10);
    assert_eq!(placed_size(&face, &accessory), (180, 60));
    assert_eq!(placed_origin(&face, &accessory), (100, 260));

    let shifted = item(RgbaImage::new(1, 1), -30, -5);
    assert_eq!(placed_origin(&face, &shifted), (70, 245));
}
