use anyhow::Result;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;
use trinket::config::Config;
use trinket::{captures, TryOn, VisionError};

/// Cascade whose only stage rejects every window.
const BLIND_CASCADE: &str = r#"{
    "window": [24, 24],
    "features": [ { "rects": [ { "x": 0, "y": 0, "width": 24, "height": 24, "weight": 1.0 } ] } ],
    "stages": [ { "threshold": 1.0, "stumps": [ { "feature": 0, "threshold": 0.0, "left": 0.0, "right": 0.0 } ] } ]
}"#;

/// The same rejecting cascade in the layout `opencv_traincascade` writes.
const BLIND_OPENCV_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>24</height>
  <width>24</width>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>1.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 0.</internalNodes>
          <leafValues>
            0. 0.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 24 24 1.</_></rects></_></features></cascade>
</opencv_storage>
"#;

fn setup(dir: &Path) -> Result<Config> {
    for (name, color) in [("ring", [255, 0, 0, 255]), ("necklace", [0, 255, 0, 255])] {
        RgbaImage::from_pixel(20, 6, Rgba(color)).save(dir.join(format!("{name}.png")))?;
    }
    std::fs::write(
        dir.join("catalog.toml"),
        r#"
[[item]]
id = "ring"
image = "ring.png"
width_ratio = 0.5
height_ratio = 0.2

[[item]]
id = "necklace"
image = "necklace.png"
anchor_y = 10
width_ratio = 0.9
height_ratio = 0.3
"#,
    )?;
    std::fs::write(dir.join("cascade.json"), BLIND_CASCADE)?;

    let mut cfg = Config::default();
    cfg.catalog = dir.join("catalog.toml");
    cfg.detector.cascade = dir.join("cascade.json");
    cfg.captures = dir.join("captures");
    Ok(cfg)
}

fn encoded_frame() -> Vec<u8> {
    let img = RgbImage::from_fn(160, 120, |x, y| Rgb([x as u8, y as u8, 40]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

#[test]
fn test_tryon_from_config() -> Result<()> {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir()?;
    let cfg = setup(dir.path())?;

    let tryon = TryOn::from_config(&cfg)?;
    assert_eq!(tryon.catalog.current_id(), "ring");
    assert_eq!(tryon.next(), "necklace");
    assert_eq!(tryon.next(), "ring");
    assert_eq!(tryon.previous(), "necklace");

    tryon.select("ring")?;
    assert!(tryon.select("tiara").is_err());
    assert_eq!(tryon.catalog.current_id(), "ring");

    let out = tryon.process(&encoded_frame())?;
    assert_eq!(out.dimensions(), (720, 640));

    assert!(matches!(
        tryon.process(b"garbage"),
        Err(VisionError::InvalidFrame(_))
    ));
    Ok(())
}

#[test]
fn test_frame_size_from_config() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut cfg = setup(dir.path())?;
    cfg.frame.width = 96;
    cfg.frame.height = 64;

    let tryon = TryOn::from_config(&cfg)?;
    let out = tryon.process(&encoded_frame())?;
    assert_eq!(out.dimensions(), (96, 64));

    cfg.frame.height = 0;
    assert!(TryOn::from_config(&cfg).is_err());
    Ok(())
}

#[test]
fn test_startup_failures_are_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = setup(dir.path())?;

    let mut missing_catalog = cfg.clone();
    missing_catalog.catalog = dir.path().join("nope.toml");
    assert!(TryOn::from_config(&missing_catalog).is_err());

    let mut missing_cascade = cfg.clone();
    missing_cascade.detector.cascade = dir.path().join("nope.json");
    assert!(TryOn::from_config(&missing_cascade).is_err());

    let mut bad_scale = cfg.clone();
    bad_scale.detector.scale_factor = 0.9;
    assert!(TryOn::from_config(&bad_scale).is_err());

    std::fs::write(dir.path().join("empty.toml"), "")?;
    let mut empty = cfg;
    empty.catalog = dir.path().join("empty.toml");
    let err = TryOn::from_config(&empty).err().expect("empty catalog must fail");
    assert!(matches!(
        err.downcast_ref::<VisionError>(),
        Some(VisionError::EmptyCatalog)
    ));
    Ok(())
}

#[test]
fn test_opencv_cascade_from_config() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut cfg = setup(dir.path())?;
    let xml = dir.path().join("haarcascade_frontalface_default.xml");
    std::fs::write(&xml, BLIND_OPENCV_CASCADE)?;
    cfg.detector.cascade = xml;

    let tryon = TryOn::from_config(&cfg)?;
    let out = tryon.process(&encoded_frame())?;
    assert_eq!(out.dimensions(), (720, 640));

    // A corrupt cascade is a startup failure, not a panic.
    std::fs::write(&cfg.detector.cascade, BLIND_OPENCV_CASCADE.replace("0 0 24 24", "1 0 24 24"))?;
    assert!(TryOn::from_config(&cfg).is_err());
    Ok(())
}

#[cfg(not(feature = "yunet"))]
#[test]
fn test_yunet_requires_feature() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut cfg = setup(dir.path())?;
    cfg.detector.kind = trinket::config::DetectorKind::Yunet;
    assert!(TryOn::from_config(&cfg).is_err());
    Ok(())
}

#[test]
fn test_captures_are_uniquely_named() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let captures_dir = dir.path().join("captures");
    let frame = RgbImage::from_pixel(32, 24, Rgb([10, 120, 200]));

    let first = captures::save_capture(&captures_dir, &frame)?;
    let second = captures::save_capture(&captures_dir, &frame)?;
    assert_ne!(first, second);

    for path in [&first, &second] {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("capture_") && name.ends_with(".jpg"), "{name}");
        let decoded = image::open(path)?;
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    let raw = captures::save_capture_bytes(&captures_dir, b"\xff\xd8 payload")?;
    assert_eq!(std::fs::read(raw)?, b"\xff\xd8 payload");
    Ok(())
}
