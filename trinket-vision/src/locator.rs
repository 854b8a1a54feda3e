use image::GrayImage;

use crate::error::Result;

/// Axis-aligned face rectangle in pixel coordinates of the processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }
}

/// Pluggable bounding-box face detection backend.
pub trait FaceDetector: Send + Sync {
    /// Report every face found in a grayscale frame.
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>>;
}

/// Applies the single-face policy on top of a detector: a frame is actionable
/// only when exactly one face is reported.
pub struct FaceLocator {
    detector: Box<dyn FaceDetector>,
}

impl FaceLocator {
    pub fn new(detector: Box<dyn FaceDetector>) -> Self {
        Self { detector }
    }

    pub fn locate(&self, gray: &GrayImage) -> Result<Option<FaceBox>> {
        let faces = self.detector.detect(gray)?;
        match faces.as_slice() {
            [face] => {
                log::debug!("face at {:?}", face);
                Ok(Some(*face))
            }
            [] => {
                log::debug!("no face detected, skipping overlay");
                Ok(None)
            }
            many => {
                log::debug!("{} faces detected, skipping overlay", many.len());
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<FaceBox>);

    impl FaceDetector for Fixed {
        fn detect(&self, _gray: &GrayImage) -> Result<Vec<FaceBox>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_single_face_policy() {
        let gray = GrayImage::new(8, 8);
        let a = FaceBox::new(1, 2, 3, 4);
        let b = FaceBox::new(5, 5, 2, 2);

        let none = FaceLocator::new(Box::new(Fixed(vec![])));
        assert_eq!(none.locate(&gray).unwrap(), None);

        let one = FaceLocator::new(Box::new(Fixed(vec![a])));
        assert_eq!(one.locate(&gray).unwrap(), Some(a));

        let two = FaceLocator::new(Box::new(Fixed(vec![a, b])));
        assert_eq!(two.locate(&gray).unwrap(), None);
    }

    #[test]
    fn test_edges() {
        let face = FaceBox::new(-10, 20, 30, 40);
        assert_eq!(face.right(), 20);
        assert_eq!(face.bottom(), 60);
    }
}
