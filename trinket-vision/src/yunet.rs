//! YuNet ONNX face detector, used for its bounding boxes only
//!
//! YuNet is anchor-free: for each stride (8, 16, 32) it emits, per grid cell,
//! a class score, an objectness score, box deltas and landmark deltas. Output
//! order is cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16,
//! bbox_32, kps_8, kps_16, kps_32; the landmark tensors are ignored here.
//!
//! Box decoding per cell (row, col) at stride s:
//! cx = (col + dx) * s, cy = (row + dy) * s, w = exp(dw) * s, h = exp(dh) * s

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Value;

use crate::error::{Result, VisionError};
use crate::locator::{FaceBox, FaceDetector};

const INPUT_SIZE: u32 = 640;
const STRIDES: [u32; 3] = [8, 16, 32];

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Scored {
    bbox: [f32; 4], // x, y, w, h in input pixels
    score: f32,
}

fn session_builder() -> std::result::Result<SessionBuilder, BoxError> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        use ort::ep::{self, ExecutionProvider};
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        use ort::ep::{self, ExecutionProvider};
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

pub struct YuNetDetector {
    session: Mutex<Session>,
    score_threshold: f32,
    nms_threshold: f32,
}

impl YuNetDetector {
    pub fn load(model: &Path, score_threshold: f32, nms_threshold: f32) -> Result<Self> {
        let session = session_builder()
            .and_then(|b| b.commit_from_file(model).map_err(BoxError::from))
            .map_err(|e| {
                VisionError::AssetLoad(format!("loading detector {}: {e}", model.display()))
            })?;
        Ok(Self {
            session: Mutex::new(session),
            score_threshold,
            nms_threshold,
        })
    }

    fn run(&self, input: Array4<f32>) -> std::result::Result<Vec<(Vec<i64>, Vec<f32>)>, BoxError> {
        let tensor = Value::from_array(input)?;
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session.run(ort::inputs![tensor])?;

        let mut tensors = Vec::new();
        for (_name, output) in outputs.iter() {
            let (shape, data) = output.try_extract_tensor::<f32>()?;
            tensors.push((shape.iter().copied().collect(), data.to_vec()));
        }
        Ok(tensors)
    }
}

impl FaceDetector for YuNetDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>> {
        let (w, h) = gray.dimensions();
        if w == 0 || h == 0 {
            return Ok(vec![]);
        }

        // Letterbox onto a square canvas to keep the aspect ratio.
        let scale = INPUT_SIZE as f32 / w.max(h) as f32;
        let (new_w, new_h) = (
            ((w as f32 * scale) as u32).max(1),
            ((h as f32 * scale) as u32).max(1),
        );
        let resized = imageops::resize(gray, new_w, new_h, FilterType::Triangle);
        let mut canvas = GrayImage::new(INPUT_SIZE, INPUT_SIZE);
        let offset_x = (INPUT_SIZE - new_w) / 2;
        let offset_y = (INPUT_SIZE - new_h) / 2;
        imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

        // Gray replicated into the three BGR planes.
        let plane = canvas
            .into_raw()
            .into_iter()
            .map(f32::from)
            .collect::<Vec<_>>();
        let mut data = Vec::with_capacity(plane.len() * 3);
        for _ in 0..3 {
            data.extend_from_slice(&plane);
        }
        let side = INPUT_SIZE as usize;
        let input = Array4::from_shape_vec((1, 3, side, side), data)
            .map_err(|e| VisionError::Detector(e.to_string()))?;

        let outputs = self
            .run(input)
            .map_err(|e| VisionError::Detector(e.to_string()))?;
        let candidates = decode(&outputs, self.score_threshold)?;
        let kept = nms(candidates, self.nms_threshold);

        Ok(kept
            .into_iter()
            .map(|d| {
                FaceBox::new(
                    ((d.bbox[0] - offset_x as f32) / scale).round() as i32,
                    ((d.bbox[1] - offset_y as f32) / scale).round() as i32,
                    (d.bbox[2] / scale).round().max(0.0) as u32,
                    (d.bbox[3] / scale).round().max(0.0) as u32,
                )
            })
            .collect())
    }
}

fn tensor<'a>(
    outputs: &'a [(Vec<i64>, Vec<f32>)],
    idx: usize,
    cells: usize,
    channels: usize,
) -> Result<&'a [f32]> {
    let (shape, data) = outputs
        .get(idx)
        .ok_or_else(|| VisionError::Detector(format!("missing output {idx}")))?;
    if data.len() != cells * channels {
        return Err(VisionError::Detector(format!(
            "output {idx} has shape {shape:?}, expected [1, {cells}, {channels}]"
        )));
    }
    Ok(data.as_slice())
}

fn decode(outputs: &[(Vec<i64>, Vec<f32>)], score_threshold: f32) -> Result<Vec<Scored>> {
    let mut found = Vec::new();

    for (level, &stride) in STRIDES.iter().enumerate() {
        let grid = (INPUT_SIZE / stride) as usize;
        let cells = grid * grid;
        let cls = tensor(outputs, level, cells, 1)?;
        let obj = tensor(outputs, level + 3, cells, 1)?;
        let bbox = tensor(outputs, level + 6, cells, 4)?;
        let s = stride as f32;

        for row in 0..grid {
            for col in 0..grid {
                let idx = row * grid + col;
                let score = (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();
                if score < score_threshold {
                    continue;
                }
                let d = &bbox[idx * 4..idx * 4 + 4];
                let cx = (col as f32 + d[0]) * s;
                let cy = (row as f32 + d[1]) * s;
                let w = d[2].exp() * s;
                let h = d[3].exp() * s;
                found.push(Scored {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                });
            }
        }
    }

    Ok(found)
}

fn nms(mut candidates: Vec<Scored>, iou_threshold: f32) -> Vec<Scored> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<Scored> = Vec::new();
    for c in candidates {
        if keep.iter().all(|k| iou(&k.bbox, &c.bbox) <= iou_threshold) {
            keep.push(c);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}
