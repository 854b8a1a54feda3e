//! Boosted cascade face detector (Viola-Jones style)
//!
//! A cascade is a list of stages; each stage sums the votes of decision stumps
//! over rectangle features and rejects the window when the sum falls below the
//! stage threshold. A window is a face only if it survives every stage.
//!
//! Scanning is multi-scale: the frame is repeatedly downscaled by
//! `scale_factor` and the fixed-size window slides over each level. Raw hits
//! are then clustered and clusters with too few members (`min_neighbors`) are
//! discarded.
//!
//! Models are read from OpenCV's cascade XML (`haarcascade_*.xml`, boosted
//! stumps over untilted Haar features) or from the equivalent JSON document:
//!
//! ```json
//! {
//!   "window": [24, 24],
//!   "features": [ { "rects": [ { "x": 0, "y": 0, "width": 24, "height": 12, "weight": -1.0 } ] } ],
//!   "stages": [ { "threshold": -1.2, "stumps": [ { "feature": 0, "threshold": 0.01, "left": -0.8, "right": 0.6 } ] } ]
//! }
//! ```

use std::path::Path;

use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VisionError};
use crate::locator::{FaceBox, FaceDetector};

pub const DEFAULT_SCALE_FACTOR: f64 = 1.8;
pub const DEFAULT_MIN_NEIGHBORS: usize = 3;

/// Relative corner tolerance used when clustering raw hits.
const GROUP_EPS: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeModel {
    /// Detection window as `[width, height]`.
    pub window: [u32; 2],
    pub features: Vec<Feature>,
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub rects: Vec<WeightedRect>,
}

/// Rectangle relative to the window origin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub threshold: f64,
    pub stumps: Vec<Stump>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    pub left: f64,
    pub right: f64,
}

impl CascadeModel {
    /// Load a cascade, picking the format from the file extension.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|e| {
            VisionError::AssetLoad(format!("reading cascade {}: {e}", path.display()))
        })?;
        let is_xml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
        if is_xml {
            let text = std::str::from_utf8(&raw).map_err(|e| {
                VisionError::AssetLoad(format!("cascade {} is not UTF-8: {e}", path.display()))
            })?;
            Self::from_opencv_xml(text)
        } else {
            Self::from_json(&raw)
        }
    }

    pub fn from_json(raw: &[u8]) -> Result<Self> {
        let model: Self = serde_json::from_slice(raw)
            .map_err(|e| VisionError::AssetLoad(format!("parsing cascade: {e}")))?;
        model.validate()?;
        Ok(model)
    }

    /// Parse a cascade trained by `opencv_traincascade` (the format of the
    /// stock `haarcascade_frontalface_default.xml`).
    pub fn from_opencv_xml(text: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(text)
            .map_err(|e| VisionError::AssetLoad(format!("parsing cascade xml: {e}")))?;
        let cascade = child(doc.root_element(), "cascade")?;

        let stage_type = child_text(cascade, "stageType")?;
        let feature_type = child_text(cascade, "featureType")?;
        if stage_type != "BOOST" || feature_type != "HAAR" {
            return Err(VisionError::AssetLoad(format!(
                "unsupported cascade {stage_type}/{feature_type}, expected BOOST/HAAR"
            )));
        }
        let window = [
            parse_num(child_text(cascade, "width")?)?,
            parse_num(child_text(cascade, "height")?)?,
        ];

        let stages = items(child(cascade, "stages")?)
            .enumerate()
            .map(|(idx, stage)| read_stage(idx, stage))
            .collect::<Result<Vec<_>>>()?;
        let features = items(child(cascade, "features")?)
            .enumerate()
            .map(|(idx, feature)| read_feature(idx, feature))
            .collect::<Result<Vec<_>>>()?;

        let model = Self {
            window,
            features,
            stages,
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        let [win_w, win_h] = self.window;
        if win_w == 0 || win_h == 0 {
            return Err(VisionError::AssetLoad("cascade window is empty".into()));
        }
        if self.stages.is_empty() {
            return Err(VisionError::AssetLoad("cascade has no stages".into()));
        }
        for (idx, feature) in self.features.iter().enumerate() {
            for r in &feature.rects {
                // Widened so corrupt offsets cannot wrap past the check.
                let past_x = u64::from(r.x) + u64::from(r.width) > u64::from(win_w);
                let past_y = u64::from(r.y) + u64::from(r.height) > u64::from(win_h);
                if past_x || past_y {
                    return Err(VisionError::AssetLoad(format!(
                        "cascade feature {idx} extends past the {win_w}x{win_h} window"
                    )));
                }
            }
        }
        for (idx, stage) in self.stages.iter().enumerate() {
            if let Some(stump) = stage
                .stumps
                .iter()
                .find(|s| s.feature >= self.features.len())
            {
                return Err(VisionError::AssetLoad(format!(
                    "cascade stage {idx} references missing feature {}",
                    stump.feature
                )));
            }
        }
        Ok(())
    }
}

fn asset_err(msg: impl Into<String>) -> VisionError {
    VisionError::AssetLoad(msg.into())
}

fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Result<roxmltree::Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name)).ok_or_else(|| {
        let parent = node.tag_name().name();
        asset_err(format!("cascade xml: <{parent}> has no <{name}>"))
    })
}

fn child_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Result<&'a str> {
    Ok(child(node, name)?.text().unwrap_or_default().trim())
}

/// Element entries of an OpenCV sequence (`<_>` children).
fn items<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children().filter(|n| n.has_tag_name("_"))
}

fn parse_num<T: std::str::FromStr>(token: &str) -> Result<T> {
    token
        .parse()
        .map_err(|_| asset_err(format!("cascade xml: bad number `{token}`")))
}

fn parse_list<T: std::str::FromStr>(text: &str) -> Result<Vec<T>> {
    text.split_whitespace().map(parse_num).collect()
}

fn read_stage(idx: usize, node: roxmltree::Node) -> Result<Stage> {
    let threshold = parse_num(child_text(node, "stageThreshold")?)?;
    let stumps = items(child(node, "weakClassifiers")?)
        .map(|weak| {
            // Stumps only: `left right feature threshold` with both children leaves.
            let nodes: Vec<f64> = parse_list(child_text(weak, "internalNodes")?)?;
            let leaves: Vec<f64> = parse_list(child_text(weak, "leafValues")?)?;
            match (nodes.as_slice(), leaves.as_slice()) {
                (&[left, right, feature, threshold], &[left_leaf, right_leaf])
                    if left == 0.0 && right == -1.0 && feature >= 0.0 =>
                {
                    Ok(Stump {
                        feature: feature as usize,
                        threshold,
                        left: left_leaf,
                        right: right_leaf,
                    })
                }
                _ => Err(asset_err(format!(
                    "cascade stage {idx}: only single-split weak classifiers are supported"
                ))),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Stage { threshold, stumps })
}

fn read_feature(idx: usize, node: roxmltree::Node) -> Result<Feature> {
    if let Ok(tilted) = child_text(node, "tilted") {
        if tilted != "0" {
            return Err(asset_err(format!("cascade feature {idx} is tilted")));
        }
    }
    let rects = items(child(node, "rects")?)
        .map(|rect| {
            let text = rect.text().unwrap_or_default();
            let fields: Vec<&str> = text.split_whitespace().collect();
            match fields.as_slice() {
                &[x, y, width, height, weight] => Ok(WeightedRect {
                    x: parse_num(x)?,
                    y: parse_num(y)?,
                    width: parse_num(width)?,
                    height: parse_num(height)?,
                    weight: parse_num(weight)?,
                }),
                _ => Err(asset_err(format!(
                    "cascade feature {idx}: rect `{}` needs five fields",
                    text.trim()
                ))),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Feature { rects })
}

/// Summed-area tables over pixel values and squared pixel values.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq_sum: Vec<f64>,
}

impl Integral {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sq_sum = vec![0.0; stride * (h + 1)];

        for y in 0..h {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = img.get_pixel(x as u32, y as u32)[0] as f64;
                row += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq;
            }
        }

        Self {
            stride,
            sum,
            sq_sum,
        }
    }

    fn area(table: &[f64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> f64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        table[y1 * stride + x1] - table[y0 * stride + x1] - table[y1 * stride + x0]
            + table[y0 * stride + x0]
    }

    fn rect_sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        Self::area(&self.sum, self.stride, x, y, w, h)
    }

    fn rect_sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        Self::area(&self.sq_sum, self.stride, x, y, w, h)
    }
}

pub struct CascadeDetector {
    model: CascadeModel,
    scale_factor: f64,
    min_neighbors: usize,
}

impl CascadeDetector {
    pub fn new(model: CascadeModel, scale_factor: f64, min_neighbors: usize) -> Result<Self> {
        if !(scale_factor.is_finite() && scale_factor > 1.0) {
            return Err(VisionError::Detector(format!(
                "scale factor must be greater than 1, got {scale_factor}"
            )));
        }
        Ok(Self {
            model,
            scale_factor,
            min_neighbors,
        })
    }

    /// Detector with the fixed scale factor and neighbor threshold used by
    /// the try-on pipeline.
    pub fn with_defaults(model: CascadeModel) -> Result<Self> {
        Self::new(model, DEFAULT_SCALE_FACTOR, DEFAULT_MIN_NEIGHBORS)
    }

    /// Every window accepted by the cascade, before grouping.
    pub fn detect_raw(&self, gray: &GrayImage) -> Vec<FaceBox> {
        let (img_w, img_h) = gray.dimensions();
        let [win_w, win_h] = self.model.window;
        let mut hits = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            if scaled_w < win_w || scaled_h < win_h {
                break;
            }

            let resized;
            let level = if scaled_w == img_w && scaled_h == img_h {
                gray
            } else {
                resized = imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle);
                &resized
            };
            let integral = Integral::new(level);
            let step = if factor > 2.0 { 1 } else { 2 };

            for y in (0..=scaled_h - win_h).step_by(step) {
                for x in (0..=scaled_w - win_w).step_by(step) {
                    if self.accepts(&integral, x, y) {
                        hits.push(FaceBox::new(
                            (x as f64 * factor).round() as i32,
                            (y as f64 * factor).round() as i32,
                            (win_w as f64 * factor).round() as u32,
                            (win_h as f64 * factor).round() as u32,
                        ));
                    }
                }
            }

            factor *= self.scale_factor;
        }

        hits
    }

    fn accepts(&self, integral: &Integral, x: u32, y: u32) -> bool {
        let [win_w, win_h] = self.model.window;

        // Variance normalization over the window shrunk by one pixel per side.
        let (nw, nh) = (win_w.saturating_sub(2), win_h.saturating_sub(2));
        let area = (nw * nh) as f64;
        let s = integral.rect_sum(x + 1, y + 1, nw, nh);
        let sq = integral.rect_sq_sum(x + 1, y + 1, nw, nh);
        let nf = area * sq - s * s;
        let norm = if nf > 0.0 { nf.sqrt() } else { 1.0 };

        for stage in &self.model.stages {
            let mut total = 0.0;
            for stump in &stage.stumps {
                let feature = &self.model.features[stump.feature];
                let value = feature
                    .rects
                    .iter()
                    .map(|r| r.weight * integral.rect_sum(x + r.x, y + r.y, r.width, r.height))
                    .sum::<f64>()
                    / norm;
                total += if value < stump.threshold {
                    stump.left
                } else {
                    stump.right
                };
            }
            if total < stage.threshold {
                return false;
            }
        }
        true
    }
}

impl FaceDetector for CascadeDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>> {
        let raw = self.detect_raw(gray);
        let grouped = group_rectangles(&raw, self.min_neighbors, GROUP_EPS);
        log::debug!(
            "cascade: {} raw windows, {} after grouping",
            raw.len(),
            grouped.len()
        );
        Ok(grouped)
    }
}

fn similar(a: &FaceBox, b: &FaceBox, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64) * 0.5;
    (a.x as f64 - b.x as f64).abs() <= delta
        && (a.y as f64 - b.y as f64).abs() <= delta
        && (a.right() as f64 - b.right() as f64).abs() <= delta
        && (a.bottom() as f64 - b.bottom() as f64).abs() <= delta
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster similar rectangles and keep the averaged clusters that have more
/// than `min_neighbors` members and are not nested inside a stronger cluster.
/// A threshold of zero returns the input unchanged.
pub fn group_rectangles(rects: &[FaceBox], min_neighbors: usize, eps: f64) -> Vec<FaceBox> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    let mut label_of = vec![usize::MAX; n];
    let mut sums: Vec<[f64; 4]> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find(&mut parent, i);
        if label_of[root] == usize::MAX {
            label_of[root] = sums.len();
            sums.push([0.0; 4]);
            counts.push(0);
        }
        let label = label_of[root];
        sums[label][0] += r.x as f64;
        sums[label][1] += r.y as f64;
        sums[label][2] += r.width as f64;
        sums[label][3] += r.height as f64;
        counts[label] += 1;
    }

    let clusters: Vec<(FaceBox, usize)> = sums
        .iter()
        .zip(&counts)
        .filter(|(_, count)| **count > min_neighbors)
        .map(|(s, &count)| {
            let k = count as f64;
            let avg = FaceBox::new(
                (s[0] / k).round() as i32,
                (s[1] / k).round() as i32,
                (s[2] / k).round() as u32,
                (s[3] / k).round() as u32,
            );
            (avg, count)
        })
        .collect();

    clusters
        .iter()
        .enumerate()
        .filter(|&(i, &(inner, n_inner))| {
            !clusters.iter().enumerate().any(|(j, &(outer, n_outer))| {
                j != i
                    && (n_outer > n_inner.max(3) || n_inner < 3)
                    && nested(&inner, &outer, eps)
            })
        })
        .map(|(_, &(rect, _))| rect)
        .collect()
}

fn nested(inner: &FaceBox, outer: &FaceBox, eps: f64) -> bool {
    let dx = (outer.width as f64 * eps).round() as i64;
    let dy = (outer.height as f64 * eps).round() as i64;
    inner.x as i64 >= outer.x as i64 - dx
        && inner.y as i64 >= outer.y as i64 - dy
        && inner.right() <= outer.right() + dx
        && inner.bottom() <= outer.bottom() + dy
}
