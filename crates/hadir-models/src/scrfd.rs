//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three stride levels followed by NMS. Output
//! order is detector confidence, highest first, so "first detected face"
//! is also the most confident one.

use hadir_core::{BoundingBox, FaceDetector, FrameRef, InferenceError, ModelStage};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum ScrfdError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unexpected model layout: {0}")]
    Layout(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Tensor indices of (scores, boxes, keypoints) for one stride level.
type LevelOutputs = (usize, usize, usize);

/// Maps letterboxed input coordinates back onto the source frame.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((INPUT_SIZE as f32 - new_w) / 2.0).floor(),
            pad_y: ((INPUT_SIZE as f32 - new_h) / 2.0).floor(),
        }
    }

    fn to_frame(self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

pub struct ScrfdDetector {
    session: Session,
    levels: [LevelOutputs; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ScrfdError> {
        if !model_path.exists() {
            return Err(ScrfdError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(ScrfdError::Layout(format!(
                "expected 9 outputs (3 strides x score/bbox/kps), got {}",
                names.len()
            )));
        }
        let levels = output_layout(&names);

        tracing::info!(path = %model_path.display(), outputs = ?names, ?levels, "loaded SCRFD model");

        Ok(Self { session, levels })
    }

    fn run(&mut self, frame: FrameRef<'_>) -> Result<Vec<BoundingBox>, ScrfdError> {
        let (input, letterbox) = preprocess(frame)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.levels[level];
            let extract = |idx: usize, what: &'static str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| ScrfdError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_idx, "scores")?;
            let boxes = extract(bbox_idx, "boxes")?;
            let keypoints = extract(kps_idx, "keypoints")?;

            candidates.extend(decode_level(scores, boxes, keypoints, stride, letterbox));
        }

        Ok(nms(candidates, NMS_IOU_THRESHOLD))
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&mut self, frame: FrameRef<'_>) -> Result<Vec<BoundingBox>, InferenceError> {
        self.run(frame)
            .map_err(|e| InferenceError::new(ModelStage::Detector, e.to_string()))
    }
}

/// Letterbox an RGB frame into the square NCHW input tensor.
fn preprocess(frame: FrameRef<'_>) -> Result<(Array4<f32>, Letterbox), ScrfdError> {
    let expected = (frame.width * frame.height * 3) as usize;
    let pixels = frame
        .data
        .get(..expected)
        .ok_or_else(|| ScrfdError::InferenceFailed(format!("frame too short: {} < {expected}", frame.data.len())))?;
    let image = RgbImage::from_raw(frame.width, frame.height, pixels.to_vec())
        .ok_or_else(|| ScrfdError::InferenceFailed("invalid frame dimensions".into()))?;

    let letterbox = Letterbox::fit(frame.width, frame.height);
    let new_w = ((frame.width as f32 * letterbox.scale).round() as u32).max(1);
    let new_h = ((frame.height as f32 * letterbox.scale).round() as u32).max(1);
    let resized = imageops::resize(&image, new_w, new_h, FilterType::Triangle);

    // Padding is filled with the mean so it normalizes to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    let (off_x, off_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for y in 0..INPUT_SIZE {
        for x in 0..INPUT_SIZE {
            let inside = x >= off_x && y >= off_y && x < off_x + new_w as usize && y < off_y + new_h as usize;
            let rgb = if inside {
                resized.get_pixel((x - off_x) as u32, (y - off_y) as u32).0.map(|c| c as f32)
            } else {
                [PIXEL_MEAN; 3]
            };
            for (c, value) in rgb.iter().enumerate() {
                tensor[[0, c, y, x]] = (value - PIXEL_MEAN) / PIXEL_STD;
            }
        }
    }

    Ok((tensor, letterbox))
}

/// Locate score/bbox/kps tensors per stride, by name when the export names
/// them (`score_8`, `bbox_16`, ...), otherwise by the standard positional order.
fn output_layout(names: &[String]) -> [LevelOutputs; 3] {
    let find = |prefix: &str, stride: usize| names.iter().position(|n| *n == format!("{prefix}_{stride}"));

    let named: Option<Vec<LevelOutputs>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(levels) => [levels[0], levels[1], levels[2]],
        None => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

fn decode_level(
    scores: &[f32],
    boxes: &[f32],
    keypoints: &[f32],
    stride: usize,
    letterbox: Letterbox,
) -> Vec<BoundingBox> {
    let grid = INPUT_SIZE / stride;
    let anchors = grid * grid * ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= CONFIDENCE_THRESHOLD {
                return None;
            }

            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * step;
            let cy = (cell / grid) as f32 * step;

            let b = boxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.to_frame(cx - b[0] * step, cy - b[1] * step);
            let (x2, y2) = letterbox.to_frame(cx + b[2] * step, cy + b[3] * step);

            let landmarks = keypoints.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.to_frame(cx + k[i * 2] * step, cy + k[i * 2 + 1] * step))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; result is sorted by confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
