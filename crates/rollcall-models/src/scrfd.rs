//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over strides 8/16/32 with two anchors per cell,
//! followed by greedy non-maximum suppression.

use crate::ModelError;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const INPUT_SIZE: u32 = 640;
const MEAN: f32 = 127.5;
const STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

/// A detected face in source-image pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    /// Left eye, right eye, nose, left mouth corner, right mouth corner.
    pub landmarks: [(f32, f32); 5],
}

impl Face {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Face) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Scale and padding applied when fitting the source into the square input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_source(&self, (x, y): (f32, f32)) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

pub struct ScrfdDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 9 {
            return Err(ModelError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
                names.len()
            )));
        }

        let outputs = map_outputs(&names);
        tracing::info!(path = %model_path.display(), ?outputs, "loaded SCRFD model");

        Ok(Self { session, outputs })
    }

    /// Detect faces, highest score first.
    pub fn detect(&mut self, image: &GrayImage) -> Result<Vec<Face>, ModelError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ModelError::InvalidFrame("empty image".into()));
        }
        let (input, letterbox) = preprocess(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut faces = Vec::new();
        for (slot, &stride) in self.outputs.iter().zip(STRIDES.iter()) {
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| ModelError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = tensor(slot.score, "scores")?;
            let bboxes = tensor(slot.bbox, "bboxes")?;
            let kps = tensor(slot.kps, "landmarks")?;
            faces.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        Ok(suppress(faces, NMS_IOU))
    }
}

/// Locate `score_N` / `bbox_N` / `kps_N` outputs by name; exports with
/// numeric names use the standard order (scores, then boxes, then landmarks).
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let named: Option<Vec<StrideOutputs>> = STRIDES
        .iter()
        .map(|&s| {
            Some(StrideOutputs {
                score: find("score", s)?,
                bbox: find("bbox", s)?,
                kps: find("kps", s)?,
            })
        })
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => {
            tracing::debug!(?names, "SCRFD outputs unnamed; using positional layout");
            std::array::from_fn(|i| StrideOutputs {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

/// Letterbox `image` into the square NCHW input tensor.
fn preprocess(image: &GrayImage) -> (Array4<f32>, Letterbox) {
    let (w, h) = image.dimensions();
    let scale = (INPUT_SIZE as f32 / w as f32).min(INPUT_SIZE as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let pad_x = (INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (INPUT_SIZE - new_h) as f32 / 2.0;
    let (off_x, off_y) = (pad_x.floor() as u32, pad_y.floor() as u32);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let size = INPUT_SIZE as usize;
    let tensor = Array4::from_shape_fn((1, 3, size, size), |(_, _, y, x)| {
        let (x, y) = (x as u32, y as u32);
        let inside = x >= off_x && x < off_x + new_w && y >= off_y && y < off_y + new_h;
        if inside {
            (resized.get_pixel(x - off_x, y - off_y)[0] as f32 - MEAN) / STD
        } else {
            0.0
        }
    });

    (
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    )
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<Face> {
    let grid_w = INPUT_SIZE as usize / stride;
    let grid_h = INPUT_SIZE as usize / stride;
    let s = stride as f32;

    (0..grid_w * grid_h * ANCHORS_PER_CELL)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= SCORE_THRESHOLD {
                return None;
            }
            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * s;
            let cy = (cell / grid_w) as f32 * s;

            let d = bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.to_source((cx - d[0] * s, cy - d[1] * s));
            let (x2, y2) = letterbox.to_source((cx + d[2] * s, cy + d[3] * s));

            let k = kps.get(idx * 10..idx * 10 + 10)?;
            let landmarks =
                std::array::from_fn(|i| letterbox.to_source((cx + k[2 * i] * s, cy + k[2 * i + 1] * s)));

            Some(Face {
                x1,
                y1,
                x2,
                y2,
                score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy NMS: keep the best-scoring face, drop everything overlapping it.
fn suppress(mut faces: Vec<Face>, iou_threshold: f32) -> Vec<Face> {
    faces.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Face> = Vec::with_capacity(faces.len());
    for face in faces {
        if kept.iter().all(|k| k.iou(&face) <= iou_threshold) {
            kept.push(face);
        }
    }
    kept
}
