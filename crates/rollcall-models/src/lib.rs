//! rollcall-models — Default face model for the attendance pipeline.
//!
//! SCRFD finds faces and five landmarks, each face is aligned to the
//! canonical 112×112 crop, and ArcFace turns the crop into an L2-normalised
//! 512-dimensional embedding. Both models run on CPU via ONNX Runtime.

pub mod align;
pub mod arcface;
pub mod scrfd;

use rollcall_core::{Detection, EmbedError, FaceBox, FaceEmbedder, Frame};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use arcface::ArcFaceRecognizer;
pub use scrfd::{Face, ScrfdDetector};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0} (download from insightface and place in the model directory)")]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<ModelError> for EmbedError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::InvalidFrame(msg) => EmbedError::InvalidFrame(msg),
            other => EmbedError::Model(other.to_string()),
        }
    }
}

/// SCRFD + ArcFace implementation of [`FaceEmbedder`].
pub struct OnnxEmbedder {
    detector: ScrfdDetector,
    recognizer: ArcFaceRecognizer,
}

impl OnnxEmbedder {
    pub fn load(scrfd_path: &Path, arcface_path: &Path) -> Result<Self, ModelError> {
        let detector = ScrfdDetector::load(scrfd_path)?;
        let recognizer = ArcFaceRecognizer::load(arcface_path)?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn detect_and_embed(&mut self, frame: &Frame) -> Result<Vec<Detection>, EmbedError> {
        let image = frame.to_luma().ok_or_else(|| {
            EmbedError::InvalidFrame(format!(
                "{} bytes for {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            ))
        })?;

        let faces = self.detector.detect(&image)?;
        let mut detections = Vec::with_capacity(faces.len());
        for face in &faces {
            let aligned = align::align_face(&image, &face.landmarks);
            let embedding = self.recognizer.extract(&aligned)?;
            detections.push(Detection {
                face_box: face_box(face, frame.width, frame.height),
                embedding,
            });
        }
        Ok(detections)
    }
}

/// Clamp a detector box into the frame and convert to (top, right, bottom, left).
fn face_box(face: &Face, width: u32, height: u32) -> FaceBox {
    let clamp = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
    FaceBox::new(
        clamp(face.y1, height),
        clamp(face.x2, width),
        clamp(face.y2, height),
        clamp(face.x1, width),
    )
}
