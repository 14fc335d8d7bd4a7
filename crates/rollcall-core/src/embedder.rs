use crate::frame::Frame;
use crate::types::Detection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("face model failed: {0}")]
    Model(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Detect-and-embed capability: the face model behind the pipeline.
///
/// Returns zero or more detections with boxes in the coordinates of `frame`,
/// in the model's preferred order (highest confidence first). Calls are
/// blocking with bounded latency; the pipeline treats the model as opaque.
pub trait FaceEmbedder {
    fn detect_and_embed(&mut self, frame: &Frame) -> Result<Vec<Detection>, EmbedError>;
}

impl<T: FaceEmbedder + ?Sized> FaceEmbedder for Box<T> {
    fn detect_and_embed(&mut self, frame: &Frame) -> Result<Vec<Detection>, EmbedError> {
        (**self).detect_and_embed(frame)
    }
}
