//! ArcFace (w600k_r50) embedding extraction via ONNX Runtime.

use crate::align::ALIGNED_SIZE;
use crate::ModelError;
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::Embedding;
use std::path::Path;

// ArcFace normalises symmetrically: (p - 127.5) / 127.5.
const MEAN: f32 = 127.5;
const STD: f32 = 127.5;
pub const EMBEDDING_DIM: usize = 512;

pub struct ArcFaceRecognizer {
    session: Session,
}

impl ArcFaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Embed a 112×112 aligned face crop. The result is L2-normalised.
    pub fn extract(&mut self, aligned: &GrayImage) -> Result<Embedding, ModelError> {
        if aligned.dimensions() != (ALIGNED_SIZE, ALIGNED_SIZE) {
            return Err(ModelError::InvalidFrame(format!(
                "aligned crop must be {ALIGNED_SIZE}x{ALIGNED_SIZE}, got {:?}",
                aligned.dimensions()
            )));
        }

        let input = to_tensor(aligned);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("embedding: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(ModelError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// Grayscale crop → 1×3×112×112 tensor with the luma replicated per channel.
fn to_tensor(aligned: &GrayImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    Array4::from_shape_fn((1, 3, size, size), |(_, _, y, x)| {
        (aligned.get_pixel(x as u32, y as u32)[0] as f32 - MEAN) / STD
    })
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}
