//! ArcFace face embedder via ONNX Runtime.
//!
//! Produces L2-normalized 512-dimensional embeddings from aligned 112×112
//! RGB crops.

use hadir_core::{AlignedFace, Embedding, FaceEmbedder, InferenceError, ModelStage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 112;
// ArcFace normalizes symmetrically around 127.5, unlike SCRFD.
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
/// Length of every embedding this model produces.
pub const EMBEDDING_DIM: usize = 512;
/// Euclidean match threshold suited to L2-normalized ArcFace embeddings,
/// roughly cosine similarity 0.4.
pub const SUGGESTED_MATCH_THRESHOLD: f32 = 1.1;

#[derive(Error, Debug)]
pub enum ArcFaceError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("aligned crop must be 112x112, got {0}")]
    WrongCropSize(u32),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ArcFaceError> {
        if !model_path.exists() {
            return Err(ArcFaceError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    fn run(&mut self, face: &AlignedFace) -> Result<Embedding, ArcFaceError> {
        let input = preprocess(face)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ArcFaceError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(ArcFaceError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

impl FaceEmbedder for ArcFaceEmbedder {
    fn embed(&mut self, face: &AlignedFace) -> Result<Embedding, InferenceError> {
        self.run(face)
            .map_err(|e| InferenceError::new(ModelStage::Embedder, e.to_string()))
    }
}

fn preprocess(face: &AlignedFace) -> Result<Array4<f32>, ArcFaceError> {
    if face.size as usize != INPUT_SIZE || face.data.len() < INPUT_SIZE * INPUT_SIZE * 3 {
        return Err(ArcFaceError::WrongCropSize(face.size));
    }

    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for (i, px) in face.data.chunks_exact(3).take(INPUT_SIZE * INPUT_SIZE).enumerate() {
        let (y, x) = (i / INPUT_SIZE, i % INPUT_SIZE);
        for c in 0..3 {
            tensor[[0, c, y, x]] = (px[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    Ok(tensor)
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_layout() {
        let mut data = vec![0u8; INPUT_SIZE * INPUT_SIZE * 3];
        // pixel (x=1, y=0) pure red
        data[3] = 255;
        let tensor = preprocess(&AlignedFace { data, size: 112 }).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, INPUT_SIZE, INPUT_SIZE]);
        assert!((tensor[[0, 0, 0, 1]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 1]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_rejects_wrong_size() {
        let face = AlignedFace { data: vec![0u8; 64 * 64 * 3], size: 64 };
        assert!(matches!(preprocess(&face), Err(ArcFaceError::WrongCropSize(64))));
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
