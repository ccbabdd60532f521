//! hadir-models: ONNX implementation of the face capability stages.
//!
//! Detection uses SCRFD, the landmark stage aligns the detector's five
//! keypoints to the ArcFace template, and embeddings come from ArcFace.
//! All inference runs on CPU through ONNX Runtime.

pub mod align;
pub mod arcface;
pub mod scrfd;

use hadir_core::{FaceDetector, FaceEmbedder, FaceLandmarker, ModelLoadError, ModelProvider, ModelStage};
use std::path::{Path, PathBuf};

pub use align::LandmarkAligner;
pub use arcface::{ArcFaceEmbedder, EMBEDDING_DIM, SUGGESTED_MATCH_THRESHOLD};
pub use scrfd::ScrfdDetector;

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const EMBEDDER_FILE: &str = "w600k_r50.onnx";

/// Default model bundle location.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/hadir/models")
}

/// Loads the three stages from a model bundle directory.
#[derive(Debug, Clone)]
pub struct OnnxModels {
    model_dir: PathBuf,
    intra_threads: usize,
}

impl OnnxModels {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            intra_threads: 2,
        }
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads.max(1);
        self
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }
}

impl ModelProvider for OnnxModels {
    fn load_detector(&self) -> Result<Box<dyn FaceDetector>, ModelLoadError> {
        let path = self.model_dir.join(DETECTOR_FILE);
        let detector = ScrfdDetector::load(&path, self.intra_threads).map_err(|e| ModelLoadError {
            stage: ModelStage::Detector,
            reason: e.to_string(),
        })?;
        Ok(Box::new(detector))
    }

    fn load_landmarker(&self) -> Result<Box<dyn FaceLandmarker>, ModelLoadError> {
        // Keypoints come from SCRFD; this stage only needs the alignment template.
        Ok(Box::new(LandmarkAligner::arcface()))
    }

    fn load_embedder(&self) -> Result<Box<dyn FaceEmbedder>, ModelLoadError> {
        let path = self.model_dir.join(EMBEDDER_FILE);
        let embedder = ArcFaceEmbedder::load(&path, self.intra_threads).map_err(|e| ModelLoadError {
            stage: ModelStage::Embedder,
            reason: e.to_string(),
        })?;
        Ok(Box::new(embedder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_detector_reports_stage() {
        let models = OnnxModels::new("/nonexistent/hadir-models");
        let err = models.load_detector().err().unwrap();
        assert_eq!(err.stage, ModelStage::Detector);
        assert!(err.reason.contains(DETECTOR_FILE));
    }

    #[test]
    fn test_missing_embedder_reports_stage() {
        let models = OnnxModels::new("/nonexistent/hadir-models");
        let err = models.load_embedder().err().unwrap();
        assert_eq!(err.stage, ModelStage::Embedder);
    }

    #[test]
    fn test_landmarker_needs_no_file() {
        let models = OnnxModels::new("/nonexistent/hadir-models");
        assert!(models.load_landmarker().is_ok());
    }
}
