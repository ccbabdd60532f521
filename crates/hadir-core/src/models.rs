//! Face capability stages and the model loader that sequences them.
//!
//! The three stages depend on each other in a fixed order: landmarks need a
//! detected face, embeddings need an aligned crop. Concrete stages live in
//! `hadir-models`; this module only owns the contracts and load sequencing.

use crate::matcher::FaceSelection;
use crate::types::{BoundingBox, Detection, Embedding, FrameRef};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStage {
    Detector,
    Landmarker,
    Embedder,
}

impl ModelStage {
    /// Load order.
    pub const ALL: [ModelStage; 3] = [ModelStage::Detector, ModelStage::Landmarker, ModelStage::Embedder];
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelStage::Detector => "face detector",
            ModelStage::Landmarker => "face landmarks",
            ModelStage::Embedder => "face recognition",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("failed to load {stage}: {reason}")]
pub struct ModelLoadError {
    pub stage: ModelStage,
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{stage} inference failed: {message}")]
pub struct InferenceError {
    pub stage: ModelStage,
    pub message: String,
}

impl InferenceError {
    pub fn new(stage: ModelStage, message: impl Into<String>) -> Self {
        Self { stage, message: message.into() }
    }
}

/// A face crop warped to the canonical pose expected by the embedder (packed RGB).
#[derive(Debug, Clone)]
pub struct AlignedFace {
    pub data: Vec<u8>,
    pub size: u32,
}

pub trait FaceDetector: Send {
    /// Faces in detector output order.
    fn detect(&mut self, frame: FrameRef<'_>) -> Result<Vec<BoundingBox>, InferenceError>;
}

pub trait FaceLandmarker: Send {
    fn align(&mut self, frame: FrameRef<'_>, face: &BoundingBox) -> Result<AlignedFace, InferenceError>;
}

pub trait FaceEmbedder: Send {
    fn embed(&mut self, face: &AlignedFace) -> Result<Embedding, InferenceError>;
}

/// Source of the three capability stages (e.g. ONNX files in a model directory).
pub trait ModelProvider: Send {
    fn load_detector(&self) -> Result<Box<dyn FaceDetector>, ModelLoadError>;
    fn load_landmarker(&self) -> Result<Box<dyn FaceLandmarker>, ModelLoadError>;
    fn load_embedder(&self) -> Result<Box<dyn FaceEmbedder>, ModelLoadError>;
}

/// Fully loaded detect → align → embed chain.
pub struct FacePipeline {
    detector: Box<dyn FaceDetector>,
    landmarker: Box<dyn FaceLandmarker>,
    embedder: Box<dyn FaceEmbedder>,
}

impl FacePipeline {
    pub fn new(
        detector: Box<dyn FaceDetector>,
        landmarker: Box<dyn FaceLandmarker>,
        embedder: Box<dyn FaceEmbedder>,
    ) -> Self {
        Self { detector, landmarker, embedder }
    }

    /// Detect faces, pick one per `selection`, and embed only that one.
    ///
    /// `Ok(None)` means no face was found in the frame.
    pub fn analyze(
        &mut self,
        frame: FrameRef<'_>,
        selection: FaceSelection,
    ) -> Result<Option<Detection>, InferenceError> {
        let faces = self.detector.detect(frame)?;
        let Some(idx) = selection.select_index(&faces) else {
            return Ok(None);
        };
        let region = faces[idx].clone();

        let aligned = self.landmarker.align(frame, &region)?;
        let embedding = self.embedder.embed(&aligned)?;

        tracing::debug!(
            faces = faces.len(),
            selected = idx,
            confidence = region.confidence,
            "face analyzed"
        );

        Ok(Some(Detection { region, embedding }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    Failed(String),
}

/// Loads the capability stages once, in dependency order.
///
/// `load` after `Ready` is a no-op; after `Failed` it starts over from the
/// detector.
pub struct ModelLoader<P> {
    provider: P,
    state: ModelState,
    pipeline: Option<FacePipeline>,
}

impl<P: ModelProvider> ModelLoader<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            state: ModelState::Unloaded,
            pipeline: None,
        }
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ModelState::Ready
    }

    /// Load all stages, reporting human-readable progress before each one.
    pub fn load(&mut self, mut progress: impl FnMut(&str)) -> Result<(), ModelLoadError> {
        if self.is_ready() {
            return Ok(());
        }

        self.state = ModelState::Loading;
        self.pipeline = None;

        match self.load_stages(&mut progress) {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                self.state = ModelState::Ready;
                progress("models ready");
                tracing::info!("face models loaded");
                Ok(())
            }
            Err(err) => {
                tracing::error!(stage = %err.stage, reason = %err.reason, "face model load failed");
                self.state = ModelState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    fn load_stages(&self, progress: &mut impl FnMut(&str)) -> Result<FacePipeline, ModelLoadError> {
        progress(&format!("loading {}...", ModelStage::Detector));
        let detector = self.provider.load_detector()?;

        progress(&format!("loading {}...", ModelStage::Landmarker));
        let landmarker = self.provider.load_landmarker()?;

        progress(&format!("loading {}...", ModelStage::Embedder));
        let embedder = self.provider.load_embedder()?;

        Ok(FacePipeline::new(detector, landmarker, embedder))
    }

    /// The loaded pipeline, if `Ready`.
    pub fn pipeline_mut(&mut self) -> Option<&mut FacePipeline> {
        self.pipeline.as_mut()
    }
}
