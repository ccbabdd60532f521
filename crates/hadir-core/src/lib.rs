//! hadir-core: Face-match attendance core.
//!
//! Builds the labeled reference set from backend identity records, matches
//! live embeddings against it by Euclidean distance, and sequences loading
//! of the detection / landmark / embedding capabilities. Contains no I/O.

pub mod face_db;
pub mod matcher;
pub mod models;
pub mod types;

pub use face_db::{ReferenceEntry, ReferenceSet};
pub use matcher::{
    match_detection, EuclideanMatcher, FaceSelection, Matcher, TieBreak, DEFAULT_MATCH_THRESHOLD,
};
pub use models::{
    AlignedFace, FaceDetector, FaceEmbedder, FaceLandmarker, FacePipeline, InferenceError,
    ModelLoadError, ModelLoader, ModelProvider, ModelStage, ModelState,
};
pub use types::{
    BoundingBox, DescriptorError, Detection, Embedding, FrameRef, IdentityId, IdentityRecord,
    MatchResult,
};
