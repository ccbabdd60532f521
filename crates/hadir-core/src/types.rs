use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque backend identifier for a teacher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub u64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Borrowed view of a packed RGB frame (3 bytes per pixel, row-major).
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl FrameRef<'_> {
    /// RGB triple at (x, y), or black outside the frame.
    pub fn pixel(&self, x: i64, y: i64) -> [u8; 3] {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return [0, 0, 0];
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        match self.data.get(idx..idx + 3) {
            Some(px) => [px[0], px[1], px[2]],
            None => [0, 0, 0],
        }
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (128-d for the browser enrollments, 512-d for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

#[derive(Debug, Error, PartialEq)]
pub enum DescriptorError {
    #[error("descriptor is not valid JSON: {0}")]
    Json(String),
    #[error("descriptor is not a numeric array")]
    NotAnArray,
    #[error("descriptor element {0} is not a finite number")]
    NonNumeric(usize),
    #[error("descriptor is empty")]
    Empty,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Vectors of different length are compared over their common prefix,
    /// with the surplus components of the longer one counted against zero,
    /// so a length mismatch can never yield a distance of 0.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        let (long, short) = if self.values.len() >= other.values.len() {
            (&self.values, &other.values)
        } else {
            (&other.values, &self.values)
        };

        let shared: f32 = long
            .iter()
            .zip(short.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        let tail: f32 = long[short.len()..].iter().map(|v| v * v).sum();

        (shared + tail).sqrt()
    }

    /// Parse a stored face descriptor.
    ///
    /// The backend stores descriptors as a JSON-encoded string (`"[0.1, ...]"`);
    /// an inline JSON array is accepted too.
    pub fn from_descriptor(value: &serde_json::Value) -> Result<Self, DescriptorError> {
        match value {
            serde_json::Value::String(s) => {
                let inner: serde_json::Value = serde_json::from_str(s)
                    .map_err(|e| DescriptorError::Json(e.to_string()))?;
                Self::from_array(&inner)
            }
            other => Self::from_array(other),
        }
    }

    fn from_array(value: &serde_json::Value) -> Result<Self, DescriptorError> {
        let items = value.as_array().ok_or(DescriptorError::NotAnArray)?;
        if items.is_empty() {
            return Err(DescriptorError::Empty);
        }

        let values = items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_f64()
                    .map(|f| f as f32)
                    .filter(|f| f.is_finite())
                    .ok_or(DescriptorError::NonNumeric(i))
            })
            .collect::<Result<Vec<f32>, _>>()?;

        Ok(Self { values })
    }

    /// Serialize to the JSON-encoded string form the backend stores.
    pub fn to_descriptor_string(&self) -> String {
        serde_json::to_string(&self.values).unwrap_or_else(|_| "[]".to_string())
    }
}

/// A teacher as seen by the face-match core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: IdentityId,
    pub name: String,
    /// Raw descriptor as delivered by the backend; parsed lazily by the face database.
    pub descriptor: Option<serde_json::Value>,
}

/// One face found in a sampled frame, with its embedding.
#[derive(Debug, Clone)]
pub struct Detection {
    pub region: BoundingBox,
    pub embedding: Embedding,
}

/// Outcome of matching one sampled frame against the reference set.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Matched { identity_id: IdentityId, distance: f32 },
    /// `best_distance` is `f32::INFINITY` when the reference set is empty.
    Unmatched { best_distance: f32 },
    NoFaceDetected,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }
}
