//! Face enrollment: capture frames until one contains a face, embed it and
//! take a JPEG proof snapshot of the same frame.

use hadir_core::{Embedding, FacePipeline, FaceSelection, InferenceError};
use hadir_hw::{CameraError, Frame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("no face detected in {0} frames; face the camera and try again")]
    NoFace(usize),
    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] hadir_hw::FrameError),
}

#[derive(Debug, Clone)]
pub struct EnrollCapture {
    pub embedding: Embedding,
    /// `data:image/jpeg;base64,...`
    pub photo: String,
    pub confidence: f32,
}

/// Pull up to `attempts` frames and enroll the first detected face.
pub fn capture_face(
    pipeline: &mut FacePipeline,
    mut next_frame: impl FnMut() -> Result<Frame, CameraError>,
    attempts: usize,
    quality: u8,
) -> Result<EnrollCapture, EnrollError> {
    for attempt in 1..=attempts {
        let frame = next_frame()?;
        let Some(detection) = pipeline.analyze(frame.view(), FaceSelection::FirstDetected)? else {
            tracing::debug!(attempt, "no face in frame");
            continue;
        };
        tracing::info!(
            attempt,
            confidence = detection.region.confidence,
            dims = detection.embedding.len(),
            "face captured"
        );
        return Ok(EnrollCapture {
            photo: frame.to_jpeg_data_url(quality)?,
            embedding: detection.embedding,
            confidence: detection.region.confidence,
        });
    }
    Err(EnrollError::NoFace(attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hadir_core::{AlignedFace, BoundingBox, FaceDetector, FaceEmbedder, FaceLandmarker, FrameRef};

    /// Reports a face only on frames whose first byte is non-zero.
    struct LitFaces;

    impl FaceDetector for LitFaces {
        fn detect(&mut self, frame: FrameRef<'_>) -> Result<Vec<BoundingBox>, InferenceError> {
            if frame.data[0] == 0 {
                return Ok(vec![]);
            }
            Ok(vec![BoundingBox {
                x: 1.0,
                y: 1.0,
                width: 4.0,
                height: 4.0,
                confidence: 0.8,
                landmarks: None,
            }])
        }
    }

    impl FaceLandmarker for LitFaces {
        fn align(&mut self, frame: FrameRef<'_>, _face: &BoundingBox) -> Result<AlignedFace, InferenceError> {
            Ok(AlignedFace { data: frame.data.to_vec(), size: frame.width })
        }
    }

    impl FaceEmbedder for LitFaces {
        fn embed(&mut self, face: &AlignedFace) -> Result<Embedding, InferenceError> {
            Ok(Embedding::new(vec![face.data[0] as f32, 1.0, 2.0]))
        }
    }

    fn pipeline() -> FacePipeline {
        FacePipeline::new(Box::new(LitFaces), Box::new(LitFaces), Box::new(LitFaces))
    }

    fn frame(value: u8) -> Frame {
        Frame {
            data: vec![value; 4 * 4 * 3],
            width: 4,
            height: 4,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }

    #[test]
    fn test_first_face_wins() {
        let mut frames = vec![frame(0), frame(0), frame(90), frame(120)].into_iter();
        let capture = capture_face(&mut pipeline(), || Ok(frames.next().unwrap()), 5, 80).unwrap();
        assert_eq!(capture.embedding.values, vec![90.0, 1.0, 2.0]);
        assert!(capture.photo.starts_with("data:image/jpeg;base64,"));
        assert_eq!(frames.next().map(|f| f.data[0]), Some(120));
    }

    #[test]
    fn test_no_face_is_error() {
        let err = capture_face(&mut pipeline(), || Ok(frame(0)), 3, 80).unwrap_err();
        assert!(matches!(err, EnrollError::NoFace(3)));
    }

    #[test]
    fn test_camera_failure_propagates() {
        let err = capture_face(&mut pipeline(), || Err(CameraError::DeviceBusy), 3, 80).unwrap_err();
        assert!(matches!(err, EnrollError::Camera(CameraError::DeviceBusy)));
    }
}
