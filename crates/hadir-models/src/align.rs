//! Landmark stage: warps a detected face onto the ArcFace 112×112 template
//! using a least-squares similarity transform of its five keypoints.

use hadir_core::{AlignedFace, BoundingBox, FaceLandmarker, FrameRef, InferenceError, ModelStage};

/// ArcFace reference landmarks for a 112×112 crop.
const ARCFACE_TEMPLATE: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

const ALIGNED_SIZE: u32 = 112;

/// 4-DOF similarity: `dst = [[a, -b], [b, a]] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit over centered point sets.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (smx, smy) = mean(src);
        let (dmx, dmy) = mean(dst);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (px, py) = (sx - smx, sy - smy);
            let (qx, qy) = (dx - dmx, dy - dmy);
            dot += px * qx + py * qy;
            cross += px * qy - py * qx;
            norm += px * px + py * py;
        }
        if norm < 1e-9 {
            return None;
        }

        let a = dot / norm;
        let b = cross / norm;
        Some(Self {
            a,
            b,
            tx: dmx - (a * smx - b * smy),
            ty: dmy - (b * smx + a * smy),
        })
    }

    /// Map a destination (template) point back into the source frame.
    fn invert_point(&self, x: f32, y: f32) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        let (dx, dy) = (x - self.tx, y - self.ty);
        ((self.a * dx + self.b * dy) / det, (-self.b * dx + self.a * dy) / det)
    }
}

/// Bilinear RGB sample; outside the frame reads as black.
fn sample(frame: FrameRef<'_>, x: f32, y: f32) -> [u8; 3] {
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let tl = frame.pixel(x0, y0);
    let tr = frame.pixel(x0 + 1, y0);
    let bl = frame.pixel(x0, y0 + 1);
    let br = frame.pixel(x0 + 1, y0 + 1);

    std::array::from_fn(|c| {
        let top = tl[c] as f32 * (1.0 - fx) + tr[c] as f32 * fx;
        let bottom = bl[c] as f32 * (1.0 - fx) + br[c] as f32 * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    })
}

#[derive(Debug, Clone)]
pub struct LandmarkAligner {
    template: [(f32, f32); 5],
    size: u32,
}

impl LandmarkAligner {
    pub fn arcface() -> Self {
        Self {
            template: ARCFACE_TEMPLATE,
            size: ALIGNED_SIZE,
        }
    }

    pub fn align_face(&self, frame: FrameRef<'_>, landmarks: &[(f32, f32); 5]) -> Option<AlignedFace> {
        let transform = Similarity::estimate(landmarks, &self.template)?;
        let mut data = Vec::with_capacity((self.size * self.size * 3) as usize);
        for v in 0..self.size {
            for u in 0..self.size {
                let (sx, sy) = transform.invert_point(u as f32, v as f32);
                data.extend_from_slice(&sample(frame, sx, sy));
            }
        }
        Some(AlignedFace { data, size: self.size })
    }
}

impl FaceLandmarker for LandmarkAligner {
    fn align(&mut self, frame: FrameRef<'_>, face: &BoundingBox) -> Result<AlignedFace, InferenceError> {
        let landmarks = face
            .landmarks
            .as_ref()
            .ok_or_else(|| InferenceError::new(ModelStage::Landmarker, "detector returned no keypoints"))?;
        self.align_face(frame, landmarks)
            .ok_or_else(|| InferenceError::new(ModelStage::Landmarker, "degenerate keypoints"))
    }
}
