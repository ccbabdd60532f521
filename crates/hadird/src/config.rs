use hadir_core::{FaceSelection, TieBreak, DEFAULT_MATCH_THRESHOLD};
use std::path::PathBuf;
use std::time::Duration;

/// Kiosk daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend base URL, e.g. `http://127.0.0.1:8000/api`.
    pub api_url: String,
    /// Session file shared with the `hadir` CLI.
    pub session_path: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Frames discarded after opening the camera (auto-exposure settling).
    pub warmup_frames: usize,
    /// Directory containing the ONNX model bundle.
    pub model_dir: PathBuf,
    pub intra_threads: usize,
    /// Maximum Euclidean distance accepted as a match (inclusive).
    ///
    /// The 0.6 default suits 128-d face-api.js descriptors. For the 512-d
    /// ArcFace embeddings `hadir-models` produces, around
    /// `hadir_models::SUGGESTED_MATCH_THRESHOLD` (1.1) is the usual choice.
    pub match_threshold: f32,
    /// Whether `HADIR_MATCH_THRESHOLD` was set explicitly.
    pub match_threshold_configured: bool,
    /// Descriptor length the kiosk accepts; `None` follows the enrolled majority.
    pub embedding_dim: Option<usize>,
    pub detect_interval: Duration,
    /// How long an outcome stays on screen before the loop re-arms.
    pub cooldown: Duration,
    pub face_selection: FaceSelection,
    pub tie_break: TieBreak,
    pub snapshot_quality: u8,
    /// Kiosk coordinates attached to manual and face submissions.
    pub location: Option<(f64, f64)>,
    /// Page size used when fetching the teacher list.
    pub teacher_page_size: u32,
    pub start_in_face_mode: bool,
    /// Emit status updates as JSON lines on stdout instead of plain text.
    pub status_json: bool,
}

impl Config {
    /// Load configuration from `HADIR_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let parse_or = |key: &str, default: f64| get(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default);

        let location = match (get("HADIR_KIOSK_LAT"), get("HADIR_KIOSK_LON")) {
            (Some(lat), Some(lon)) => match (lat.trim().parse::<f64>(), lon.trim().parse::<f64>()) {
                (Ok(lat), Ok(lon)) => Some((lat, lon)),
                _ => {
                    tracing::warn!(%lat, %lon, "ignoring unparsable kiosk location");
                    None
                }
            },
            _ => None,
        };

        Self {
            api_url: get("HADIR_API_URL").unwrap_or_else(|| hadir_client::DEFAULT_API_URL.to_string()),
            session_path: get("HADIR_SESSION_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(hadir_client::Session::default_path),
            camera_device: get("HADIR_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            camera_width: parse_or("HADIR_CAMERA_WIDTH", 640.0) as u32,
            camera_height: parse_or("HADIR_CAMERA_HEIGHT", 480.0) as u32,
            warmup_frames: parse_or("HADIR_WARMUP_FRAMES", 4.0) as usize,
            model_dir: get("HADIR_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(hadir_models::default_model_dir),
            intra_threads: parse_or("HADIR_INTRA_THREADS", 2.0) as usize,
            match_threshold: parse_or("HADIR_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD as f64) as f32,
            match_threshold_configured: get("HADIR_MATCH_THRESHOLD").is_some_and(|v| v.trim().parse::<f32>().is_ok()),
            embedding_dim: match get("HADIR_EMBEDDING_DIM").as_deref().map(str::trim) {
                Some("auto") => None,
                Some(v) => Some(v.parse().unwrap_or(hadir_models::EMBEDDING_DIM)),
                None => Some(hadir_models::EMBEDDING_DIM),
            },
            detect_interval: Duration::from_millis(parse_or("HADIR_DETECT_INTERVAL_MS", 1000.0).max(50.0) as u64),
            cooldown: Duration::from_millis(parse_or("HADIR_COOLDOWN_MS", 4000.0) as u64),
            face_selection: match get("HADIR_FACE_SELECTION").as_deref() {
                Some("largest") => FaceSelection::LargestRegion,
                _ => FaceSelection::FirstDetected,
            },
            tie_break: match get("HADIR_TIE_BREAK").as_deref() {
                Some("last") => TieBreak::LastEncountered,
                _ => TieBreak::FirstEncountered,
            },
            snapshot_quality: parse_or("HADIR_SNAPSHOT_QUALITY", 80.0).clamp(1.0, 100.0) as u8,
            location,
            teacher_page_size: parse_or("HADIR_TEACHER_PAGE_SIZE", 100.0) as u32,
            start_in_face_mode: get("HADIR_START_IN_FACE_MODE").is_some_and(|v| v == "1" || v == "true"),
            status_json: get("HADIR_STATUS_FORMAT").is_some_and(|v| v == "json"),
        }
    }

    /// Threshold worth suggesting when the default is paired with ArcFace embeddings.
    pub fn threshold_advice(&self) -> Option<f32> {
        (!self.match_threshold_configured && self.embedding_dim == Some(hadir_models::EMBEDDING_DIM))
            .then_some(hadir_models::SUGGESTED_MATCH_THRESHOLD)
    }
}
