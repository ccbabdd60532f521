use serde::Serialize;

/// Face-mode controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KioskState {
    Idle,
    Loading,
    Ready,
    Matching,
    Submitting,
    CoolingDown,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub text: String,
}

impl StatusMessage {
    pub fn success(text: impl Into<String>) -> Self {
        Self { kind: StatusKind::Success, text: text.into() }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self { kind: StatusKind::Warning, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { kind: StatusKind::Error, text: text.into() }
    }
}

/// Everything the kiosk display needs, published on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KioskStatus {
    pub state: KioskState,
    pub face_mode: bool,
    /// Submission outcome shown for the cool-down window.
    pub message: Option<StatusMessage>,
    /// Transient hint: model loading progress, "no face", "not recognized".
    pub hint: Option<String>,
    /// Whether a submission is in flight; inputs are locked meanwhile.
    pub busy: bool,
}

impl Default for KioskStatus {
    fn default() -> Self {
        Self {
            state: KioskState::Idle,
            face_mode: false,
            message: None,
            hint: None,
            busy: false,
        }
    }
}
