use crate::status::StatusMessage;
use hadir_client::{ApiClient, ApiError, AttendanceReceipt, AttendanceSubmission};
use hadir_core::IdentityRecord;
use std::future::Future;

pub const GENERIC_FAILURE: &str = "Gagal memproses absensi.";
const DEFAULT_SUCCESS: &str = "Absensi berhasil dicatat.";
const DEFAULT_ALREADY: &str = "Absensi sudah tercatat.";
pub const SESSION_EXPIRED: &str = "Sesi berakhir, silakan login kembali.";

/// The backend operations the kiosk needs.
pub trait AttendanceBackend: Clone + Send + Sync + 'static {
    fn submit(
        &self,
        submission: AttendanceSubmission,
    ) -> impl Future<Output = Result<AttendanceReceipt, ApiError>> + Send;

    fn identities(&self) -> impl Future<Output = Result<Vec<IdentityRecord>, ApiError>> + Send;
}

/// `ApiClient` bound to the teacher page size used for identity fetches.
#[derive(Debug, Clone)]
pub struct KioskBackend {
    pub client: ApiClient,
    pub page_size: u32,
}

impl AttendanceBackend for KioskBackend {
    async fn submit(&self, submission: AttendanceSubmission) -> Result<AttendanceReceipt, ApiError> {
        self.client.submit_attendance(&submission).await
    }

    async fn identities(&self) -> Result<Vec<IdentityRecord>, ApiError> {
        self.client.fetch_identities(self.page_size).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(String),
    /// Accepted but nothing new recorded, e.g. already checked in today.
    AlreadyRecorded(String),
    Rejected(String),
    /// Credentials were cleared; the current attempt is abandoned.
    AuthExpired,
}

impl Outcome {
    pub fn classify(result: Result<AttendanceReceipt, ApiError>) -> Self {
        match result {
            Ok(receipt) if receipt.success => {
                Outcome::Success(receipt.message.unwrap_or_else(|| DEFAULT_SUCCESS.to_string()))
            }
            Ok(receipt) => Outcome::AlreadyRecorded(receipt.message.unwrap_or_else(|| DEFAULT_ALREADY.to_string())),
            Err(ApiError::AuthExpired) | Err(ApiError::NotAuthenticated) => Outcome::AuthExpired,
            Err(e) => Outcome::Rejected(e.backend_message().unwrap_or(GENERIC_FAILURE).to_string()),
        }
    }

    pub fn status_message(&self) -> StatusMessage {
        match self {
            Outcome::Success(text) => StatusMessage::success(text.clone()),
            Outcome::AlreadyRecorded(text) => StatusMessage::warning(text.clone()),
            Outcome::Rejected(text) => StatusMessage::error(text.clone()),
            Outcome::AuthExpired => StatusMessage::error(SESSION_EXPIRED),
        }
    }
}

/// Post one submission and classify the response.
pub async fn submit<B: AttendanceBackend>(backend: &B, submission: AttendanceSubmission) -> Outcome {
    let method = submission.method;
    let teacher = submission.teacher_id;
    let result = backend.submit(submission).await;
    if let Err(e) = &result {
        tracing::warn!(%method, ?teacher, error = %e, "attendance submission failed");
    }
    let outcome = Outcome::classify(result);
    tracing::info!(%method, ?teacher, ?outcome, "attendance submitted");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusKind;

    fn receipt(success: bool, message: Option<&str>) -> Result<AttendanceReceipt, ApiError> {
        Ok(AttendanceReceipt { success, message: message.map(str::to_string) })
    }

    #[test]
    fn test_already_recorded_is_warning() {
        let outcome = Outcome::classify(receipt(false, Some("Sudah absen")));
        assert_eq!(outcome, Outcome::AlreadyRecorded("Sudah absen".into()));
        let status = outcome.status_message();
        assert_eq!(status.kind, StatusKind::Warning);
        assert_eq!(status.text, "Sudah absen");
    }

    #[test]
    fn test_success_uses_backend_message() {
        let outcome = Outcome::classify(receipt(true, Some("Selamat pagi, Bu Sari")));
        assert_eq!(outcome.status_message(), StatusMessage::success("Selamat pagi, Bu Sari"));
        assert_eq!(Outcome::classify(receipt(true, None)), Outcome::Success(DEFAULT_SUCCESS.into()));
    }

    #[test]
    fn test_rejection_prefers_backend_message() {
        let err = ApiError::Rejected { status: 404, message: Some("Kartu tidak terdaftar".into()) };
        assert_eq!(Outcome::classify(Err(err)), Outcome::Rejected("Kartu tidak terdaftar".into()));
    }

    #[test]
    fn test_transport_failure_uses_generic_text() {
        let outcome = Outcome::classify(Err(ApiError::Network("connection refused".into())));
        assert_eq!(outcome.status_message(), StatusMessage::error(GENERIC_FAILURE));
        let outcome = Outcome::classify(Err(ApiError::Rejected { status: 500, message: None }));
        assert_eq!(outcome, Outcome::Rejected(GENERIC_FAILURE.into()));
    }

    #[test]
    fn test_unauthorized_is_auth_expired() {
        assert_eq!(Outcome::classify(Err(ApiError::AuthExpired)), Outcome::AuthExpired);
    }
}
