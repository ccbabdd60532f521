pub mod api;
pub mod client;
pub mod error;
pub mod session;

pub use api::academic::{AcademicYear, AcademicYearInput, Major, MajorInput, Subject, SubjectInput};
pub use api::attendance::{AttendanceLog, AttendanceMethod, AttendanceReceipt, AttendanceSubmission, HistoryQuery, Page, TeacherSummary};
pub use api::leaves::{LeaveAttachment, LeaveInput, LeaveRequest, LeaveStatus, LeaveVerdict};
pub use api::teachers::{TeacherInput, TeacherRecord};
pub use client::{ApiClient, DEFAULT_API_URL};
pub use error::ApiError;
pub use session::{Session, User};

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;

    /// Serve `app` on an ephemeral port and return its base URL.
    pub async fn spawn_backend(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    pub fn signed_in_client(base: String) -> crate::ApiClient {
        let session = crate::Session::in_memory();
        session.set_session("test-token".into(), None).unwrap();
        crate::ApiClient::new(base, session).unwrap()
    }
}
