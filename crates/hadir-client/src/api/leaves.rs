use crate::api::attendance::TeacherSummary;
use crate::client::{ApiClient, Envelope};
use crate::error::ApiError;
use chrono::NaiveDate;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

impl LeaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveStatus::Pending => "pending",
            LeaveStatus::Approved => "approved",
            LeaveStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for LeaveStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LeaveStatus::Pending),
            "approved" => Ok(LeaveStatus::Approved),
            "rejected" => Ok(LeaveStatus::Rejected),
            other => Err(format!("unknown leave status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LeaveRequest {
    pub id: u64,
    #[serde(default)]
    pub teacher: Option<TeacherSummary>,
    pub start_date: String,
    pub end_date: String,
    /// `sakit` or `izin`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub status: LeaveStatus,
    #[serde(default)]
    pub admin_note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LeaveInput {
    pub teacher_id: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub kind: String,
    pub reason: String,
}

/// Supporting document (doctor's note, letter) uploaded with a request.
#[derive(Debug, Clone)]
pub struct LeaveAttachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl LeaveAttachment {
    pub fn from_path(path: &Path) -> Result<Self, ApiError> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lampiran".to_string());
        Ok(Self { file_name, bytes })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveVerdict {
    Approve,
    Reject,
}

impl LeaveVerdict {
    fn status(self) -> LeaveStatus {
        match self {
            LeaveVerdict::Approve => LeaveStatus::Approved,
            LeaveVerdict::Reject => LeaveStatus::Rejected,
        }
    }

    pub fn default_note(self) -> &'static str {
        match self {
            LeaveVerdict::Approve => "Disetujui oleh admin",
            LeaveVerdict::Reject => "Ditolak oleh admin",
        }
    }
}

#[derive(Serialize)]
struct Verification<'a> {
    status: LeaveStatus,
    admin_note: &'a str,
}

impl ApiClient {
    /// `GET /leaves`, optionally filtered by status.
    pub async fn list_leaves(&self, status: Option<LeaveStatus>) -> Result<Vec<LeaveRequest>, ApiError> {
        let mut req = self.request(Method::GET, "/leaves")?;
        if let Some(status) = status {
            req = req.query(&[("status", status.as_str())]);
        }
        let env: Envelope<Vec<LeaveRequest>> = self.send(req).await?;
        Ok(env.data)
    }

    /// `POST /leaves` as multipart form data.
    pub async fn create_leave(&self, input: &LeaveInput, attachment: Option<LeaveAttachment>) -> Result<(), ApiError> {
        if input.end_date < input.start_date {
            return Err(ApiError::Rejected {
                status: 422,
                message: Some("Tanggal selesai harus setelah tanggal mulai.".into()),
            });
        }
        let mut form = Form::new()
            .text("teacher_id", input.teacher_id.to_string())
            .text("start_date", input.start_date.format("%Y-%m-%d").to_string())
            .text("end_date", input.end_date.format("%Y-%m-%d").to_string())
            .text("type", input.kind.clone())
            .text("reason", input.reason.clone());
        if let Some(file) = attachment {
            form = form.part("file", Part::bytes(file.bytes).file_name(file.file_name));
        }
        let req = self.request(Method::POST, "/leaves")?.multipart(form);
        self.send_empty(req).await
    }

    /// `PUT /leaves/{id}/verify`. `note` falls back to the verdict's default.
    pub async fn verify_leave(&self, id: u64, verdict: LeaveVerdict, note: Option<&str>) -> Result<(), ApiError> {
        let body = Verification {
            status: verdict.status(),
            admin_note: note.unwrap_or(verdict.default_note()),
        };
        let req = self.request(Method::PUT, &format!("/leaves/{id}/verify"))?.json(&body);
        self.send_empty(req).await?;
        tracing::info!(leave = id, status = body.status.as_str(), "leave verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{signed_in_client, spawn_backend};
    use axum::body::Bytes;
    use axum::extract::Query;
    use axum::http::HeaderMap;
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let app = Router::new().route(
            "/leaves",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("status").map(String::as_str), Some("pending"));
                Json(json!({"data": [{
                    "id": 5, "start_date": "2024-07-01", "end_date": "2024-07-02",
                    "type": "sakit", "reason": "demam", "status": "pending",
                    "teacher": {"name": "Pak Budi"}
                }]}))
            }),
        );
        let client = signed_in_client(spawn_backend(app).await);
        let leaves = client.list_leaves(Some(LeaveStatus::Pending)).await.unwrap();
        assert_eq!(leaves[0].kind, "sakit");
        assert_eq!(leaves[0].status, LeaveStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_sends_multipart() {
        let app = Router::new().route(
            "/leaves",
            post(|headers: HeaderMap, body: Bytes| async move {
                let ct = headers.get("content-type").and_then(|v| v.to_str().ok()).unwrap_or("");
                assert!(ct.starts_with("multipart/form-data"));
                let text = String::from_utf8_lossy(&body);
                assert!(text.contains("name=\"teacher_id\""));
                assert!(text.contains("2024-07-01"));
                assert!(text.contains("filename=\"surat.pdf\""));
                Json(json!({"message": "ok"}))
            }),
        );
        let client = signed_in_client(spawn_backend(app).await);
        let input = LeaveInput {
            teacher_id: 2,
            start_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 7, 3).unwrap(),
            kind: "izin".into(),
            reason: "acara keluarga".into(),
        };
        let file = LeaveAttachment { file_name: "surat.pdf".into(), bytes: b"%PDF-1.4".to_vec() };
        client.create_leave(&input, Some(file)).await.unwrap();
    }

    #[tokio::test]
    async fn test_inverted_dates_rejected_locally() {
        let client = signed_in_client("http://127.0.0.1:9".into());
        let input = LeaveInput {
            teacher_id: 2,
            start_date: NaiveDate::from_ymd_opt(2024, 7, 3).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            kind: "izin".into(),
            reason: String::new(),
        };
        assert!(matches!(
            client.create_leave(&input, None).await,
            Err(ApiError::Rejected { status: 422, .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_uses_default_note() {
        let app = Router::new().route(
            "/leaves/:id/verify",
            put(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body, json!({"status": "rejected", "admin_note": "Ditolak oleh admin"}));
                Json(json!({}))
            }),
        );
        let client = signed_in_client(spawn_backend(app).await);
        client.verify_leave(5, LeaveVerdict::Reject, None).await.unwrap();
    }
}
