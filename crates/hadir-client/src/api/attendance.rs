use crate::client::{ApiClient, Envelope};
use crate::error::ApiError;
use chrono::NaiveDate;
use reqwest::Method;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceMethod {
    Rfid,
    Manual,
    Face,
}

impl std::fmt::Display for AttendanceMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AttendanceMethod::Rfid => "rfid",
            AttendanceMethod::Manual => "manual",
            AttendanceMethod::Face => "face",
        })
    }
}

/// Body of `POST /attendance`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceSubmission {
    pub method: AttendanceMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rfid_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<u64>,
    /// JPEG data URL; face submissions only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl AttendanceSubmission {
    pub fn rfid(uid: impl Into<String>) -> Self {
        Self {
            method: AttendanceMethod::Rfid,
            rfid_uid: Some(uid.into()),
            teacher_id: None,
            photo: None,
            latitude: None,
            longitude: None,
        }
    }

    pub fn manual(teacher_id: u64, latitude: f64, longitude: f64) -> Self {
        Self {
            method: AttendanceMethod::Manual,
            rfid_uid: None,
            teacher_id: Some(teacher_id),
            photo: None,
            latitude: Some(latitude),
            longitude: Some(longitude),
        }
    }

    pub fn face(teacher_id: u64, photo: Option<String>) -> Self {
        Self {
            method: AttendanceMethod::Face,
            rfid_uid: None,
            teacher_id: Some(teacher_id),
            photo,
            latitude: None,
            longitude: None,
        }
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }
}

/// `{success, message}` returned for an accepted request.
///
/// `success: false` means the backend understood the request but did not
/// record a new entry (e.g. already checked in today).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AttendanceReceipt {
    pub success: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Laravel-style paginator.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default = "first_page")]
    pub current_page: u32,
    #[serde(default = "first_page")]
    pub last_page: u32,
    #[serde(default)]
    pub total: Option<u64>,
}

fn first_page() -> u32 {
    1
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.current_page < self.last_page
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TeacherSummary {
    pub name: Option<String>,
    pub nip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttendanceLog {
    pub id: u64,
    pub date: String,
    #[serde(default)]
    pub teacher: Option<TeacherSummary>,
    pub method: String,
    #[serde(default)]
    pub check_in: Option<String>,
    pub status: String,
    /// Minutes late when `status == "telat"`.
    #[serde(default)]
    pub late_duration: Option<i64>,
}

impl AttendanceLog {
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        let day = self.date.get(..10).unwrap_or(&self.date);
        NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
    }

    /// Short label for reports: `HADIR`, `Telat 12m`, ...
    pub fn status_label(&self) -> String {
        match (self.status.as_str(), self.late_duration) {
            ("telat", Some(m)) => format!("Telat {m}m"),
            (s, _) => s.to_uppercase(),
        }
    }
}

impl ApiClient {
    /// `POST /attendance`.
    pub async fn submit_attendance(&self, submission: &AttendanceSubmission) -> Result<AttendanceReceipt, ApiError> {
        tracing::debug!(method = %submission.method, teacher = ?submission.teacher_id, "submitting attendance");
        let req = self.request(Method::POST, "/attendance")?.json(submission);
        self.send(req).await
    }

    /// `GET /attendance/history`.
    pub async fn attendance_history(&self, query: &HistoryQuery) -> Result<Page<AttendanceLog>, ApiError> {
        let req = self.request(Method::GET, "/attendance/history")?.query(query);
        let env: Envelope<Page<AttendanceLog>> = self.send(req).await?;
        Ok(env.data)
    }
}
