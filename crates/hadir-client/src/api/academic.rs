//! Academic reference data: years, majors and subjects. All three share the
//! same list/create/update/delete shape.

use crate::client::{ApiClient, Envelope};
use crate::error::ApiError;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AcademicYear {
    pub id: u64,
    pub name: String,
    /// e.g. `2024/2025`.
    #[serde(default)]
    pub years: Option<String>,
    /// `ganjil` or `genap`.
    #[serde(default)]
    pub semester: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcademicYearInput {
    pub name: String,
    pub years: String,
    pub semester: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Major {
    pub id: u64,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub head_of_program_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MajorInput {
    pub code: String,
    pub name: String,
    /// Serialized as `null` when unset.
    pub head_of_program_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Subject {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectInput {
    pub name: String,
}

/// The backend reports booleans as `true`/`false` or `1`/`0`.
fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        serde_json::Value::String(s) => matches!(s.as_str(), "1" | "true"),
        _ => false,
    })
}

const ACADEMIC_YEARS: &str = "/academic-years";
const MAJORS: &str = "/majors";
const SUBJECTS: &str = "/subjects";

impl ApiClient {
    async fn list_resource<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ApiError> {
        let env: Envelope<Vec<T>> = self.send(self.request(Method::GET, path)?).await?;
        Ok(env.data)
    }

    async fn save_resource<B: Serialize>(&self, path: &str, id: Option<u64>, body: &B) -> Result<(), ApiError> {
        let req = match id {
            Some(id) => self.request(Method::PUT, &format!("{path}/{id}"))?,
            None => self.request(Method::POST, path)?,
        };
        self.send_empty(req.json(body)).await
    }

    async fn delete_resource(&self, path: &str, id: u64) -> Result<(), ApiError> {
        self.send_empty(self.request(Method::DELETE, &format!("{path}/{id}"))?).await
    }

    pub async fn list_academic_years(&self) -> Result<Vec<AcademicYear>, ApiError> {
        self.list_resource(ACADEMIC_YEARS).await
    }

    pub async fn create_academic_year(&self, input: &AcademicYearInput) -> Result<(), ApiError> {
        self.save_resource(ACADEMIC_YEARS, None, input).await
    }

    pub async fn update_academic_year(&self, id: u64, input: &AcademicYearInput) -> Result<(), ApiError> {
        self.save_resource(ACADEMIC_YEARS, Some(id), input).await
    }

    pub async fn delete_academic_year(&self, id: u64) -> Result<(), ApiError> {
        self.delete_resource(ACADEMIC_YEARS, id).await
    }

    pub async fn list_majors(&self) -> Result<Vec<Major>, ApiError> {
        self.list_resource(MAJORS).await
    }

    pub async fn create_major(&self, input: &MajorInput) -> Result<(), ApiError> {
        self.save_resource(MAJORS, None, input).await
    }

    pub async fn update_major(&self, id: u64, input: &MajorInput) -> Result<(), ApiError> {
        self.save_resource(MAJORS, Some(id), input).await
    }

    pub async fn delete_major(&self, id: u64) -> Result<(), ApiError> {
        self.delete_resource(MAJORS, id).await
    }

    pub async fn list_subjects(&self) -> Result<Vec<Subject>, ApiError> {
        self.list_resource(SUBJECTS).await
    }

    pub async fn create_subject(&self, input: &SubjectInput) -> Result<(), ApiError> {
        self.save_resource(SUBJECTS, None, input).await
    }

    pub async fn update_subject(&self, id: u64, input: &SubjectInput) -> Result<(), ApiError> {
        self.save_resource(SUBJECTS, Some(id), input).await
    }

    pub async fn delete_subject(&self, id: u64) -> Result<(), ApiError> {
        self.delete_resource(SUBJECTS, id).await
    }
}
