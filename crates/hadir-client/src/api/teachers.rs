use crate::client::{ApiClient, Envelope};
use crate::error::ApiError;
use hadir_core::{Embedding, IdentityId, IdentityRecord};
use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};

/// Teacher as returned by `GET /teachers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeacherRecord {
    pub id: u64,
    /// Missing or null names decode as empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default)]
    pub nip: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub jenis_kelamin: Option<String>,
    #[serde(default)]
    pub rfid_uid: Option<String>,
    /// Stored face descriptor: a JSON-encoded numeric array, or null.
    #[serde(default)]
    pub face_descriptor: Option<serde_json::Value>,
    #[serde(default)]
    pub photo: Option<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl TeacherRecord {
    pub fn has_face(&self) -> bool {
        matches!(&self.face_descriptor, Some(v) if !v.is_null())
    }

    pub fn to_identity(&self) -> IdentityRecord {
        IdentityRecord {
            id: IdentityId(self.id),
            name: self.name.clone(),
            descriptor: self.face_descriptor.clone(),
        }
    }
}

/// Body for create/update.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TeacherInput {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nip: Option<String>,
    pub email: String,
    /// `L` or `P`.
    pub jenis_kelamin: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TeacherList {
    Wrapped(Envelope<Vec<TeacherRecord>>),
    Bare(Vec<TeacherRecord>),
}

#[derive(Serialize)]
struct FaceEnrollment<'a> {
    face_descriptor: String,
    photo: &'a str,
}

#[derive(Serialize)]
struct RfidAssignment<'a> {
    rfid_uid: &'a str,
}

impl ApiClient {
    /// `GET /teachers?per_page=N`. Accepts both the `{data: [...]}` envelope
    /// and a bare array.
    pub async fn list_teachers(&self, per_page: u32) -> Result<Vec<TeacherRecord>, ApiError> {
        let req = self
            .request(Method::GET, "/teachers")?
            .query(&[("per_page", per_page)]);
        let list: TeacherList = self.send(req).await?;
        let teachers = match list {
            TeacherList::Wrapped(env) => env.data,
            TeacherList::Bare(v) => v,
        };
        tracing::debug!(count = teachers.len(), "fetched teachers");
        Ok(teachers)
    }

    /// Fetch all teachers as matcher input.
    pub async fn fetch_identities(&self, per_page: u32) -> Result<Vec<IdentityRecord>, ApiError> {
        Ok(self
            .list_teachers(per_page)
            .await?
            .iter()
            .map(TeacherRecord::to_identity)
            .collect())
    }

    pub async fn create_teacher(&self, input: &TeacherInput) -> Result<(), ApiError> {
        let req = self.request(Method::POST, "/teachers")?.json(input);
        self.send_empty(req).await
    }

    pub async fn update_teacher(&self, id: u64, input: &TeacherInput) -> Result<(), ApiError> {
        let req = self.request(Method::PUT, &format!("/teachers/{id}"))?.json(input);
        self.send_empty(req).await
    }

    pub async fn delete_teacher(&self, id: u64) -> Result<(), ApiError> {
        let req = self.request(Method::DELETE, &format!("/teachers/{id}"))?;
        self.send_empty(req).await
    }

    /// `PUT /teachers/{id}/rfid`.
    pub async fn assign_rfid(&self, id: u64, rfid_uid: &str) -> Result<(), ApiError> {
        let req = self
            .request(Method::PUT, &format!("/teachers/{id}/rfid"))?
            .json(&RfidAssignment { rfid_uid: rfid_uid.trim() });
        self.send_empty(req).await
    }

    /// `PUT /teachers/{id}/face` with the descriptor serialized as a JSON
    /// array string and a JPEG data URL snapshot.
    pub async fn enroll_face(&self, id: u64, embedding: &Embedding, photo: &str) -> Result<(), ApiError> {
        let body = FaceEnrollment {
            face_descriptor: embedding.to_descriptor_string(),
            photo,
        };
        let req = self.request(Method::PUT, &format!("/teachers/{id}/face"))?.json(&body);
        self.send_empty(req).await?;
        tracing::info!(teacher = id, dims = embedding.len(), "face enrolled");
        Ok(())
    }
}
