use crate::error::ApiError;
use crate::session::{Session, User};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Typed client for the attendance backend.
///
/// Every request except `login` carries the session's bearer token. A 401
/// clears the session through [`Session::force_logout`] and surfaces as
/// [`ApiError::AuthExpired`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: Session,
}

/// `{ data: T }` wrapper used by most list endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, session: Session) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url, session })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /login/admin`. Stores the returned token and profile.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let req = self
            .http
            .post(self.url("/login/admin"))
            .json(&Credentials { email, password });
        let body: serde_json::Value = self.send(req).await?;

        let token = extract_token(&body)
            .ok_or_else(|| ApiError::Decode("login response carried no token".into()))?;
        let user = extract_user(&body);

        self.session.set_session(token, user.clone())?;
        tracing::info!(user = ?user.as_ref().and_then(|u| u.name.as_deref()), "signed in");
        Ok(user.unwrap_or_default())
    }

    /// `POST /logout`. The local session is cleared even if the call fails.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let result = match self.request(Method::POST, "/logout") {
            Ok(req) => self.send_empty(req).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::warn!(error = %e, "backend logout failed; clearing local session anyway");
        }
        self.session.clear_session()?;
        match result {
            Ok(()) | Err(ApiError::NotAuthenticated) | Err(ApiError::AuthExpired) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Authenticated request builder.
    pub(crate) fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let token = self.session.token().ok_or(ApiError::NotAuthenticated)?;
        Ok(self.http.request(method, self.url(path)).bearer_auth(token))
    }

    pub(crate) async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let resp = self.check(req).await?;
        resp.json::<T>().await.map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Like `send`, for endpoints whose body is irrelevant.
    pub(crate) async fn send_empty(&self, req: RequestBuilder) -> Result<(), ApiError> {
        self.check(req).await.map(drop)
    }

    async fn check(&self, req: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let resp = req.send().await?;
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED {
            self.session.force_logout();
            return Err(ApiError::AuthExpired);
        }
        if !status.is_success() {
            let message = resp
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|b| b.message)
                .filter(|m| !m.trim().is_empty());
            tracing::debug!(status = status.as_u16(), ?message, "backend rejected request");
            return Err(ApiError::Rejected { status: status.as_u16(), message });
        }
        Ok(resp)
    }
}

fn extract_token(body: &serde_json::Value) -> Option<String> {
    ["/token", "/access_token", "/data/token"]
        .iter()
        .find_map(|ptr| body.pointer(ptr).and_then(|v| v.as_str()))
        .map(str::to_string)
}

fn extract_user(body: &serde_json::Value) -> Option<User> {
    ["/user", "/data/user"]
        .iter()
        .find_map(|ptr| body.pointer(ptr).filter(|v| v.is_object()))
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}
