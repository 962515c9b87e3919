//! HTTP client for the recognition service.
//!
//! Three multipart endpoints: `POST /user/add`, `POST /recognition` and
//! `POST /liveness`. Every reply is JSON with a `status` field; only
//! `"success"` counts as success.

use async_trait::async_trait;
use facegate_hw::EncodedImage;
use reqwest::multipart::{Form, Part};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("service returned HTTP {0}")]
    HttpStatus(u16),
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Outcome reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    /// Any other status string (`"error"`, `"failed"`, ...).
    #[serde(other)]
    Failure,
}

/// Reply to an enrollment or liveness submission.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceReply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub msg: Option<String>,
}

impl ServiceReply {
    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Success
    }
}

/// Reply to a recognition submission.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionReply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_token: Option<SessionToken>,
}

impl RecognitionReply {
    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Success
    }

    /// The recognized identity, if the reply carries both id and token.
    pub fn identity(&self) -> Option<Identity> {
        Some(Identity {
            user_id: self.user_id.clone()?,
            token: self.session_token.clone()?,
        })
    }
}

/// Opaque token issued on recognition; authorizes the liveness submission.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

/// A recognized user and the token proving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub token: SessionToken,
}

/// The remote recognition service.
#[async_trait]
pub trait FaceService: Send + Sync {
    /// Enroll `image` under `name`.
    async fn add_user(&self, name: &str, image: EncodedImage) -> Result<ServiceReply, ApiError>;

    /// Identify the face in `image`.
    async fn recognize(&self, image: EncodedImage) -> Result<RecognitionReply, ApiError>;

    /// Score an ordered frame batch for liveness on behalf of `identity`.
    async fn check_liveness(
        &self,
        frames: Vec<EncodedImage>,
        identity: &Identity,
    ) -> Result<ServiceReply, ApiError>;
}

/// [`FaceService`] over HTTP multipart.
#[derive(Clone)]
pub struct HttpFaceService {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFaceService {
    /// Create a client targeting `base_url` (e.g. `http://localhost:8888`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: Form) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        tracing::debug!(%url, "posting form");

        let response = self.http.post(&url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%url, status = status.as_u16(), "service returned error status");
            return Err(ApiError::HttpStatus(status.as_u16()));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn jpeg_part(image: EncodedImage, file_name: String) -> Result<Part, ApiError> {
    Ok(Part::bytes(image.bytes)
        .file_name(file_name)
        .mime_str("image/jpeg")?)
}

#[async_trait]
impl FaceService for HttpFaceService {
    async fn add_user(&self, name: &str, image: EncodedImage) -> Result<ServiceReply, ApiError> {
        let form = Form::new()
            .text("name", name.to_string())
            .part("file", jpeg_part(image, "capture.jpg".into())?);
        self.post_form("user/add", form).await
    }

    async fn recognize(&self, image: EncodedImage) -> Result<RecognitionReply, ApiError> {
        let form = Form::new().part("file", jpeg_part(image, "recognition.jpg".into())?);
        self.post_form("recognition", form).await
    }

    async fn check_liveness(
        &self,
        frames: Vec<EncodedImage>,
        identity: &Identity,
    ) -> Result<ServiceReply, ApiError> {
        let mut form = Form::new();
        for (index, frame) in frames.into_iter().enumerate() {
            form = form.part("files", jpeg_part(frame, format!("liveness_{index}.jpg"))?);
        }
        let form = form
            .text("session_token", identity.token.as_str().to_string())
            .text("user_id", identity.user_id.clone());
        self.post_form("liveness", form).await
    }
}

/// Accept `user_id` as either a JSON string or number.
fn de_opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "user_id must be a string or number, got {other}"
        ))),
    }
}
