//! Session endpoint client
//!
//! `POST /api/auth/login` with `{pubkey, isTest, timestamp}`. Any non-2xx
//! status is a rejection whatever the body says; a 2xx with a body that is
//! not the expected JSON is a malformed response, kept apart from network
//! failures.

use crate::forms::{self, ErrorInput, ErrorShape};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Path of the session endpoint, relative to the API base URL.
pub const LOGIN_ENDPOINT: &str = "/api/auth/login";

/// Body of a session request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub pubkey: String,
    pub is_test: bool,
    /// Epoch millis
    pub timestamp: u64,
}

/// Body of a successful session response. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: Option<String>,
    pub pubkey: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("session request rejected with status {status}")]
    Rejected { status: u16, message: Option<String> },

    #[error("malformed session response: {0}")]
    MalformedResponse(String),

    #[error("network error: {0}")]
    Network(String),
}

/// Creates sessions on the backend.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, BackendError>;
}

/// [`SessionBackend`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSessionBackend {
    client: reqwest::Client,
    login_url: Url,
}

impl HttpSessionBackend {
    pub fn new(api_url: &Url) -> crate::Result<Self> {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(client: reqwest::Client, api_url: &Url) -> crate::Result<Self> {
        let login_url = api_url
            .join(LOGIN_ENDPOINT)
            .map_err(|e| crate::Error::Config(format!("invalid API URL {}: {}", api_url, e)))?;
        Ok(Self { client, login_url })
    }

    pub fn login_url(&self) -> &Url {
        &self.login_url
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, BackendError> {
        debug!("POST {} for {}", self.login_url, request.pubkey);

        let response = self
            .client
            .post(self.login_url.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        interpret_response(status, &body)
    }
}

/// Turn a raw status and body into the session outcome.
pub fn interpret_response(status: u16, body: &str) -> Result<LoginResponse, BackendError> {
    if !(200..300).contains(&status) {
        return Err(BackendError::Rejected {
            status,
            message: rejection_message(body),
        });
    }

    serde_json::from_str(body).map_err(|e| BackendError::MalformedResponse(e.to_string()))
}

/// The human-readable text of an error body, when it has one.
fn rejection_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let message = match forms::classify(ErrorInput::Api(&value)).ok()? {
        ErrorShape::ApiValidation { message, .. } => message,
        ErrorShape::PlainMessage(message) => Some(message),
        ErrorShape::NativeWithFields { message, .. } => Some(message),
        ErrorShape::Unknown => None,
    };
    message.filter(|m| !m.trim().is_empty())
}
