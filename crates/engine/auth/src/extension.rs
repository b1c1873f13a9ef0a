//! Signing extension support
//!
//! A signing extension holds the user's key and answers public-key and
//! signing requests without ever exposing the secret. In a browser it is
//! injected as a global object; here it is a trait object handed to
//! [`KeyUtility`](crate::keys::KeyUtility).
//!
//! # Example
//!
//! ```rust,ignore
//! use admarket_auth::extension::{request_public_key, KeysExtension, DEFAULT_TIMEOUT};
//!
//! let extension = KeysExtension::parse("nsec1...")?;
//! let pubkey = request_public_key(&extension, DEFAULT_TIMEOUT).await?;
//! ```

use async_trait::async_trait;
use nostr::{EventBuilder, Keys, Kind, PublicKey, Tag, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Default time allowed for the extension to answer a public-key request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Shortest accepted extension timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Longest accepted extension timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(5);

/// Clamp a configured timeout into the accepted window.
pub fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT)
}

/// An unsigned event as handed to the signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub kind: u16,
    pub created_at: u64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            kind,
            created_at: crate::unix_time_secs(),
            tags: Vec::new(),
            content: content.into(),
        }
    }

    pub fn tag<I, S>(mut self, tag: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(tag.into_iter().map(Into::into).collect());
        self
    }
}

/// A signed event in NIP-01 wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

/// Failures reported by (or about) a signing extension.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtensionError {
    #[error("no signing extension installed")]
    Absent,

    #[error("signing extension did not respond within {0:?}")]
    Timeout(Duration),

    #[error("signing extension rejected the request: {0}")]
    Denied(String),

    #[error("signing extension returned no {0}")]
    Empty(&'static str),

    #[error("signing extension returned an invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("signing failed: {0}")]
    Failed(String),
}

/// The interface a signing extension exposes.
#[async_trait]
pub trait SigningExtension: Send + Sync {
    /// Hex-encoded public key of the user the extension signs for.
    async fn get_public_key(&self) -> Result<String, ExtensionError>;

    /// Sign `template` as that user.
    async fn sign_event(&self, template: EventTemplate) -> Result<SignedEvent, ExtensionError>;
}

/// Ask `extension` for its public key, giving up after `timeout`.
///
/// The timer is dropped as soon as the extension answers. On timeout the
/// extension future is dropped too; there is no way to cancel the request on
/// the extension's side, so its eventual answer is simply never observed.
///
/// The answer must be a 64-char hex public key; it is returned lowercased.
pub async fn request_public_key(
    extension: &dyn SigningExtension,
    timeout: Duration,
) -> Result<String, ExtensionError> {
    let pubkey = match tokio::time::timeout(timeout, extension.get_public_key()).await {
        Ok(result) => result?,
        Err(_) => return Err(ExtensionError::Timeout(timeout)),
    };
    validate_public_key(&pubkey)
}

fn validate_public_key(pubkey: &str) -> Result<String, ExtensionError> {
    let trimmed = pubkey.trim();
    if trimmed.is_empty() {
        return Err(ExtensionError::Empty("public key"));
    }
    if trimmed.len() != 64 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ExtensionError::InvalidPublicKey(format!("{:?}", pubkey)));
    }

    PublicKey::from_hex(&trimmed.to_ascii_lowercase())
        .map(|key| key.to_hex())
        .map_err(|e| ExtensionError::InvalidPublicKey(e.to_string()))
}

/// Sequence number identifying one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempt(u64);

impl Attempt {
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

/// Hands out [`Attempt`]s. Only the most recent one is current; responses
/// tagged with an older attempt must be discarded.
#[derive(Debug, Default)]
pub struct AttemptCounter {
    latest: AtomicU64,
}

impl AttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new attempt, superseding every earlier one.
    pub fn next(&self) -> Attempt {
        Attempt(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recent attempt.
    pub fn current(&self) -> Attempt {
        Attempt(self.latest.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, attempt: Attempt) -> bool {
        self.current() == attempt
    }
}

/// Local nostr keys acting as a signing extension.
///
/// Used by the CLI, where no browser extension exists, and in tests.
#[derive(Debug, Clone)]
pub struct KeysExtension {
    keys: Keys,
}

impl KeysExtension {
    pub fn new(keys: Keys) -> Self {
        Self { keys }
    }

    /// Parse an nsec or hex secret key.
    pub fn parse(secret: &str) -> crate::Result<Self> {
        let keys = Keys::parse(secret).map_err(|e| crate::Error::InvalidKey(e.to_string()))?;
        Ok(Self::new(keys))
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }
}

#[async_trait]
impl SigningExtension for KeysExtension {
    async fn get_public_key(&self) -> Result<String, ExtensionError> {
        Ok(self.keys.public_key().to_hex())
    }

    async fn sign_event(&self, template: EventTemplate) -> Result<SignedEvent, ExtensionError> {
        let tags: Vec<Tag> = serde_json::from_value(serde_json::json!(template.tags))
            .map_err(|e| ExtensionError::Failed(format!("invalid tags: {}", e)))?;

        let event = EventBuilder::new(Kind::from(template.kind), template.content)
            .tags(tags)
            .custom_created_at(Timestamp::from(template.created_at))
            .sign_with_keys(&self.keys)
            .map_err(|e| ExtensionError::Failed(e.to_string()))?;

        let value =
            serde_json::to_value(&event).map_err(|e| ExtensionError::Failed(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| ExtensionError::Failed(e.to_string()))
    }
}
