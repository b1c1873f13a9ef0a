//! Nostr identity and session bootstrap for the Admarket client
//!
//! This crate provides the client-side login flow for Admarket, including:
//! - Signing-extension access with a bounded public-key request
//! - Synthetic test-mode identities and their storage
//! - Form error state for the login and account forms
//! - Session markers, the login controller, and forced logout
//!
//! Browser globals (the extension object, local/session storage, cookies,
//! `window.location`) are injected as traits so the flow runs anywhere.
//!
//! # Example
//!
//! ```rust,ignore
//! use admarket_auth::{ClientStorage, KeyUtility, LoginController};
//!
//! let keys = KeyUtility::new(extension, ClientStorage::in_memory());
//! let controller = LoginController::new(config, keys, backend, onboarding, navigator);
//! controller.mount("https://admarket.example/login").await;
//! controller.login_with_extension().await;
//! ```

pub mod config;
pub mod extension;
pub mod forms;
pub mod identity;
pub mod keys;
pub mod session;
pub mod storage;

pub use config::AuthConfig;
pub use extension::{EventTemplate, ExtensionError, KeysExtension, SignedEvent, SigningExtension};
pub use forms::{ErrorInput, FieldValidationError, FormErrorState};
pub use identity::{Identity, IdentityOrigin, TestKeyPair};
pub use keys::KeyUtility;
pub use session::backend::{BackendError, HttpSessionBackend, SessionBackend};
pub use session::controller::{
    FixedDestination, LoggingNavigator, LoginController, LoginFailure, LoginOutcome, MountOutcome,
    Navigator, OnboardingStatus, SessionStatus,
};
pub use session::markers::{ClientSessionStore, MarkerState, SessionMarkers, SessionStore};
pub use session::reset::{is_post_forced_logout, reset_all, ResetReport};
pub use storage::{ClientStorage, CookieJar, KeyValueStore, StorageError};

// Re-export common nostr types for convenience
pub use nostr::{FromBech32, PublicKey, ToBech32};

/// Error types for the auth crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Signing extension error: {0}")]
    Extension(#[from] ExtensionError),

    #[error("No identity available: {0}")]
    NoIdentity(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for auth operations
pub type Result<T> = std::result::Result<T, Error>;

/// Seconds since the UNIX epoch.
pub(crate) fn unix_time_secs() -> u64 {
    unix_time_millis() / 1000
}

/// Milliseconds since the UNIX epoch.
pub(crate) fn unix_time_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
