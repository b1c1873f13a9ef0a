//! User identities
//!
//! An identity is either backed by a signing extension (public key only) or
//! synthetic, generated locally for test-mode accounts.

use nostr::prelude::*;

/// Prefix marking a synthetic test public key.
pub const TEST_PUBLIC_KEY_PREFIX: &str = "pk_test_";

/// Prefix marking a synthetic test private key.
pub const TEST_SECRET_KEY_PREFIX: &str = "sk_test_";

/// Where an identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityOrigin {
    /// Public key reported by a signing extension.
    Extension,
    /// Synthetic key pair generated for test mode.
    Test,
}

/// The user a session is established for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    public_key: String,
    /// Only ever present for test identities
    private_key: Option<String>,
    origin: IdentityOrigin,
}

impl Identity {
    /// Identity whose key lives in a signing extension.
    pub fn from_extension(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: None,
            origin: IdentityOrigin::Extension,
        }
    }

    /// Identity for a synthetic test key pair.
    pub fn from_test_keys(public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: Some(private_key.into()),
            origin: IdentityOrigin::Test,
        }
    }

    /// Test identity whose private half is not available (a restored session
    /// whose stored keys were cleared).
    pub fn from_test_public_key(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: None,
            origin: IdentityOrigin::Test,
        }
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn private_key(&self) -> Option<&str> {
        self.private_key.as_deref()
    }

    pub fn origin(&self) -> IdentityOrigin {
        self.origin
    }

    pub fn is_test(&self) -> bool {
        self.origin == IdentityOrigin::Test
    }

    /// Short display form (first 12 chars of the key + ...)
    pub fn short_key(&self) -> String {
        let prefix: String = self.public_key.chars().take(12).collect();
        format!("{}...", prefix)
    }
}

impl From<&TestKeyPair> for Identity {
    fn from(pair: &TestKeyPair) -> Self {
        Identity::from_test_keys(pair.public_key.clone(), pair.private_key.clone())
    }
}

/// A synthetic key pair for test-mode accounts.
///
/// The key material comes from a real secp256k1 key drawn from the OS RNG,
/// even though test identities never sign anything that matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestKeyPair {
    /// `pk_test_` + 64 hex chars
    pub public_key: String,
    /// `sk_test_` + 64 hex chars
    pub private_key: String,
    pub npub: String,
    pub nsec: String,
}

impl TestKeyPair {
    /// Generate a fresh pair.
    pub fn generate() -> Self {
        Self::from_keys(&Keys::generate())
    }

    fn from_keys(keys: &Keys) -> Self {
        let public_key = keys.public_key();
        let secret_key = keys.secret_key();

        let npub = public_key
            .to_bech32()
            .unwrap_or_else(|_| format!("npub_{}", public_key.to_hex()));
        let nsec = secret_key
            .to_bech32()
            .unwrap_or_else(|_| format!("nsec_{}", secret_key.to_secret_hex()));

        Self {
            public_key: format!("{}{}", TEST_PUBLIC_KEY_PREFIX, public_key.to_hex()),
            private_key: format!("{}{}", TEST_SECRET_KEY_PREFIX, secret_key.to_secret_hex()),
            npub,
            nsec,
        }
    }
}

/// Whether `public_key` is a synthetic test key.
pub fn is_test_public_key(public_key: &str) -> bool {
    public_key.starts_with(TEST_PUBLIC_KEY_PREFIX)
}
