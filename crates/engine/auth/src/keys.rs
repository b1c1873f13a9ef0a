//! Key and identity utility
//!
//! Generates synthetic key material for test accounts, persists it in client
//! storage, and fronts the signing extension.
//!
//! Everything that depends on the extension or on storage degrades to `None`
//! or a no-op instead of failing. The exceptions are [`KeyUtility::sign_event`]
//! and [`KeyUtility::get_user_public_key`], which error so callers needing a
//! hard guarantee can tell "no identity" apart from "carried on anyway".

use crate::extension::{self, EventTemplate, ExtensionError, SignedEvent, SigningExtension};
use crate::identity::{Identity, TestKeyPair};
use crate::storage::{keys, ClientStorage, KeyValueStore};
use crate::{Error, Result};
use nostr::Keys;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Prefix marking a synthetic (test-mode) signature.
pub const TEST_SIGNATURE_PREFIX: &str = "sig_test_";

/// Generate a 64-char lowercase hex private key from the OS RNG.
pub fn generate_private_key() -> String {
    Keys::generate().secret_key().to_secret_hex()
}

/// Identity operations over an optional extension and client storage.
#[derive(Clone)]
pub struct KeyUtility {
    extension: Option<Arc<dyn SigningExtension>>,
    storage: ClientStorage,
    timeout: Duration,
}

impl fmt::Debug for KeyUtility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyUtility")
            .field("extension", &self.extension.is_some())
            .field("storage", &self.storage)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl KeyUtility {
    pub fn new(extension: Option<Arc<dyn SigningExtension>>, storage: ClientStorage) -> Self {
        Self {
            extension,
            storage,
            timeout: extension::DEFAULT_TIMEOUT,
        }
    }

    /// Override the extension timeout (clamped to the accepted window).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = extension::clamp_timeout(timeout);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn storage(&self) -> &ClientStorage {
        &self.storage
    }

    /// Whether a signing extension is installed.
    pub fn has_extension(&self) -> bool {
        self.extension.is_some()
    }

    /// The extension's public key, or `None` when there is no extension or it
    /// times out or refuses.
    pub async fn get_public_key(&self) -> Option<String> {
        match self.request_public_key().await {
            Ok(pubkey) => Some(pubkey),
            Err(ExtensionError::Absent) => None,
            Err(err) => {
                warn!("Failed to get public key from extension: {}", err);
                None
            }
        }
    }

    /// Like [`get_public_key`](Self::get_public_key) but keeps the failure.
    pub async fn request_public_key(&self) -> std::result::Result<String, ExtensionError> {
        let extension = self.extension.as_deref().ok_or(ExtensionError::Absent)?;
        extension::request_public_key(extension, self.timeout).await
    }

    /// Generate a fresh test key pair, persisting it when local storage exists.
    pub fn generate_test_key_pair(&self) -> TestKeyPair {
        let pair = TestKeyPair::generate();
        self.store_test_keys(&pair.private_key, &pair.public_key);
        pair
    }

    pub fn store_test_keys(&self, private_key: &str, public_key: &str) {
        let Some(local) = self.storage.local() else {
            debug!("No local storage, test keys not persisted");
            return;
        };

        let result = local
            .set(keys::TEST_SECRET_KEY, private_key)
            .and_then(|_| local.set(keys::TEST_PUBLIC_KEY, public_key));
        if let Err(err) = result {
            warn!("Failed to store test keys: {}", err);
        }
    }

    /// The stored test identity, if both halves are present.
    pub fn get_stored_test_keys(&self) -> Option<Identity> {
        let local = self.storage.local()?;
        match read_pair(local) {
            Ok(pair) => pair,
            Err(err) => {
                warn!("Failed to read test keys: {}", err);
                None
            }
        }
    }

    pub fn clear_stored_test_keys(&self) {
        let Some(local) = self.storage.local() else {
            return;
        };

        for key in [keys::TEST_SECRET_KEY, keys::TEST_PUBLIC_KEY] {
            if let Err(err) = local.remove(key) {
                warn!("Failed to remove {}: {}", key, err);
            }
        }
    }

    /// Whether the test-mode flag is set. Unreadable storage counts as unset.
    pub fn is_test_mode(&self) -> bool {
        self.storage
            .local()
            .and_then(|local| local.get(keys::TEST_MODE).ok().flatten())
            .is_some_and(|v| v == "true")
    }

    /// Sign `template`. Test mode attaches a synthetic signature; otherwise
    /// the extension signs.
    pub async fn sign_event(&self, template: EventTemplate) -> Result<SignedEvent> {
        if self.is_test_mode() {
            let identity = self
                .get_stored_test_keys()
                .ok_or(Error::NoIdentity("test mode is set but no test keys are stored"))?;
            return sign_synthetic(&identity, template);
        }

        let extension = self.extension.as_deref().ok_or(ExtensionError::Absent)?;
        let signed = extension.sign_event(template).await?;
        if signed.sig.trim().is_empty() {
            return Err(ExtensionError::Empty("signature").into());
        }
        Ok(signed)
    }

    /// The current user's public key, failing on any unmet precondition.
    pub async fn get_user_public_key(&self) -> Result<String> {
        let local = self.storage.local();
        let test_mode = match local {
            Some(local) => local.get(keys::TEST_MODE)?.is_some_and(|v| v == "true"),
            None => false,
        };

        if test_mode {
            let local = local.ok_or(Error::NoIdentity("no local storage"))?;
            return local
                .get(keys::TEST_PUBLIC_KEY)?
                .ok_or(Error::NoIdentity("test mode is set but no test key is stored"));
        }

        Ok(self.request_public_key().await?)
    }
}

fn read_pair(local: &dyn KeyValueStore) -> crate::storage::StorageResult<Option<Identity>> {
    let private_key = local.get(keys::TEST_SECRET_KEY)?;
    let public_key = local.get(keys::TEST_PUBLIC_KEY)?;
    Ok(match (public_key, private_key) {
        (Some(public_key), Some(private_key)) => {
            Some(Identity::from_test_keys(public_key, private_key))
        }
        _ => None,
    })
}

/// NIP-01 event id: sha256 over `[0, pubkey, created_at, kind, tags, content]`.
pub fn compute_event_id(pubkey: &str, template: &EventTemplate) -> String {
    let canonical = serde_json::json!([
        0,
        pubkey,
        template.created_at,
        template.kind,
        template.tags,
        template.content
    ]);
    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

fn sign_synthetic(identity: &Identity, template: EventTemplate) -> Result<SignedEvent> {
    let private_key = identity
        .private_key()
        .ok_or(Error::NoIdentity("test identity has no private key"))?;
    let id = compute_event_id(identity.public_key(), &template);

    let mut hasher = Sha256::new();
    hasher.update(private_key.as_bytes());
    hasher.update(id.as_bytes());
    let sig = format!("{}{}", TEST_SIGNATURE_PREFIX, hex::encode(hasher.finalize()));

    Ok(SignedEvent {
        id,
        pubkey: identity.public_key().to_string(),
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags,
        content: template.content,
        sig,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::KeysExtension;
    use crate::identity::{TEST_PUBLIC_KEY_PREFIX, TEST_SECRET_KEY_PREFIX};
    use crate::storage::{MemoryStore, StorageError, StorageResult};

    /// Local storage that fails every operation.
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> StorageResult<Option<String>> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
        fn remove(&self, _key: &str) -> StorageResult<()> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
        fn clear(&self) -> StorageResult<()> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
    }

    fn with_broken_local() -> KeyUtility {
        let storage = ClientStorage {
            local: Some(Arc::new(BrokenStore)),
            ..ClientStorage::unavailable()
        };
        KeyUtility::new(None, storage)
    }

    #[test]
    fn test_generate_private_key_is_lower_hex() {
        let key = generate_private_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(key, generate_private_key());
    }

    #[test]
    fn test_generate_test_key_pair_persists() {
        let utility = KeyUtility::new(None, ClientStorage::in_memory());
        let pair = utility.generate_test_key_pair();

        let stored = utility.get_stored_test_keys().unwrap();
        assert_eq!(stored.public_key(), pair.public_key);
        assert_eq!(stored.private_key(), Some(pair.private_key.as_str()));
    }

    #[test]
    fn test_generate_test_key_pair_twice() {
        let utility = KeyUtility::new(None, ClientStorage::in_memory());
        let first = utility.generate_test_key_pair();
        let second = utility.generate_test_key_pair();

        assert_ne!(first.public_key, second.public_key);
        for pair in [&first, &second] {
            assert!(pair.public_key.starts_with(TEST_PUBLIC_KEY_PREFIX));
            assert!(pair.private_key.starts_with(TEST_SECRET_KEY_PREFIX));
        }

        // Latest pair wins
        let stored = utility.get_stored_test_keys().unwrap();
        assert_eq!(stored.public_key(), second.public_key);
    }

    #[test]
    fn test_storage_unavailable_is_noop() {
        let utility = KeyUtility::new(None, ClientStorage::unavailable());

        let pair = utility.generate_test_key_pair();
        assert!(pair.public_key.starts_with(TEST_PUBLIC_KEY_PREFIX));

        utility.store_test_keys("sk_test_x", "pk_test_x");
        assert!(utility.get_stored_test_keys().is_none());
        utility.clear_stored_test_keys();
        assert!(utility.get_stored_test_keys().is_none());
    }

    #[test]
    fn test_broken_storage_is_noop() {
        let utility = with_broken_local();

        utility.store_test_keys("sk_test_x", "pk_test_x");
        assert!(utility.get_stored_test_keys().is_none());
        utility.clear_stored_test_keys();
        assert!(!utility.is_test_mode());
    }

    #[test]
    fn test_clear_stored_test_keys() {
        let utility = KeyUtility::new(None, ClientStorage::in_memory());
        utility.generate_test_key_pair();
        assert!(utility.get_stored_test_keys().is_some());

        utility.clear_stored_test_keys();
        assert!(utility.get_stored_test_keys().is_none());
    }

    #[test]
    fn test_half_stored_pair_is_nothing() {
        let local = Arc::new(MemoryStore::new());
        local.set(keys::TEST_PUBLIC_KEY, "pk_test_only").unwrap();
        let storage = ClientStorage {
            local: Some(local),
            ..ClientStorage::unavailable()
        };

        let utility = KeyUtility::new(None, storage);
        assert!(utility.get_stored_test_keys().is_none());
    }

    #[tokio::test]
    async fn test_get_public_key_without_extension_is_immediate() {
        let utility = KeyUtility::new(None, ClientStorage::in_memory());
        assert!(!utility.has_extension());

        let started = std::time::Instant::now();
        assert!(utility.get_public_key().await.is_none());
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_get_public_key_with_extension() {
        let keys = Keys::generate();
        let extension: Arc<dyn SigningExtension> = Arc::new(KeysExtension::new(keys.clone()));
        let utility = KeyUtility::new(Some(extension), ClientStorage::in_memory());

        assert!(utility.has_extension());
        assert_eq!(utility.get_public_key().await, Some(keys.public_key().to_hex()));
    }

    #[tokio::test]
    async fn test_sign_event_in_test_mode() {
        let utility = KeyUtility::new(None, ClientStorage::in_memory());
        let pair = utility.generate_test_key_pair();
        utility.storage().local().unwrap().set(keys::TEST_MODE, "true").unwrap();

        let template = EventTemplate::new(1, "campaign created");
        let signed = utility.sign_event(template.clone()).await.unwrap();

        assert_eq!(signed.pubkey, pair.public_key);
        assert!(signed.sig.starts_with(TEST_SIGNATURE_PREFIX));
        assert_eq!(signed.id, compute_event_id(&pair.public_key, &template));
    }

    #[tokio::test]
    async fn test_sign_event_without_extension_fails() {
        let utility = KeyUtility::new(None, ClientStorage::in_memory());
        let result = utility.sign_event(EventTemplate::new(1, "x")).await;
        assert!(matches!(result, Err(Error::Extension(ExtensionError::Absent))));
    }

    #[tokio::test]
    async fn test_sign_event_with_extension() {
        let keys = Keys::generate();
        let extension: Arc<dyn SigningExtension> = Arc::new(KeysExtension::new(keys.clone()));
        let utility = KeyUtility::new(Some(extension), ClientStorage::in_memory());

        let signed = utility.sign_event(EventTemplate::new(1, "x")).await.unwrap();
        assert_eq!(signed.pubkey, keys.public_key().to_hex());
        assert!(!signed.sig.starts_with(TEST_SIGNATURE_PREFIX));
    }

    #[tokio::test]
    async fn test_get_user_public_key_strict() {
        let utility = KeyUtility::new(None, ClientStorage::in_memory());
        assert!(matches!(
            utility.get_user_public_key().await,
            Err(Error::Extension(ExtensionError::Absent))
        ));

        let pair = utility.generate_test_key_pair();
        utility.storage().local().unwrap().set(keys::TEST_MODE, "true").unwrap();
        assert_eq!(utility.get_user_public_key().await.unwrap(), pair.public_key);
    }

    #[tokio::test]
    async fn test_get_user_public_key_blocks_on_broken_storage() {
        let utility = with_broken_local();
        assert!(matches!(
            utility.get_user_public_key().await,
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn test_event_id_matches_nip01() {
        let template = EventTemplate {
            kind: 1,
            created_at: 1_700_000_000,
            tags: vec![],
            content: "hi".to_string(),
        };
        let id = compute_event_id("ab", &template);

        let expected = hex::encode(Sha256::digest(br#"[0,"ab",1700000000,1,[],"hi"]"#));
        assert_eq!(id, expected);
    }
}
