//! Attempt-scoped challenge storage
//!
//! Two named slots hold the `state` nonce and the PKCE `code_verifier` for
//! the single outstanding sign-on attempt. Starting a new attempt overwrites
//! both slots, silently invalidating whatever was pending; a successful
//! exchange clears them so the record is single-use. Callers never touch the
//! raw key-value storage — `ChallengeStore` is the only writer, which is
//! what makes the one-outstanding-attempt invariant enforceable.
//!
//! `KeyValueStore` is the seam for the host environment: `MemoryStore` for
//! in-process embedding and tests, `FileStore` for storage that survives the
//! full-page redirect leg of the flow.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use common::Secret;
use tracing::debug;

use sso_auth::pkce::{self, HashFunction, SecureRandomSource, Sha256Digest, SystemRandom};

use crate::error::{FlowError, Result};

/// Slot holding the CSRF state nonce.
pub const STATE_SLOT: &str = "sso_state";
/// Slot holding the PKCE code verifier.
pub const VERIFIER_SLOT: &str = "sso_verifier";

/// Minimal keyed string storage, scoped to one browsing context.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory storage. Does not survive a process restart, which rules out
/// the redirect variant — use `FileStore` for that.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

/// File-backed storage: a small JSON map written atomically (temp file +
/// rename) with 0600 permissions, since one slot holds the code verifier.
/// This is the durable analog of the browser's local storage and lets an
/// attempt survive the redirect to the identity provider and back.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the slot file, creating it as an empty map if absent.
    pub fn open(path: PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| FlowError::Storage(format!("reading slot file: {e}")))?;
            serde_json::from_str(&contents)
                .map_err(|e| FlowError::Storage(format!("parsing slot file: {e}")))?
        } else {
            let entries = HashMap::new();
            write_atomic(&path, &entries)?;
            entries
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries();
        entries.insert(key.to_owned(), value.to_owned());
        write_atomic(&self.path, &entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries();
        if entries.remove(key).is_some() {
            write_atomic(&self.path, &entries)?;
        }
        Ok(())
    }
}

/// Write the slot map atomically so a crash mid-write cannot corrupt it.
fn write_atomic(path: &Path, entries: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(entries)
        .map_err(|e| FlowError::Storage(format!("serializing slots: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| FlowError::Storage("slot path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".slots.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| FlowError::Storage(format!("writing temp slot file: {e}")))?;

    // 0600: the verifier slot is a secret (unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| FlowError::Storage(format!("setting slot file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| FlowError::Storage(format!("renaming temp slot file: {e}")))?;

    debug!(path = %path.display(), "persisted challenge slots");
    Ok(())
}

/// Generates and stores the per-attempt `state` and `code_verifier`, and
/// derives the `code_challenge` sent to the identity provider.
///
/// The challenge is always recomputed from the stored verifier, never stored
/// itself; the verifier is the single source of truth.
pub struct ChallengeStore {
    slots: Arc<dyn KeyValueStore>,
    random: Arc<dyn SecureRandomSource>,
    hasher: Arc<dyn HashFunction>,
}

impl ChallengeStore {
    /// Store using the production CSPRNG and SHA-256.
    pub fn new(slots: Arc<dyn KeyValueStore>) -> Self {
        Self::with_capabilities(slots, Arc::new(SystemRandom), Arc::new(Sha256Digest))
    }

    /// Store with injected randomness/hashing, for hosts and tests.
    pub fn with_capabilities(
        slots: Arc<dyn KeyValueStore>,
        random: Arc<dyn SecureRandomSource>,
        hasher: Arc<dyn HashFunction>,
    ) -> Self {
        Self {
            slots,
            random,
            hasher,
        }
    }

    /// Generate and persist a fresh state nonce, replacing any previous one.
    pub fn new_state(&self) -> Result<String> {
        let state = pkce::random_token(self.random.as_ref());
        self.slots.set(STATE_SLOT, &state)?;
        Ok(state)
    }

    /// The state of the outstanding attempt, if any.
    pub fn saved_state(&self) -> Result<Option<String>> {
        self.slots.get(STATE_SLOT)
    }

    /// Generate and persist a fresh verifier, returning its derived
    /// challenge. The verifier itself never leaves the store here.
    pub fn new_challenge(&self) -> Result<String> {
        let verifier = pkce::random_token(self.random.as_ref());
        self.slots.set(VERIFIER_SLOT, &verifier)?;
        Ok(pkce::compute_challenge(self.hasher.as_ref(), &verifier))
    }

    /// The verifier of the outstanding attempt, if any.
    pub fn saved_verifier(&self) -> Result<Option<Secret<String>>> {
        Ok(self.slots.get(VERIFIER_SLOT)?.map(Secret::new))
    }

    /// Erase both slots. Called after a successful exchange (single-use) or
    /// when resetting after failure.
    pub fn clear(&self) -> Result<()> {
        self.slots.remove(STATE_SLOT)?;
        self.slots.remove(VERIFIER_SLOT)?;
        debug!("cleared challenge slots");
        Ok(())
    }
}
