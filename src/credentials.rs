use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::warn;

use crate::storage::Store;

pub const DEFAULT_SLOT: &str = "token";

/// Opaque bearer token proving an authenticated session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Returns `None` for blank tokens; an empty slot means "unauthenticated".
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Holds at most one active credential for the process.
///
/// Read failures surface as an absent credential; callers then take the
/// unauthenticated path instead of failing outright.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<Credential>;
    fn set(&self, credential: Credential) -> Result<()>;
    /// Idempotent: clearing an empty store succeeds.
    fn clear(&self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCredentials {
    slot: Mutex<Option<Credential>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentials {
    fn get(&self) -> Option<Credential> {
        self.slot.lock().clone()
    }

    fn set(&self, credential: Credential) -> Result<()> {
        *self.slot.lock() = Some(credential);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.slot.lock().take();
        Ok(())
    }
}

/// Credential kept in a named slot of the state database so it survives
/// restarts.
#[derive(Debug, Clone)]
pub struct DurableCredentials {
    store: Arc<Store>,
    slot: String,
}

impl DurableCredentials {
    pub fn new(store: Arc<Store>, slot: impl Into<String>) -> Self {
        let slot = slot.into();
        let slot = if slot.trim().is_empty() {
            DEFAULT_SLOT.to_string()
        } else {
            slot
        };
        Self { store, slot }
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }
}

impl CredentialStore for DurableCredentials {
    fn get(&self) -> Option<Credential> {
        match self.store.get_credential(&self.slot) {
            Ok(token) => token.and_then(Credential::new),
            Err(err) => {
                warn!(slot = %self.slot, error = %err, "credentials: read failed");
                None
            }
        }
    }

    fn set(&self, credential: Credential) -> Result<()> {
        self.store.put_credential(&self.slot, credential.as_str())
    }

    fn clear(&self) -> Result<()> {
        self.store.delete_credential(&self.slot)
    }
}
