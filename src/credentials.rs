//! Persisted security state and the store it lives in.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{KdfParams, SALT_LEN};
use crate::envelope::{Envelope, b64};
use crate::error::{VaultError, VaultResult};

/// Current security state format version.
pub const SECURITY_STATE_VERSION: u8 = 1;

/// Everything needed to test a password and recover the master key.
///
/// Written and replaced as a single document so paired blobs (escrow and
/// viewable recovery code) can never be observed half-updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityState {
    pub version: u8,
    pub kdf: KdfParams,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    pub verifier: Envelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panic_verifier: Option<Envelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_escrow: Option<Envelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_code: Option<Envelope>,
    pub created_at: DateTime<Utc>,
}

impl SecurityState {
    pub fn validate(&self) -> VaultResult<()> {
        if self.version != SECURITY_STATE_VERSION {
            return Err(VaultError::MissingSecurityState);
        }
        if self.salt.len() != SALT_LEN {
            return Err(VaultError::MissingSecurityState);
        }
        if !self.verifier.encrypted {
            return Err(VaultError::MissingSecurityState);
        }
        self.kdf.validate()
    }
}

/// Storage seam for [`SecurityState`].
///
/// `save` must replace the previous state atomically.
pub trait CredentialStore: Send {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn load(&self) -> Result<Option<SecurityState>>;

    fn save(&mut self, state: &SecurityState) -> Result<()>;

    fn clear(&mut self) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

/// Keeps the security state in memory only.
#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialStore {
    state: Option<SecurityState>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<SecurityState>> {
        Ok(self.state.clone())
    }

    fn save(&mut self, state: &SecurityState) -> Result<()> {
        self.state = Some(state.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.state = None;
        Ok(())
    }
}
