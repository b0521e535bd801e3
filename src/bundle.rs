//! Full-state backup document.
//!
//! A bundle carries everything persisted by a vault: the security state and
//! every record envelope. Nothing in it is plaintext except the salt and KDF
//! parameters.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credentials::{SECURITY_STATE_VERSION, SecurityState};
use crate::crypto::{KdfParams, SALT_LEN};
use crate::envelope::{Envelope, b64};
use crate::error::{VaultError, VaultResult};

pub const BUNDLE_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedRecord {
    pub id: String,
    pub envelope: Envelope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultBundle {
    #[serde(default = "default_version")]
    pub version: u8,
    #[serde(default)]
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
    pub encrypted_records: Vec<EncryptedRecord>,
    #[serde(default = "Utc::now")]
    pub exported_at: DateTime<Utc>,
}

fn default_version() -> u8 {
    BUNDLE_VERSION
}

impl VaultBundle {
    pub(crate) fn from_state(state: &SecurityState, encrypted_records: Vec<EncryptedRecord>) -> Self {
        Self {
            version: BUNDLE_VERSION,
            kdf: state.kdf,
            salt: state.salt.clone(),
            verifier: state.verifier.clone(),
            panic_verifier: state.panic_verifier.clone(),
            recovery_escrow: state.recovery_escrow.clone(),
            recovery_code: state.recovery_code.clone(),
            encrypted_records,
            exported_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> VaultResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a bundle; missing required fields are reported as
    /// [`VaultError::InvalidBundle`].
    pub fn from_json(json: &str) -> VaultResult<Self> {
        let bundle: VaultBundle =
            serde_json::from_str(json).map_err(|e| VaultError::InvalidBundle(e.to_string()))?;
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn validate(&self) -> VaultResult<()> {
        let invalid = |msg: String| Err(VaultError::InvalidBundle(msg));

        if self.version != BUNDLE_VERSION {
            return invalid(format!("unsupported bundle version {}", self.version));
        }
        if self.salt.len() != SALT_LEN {
            return invalid(format!("salt must be {SALT_LEN} bytes"));
        }
        self.kdf
            .validate()
            .map_err(|e| VaultError::InvalidBundle(e.to_string()))?;
        if !self.verifier.encrypted {
            return invalid("verifier is not an envelope".into());
        }
        let optional = [&self.panic_verifier, &self.recovery_escrow, &self.recovery_code];
        if optional.iter().any(|blob| matches!(blob, Some(e) if !e.encrypted)) {
            return invalid("security blob is not an envelope".into());
        }

        let mut seen = HashSet::new();
        for record in &self.encrypted_records {
            if record.id.is_empty() {
                return invalid("record without id".into());
            }
            if !record.envelope.encrypted {
                return invalid(format!("record '{}' is not encrypted", record.id));
            }
            if !seen.insert(record.id.as_str()) {
                return invalid(format!("duplicate record id '{}'", record.id));
            }
        }
        Ok(())
    }

    pub(crate) fn security_state(&self) -> SecurityState {
        SecurityState {
            version: SECURITY_STATE_VERSION,
            kdf: self.kdf,
            salt: self.salt.clone(),
            verifier: self.verifier.clone(),
            panic_verifier: self.panic_verifier.clone(),
            recovery_escrow: self.recovery_escrow.clone(),
            recovery_code: self.recovery_code.clone(),
            created_at: self.exported_at,
        }
    }
}
