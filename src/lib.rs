//! Encrypted personal record vault.
//!
//! A [`Vault`] keeps records as authenticated envelopes under a key derived
//! from the master password. It also supports a panic password that opens an
//! empty decoy session, a recovery code that escrows the master key, idle
//! auto-lock, in-place encryption of legacy plaintext records and full-state
//! export/import bundles.

pub mod auth;
pub mod autolock;
pub mod bundle;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod envelope;
mod error;
pub mod migration;
pub mod records;
pub mod recovery;
pub mod storage;
mod vault;

pub use crate::autolock::{Clock, ManualClock, SystemClock};
pub use crate::bundle::{EncryptedRecord, VaultBundle};
pub use crate::config::VaultConfig;
pub use crate::credentials::{CredentialStore, MemoryCredentialStore, SecurityState};
pub use crate::crypto::{CryptoProvider, KdfParams, SecretKey, SystemCrypto};
pub use crate::envelope::{Envelope, EnvelopeCipher};
pub use crate::error::{AUTH_FAILURE_MESSAGE, VaultError, VaultResult};
pub use crate::records::{MemoryRecordStore, Record, RecordStore};
pub use crate::storage::{FileCredentialStore, FileRecordStore};
pub use crate::vault::{Vault, VaultState};
