use thiserror::Error;

/// Message shared by every authentication-path failure.
///
/// Wrong passwords and tampered ciphertext must look the same to a caller.
pub const AUTH_FAILURE_MESSAGE: &str = "invalid password or corrupted data";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid password or corrupted data")]
    AuthenticationFailure,
    #[error("invalid password or corrupted data")]
    DecryptionIntegrityFailure,
    #[error("invalid recovery code")]
    InvalidRecoveryCode,
    #[error("vault security state is missing; run setup or reset the vault")]
    MissingSecurityState,
    #[error("failed to migrate record '{id}': {reason}")]
    Migration { id: String, reason: String },
    #[error("vault is locked")]
    Locked,
    #[error("vault stores are not open")]
    NotOpen,
    #[error("vault already initialized")]
    AlreadyInitialized,
    #[error("password cannot be empty")]
    EmptyPassword,
    #[error("password is too weak")]
    WeakPassword,
    #[error("panic password cannot be the same as the master password")]
    PanicPasswordReused,
    #[error("invalid vault bundle: {0}")]
    InvalidBundle(String),
    #[error("record '{0}' not found")]
    RecordNotFound(String),
    #[error("invalid key derivation parameters: {0}")]
    InvalidKdfParams(String),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("encryption failed")]
    Encryption,
    #[error("OS random generator unavailable")]
    RandomUnavailable,
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl VaultError {
    /// True for the failures that must be reported to the user as one generic
    /// "wrong password" outcome.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            VaultError::AuthenticationFailure | VaultError::DecryptionIntegrityFailure
        )
    }
}

pub type VaultResult<T> = Result<T, VaultError>;
