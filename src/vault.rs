//! The vault state machine.
//!
//! `Vault` owns the stores, the session key and the idle timer. The session
//! key is created and destroyed only by the transition methods here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use zeroize::Zeroizing;

use crate::auth;
use crate::autolock::{Clock, IdleAutoLocker, SystemClock};
use crate::bundle::{EncryptedRecord, VaultBundle};
use crate::config::VaultConfig;
use crate::credentials::{
    CredentialStore, MemoryCredentialStore, SECURITY_STATE_VERSION, SecurityState,
};
use crate::crypto::{CryptoProvider, SecretKey, SystemCrypto};
use crate::envelope::{Envelope, EnvelopeCipher};
use crate::error::{VaultError, VaultResult};
use crate::migration;
use crate::records::{MemoryRecordStore, Record, RecordStore};
use crate::recovery;
use crate::storage::{FileCredentialStore, FileRecordStore};

/// Payload sealed inside every verifier.
const VERIFIER_STATUS: &str = "OK";

fn verifier_payload() -> Value {
    json!({ "status": VERIFIER_STATUS })
}

/// Where a [`Vault`] is in its lifecycle.
///
/// Hosts route on this: `AwaitingSetup` shows account creation,
/// `AwaitingUnlock` and `Locked` show the password prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    /// Stores not opened yet.
    Uninitialized,
    /// Opened, no security state persisted.
    AwaitingSetup,
    /// Opened with a security state, no session yet.
    AwaitingUnlock,
    Unlocked,
    /// Unlocked with the panic password: decoy key, empty record list.
    PanicUnlocked,
    Locked,
}

/// Memory-only session. Dropping it wipes the key.
struct VaultSession {
    key: SecretKey,
    panic_mode: bool,
    cache: BTreeMap<String, Record>,
}

enum UnlockOutcome {
    Master(SecretKey),
    Panic,
    Rejected,
}

/// A password-protected record vault over a credential store and a record
/// store.
///
/// Call [`Vault::open`] first, then [`Vault::setup`] for a new vault or
/// [`Vault::unlock`] / [`Vault::recover`] for an existing one. Record access
/// requires an unlocked session and fails with [`VaultError::Locked`]
/// otherwise, including after the idle timeout has passed.
pub struct Vault<C: CredentialStore, R: RecordStore> {
    config: VaultConfig,
    cipher: EnvelopeCipher,
    credential_store: C,
    record_store: R,
    security: Option<SecurityState>,
    state: VaultState,
    session: Option<VaultSession>,
    autolock: IdleAutoLocker,
}

impl Vault<MemoryCredentialStore, MemoryRecordStore> {
    /// A vault that keeps everything in memory.
    pub fn in_memory(config: VaultConfig) -> Self {
        Self::new(
            config,
            Arc::new(SystemCrypto),
            MemoryCredentialStore::new(),
            MemoryRecordStore::new(),
        )
    }
}

impl Vault<FileCredentialStore, FileRecordStore> {
    /// A vault persisted under the configured (or platform default) data dir.
    pub fn with_files(config: VaultConfig) -> VaultResult<Self> {
        let dir = config.resolve_data_dir()?;
        Ok(Self::new(
            config,
            Arc::new(SystemCrypto),
            FileCredentialStore::new(&dir),
            FileRecordStore::new(&dir),
        ))
    }
}

impl<C: CredentialStore, R: RecordStore> Vault<C, R> {
    /// Creates an unopened vault over the given stores.
    pub fn new(
        config: VaultConfig,
        crypto: Arc<dyn CryptoProvider>,
        credential_store: C,
        record_store: R,
    ) -> Self {
        let autolock = IdleAutoLocker::new(config.idle_timeout, Arc::new(SystemClock));
        Self {
            config,
            cipher: EnvelopeCipher::new(crypto),
            credential_store,
            record_store,
            security: None,
            state: VaultState::Uninitialized,
            session: None,
            autolock,
        }
    }

    /// Replaces the clock driving the idle timer.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.autolock = IdleAutoLocker::new(self.config.idle_timeout, clock);
        self
    }

    pub fn state(&self) -> VaultState {
        self.state
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_initialized(&self) -> bool {
        self.security.is_some()
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn cipher(&self) -> &EnvelopeCipher {
        &self.cipher
    }

    pub fn credential_store(&self) -> &C {
        &self.credential_store
    }

    pub fn record_store(&self) -> &R {
        &self.record_store
    }

    /// Opens both stores and reads the security state.
    ///
    /// A present but unusable security state is reported as
    /// [`VaultError::MissingSecurityState`]; the vault is then left open in
    /// `AwaitingSetup` so the host can reset it.
    pub fn open(&mut self) -> VaultResult<()> {
        self.credential_store.open()?;
        self.record_store.open()?;
        self.session = None;
        self.autolock.cancel();
        self.security = None;
        self.state = VaultState::AwaitingSetup;

        let loaded = match self.credential_store.load() {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "security state unreadable");
                return Err(VaultError::MissingSecurityState);
            }
        };
        if let Some(security) = loaded {
            if let Err(e) = security.validate() {
                tracing::warn!(error = %e, "security state rejected");
                return Err(VaultError::MissingSecurityState);
            }
            self.security = Some(security);
            self.state = VaultState::AwaitingUnlock;
        }
        tracing::debug!(state = ?self.state, "vault opened");
        Ok(())
    }

    /// Locks, flushes and closes both stores.
    pub fn close(&mut self) -> VaultResult<()> {
        self.lock();
        self.record_store.close()?;
        self.credential_store.close()?;
        self.security = None;
        self.state = VaultState::Uninitialized;
        Ok(())
    }

    /// Creates a new vault and returns the recovery code for one-time display.
    ///
    /// An empty `panic_password` counts as none.
    ///
    /// # Errors
    ///
    /// Rejects empty or weak passwords, a panic password equal to the master
    /// password and an already initialized vault. If encrypting legacy
    /// records fails, the vault is already created and unlocked when the
    /// [`VaultError::Migration`] error is returned.
    pub fn setup(
        &mut self,
        password: &str,
        panic_password: Option<&str>,
    ) -> VaultResult<Zeroizing<String>> {
        self.require_open()?;
        if self.security.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }
        auth::check_new_password(password, self.config.min_password_strength)?;
        let panic_password = panic_password.filter(|p| !p.is_empty());
        if panic_password == Some(password) {
            return Err(VaultError::PanicPasswordReused);
        }

        let crypto = Arc::clone(self.cipher.crypto());
        let kdf = self.config.kdf;
        let salt = crypto.generate_salt()?;

        let master = crypto.derive_key(password, &salt, &kdf)?;
        let verifier = self.cipher.encrypt(&verifier_payload(), &master)?;

        let panic_verifier = match panic_password {
            Some(panic_password) => {
                let panic_key = crypto.derive_key(panic_password, &salt, &kdf)?;
                Some(self.cipher.encrypt(&verifier_payload(), &panic_key)?)
            }
            None => None,
        };

        let code = recovery::generate_recovery_code(crypto.as_ref())?;
        let escrow = recovery::wrap_master_key(&self.cipher, &master, &code, &salt, &kdf)?;
        let code_blob = recovery::seal_code(&self.cipher, &code, &master)?;

        let security = SecurityState {
            version: SECURITY_STATE_VERSION,
            kdf,
            salt: salt.to_vec(),
            verifier,
            panic_verifier,
            recovery_escrow: Some(escrow),
            recovery_code: Some(code_blob),
            created_at: chrono::Utc::now(),
        };
        self.persist_security(security)?;
        self.state = VaultState::AwaitingUnlock;
        tracing::info!("vault initialized");

        self.start_master_session(master)?;
        Ok(code)
    }

    /// Tries `password` as the master password, then as the panic password.
    ///
    /// Both failure paths return the same [`VaultError::AuthenticationFailure`].
    pub fn unlock(&mut self, password: &str) -> VaultResult<()> {
        self.require_open()?;

        let outcome = {
            let security = self.security.as_ref().ok_or(VaultError::MissingSecurityState)?;
            let candidate =
                self.cipher
                    .crypto()
                    .derive_key(password, &security.salt, &security.kdf)?;

            if self.key_opens(&security.verifier, &candidate) {
                UnlockOutcome::Master(candidate)
            } else if security
                .panic_verifier
                .as_ref()
                .is_some_and(|panic| self.key_opens(panic, &candidate))
            {
                UnlockOutcome::Panic
            } else {
                UnlockOutcome::Rejected
            }
        };

        match outcome {
            UnlockOutcome::Master(key) => self.start_master_session(key)?,
            UnlockOutcome::Panic => {
                let decoy = self.cipher.crypto().generate_key()?;
                self.start_session(decoy, true)?;
            }
            UnlockOutcome::Rejected => {
                tracing::warn!("unlock attempt rejected");
                return Err(VaultError::AuthenticationFailure);
            }
        }
        tracing::info!("vault unlocked");
        Ok(())
    }

    /// Unlocks with the recovery code instead of the password.
    pub fn recover(&mut self, recovery_code: &str) -> VaultResult<()> {
        self.require_open()?;
        let code = recovery::normalize_recovery_code(recovery_code);

        let key = {
            let security = self.security.as_ref().ok_or(VaultError::MissingSecurityState)?;
            let escrow = security
                .recovery_escrow
                .as_ref()
                .ok_or(VaultError::InvalidRecoveryCode)?;
            let key = recovery::unwrap_master_key(
                &self.cipher,
                escrow,
                &code,
                &security.salt,
                &security.kdf,
            )
            .inspect_err(|_| tracing::warn!("recovery attempt rejected"))?;
            if !self.key_opens(&security.verifier, &key) {
                tracing::warn!("recovered key does not match the vault verifier");
                return Err(VaultError::InvalidRecoveryCode);
            }
            key
        };

        self.start_master_session(key)?;
        tracing::info!("vault unlocked with recovery code");
        Ok(())
    }

    /// Drops the session key and the decrypted cache.
    ///
    /// A vault without security state keeps its `Uninitialized` or
    /// `AwaitingSetup` state.
    pub fn lock(&mut self) {
        self.session = None;
        self.autolock.cancel();
        if self.security.is_some() && self.state != VaultState::Uninitialized {
            self.state = VaultState::Locked;
        }
        tracing::debug!("vault locked");
    }

    /// Wipes every persisted blob and record.
    pub fn factory_reset(&mut self) -> VaultResult<()> {
        self.require_open()?;
        self.session = None;
        self.autolock.cancel();
        self.credential_store.clear()?;
        self.credential_store.flush()?;
        self.record_store.clear()?;
        self.record_store.flush()?;
        self.security = None;
        self.state = VaultState::AwaitingSetup;
        tracing::warn!("vault factory reset");
        Ok(())
    }

    /// Returns the stored recovery code, or `None` for vaults created without
    /// one (offer [`Vault::rotate_recovery_code`] then).
    pub fn view_recovery_code(&self, password: &str) -> VaultResult<Option<Zeroizing<String>>> {
        let master = self.verify_master_password(password)?;
        let security = self.security()?;
        match &security.recovery_code {
            Some(blob) => Ok(Some(recovery::open_code(&self.cipher, blob, &master)?)),
            None => Ok(None),
        }
    }

    /// Issues a new recovery code. The previous code stops working as soon as
    /// this returns.
    pub fn rotate_recovery_code(&mut self, password: &str) -> VaultResult<Zeroizing<String>> {
        let master = self.verify_master_password(password)?;
        let mut next = self.security()?.clone();

        let code = recovery::generate_recovery_code(self.cipher.crypto().as_ref())?;
        next.recovery_escrow = Some(recovery::wrap_master_key(
            &self.cipher,
            &master,
            &code,
            &next.salt,
            &next.kdf,
        )?);
        next.recovery_code = Some(recovery::seal_code(&self.cipher, &code, &master)?);

        self.persist_security(next)?;
        tracing::info!("recovery code rotated");
        Ok(code)
    }

    /// Reports user activity; pushes the idle deadline out.
    ///
    /// Activity arriving after the deadline does not revive the session.
    pub fn record_activity(&mut self) {
        if !self.poll_idle() && self.session.is_some() {
            self.autolock.touch();
        }
    }

    /// Locks the vault if the idle deadline has passed. Returns whether it did.
    pub fn poll_idle(&mut self) -> bool {
        if self.session.is_some() && self.autolock.is_expired() {
            tracing::info!("idle timeout reached");
            self.lock();
            return true;
        }
        false
    }

    pub fn idle_time_remaining(&self) -> Option<Duration> {
        self.autolock.remaining()
    }

    pub fn encrypt_record(&mut self, record: &Record) -> VaultResult<Envelope> {
        self.poll_idle();
        let session = self.session()?;
        self.cipher.encrypt(record, &session.key)
    }

    pub fn decrypt_record(&mut self, envelope: &Envelope) -> VaultResult<Record> {
        self.poll_idle();
        let session = self.session()?;
        self.cipher.decrypt(envelope, &session.key)
    }

    /// Encrypts and stores a record, replacing any record with the same id.
    ///
    /// In a panic session the record only lives in the decoy session.
    pub fn put_record(&mut self, record: Record) -> VaultResult<()> {
        self.poll_idle();
        let session = self.session.as_mut().ok_or(VaultError::Locked)?;
        if !session.panic_mode {
            let envelope = self.cipher.encrypt(&record, &session.key)?;
            self.record_store.put(&record.id, envelope.to_value()?)?;
            self.record_store.flush()?;
        }
        session.cache.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn delete_record(&mut self, id: &str) -> VaultResult<()> {
        self.poll_idle();
        let session = self.session.as_mut().ok_or(VaultError::Locked)?;
        if session.cache.remove(id).is_none() {
            return Err(VaultError::RecordNotFound(id.to_string()));
        }
        if !session.panic_mode {
            self.record_store.delete(id)?;
            self.record_store.flush()?;
        }
        Ok(())
    }

    /// Decrypted records, newest first.
    pub fn records(&mut self) -> VaultResult<Vec<Record>> {
        self.poll_idle();
        let session = self.session()?;
        let mut records: Vec<Record> = session.cache.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    pub fn record(&mut self, id: &str) -> VaultResult<Option<Record>> {
        self.poll_idle();
        let session = self.session()?;
        Ok(session.cache.get(id).cloned())
    }

    /// Exports the persisted state. A panic session exports no records.
    pub fn export_bundle(&mut self) -> VaultResult<VaultBundle> {
        self.poll_idle();
        let panic_mode = self.session()?.panic_mode;
        let security = self.security()?;

        let mut encrypted_records = Vec::new();
        if !panic_mode {
            for id in self.record_store.ids()? {
                let Some(value) = self.record_store.get(&id)? else {
                    continue;
                };
                encrypted_records.push(EncryptedRecord {
                    envelope: Envelope::from_value(&value)?,
                    id,
                });
            }
        }

        tracing::info!(records = encrypted_records.len(), "vault bundle exported");
        Ok(VaultBundle::from_state(security, encrypted_records))
    }

    /// Replaces all persisted state with `bundle` and locks the vault.
    pub fn import_bundle(&mut self, bundle: VaultBundle) -> VaultResult<()> {
        self.require_open()?;
        bundle.validate()?;
        self.lock();

        self.record_store.clear()?;
        for record in &bundle.encrypted_records {
            self.record_store.put(&record.id, record.envelope.to_value()?)?;
        }
        self.record_store.flush()?;
        self.persist_security(bundle.security_state())?;

        self.state = VaultState::AwaitingUnlock;
        tracing::info!(records = bundle.encrypted_records.len(), "vault bundle imported");
        Ok(())
    }

    fn require_open(&self) -> VaultResult<()> {
        if self.state == VaultState::Uninitialized {
            return Err(VaultError::NotOpen);
        }
        Ok(())
    }

    fn security(&self) -> VaultResult<&SecurityState> {
        self.security.as_ref().ok_or(VaultError::MissingSecurityState)
    }

    fn persist_security(&mut self, security: SecurityState) -> VaultResult<()> {
        self.credential_store.save(&security)?;
        self.credential_store.flush()?;
        self.security = Some(security);
        Ok(())
    }

    fn key_opens(&self, verifier: &Envelope, key: &SecretKey) -> bool {
        matches!(
            self.cipher.decrypt::<Value>(verifier, key),
            Ok(payload) if payload == verifier_payload()
        )
    }

    fn verify_master_password(&self, password: &str) -> VaultResult<SecretKey> {
        self.require_open()?;
        let security = self.security()?;
        let key = self
            .cipher
            .crypto()
            .derive_key(password, &security.salt, &security.kdf)?;
        if !self.key_opens(&security.verifier, &key) {
            return Err(VaultError::AuthenticationFailure);
        }
        Ok(key)
    }

    fn session(&self) -> VaultResult<&VaultSession> {
        self.session.as_ref().ok_or(VaultError::Locked)
    }

    /// Starts a master session, then encrypts any legacy plaintext records.
    ///
    /// A migration failure is returned with the session already open, so the
    /// owner can still read records and view the recovery code. The next
    /// unlock resumes the migration.
    fn start_master_session(&mut self, key: SecretKey) -> VaultResult<()> {
        self.start_session(key, false)?;
        let Some(session) = self.session.as_ref() else {
            return Err(VaultError::Locked);
        };
        migration::migrate_plaintext_records(&mut self.record_store, &self.cipher, &session.key)?;
        Ok(())
    }

    fn start_session(&mut self, key: SecretKey, panic_mode: bool) -> VaultResult<()> {
        let cache = if panic_mode {
            BTreeMap::new()
        } else {
            self.load_records(&key)?
        };
        self.session = Some(VaultSession {
            key,
            panic_mode,
            cache,
        });
        self.state = if panic_mode {
            VaultState::PanicUnlocked
        } else {
            VaultState::Unlocked
        };
        self.autolock.arm();
        Ok(())
    }

    /// Decrypts every stored record. Records that fail authentication are
    /// skipped and logged, never returned.
    fn load_records(&self, key: &SecretKey) -> VaultResult<BTreeMap<String, Record>> {
        let mut cache = BTreeMap::new();
        for id in self.record_store.ids()? {
            let Some(raw) = self.record_store.get(&id)? else {
                continue;
            };
            let mut value = match self.cipher.decrypt_value(&raw, key) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "record skipped");
                    continue;
                }
            };
            if let Value::Object(map) = &mut value {
                map.insert("id".to_string(), Value::String(id.clone()));
            }
            match serde_json::from_value::<Record>(value) {
                Ok(record) => {
                    cache.insert(id, record);
                }
                Err(e) => tracing::warn!(id = %id, error = %e, "record has unexpected shape"),
            }
        }
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autolock::ManualClock;
    use crate::crypto::KdfParams;
    use serde_json::Map;

    const PASSWORD: &str = "Correct1!";
    const PANIC: &str = "Decoy#2024";

    fn config() -> VaultConfig {
        VaultConfig {
            kdf: KdfParams::new(256, 1, 1).unwrap(),
            idle_timeout: Some(Duration::from_secs(60)),
            ..VaultConfig::default()
        }
    }

    fn open_vault() -> Vault<MemoryCredentialStore, MemoryRecordStore> {
        let mut vault = Vault::in_memory(config());
        vault.open().unwrap();
        vault
    }

    fn note(title: &str) -> Record {
        let mut fields = Map::new();
        fields.insert("title".into(), json!(title));
        Record::new(fields)
    }

    #[test]
    fn operations_require_open() {
        let mut vault = Vault::in_memory(config());
        assert_eq!(vault.state(), VaultState::Uninitialized);
        assert!(matches!(vault.setup(PASSWORD, None), Err(VaultError::NotOpen)));
        assert!(matches!(vault.unlock(PASSWORD), Err(VaultError::NotOpen)));
    }

    #[test]
    fn fresh_vault_awaits_setup() {
        let mut vault = open_vault();
        assert_eq!(vault.state(), VaultState::AwaitingSetup);
        assert!(matches!(
            vault.unlock(PASSWORD),
            Err(VaultError::MissingSecurityState)
        ));
        assert!(matches!(
            vault.recover("AB12-CD34-EF56-7890"),
            Err(VaultError::MissingSecurityState)
        ));
    }

    #[test]
    fn setup_leaves_vault_unlocked() {
        let mut vault = open_vault();
        let code = vault.setup(PASSWORD, None).unwrap();
        assert_eq!(code.len(), 19);
        assert_eq!(vault.state(), VaultState::Unlocked);
        assert!(vault.records().unwrap().is_empty());
    }

    #[test]
    fn setup_rejections() {
        let mut vault = open_vault();
        assert!(matches!(vault.setup("", None), Err(VaultError::EmptyPassword)));
        assert!(matches!(vault.setup("abc", None), Err(VaultError::WeakPassword)));
        assert!(matches!(
            vault.setup(PASSWORD, Some(PASSWORD)),
            Err(VaultError::PanicPasswordReused)
        ));
        assert!(!vault.is_initialized());

        vault.setup(PASSWORD, Some("")).unwrap();
        let state = vault.credential_store().load().unwrap().unwrap();
        assert!(state.panic_verifier.is_none());
        assert!(matches!(
            vault.setup(PASSWORD, None),
            Err(VaultError::AlreadyInitialized)
        ));
    }

    #[test]
    fn unlock_with_master_password() {
        let mut vault = open_vault();
        vault.setup(PASSWORD, None).unwrap();
        vault.put_record(note("kept")).unwrap();
        vault.lock();
        assert_eq!(vault.state(), VaultState::Locked);
        assert!(matches!(vault.records(), Err(VaultError::Locked)));

        vault.unlock(PASSWORD).unwrap();
        assert_eq!(vault.state(), VaultState::Unlocked);
        let records = vault.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field("title"), Some(&json!("kept")));
    }

    #[test]
    fn wrong_password_message_is_identical_with_or_without_panic() {
        let mut plain = open_vault();
        plain.setup(PASSWORD, None).unwrap();
        plain.lock();
        let a = plain.unlock("Wrong1!pw").unwrap_err();

        let mut with_panic = open_vault();
        with_panic.setup(PASSWORD, Some(PANIC)).unwrap();
        with_panic.lock();
        let b = with_panic.unlock("Wrong1!pw").unwrap_err();

        assert!(matches!(a, VaultError::AuthenticationFailure));
        assert!(matches!(b, VaultError::AuthenticationFailure));
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(with_panic.state(), VaultState::Locked);
    }

    #[test]
    fn panic_password_shows_empty_vault_and_never_persists() {
        let mut vault = open_vault();
        vault.setup(PASSWORD, Some(PANIC)).unwrap();
        vault.put_record(note("secret")).unwrap();
        vault.lock();

        vault.unlock(PANIC).unwrap();
        assert_eq!(vault.state(), VaultState::PanicUnlocked);
        assert!(vault.records().unwrap().is_empty());

        vault.put_record(note("decoy")).unwrap();
        assert_eq!(vault.records().unwrap().len(), 1);
        assert_eq!(vault.record_store().len(), 1);

        let bundle = vault.export_bundle().unwrap();
        assert!(bundle.encrypted_records.is_empty());

        vault.lock();
        vault.unlock(PASSWORD).unwrap();
        let titles: Vec<_> = vault
            .records()
            .unwrap()
            .into_iter()
            .map(|r| r.field("title").cloned())
            .collect();
        assert_eq!(titles, vec![Some(json!("secret"))]);
    }

    #[test]
    fn panic_session_cannot_decrypt_real_records() {
        let mut vault = open_vault();
        vault.setup(PASSWORD, Some(PANIC)).unwrap();
        let envelope = vault.encrypt_record(&note("secret")).unwrap();
        vault.lock();

        vault.unlock(PANIC).unwrap();
        assert!(matches!(
            vault.decrypt_record(&envelope),
            Err(VaultError::DecryptionIntegrityFailure)
        ));
    }

    #[test]
    fn panic_password_cannot_view_or_rotate_recovery_code() {
        let mut vault = open_vault();
        vault.setup(PASSWORD, Some(PANIC)).unwrap();
        assert!(matches!(
            vault.view_recovery_code(PANIC),
            Err(VaultError::AuthenticationFailure)
        ));
        assert!(vault.rotate_recovery_code(PANIC).is_err());
    }

    #[test]
    fn recovery_code_unlocks_with_master_key() {
        let mut vault = open_vault();
        let code = vault.setup(PASSWORD, None).unwrap();
        let envelope = vault.encrypt_record(&note("x")).unwrap();
        vault.lock();

        vault.recover(&code.to_lowercase()).unwrap();
        assert_eq!(vault.state(), VaultState::Unlocked);
        assert_eq!(
            vault.decrypt_record(&envelope).unwrap().field("title"),
            Some(&json!("x"))
        );
    }

    #[test]
    fn wrong_recovery_code_is_rejected() {
        let mut vault = open_vault();
        vault.setup(PASSWORD, None).unwrap();
        vault.lock();
        assert!(matches!(
            vault.recover("0000-0000-0000-0000"),
            Err(VaultError::InvalidRecoveryCode)
        ));
        assert_eq!(vault.state(), VaultState::Locked);
    }

    #[test]
    fn view_and_rotate_recovery_code() {
        let mut vault = open_vault();
        let old = vault.setup(PASSWORD, None).unwrap();

        let viewed = vault.view_recovery_code(PASSWORD).unwrap().unwrap();
        assert_eq!(*viewed, *old);
        assert!(matches!(
            vault.view_recovery_code("Wrong1!pw"),
            Err(VaultError::AuthenticationFailure)
        ));

        let new = vault.rotate_recovery_code(PASSWORD).unwrap();
        assert_ne!(*new, *old);
        assert_eq!(*vault.view_recovery_code(PASSWORD).unwrap().unwrap(), *new);

        vault.lock();
        assert!(matches!(vault.recover(&old), Err(VaultError::InvalidRecoveryCode)));
        vault.recover(&new).unwrap();
    }

    #[test]
    fn view_returns_none_without_code_blob() {
        let mut vault = open_vault();
        vault.setup(PASSWORD, None).unwrap();

        let mut state = vault.credential_store().load().unwrap().unwrap();
        state.recovery_code = None;
        vault.persist_security(state).unwrap();

        assert!(vault.view_recovery_code(PASSWORD).unwrap().is_none());
        vault.rotate_recovery_code(PASSWORD).unwrap();
        assert!(vault.view_recovery_code(PASSWORD).unwrap().is_some());
    }

    #[test]
    fn rotation_keeps_salt() {
        let mut vault = open_vault();
        vault.setup(PASSWORD, None).unwrap();
        let before = vault.credential_store().load().unwrap().unwrap();
        vault.rotate_recovery_code(PASSWORD).unwrap();
        let after = vault.credential_store().load().unwrap().unwrap();
        assert_eq!(before.salt, after.salt);
        assert_eq!(before.verifier, after.verifier);
        assert_ne!(before.recovery_escrow, after.recovery_escrow);
        assert_ne!(before.recovery_code, after.recovery_code);
    }

    #[test]
    fn idle_timeout_locks_vault() {
        let clock = ManualClock::new();
        let mut vault = Vault::in_memory(config()).with_clock(Arc::new(clock.clone()));
        vault.open().unwrap();
        vault.setup(PASSWORD, None).unwrap();

        clock.advance(Duration::from_secs(45));
        vault.record_activity();
        clock.advance(Duration::from_secs(45));
        assert!(!vault.poll_idle());
        assert_eq!(vault.state(), VaultState::Unlocked);

        clock.advance(Duration::from_secs(15));
        assert!(matches!(vault.records(), Err(VaultError::Locked)));
        assert_eq!(vault.state(), VaultState::Locked);
        assert!(!vault.is_unlocked());
        assert!(!vault.poll_idle());

        vault.unlock(PASSWORD).unwrap();
        assert!(vault.records().is_ok());
    }

    #[test]
    fn manual_lock_cancels_timer() {
        let clock = ManualClock::new();
        let mut vault = Vault::in_memory(config()).with_clock(Arc::new(clock.clone()));
        vault.open().unwrap();
        vault.setup(PASSWORD, None).unwrap();
        assert!(vault.idle_time_remaining().is_some());

        vault.lock();
        assert_eq!(vault.idle_time_remaining(), None);
        clock.advance(Duration::from_secs(600));
        assert!(!vault.poll_idle());
        assert_eq!(vault.state(), VaultState::Locked);
    }

    #[test]
    fn delete_record_removes_from_store() {
        let mut vault = open_vault();
        vault.setup(PASSWORD, None).unwrap();
        let record = note("gone");
        let id = record.id.clone();
        vault.put_record(record).unwrap();
        assert_eq!(vault.record_store().len(), 1);

        vault.delete_record(&id).unwrap();
        assert!(vault.record_store().is_empty());
        assert!(matches!(
            vault.delete_record(&id),
            Err(VaultError::RecordNotFound(_))
        ));
    }

    #[test]
    fn factory_reset_returns_to_setup() {
        let mut vault = open_vault();
        vault.setup(PASSWORD, None).unwrap();
        vault.put_record(note("x")).unwrap();

        vault.factory_reset().unwrap();
        assert_eq!(vault.state(), VaultState::AwaitingSetup);
        assert!(vault.record_store().is_empty());
        assert!(vault.credential_store().load().unwrap().is_none());
        vault.setup(PASSWORD, None).unwrap();
    }

    #[test]
    fn close_and_reopen() {
        let mut vault = open_vault();
        vault.setup(PASSWORD, None).unwrap();
        vault.close().unwrap();
        assert_eq!(vault.state(), VaultState::Uninitialized);

        vault.open().unwrap();
        assert_eq!(vault.state(), VaultState::AwaitingUnlock);
        vault.unlock(PASSWORD).unwrap();
    }

    #[test]
    fn unlock_resumes_interrupted_migration() {
        let mut vault = open_vault();
        vault.setup(PASSWORD, None).unwrap();
        vault
            .record_store
            .put("legacy", json!({"id": "legacy", "title": "late"}))
            .unwrap();
        vault.lock();

        vault.unlock(PASSWORD).unwrap();
        let stored = vault.record_store().get("legacy").unwrap().unwrap();
        assert!(crate::envelope::is_envelope(&stored));
        assert!(vault.record("legacy").unwrap().is_some());
    }

    #[test]
    fn late_activity_does_not_revive_expired_session() {
        let clock = ManualClock::new();
        let mut vault = Vault::in_memory(config()).with_clock(Arc::new(clock.clone()));
        vault.open().unwrap();
        vault.setup(PASSWORD, None).unwrap();

        clock.advance(Duration::from_secs(600));
        vault.record_activity();

        assert_eq!(vault.state(), VaultState::Locked);
        assert!(!vault.is_unlocked());
        assert!(matches!(vault.records(), Err(VaultError::Locked)));
    }

    #[test]
    fn lock_before_setup_keeps_awaiting_setup() {
        let mut vault = open_vault();
        vault.lock();
        assert_eq!(vault.state(), VaultState::AwaitingSetup);

        vault.setup(PASSWORD, None).unwrap();
        vault.factory_reset().unwrap();
        vault.lock();
        assert_eq!(vault.state(), VaultState::AwaitingSetup);
    }

    struct FailingStore(MemoryRecordStore);

    impl RecordStore for FailingStore {
        fn ids(&self) -> anyhow::Result<Vec<String>> {
            self.0.ids()
        }
        fn get(&self, id: &str) -> anyhow::Result<Option<Value>> {
            self.0.get(id)
        }
        fn put(&mut self, _id: &str, _value: Value) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
        fn delete(&mut self, id: &str) -> anyhow::Result<()> {
            self.0.delete(id)
        }
        fn clear(&mut self) -> anyhow::Result<()> {
            self.0.clear()
        }
    }

    #[test]
    fn failed_migration_during_setup_leaves_usable_session() {
        let legacy = MemoryRecordStore::with_records([(
            "legacy".to_string(),
            json!({"title": "old"}),
        )]);
        let mut vault = Vault::new(
            config(),
            Arc::new(SystemCrypto),
            MemoryCredentialStore::new(),
            FailingStore(legacy),
        );
        vault.open().unwrap();

        match vault.setup(PASSWORD, None) {
            Err(VaultError::Migration { id, reason }) => {
                assert_eq!(id, "legacy");
                assert!(reason.contains("disk full"));
            }
            other => panic!("expected Migration error, got: {other:?}"),
        }
        assert!(vault.is_initialized());
        assert_eq!(vault.state(), VaultState::Unlocked);
        assert!(vault.view_recovery_code(PASSWORD).unwrap().is_some());
        assert_eq!(vault.records().unwrap()[0].field("title"), Some(&json!("old")));
        assert!(matches!(
            vault.setup(PASSWORD, None),
            Err(VaultError::AlreadyInitialized)
        ));

        vault.lock();
        assert_eq!(vault.state(), VaultState::Locked);
        assert!(matches!(
            vault.unlock(PASSWORD),
            Err(VaultError::Migration { .. })
        ));
        assert_eq!(vault.state(), VaultState::Unlocked);
    }

    #[test]
    fn legacy_record_id_follows_store_key() {
        let legacy = MemoryRecordStore::with_records([(
            "k1".to_string(),
            json!({"id": "other", "title": "renamed"}),
        )]);
        let mut vault = Vault::new(
            config(),
            Arc::new(SystemCrypto),
            MemoryCredentialStore::new(),
            legacy,
        );
        vault.open().unwrap();
        vault.setup(PASSWORD, None).unwrap();

        let mut record = vault.record("k1").unwrap().unwrap();
        assert_eq!(record.id, "k1");

        record.set_field("title", json!("edited"));
        vault.put_record(record.clone()).unwrap();
        assert_eq!(vault.record_store().ids().unwrap(), vec!["k1".to_string()]);

        vault.delete_record(&record.id).unwrap();
        assert!(vault.record_store().is_empty());
    }
}
