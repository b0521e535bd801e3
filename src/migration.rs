//! Re-encryption of legacy plaintext records.
//!
//! Records written before a vault existed carry no `encrypted` marker.
//! Migration wraps each of them under the master key and leaves envelopes
//! alone, so it can be re-run after an interruption without double-encrypting.

use crate::crypto::SecretKey;
use crate::envelope::{EnvelopeCipher, is_envelope};
use crate::error::{VaultError, VaultResult};
use crate::records::RecordStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: usize,
    pub already_encrypted: usize,
}

pub fn migrate_plaintext_records(
    store: &mut dyn RecordStore,
    cipher: &EnvelopeCipher,
    key: &SecretKey,
) -> VaultResult<MigrationReport> {
    let mut report = MigrationReport::default();

    for id in store.ids()? {
        let Some(value) = store.get(&id)? else {
            continue;
        };
        if is_envelope(&value) {
            report.already_encrypted += 1;
            continue;
        }

        let fail = |reason: String| VaultError::Migration {
            id: id.clone(),
            reason,
        };
        let envelope = cipher.encrypt(&value, key).map_err(|e| fail(e.to_string()))?;
        let wire = envelope.to_value().map_err(|e| fail(e.to_string()))?;
        store.put(&id, wire).map_err(|e| fail(format!("{e:#}")))?;
        report.migrated += 1;
    }

    store.flush()?;

    if report.migrated > 0 {
        tracing::info!(migrated = report.migrated, "legacy records encrypted");
    }
    Ok(report)
}
