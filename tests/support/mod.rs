#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use knowvault::{
    KdfParams, ManualClock, MemoryCredentialStore, MemoryRecordStore, Record, SystemCrypto, Vault,
    VaultConfig,
};
use serde_json::{Map, json};

pub const PASSWORD: &str = "Correct1!";
pub const PANIC_PASSWORD: &str = "Decoy#99x";

pub type MemoryVault = Vault<MemoryCredentialStore, MemoryRecordStore>;

pub fn test_config() -> VaultConfig {
    VaultConfig {
        kdf: KdfParams::new(256, 1, 1).unwrap(),
        idle_timeout: Some(Duration::from_secs(300)),
        ..VaultConfig::default()
    }
}

pub fn open_memory_vault() -> MemoryVault {
    open_with_records(MemoryRecordStore::new())
}

pub fn open_with_records(records: MemoryRecordStore) -> MemoryVault {
    let mut vault = Vault::new(
        test_config(),
        Arc::new(SystemCrypto),
        MemoryCredentialStore::new(),
        records,
    );
    vault.open().unwrap();
    vault
}

pub fn open_with_clock(clock: &ManualClock) -> MemoryVault {
    let mut vault = Vault::in_memory(test_config()).with_clock(Arc::new(clock.clone()));
    vault.open().unwrap();
    vault
}

pub fn note(title: &str) -> Record {
    let mut fields = Map::new();
    fields.insert("title".into(), json!(title));
    Record::new(fields)
}

pub fn titles(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.field("title").and_then(|t| t.as_str()).map(str::to_string))
        .collect()
}
