//! Records and the store that persists them.
//!
//! A store only ever sees serialized values: envelopes once a vault is set up,
//! or legacy plaintext objects waiting for migration.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One logical item of the personal record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates a record with a fresh id and timestamps.
    pub fn new(fields: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
        self.updated_at = Utc::now();
    }
}

/// Id-keyed storage of record values.
///
/// Writes may be buffered until `flush`; the vault flushes after every
/// mutating operation.
pub trait RecordStore: Send {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>>;

    fn get(&self, id: &str) -> Result<Option<Value>>;

    fn put(&mut self, id: &str, value: Value) -> Result<()>;

    fn delete(&mut self, id: &str) -> Result<()>;

    fn clear(&mut self) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryRecordStore {
    records: BTreeMap<String, Value>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store, e.g. with legacy plaintext records.
    pub fn with_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Self {
            records: records.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn ids(&self) -> Result<Vec<String>> {
        Ok(self.records.keys().cloned().collect())
    }

    fn get(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.records.get(id).cloned())
    }

    fn put(&mut self, id: &str, value: Value) -> Result<()> {
        self.records.insert(id.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        if self.records.remove(id).is_none() {
            bail!("record '{id}' not found");
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.records.clear();
        Ok(())
    }
}
