//! File-backed stores.
//!
//! Both documents live in one data directory and are replaced with an
//! atomic temp-file + rename so a crash leaves either the old or the new
//! version on disk, never a partial write.

use anyhow::{Context, Result};
use getrandom::fill;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::credentials::{CredentialStore, SecurityState};
use crate::records::RecordStore;

const SECURITY_FILE: &str = "security.json";
const RECORDS_FILE: &str = "records.json";

/// A single file that is only ever replaced whole.
///
/// Readers see either the previous or the new contents, never a partial
/// write.
#[derive(Debug, Clone)]
pub struct AtomicFile {
    path: PathBuf,
}

impl AtomicFile {
    /// Wraps `path`; nothing is touched on disk.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Returns `true` if the file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn load(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).with_context(|| format!("failed to read {}", self.path.display()))
    }

    /// Writes `data` to a sibling temp file, fsyncs it, renames it over the
    /// target and fsyncs the directory. Parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or replaced; the
    /// temporary file is removed in that case.
    pub fn save(&self, data: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.random_tmp_path()?;

        let mut tmp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .context("failed to create temporary file")?;

        tmp_file.write_all(data)?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        if let Err(e) = self.atomic_replace(&tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        if let Some(parent) = self.path.parent() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }

        Ok(())
    }

    /// Deletes the file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be removed.
    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove {}", self.path.display()))?;
        }
        Ok(())
    }

    /// `filename.tmp.<randomhex>` in the target's directory.
    fn random_tmp_path(&self) -> Result<PathBuf> {
        let mut buf = [0u8; 8];
        fill(&mut buf).map_err(|e| anyhow::anyhow!("OS random generator unavailable: {e}"))?;

        let rand_string = buf.iter().map(|b| format!("{:02x}", b)).collect::<String>();

        let file_name = self
            .path
            .file_name()
            .context("storage path has no file name")?
            .to_string_lossy();

        Ok(self.path.with_file_name(format!("{file_name}.tmp.{rand_string}")))
    }

    #[cfg(target_os = "windows")]
    fn atomic_replace(&self, tmp_path: &Path) -> Result<()> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{
            MOVEFILE_REPLACE_EXISTING, MOVEFILE_WRITE_THROUGH, MoveFileExW,
        };

        fn to_wide(s: &OsStr) -> Vec<u16> {
            s.encode_wide().chain(std::iter::once(0)).collect()
        }

        let target_w = to_wide(self.path.as_os_str());
        let tmp_w = to_wide(tmp_path.as_os_str());

        // SAFETY: both buffers are NUL-terminated UTF-16 and outlive the call.
        let result = unsafe {
            MoveFileExW(
                tmp_w.as_ptr(),
                target_w.as_ptr(),
                MOVEFILE_REPLACE_EXISTING | MOVEFILE_WRITE_THROUGH,
            )
        };

        if result == 0 {
            let err = std::io::Error::last_os_error();
            return Err(err).context("atomic replace failed");
        }

        Ok(())
    }

    /// `rename()` is atomic when both paths are on the same filesystem.
    #[cfg(not(target_os = "windows"))]
    fn atomic_replace(&self, tmp_path: &Path) -> Result<()> {
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }
}

/// [`CredentialStore`] persisted as `security.json`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    file: AtomicFile,
}

impl FileCredentialStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            file: AtomicFile::new(dir.join(SECURITY_FILE)),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<SecurityState>> {
        if !self.file.exists() {
            return Ok(None);
        }
        let data = self.file.load()?;
        let state = serde_json::from_slice(&data).context("security state is corrupted")?;
        Ok(Some(state))
    }

    fn save(&mut self, state: &SecurityState) -> Result<()> {
        let data = serde_json::to_vec_pretty(state)?;
        self.file.save(&data)?;
        tracing::debug!(path = %self.file.path().display(), "security state written");
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.file.remove()
    }
}

/// [`RecordStore`] persisted as one `records.json` map.
///
/// Loaded on `open`, buffered in memory, written back on `flush`.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    file: AtomicFile,
    records: BTreeMap<String, Value>,
    dirty: bool,
}

impl FileRecordStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            file: AtomicFile::new(dir.join(RECORDS_FILE)),
            records: BTreeMap::new(),
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl RecordStore for FileRecordStore {
    fn open(&mut self) -> Result<()> {
        self.records = if self.file.exists() {
            let data = self.file.load()?;
            serde_json::from_slice(&data).context("record file is corrupted")?
        } else {
            BTreeMap::new()
        };
        self.dirty = false;
        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>> {
        Ok(self.records.keys().cloned().collect())
    }

    fn get(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.records.get(id).cloned())
    }

    fn put(&mut self, id: &str, value: Value) -> Result<()> {
        self.records.insert(id.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        if self.records.remove(id).is_none() {
            anyhow::bail!("record '{id}' not found");
        }
        self.dirty = true;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.records.clear();
        self.dirty = false;
        self.file.remove()
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let data = serde_json::to_vec(&self.records)?;
        self.file.save(&data)?;
        self.dirty = false;
        tracing::debug!(records = self.records.len(), "record file written");
        Ok(())
    }
}
