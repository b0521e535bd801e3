//! Vault configuration.
//!
//! Defaults can be overridden from the environment (a `.env` file is loaded
//! first when present):
//!
//! | variable | meaning |
//! |---|---|
//! | `KNOWVAULT_ARGON_MEM` | Argon2 memory cost in KiB |
//! | `KNOWVAULT_ARGON_TIME` | Argon2 iterations |
//! | `KNOWVAULT_ARGON_PARALLELISM` | Argon2 lanes |
//! | `KNOWVAULT_IDLE_TIMEOUT_SECS` | idle auto-lock timeout, `0` disables |
//! | `KNOWVAULT_MIN_PASSWORD_STRENGTH` | minimum score (0-4) for a new master password |
//! | `KNOWVAULT_DATA_DIR` | directory holding the vault files |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;

use crate::crypto::KdfParams;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MIN_PASSWORD_STRENGTH: u8 = 2;

#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Work factor for newly created vaults. Existing vaults keep the one
    /// persisted with their salt.
    pub kdf: KdfParams,
    /// `None` disables auto-lock.
    pub idle_timeout: Option<Duration>,
    pub min_password_strength: u8,
    pub data_dir: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            min_password_strength: DEFAULT_MIN_PASSWORD_STRENGTH,
            data_dir: None,
        }
    }
}

impl VaultConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let default_kdf = default.kdf;

        let mem = parse_var(&lookup, "KNOWVAULT_ARGON_MEM")?.unwrap_or(default_kdf.mem_cost_kib());
        let time = parse_var(&lookup, "KNOWVAULT_ARGON_TIME")?.unwrap_or(default_kdf.time_cost());
        let par = parse_var(&lookup, "KNOWVAULT_ARGON_PARALLELISM")?
            .unwrap_or(default_kdf.parallelism());
        let kdf = KdfParams::new(mem, time, par).context("invalid Argon2 settings")?;

        let idle_timeout = match parse_var::<u64, _>(&lookup, "KNOWVAULT_IDLE_TIMEOUT_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => default.idle_timeout,
        };

        let min_password_strength = parse_var(&lookup, "KNOWVAULT_MIN_PASSWORD_STRENGTH")?
            .unwrap_or(default.min_password_strength)
            .min(4);

        let data_dir = lookup("KNOWVAULT_DATA_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            kdf,
            idle_timeout,
            min_password_strength,
            data_dir,
        })
    }

    /// Configured data directory, or the platform default.
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "knowvault")
        .context("could not determine platform directories")?;
    Ok(project_dirs.data_dir().to_path_buf())
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {name}: {raw:?}"))?;
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}
