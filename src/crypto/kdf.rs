use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use super::{KEY_LEN, SecretKey};
use crate::error::{VaultError, VaultResult};

/// Largest accepted memory cost: 4 GiB.
pub const MAX_MEM_COST_KIB: u32 = 4 * 1024 * 1024;
/// Largest accepted iteration count.
pub const MAX_TIME_COST: u32 = 64;
/// Largest accepted lane count.
pub const MAX_PARALLELISM: u32 = 64;

/// Argon2id work factor.
///
/// Persisted next to the salt so raising the defaults never locks out an
/// existing vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    mem_cost_kib: u32,
    time_cost: u32,
    parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 64 * 1024, // 64 MiB
            time_cost: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub fn new(mem_cost_kib: u32, time_cost: u32, parallelism: u32) -> VaultResult<Self> {
        let params = Self {
            mem_cost_kib,
            time_cost,
            parallelism,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn mem_cost_kib(&self) -> u32 {
        self.mem_cost_kib
    }

    pub fn time_cost(&self) -> u32 {
        self.time_cost
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    pub fn validate(&self) -> VaultResult<()> {
        let fail = |msg: &str| Err(VaultError::InvalidKdfParams(msg.to_string()));
        if self.mem_cost_kib < 8 {
            return fail("argon2 memory cost too low");
        }
        if self.time_cost < 1 {
            return fail("argon2 time cost must be >= 1");
        }
        if self.parallelism < 1 {
            return fail("argon2 parallelism must be >= 1");
        }
        if self.mem_cost_kib > MAX_MEM_COST_KIB {
            return fail("argon2 memory cost above 4 GiB");
        }
        if self.time_cost > MAX_TIME_COST {
            return fail("argon2 time cost too high");
        }
        if self.parallelism > MAX_PARALLELISM {
            return fail("argon2 parallelism too high");
        }
        if self.mem_cost_kib < 8 * self.parallelism {
            return fail("argon2 memory cost must be at least 8 * parallelism");
        }
        Ok(())
    }
}

/// Stretches `password` into a 256-bit key with Argon2id.
pub fn derive_key(password: &str, salt: &[u8], kdf: &KdfParams) -> VaultResult<SecretKey> {
    kdf.validate()?;

    let params = Params::new(
        kdf.mem_cost_kib,
        kdf.time_cost,
        kdf.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| VaultError::KeyDerivation(format!("invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = SecretKey::zeroed();
    argon2
        .hash_password_into(password.as_bytes(), salt, key.as_mut_bytes())
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

    Ok(key)
}
