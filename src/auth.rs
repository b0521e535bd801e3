//! Password policy for new master passwords.

use crate::error::{VaultError, VaultResult};

/// Scores a password from 0 (very weak) to 4 (strong).
///
/// One point each for: longer than 6 chars, longer than 10 chars, an uppercase
/// letter, a digit, a symbol.
pub fn password_strength(password: &str) -> u8 {
    if password.is_empty() {
        return 0;
    }
    let len = password.chars().count();
    let checks = [
        len > 6,
        len > 10,
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_ascii_alphanumeric()),
    ];
    let score = checks.iter().filter(|&&hit| hit).count() as u8;
    score.min(4)
}

/// Human-readable label for a strength score.
pub fn strength_label(score: u8) -> &'static str {
    match score {
        0 => "Very Weak",
        1 => "Weak",
        2 => "Fair",
        3 => "Good",
        _ => "Strong",
    }
}

pub fn check_new_password(password: &str, min_strength: u8) -> VaultResult<()> {
    if password.is_empty() {
        return Err(VaultError::EmptyPassword);
    }
    if password_strength(password) < min_strength {
        return Err(VaultError::WeakPassword);
    }
    Ok(())
}
