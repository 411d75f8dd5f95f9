//! Password generation for ephemeral identities
//!
//! Passwords are `pWd0_` followed by 24 characters of `[A-Za-z0-9]`. The
//! prefix satisfies strict host password policies (special character, digit,
//! both cases); the random part carries roughly 143 bits drawn from the OS
//! CSPRNG, so no two runs reproduce a value.

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;

/// Fixed password prefix
pub const PASSWORD_PREFIX: &str = "pWd0_";

/// Number of random characters after the prefix
pub const RANDOM_SUFFIX_LEN: usize = 24;

/// Generate a fresh password.
///
/// # Panics
///
/// Panics if the OS randomness source is unavailable.
#[must_use]
pub fn generate_password() -> String {
    let suffix: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{PASSWORD_PREFIX}{suffix}")
}
