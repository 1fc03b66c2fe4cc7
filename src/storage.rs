//! Secret storage using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. Holds the spreadsheet API access
//! token and the seeded manager password. Environment variables take
//! precedence so headless deployments can inject secrets without a keyring.

use keyring::Entry;
use tracing::warn;
use zeroize::Zeroizing;

const SERVICE_NAME: &str = "esperanza-pos";

// Credential keys
pub const KEY_SHEETS_TOKEN: &str = "sheets_access_token";
pub const KEY_ADMIN_PASSWORD: &str = "admin_password";

const ENV_SHEETS_TOKEN: &str = "POS_SHEETS_TOKEN";
const ENV_ADMIN_PASSWORD: &str = "POS_ADMIN_PASSWORD";

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<Zeroizing<String>> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(Zeroizing::new(pw)),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

fn env_secret(env_key: &str) -> Option<Zeroizing<String>> {
    std::env::var(env_key)
        .ok()
        .map(|v| Zeroizing::new(v.trim().to_string()))
        .filter(|v| !v.is_empty())
}

fn resolve_secret(env_key: &str, credential_key: &str) -> Option<Zeroizing<String>> {
    env_secret(env_key).or_else(|| get_credential(credential_key).filter(|v| !v.trim().is_empty()))
}

/// Bearer token for the spreadsheet API.
pub fn sheets_access_token() -> Option<Zeroizing<String>> {
    resolve_secret(ENV_SHEETS_TOKEN, KEY_SHEETS_TOKEN)
}

/// Password for the seeded manager account, if one was provisioned.
pub fn admin_password_secret() -> Option<Zeroizing<String>> {
    resolve_secret(ENV_ADMIN_PASSWORD, KEY_ADMIN_PASSWORD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn environment_secret_wins_over_keyring() {
        std::env::set_var(ENV_SHEETS_TOKEN, "  ya29.token  ");
        let token = sheets_access_token();
        std::env::remove_var(ENV_SHEETS_TOKEN);
        assert_eq!(token.as_deref().map(String::as_str), Some("ya29.token"));
    }

    #[test]
    #[serial]
    fn blank_environment_secret_is_ignored() {
        std::env::set_var(ENV_ADMIN_PASSWORD, "   ");
        let from_env = env_secret(ENV_ADMIN_PASSWORD);
        std::env::remove_var(ENV_ADMIN_PASSWORD);
        assert!(from_env.is_none());
    }
}
