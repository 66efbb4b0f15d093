// Access token storage and owner-only file modes.
//
// The bearer token lives in the OS keychain under `dev.shelf.daemon` /
// `access_token`. `shelfd login` writes it, `shelfd logout` removes it, and
// the daemon reads it at startup. `SHELF_ACCESS_TOKEN` takes precedence for
// hosts without a secret service.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

const KEYRING_SERVICE: &str = "dev.shelf.daemon";
const ACCESS_TOKEN_ACCOUNT: &str = "access_token";

pub const ACCESS_TOKEN_ENV: &str = "SHELF_ACCESS_TOKEN";

pub fn store_access_token(token: &str) -> Result<()> {
    store_token(&KeyringSecretStore, token)
}

/// Removing a token that was never stored is not an error.
pub fn clear_access_token() -> Result<()> {
    KeyringSecretStore
        .remove(KEYRING_SERVICE, ACCESS_TOKEN_ACCOUNT)
        .context("failed to clear access token from keychain")
}

/// The bearer token for the remote service: `SHELF_ACCESS_TOKEN` if set,
/// otherwise the keychain entry.
pub fn access_token() -> Result<Option<String>> {
    let from_env = std::env::var(ACCESS_TOKEN_ENV).ok();
    resolve_token(&KeyringSecretStore, from_env)
}

pub fn ensure_owner_only_file(path: &Path) -> Result<()> {
    restrict_mode(path, 0o600)
}

pub fn ensure_owner_only_dir(path: &Path) -> Result<()> {
    restrict_mode(path, 0o700)
}

#[cfg(unix)]
fn restrict_mode(path: &Path, wanted: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if !path.exists() {
        return Ok(());
    }
    let mode = fs::metadata(path)
        .with_context(|| format!("failed to read metadata for `{}`", path.display()))?
        .permissions()
        .mode()
        & 0o777;
    if mode != wanted {
        fs::set_permissions(path, fs::Permissions::from_mode(wanted))
            .with_context(|| format!("failed to set mode {wanted:o} on `{}`", path.display()))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_mode(_path: &Path, _wanted: u32) -> Result<()> {
    Ok(())
}

trait SecretStore {
    fn write(&self, service: &str, account: &str, value: &str) -> Result<()>;
    fn read(&self, service: &str, account: &str) -> Result<Option<String>>;
    fn remove(&self, service: &str, account: &str) -> Result<()>;
}

struct KeyringSecretStore;

impl KeyringSecretStore {
    fn entry(service: &str, account: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(service, account).context("failed to open keychain entry")
    }
}

impl SecretStore for KeyringSecretStore {
    fn write(&self, service: &str, account: &str, value: &str) -> Result<()> {
        Self::entry(service, account)?.set_password(value).context("failed to write keychain entry")
    }

    fn read(&self, service: &str, account: &str) -> Result<Option<String>> {
        match Self::entry(service, account)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(error).context("failed to read keychain entry"),
        }
    }

    fn remove(&self, service: &str, account: &str) -> Result<()> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(error).context("failed to delete keychain entry"),
        }
    }
}

fn store_token(store: &dyn SecretStore, token: &str) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        bail!("access token must not be empty");
    }
    store
        .write(KEYRING_SERVICE, ACCESS_TOKEN_ACCOUNT, token)
        .context("failed to store access token in keychain")
}

fn resolve_token(store: &dyn SecretStore, from_env: Option<String>) -> Result<Option<String>> {
    if let Some(token) = from_env.filter(|token| !token.trim().is_empty()) {
        return Ok(Some(token.trim().to_string()));
    }
    store
        .read(KEYRING_SERVICE, ACCESS_TOKEN_ACCOUNT)
        .context("failed to read access token from keychain")
}
