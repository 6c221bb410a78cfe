//! Local storage for API keys and other named secrets.
//!
//! The store is a synchronous get/set/clear map. Values are kept as given;
//! nothing in the pipeline depends on how a backend encodes them.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::CredentialError;

/// Name under which the completion API key is stored.
pub const API_KEY: &str = "api_key";

/// Name under which the verifier endpoint is stored.
pub const VERIFIER_URL: &str = "verifier_url";

/// Synchronous store of named string secrets.
pub trait CredentialStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>, CredentialError>;
    fn set(&self, name: &str, value: &str) -> Result<(), CredentialError>;
    /// Removes a secret; returns whether it existed.
    fn clear(&self, name: &str) -> Result<bool, CredentialError>;
    /// Stored names, sorted.
    fn names(&self) -> Result<Vec<String>, CredentialError>;
}

fn validate_name(name: &str) -> Result<(), CredentialError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(CredentialError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Mask a secret for display, keeping four characters on each end.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// Process-local store, mostly for tests and one-off runs.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, name: &str) -> Result<Option<String>, CredentialError> {
        let secrets = self.secrets.read().map_err(|_| CredentialError::Poisoned)?;
        Ok(secrets.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), CredentialError> {
        validate_name(name)?;
        let mut secrets = self.secrets.write().map_err(|_| CredentialError::Poisoned)?;
        secrets.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, name: &str) -> Result<bool, CredentialError> {
        let mut secrets = self.secrets.write().map_err(|_| CredentialError::Poisoned)?;
        Ok(secrets.remove(name).is_some())
    }

    fn names(&self) -> Result<Vec<String>, CredentialError> {
        let secrets = self.secrets.read().map_err(|_| CredentialError::Poisoned)?;
        let mut names: Vec<String> = secrets.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// JSON file backed store. The file is rewritten on every change.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$STRATFORGE_HOME/credentials.json`, falling back to `~/.stratforge/credentials.json`.
    pub fn default_path() -> PathBuf {
        let home = std::env::var_os("STRATFORGE_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".stratforge")))
            .unwrap_or_else(|| PathBuf::from(".stratforge"));
        home.join("credentials.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, CredentialError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, secrets: &BTreeMap<String, String>) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(secrets)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, name: &str) -> Result<Option<String>, CredentialError> {
        Ok(self.load()?.remove(name))
    }

    fn set(&self, name: &str, value: &str) -> Result<(), CredentialError> {
        validate_name(name)?;
        let mut secrets = self.load()?;
        secrets.insert(name.to_string(), value.to_string());
        self.save(&secrets)
    }

    fn clear(&self, name: &str) -> Result<bool, CredentialError> {
        let mut secrets = self.load()?;
        let existed = secrets.remove(name).is_some();
        if existed {
            self.save(&secrets)?;
        }
        Ok(existed)
    }

    fn names(&self) -> Result<Vec<String>, CredentialError> {
        Ok(self.load()?.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("short"), "*****");
        assert_eq!(mask_secret("sk-or-v1-abcdef123456"), "sk-o...3456");
        assert_eq!(mask_secret(""), "");
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.get(API_KEY).unwrap(), None);

        store.set(API_KEY, "sk-123").unwrap();
        store.set(VERIFIER_URL, "http://localhost:9000").unwrap();
        assert_eq!(store.get(API_KEY).unwrap().as_deref(), Some("sk-123"));
        assert_eq!(store.names().unwrap(), vec![API_KEY, VERIFIER_URL]);

        assert!(store.clear(API_KEY).unwrap());
        assert!(!store.clear(API_KEY).unwrap());
        assert_eq!(store.get(API_KEY).unwrap(), None);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let store = MemoryCredentialStore::new();
        assert!(matches!(
            store.set("", "x"),
            Err(CredentialError::InvalidName(_))
        ));
        assert!(matches!(
            store.set("api key", "x"),
            Err(CredentialError::InvalidName(_))
        ));
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        let store = FileCredentialStore::new(&path);
        assert_eq!(store.get(API_KEY).unwrap(), None);
        store.set(API_KEY, "sk-file").unwrap();

        let reopened = FileCredentialStore::new(&path);
        assert_eq!(reopened.get(API_KEY).unwrap().as_deref(), Some("sk-file"));
        assert_eq!(reopened.names().unwrap(), vec![API_KEY.to_string()]);

        assert!(reopened.clear(API_KEY).unwrap());
        assert_eq!(store.get(API_KEY).unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));
        store.set(API_KEY, "sk").unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "not json").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(matches!(store.get(API_KEY), Err(CredentialError::Json(_))));
    }
}
