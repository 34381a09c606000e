use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::auth::AuthDetails;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("persist error: {0}")]
    Persist(String),
}

pub trait AuthStore: Send + Sync {
    fn load(&self, provider: &str) -> Option<AuthDetails>;
    fn save(&self, provider: &str, auth: &AuthDetails) -> Result<(), StoreError>;
}

/// A simple in-memory store, mainly for testing.
pub struct MemoryAuthStore {
    map: std::sync::Mutex<HashMap<String, AuthDetails>>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self {
            map: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryAuthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStore for MemoryAuthStore {
    fn load(&self, provider: &str) -> Option<AuthDetails> {
        self.map.lock().ok()?.get(provider).cloned()
    }
    fn save(&self, provider: &str, auth: &AuthDetails) -> Result<(), StoreError> {
        self.map
            .lock()
            .map_err(|e| StoreError::Persist(format!("lock poisoned: {}", e)))?
            .insert(provider.to_string(), auth.clone());
        Ok(())
    }
}

/// JSON file store, one object per provider, at `<dir>/auth.json`.
pub struct FileAuthStore {
    path: PathBuf,
}

impl FileAuthStore {
    /// Store under `~/.config/outlook_mcp/` (Unix) or `%APPDATA%\outlook_mcp\` (Windows).
    pub fn new_default() -> Self {
        Self::in_dir(&crate::config::default_app_dir())
    }

    pub fn in_dir(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).ok();
        Self {
            path: dir.join("auth.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> HashMap<String, AuthDetails> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    fn write_map(&self, map: &HashMap<String, AuthDetails>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        let s = serde_json::to_string_pretty(map)
            .map_err(|e| StoreError::Persist(format!("serde: {}", e)))?;
        std::fs::write(&self.path, &s).map_err(|e| StoreError::Persist(e.to_string()))?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms)
                .map_err(|e| StoreError::Persist(format!("chmod: {}", e)))?;
        }

        Ok(())
    }
}

impl AuthStore for FileAuthStore {
    fn load(&self, provider: &str) -> Option<AuthDetails> {
        self.read_map().get(provider).cloned()
    }

    fn save(&self, provider: &str, auth: &AuthDetails) -> Result<(), StoreError> {
        let mut map = self.read_map();
        map.insert(provider.to_string(), auth.clone());
        self.write_map(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(pairs: &[(&str, &str)]) -> AuthDetails {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn file_store_keeps_providers_apart() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuthStore::in_dir(dir.path());
        assert!(store.load("outlook").is_none());

        store
            .save("outlook", &details(&[("access_token", "a1")]))
            .unwrap();
        store.save("other", &details(&[("token", "t")])).unwrap();
        store
            .save("outlook", &details(&[("access_token", "a2")]))
            .unwrap();

        let reopened = FileAuthStore::in_dir(dir.path());
        assert_eq!(
            reopened.load("outlook").unwrap().get("access_token").unwrap(),
            "a2"
        );
        assert_eq!(reopened.load("other").unwrap().get("token").unwrap(), "t");
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileAuthStore::in_dir(dir.path());
        store.save("outlook", &details(&[("k", "v")])).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("auth.json"), "{not json").unwrap();
        let store = FileAuthStore::in_dir(dir.path());
        assert!(store.load("outlook").is_none());
        store.save("outlook", &details(&[("k", "v")])).unwrap();
        assert!(store.load("outlook").is_some());
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryAuthStore::new();
        store.save("outlook", &details(&[("k", "v")])).unwrap();
        assert_eq!(store.load("outlook").unwrap().get("k").unwrap(), "v");
    }
}
