//! File-per-key durable state store.
//!
//! Each key is a filesystem path relative to the store's directory, so a key
//! containing `/` creates nested directories. There is no in-process
//! locking here; callers that need mutual exclusion (the reconciler, via a
//! project lock) arrange it themselves.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct KeyStore {
    directory: PathBuf,
}

impl KeyStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        KeyStore {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Write `value` to `key`, creating parent directories as needed.
    /// The write is unbuffered so a crash mid-write cannot leave stale
    /// buffered bytes unflushed.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let keyfile = self.keyfile(key);

        if let Some(parent) = keyfile.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&keyfile)
            .with_context(|| format!("failed to open {}", keyfile.display()))?;

        file.write_all(value.as_bytes())
            .with_context(|| format!("failed to write {}", keyfile.display()))?;
        file.sync_all().ok();

        Ok(())
    }

    /// Read `key`, returning `default` if it is unset.
    pub fn get(&self, key: &str, default: Option<&str>) -> Result<Option<String>> {
        if !self.has(key) {
            return Ok(default.map(str::to_string));
        }

        let keyfile = self.keyfile(key);
        let contents = fs::read_to_string(&keyfile)
            .with_context(|| format!("failed to read {}", keyfile.display()))?;
        Ok(Some(contents))
    }

    pub fn has(&self, key: &str) -> bool {
        self.keyfile(key).is_file()
    }

    /// Remove `key`. A plain file is removed directly; anything else
    /// (a directory left over from a key with sub-keys) is removed
    /// recursively on a best-effort basis.
    pub fn unset(&self, key: &str) -> Result<()> {
        let keyfile = self.keyfile(key);

        if keyfile.is_file() {
            fs::remove_file(&keyfile)
                .with_context(|| format!("failed to remove {}", keyfile.display()))?;
        } else {
            fs::remove_dir_all(&keyfile).ok();
        }

        Ok(())
    }

    fn keyfile(&self, key: &str) -> PathBuf {
        self.directory.join(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());

        store.set("name", "web").unwrap();
        assert_eq!(store.get("name", None).unwrap(), Some("web".to_string()));
    }

    #[test]
    fn get_missing_key_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());

        assert_eq!(store.get("missing", Some("fallback")).unwrap(), Some("fallback".to_string()));
        assert_eq!(store.get("missing", None).unwrap(), None);
    }

    #[test]
    fn set_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());

        store.set("service/web/jail", "my-jail").unwrap();
        assert!(store.has("service/web/jail"));
        assert_eq!(
            store.get("service/web/jail", None).unwrap(),
            Some("my-jail".to_string())
        );
    }

    #[test]
    fn unset_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());

        store.set("name", "web").unwrap();
        store.unset("name").unwrap();
        assert!(!store.has("name"));
    }

    #[test]
    fn unset_missing_key_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());

        assert!(store.unset("never-set").is_ok());
    }
}
