//! Storage tiers backing the session store.
//!
//! - [`FileTier`]: durable, one `<key>.enc` file per key inside a directory
//!   owned by the client. Survives restarts.
//! - [`MemoryTier`]: ephemeral, lives as long as the process.
//!
//! Tiers hold opaque strings; encryption happens one layer up.

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File extension for values written by [`FileTier`].
const ENTRY_EXTENSION: &str = "enc";

/// A key/value tier the session store can write through.
pub trait StorageTier: Send + Sync {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    /// Read the raw value under `key`, `None` when absent.
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any previous value.
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Remove every entry this tier owns.
    fn clear(&self) -> Result<()>;
}

// ── Durable tier ─────────────────────────────────────────────────

/// Directory-backed durable tier.
#[derive(Debug, Clone)]
pub struct FileTier {
    dir: PathBuf,
}

impl FileTier {
    /// Create a tier rooted at `dir`. The directory is created lazily on
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the entries.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.{ENTRY_EXTENSION}")))
    }
}

impl StorageTier for FileTier {
    fn name(&self) -> &'static str {
        "durable"
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;

        // Write to a sibling temp file, then rename over the entry so a
        // crash never leaves a half-written value behind.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .with_context(|| format!("persisting {}", path.display()))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }

    fn clear(&self) -> Result<()> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("listing {}", self.dir.display())),
        };

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                std::fs::remove_file(&path)
                    .with_context(|| format!("removing {}", path.display()))?;
            }
        }
        Ok(())
    }
}

/// Keys become file names, so keep them to a safe alphabet.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        bail!("Storage key cannot be empty");
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        bail!("Storage key '{key}' contains unsupported characters");
    }
    Ok(())
}

// ── Ephemeral tier ───────────────────────────────────────────────

/// Process-lifetime in-memory tier.
#[derive(Debug, Default)]
pub struct MemoryTier {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl StorageTier for MemoryTier {
    fn name(&self) -> &'static str {
        "ephemeral"
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }
}

impl<T: StorageTier + ?Sized> StorageTier for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        (**self).write(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_tier_write_read_delete() {
        let tmp = TempDir::new().unwrap();
        let tier = FileTier::new(tmp.path().join("session"));

        assert_eq!(tier.read("auth_super_token").unwrap(), None);
        tier.write("auth_super_token", "aes256:abc").unwrap();
        assert_eq!(
            tier.read("auth_super_token").unwrap().as_deref(),
            Some("aes256:abc")
        );

        tier.delete("auth_super_token").unwrap();
        assert_eq!(tier.read("auth_super_token").unwrap(), None);
        // Deleting twice is fine
        tier.delete("auth_super_token").unwrap();
    }

    #[test]
    fn file_tier_overwrites() {
        let tmp = TempDir::new().unwrap();
        let tier = FileTier::new(tmp.path());

        tier.write("k", "first").unwrap();
        tier.write("k", "second").unwrap();
        assert_eq!(tier.read("k").unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn file_tier_clear_keeps_foreign_files() {
        let tmp = TempDir::new().unwrap();
        let tier = FileTier::new(tmp.path());
        let foreign = tmp.path().join("config.toml");
        std::fs::write(&foreign, "api_base_url = \"x\"").unwrap();

        tier.write("a", "1").unwrap();
        tier.write("b", "2").unwrap();
        tier.clear().unwrap();

        assert_eq!(tier.read("a").unwrap(), None);
        assert_eq!(tier.read("b").unwrap(), None);
        assert!(foreign.exists());
    }

    #[test]
    fn file_tier_clear_on_missing_dir_is_noop() {
        let tmp = TempDir::new().unwrap();
        let tier = FileTier::new(tmp.path().join("never-created"));
        tier.clear().unwrap();
    }

    #[test]
    fn file_tier_rejects_path_like_keys() {
        let tmp = TempDir::new().unwrap();
        let tier = FileTier::new(tmp.path());
        assert!(tier.write("../escape", "x").is_err());
        assert!(tier.write("", "x").is_err());
    }

    #[test]
    fn file_tier_write_fails_when_dir_is_a_file() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocked");
        std::fs::write(&blocker, "not a directory").unwrap();

        let tier = FileTier::new(&blocker);
        assert!(tier.write("k", "v").is_err());
    }

    #[test]
    fn memory_tier_basics() {
        let tier = MemoryTier::new();
        assert!(tier.is_empty());

        tier.write("a", "1").unwrap();
        tier.write("b", "2").unwrap();
        assert_eq!(tier.len(), 2);
        assert_eq!(tier.read("a").unwrap().as_deref(), Some("1"));

        tier.delete("a").unwrap();
        assert_eq!(tier.read("a").unwrap(), None);

        tier.clear().unwrap();
        assert!(tier.is_empty());
    }
}
