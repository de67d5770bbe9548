use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

pub const SESSION_STORE_FILE: &str = "session.json";

/// Key/value session storage backed by one JSON object on disk.
///
/// Reads always refresh from disk, and writes merge only the keys this
/// instance touched, so several handles on the same file (quota tracker,
/// submitted set, another terminal) never clobber each other.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    payload: Option<Map<String, Value>>,
    dirty_keys: Vec<String>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: None,
            dirty_keys: Vec::new(),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SESSION_STORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.refresh().get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let payload = self.refresh();
        if payload.get(key) == Some(&value) {
            return Ok(());
        }
        payload.insert(key.to_string(), value);
        if !self.dirty_keys.iter().any(|existing| existing == key) {
            self.dirty_keys.push(key.to_string());
        }
        self.flush()
    }

    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.payload = Some(Map::new());
        self.dirty_keys.clear();
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove {}", self.path.display()))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        if self.dirty_keys.is_empty() {
            return Ok(());
        }

        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        if let Some(payload) = &self.payload {
            for key in &self.dirty_keys {
                if let Some(value) = payload.get(key) {
                    on_disk.insert(key.clone(), value.clone());
                }
            }
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = Some(on_disk);
        self.dirty_keys.clear();
        Ok(())
    }

    fn refresh(&mut self) -> &mut Map<String, Value> {
        let loaded = read_json_object(&self.path).unwrap_or_default();
        self.payload.insert(loaded)
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )
    .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::SessionStore;

    #[test]
    fn store_round_trips_values() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = SessionStore::in_dir(temp.path());
        store.set("key", json!({"value": 1}))?;
        assert_eq!(store.get("key"), Some(json!({"value": 1})));
        assert_eq!(store.get("missing"), None);
        Ok(())
    }

    #[test]
    fn store_survives_reopen() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = SessionStore::in_dir(temp.path());
        store.set("count", json!(3))?;

        let mut reopened = SessionStore::in_dir(temp.path());
        assert_eq!(reopened.get("count"), Some(json!(3)));
        Ok(())
    }

    #[test]
    fn store_merges_with_concurrent_writer() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store_a = SessionStore::in_dir(temp.path());
        let mut store_b = SessionStore::in_dir(temp.path());

        store_a.set("a", json!(1))?;
        store_b.set("b", json!(2))?;
        store_a.set("c", json!(3))?;

        let mut reloaded = SessionStore::in_dir(temp.path());
        assert_eq!(reloaded.get("a"), Some(json!(1)));
        assert_eq!(reloaded.get("b"), Some(json!(2)));
        assert_eq!(reloaded.get("c"), Some(json!(3)));
        Ok(())
    }

    #[test]
    fn store_set_does_not_noop_on_stale_snapshot() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store_a = SessionStore::in_dir(temp.path());
        let mut store_b = SessionStore::in_dir(temp.path());

        store_a.set("key", json!(1))?;
        store_b.set("key", json!(2))?;
        store_a.set("key", json!(1))?;

        let mut reloaded = SessionStore::in_dir(temp.path());
        assert_eq!(reloaded.get("key"), Some(json!(1)));
        Ok(())
    }

    #[test]
    fn clear_removes_the_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = SessionStore::in_dir(temp.path());
        store.set("quota:1", json!(1))?;
        store.set("other", json!(true))?;
        let mut reloaded = SessionStore::in_dir(temp.path());
        assert_eq!(reloaded.get("quota:1"), Some(json!(1)));

        store.clear()?;
        assert!(!store.path().exists());
        assert_eq!(reloaded.get("other"), None);
        Ok(())
    }
}
