use std::path::PathBuf;

use async_trait::async_trait;
use eyre::Result;
use serde_json::Value;

/// Key under which the liveness checker publishes its merged status document.
pub const STATUS_KEY: &str = "status.json";

/// Recursively merge `source` into `target`. Object fields merge key by key;
/// everything else, arrays included, is overwritten by the source value.
pub fn merge_json(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(key) {
                    Some(existing) if existing.is_object() && source_value.is_object() => {
                        merge_json(existing, source_value)
                    }
                    _ => {
                        target_map.insert(key.clone(), source_value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

/// Keyed JSON document storage for job status.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Read the document at `key`, `None` when it does not exist yet.
    async fn get_json(&self, key: &str) -> Result<Option<Value>>;

    /// Write the document at `key`, replacing whatever is there.
    async fn put_json(&self, key: &str, data: &Value) -> Result<()>;

    /// Deep-merge `data` into the existing document at `key`. Other writers'
    /// subtrees (e.g. another network's status) survive the write.
    async fn merged_put_json(&self, key: &str, data: &Value) -> Result<()> {
        let mut merged = self.get_json(key).await?.unwrap_or_else(|| Value::Object(Default::default()));
        merge_json(&mut merged, data);
        self.put_json(key, &merged).await
    }
}

/// Status storage on the local filesystem, one file per key.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: PathBuf,
}

impl LocalStorage {
    /// A store rooted at `path`. The directory is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.path.join(key)
    }
}

#[async_trait]
impl StatusStore for LocalStorage {
    async fn get_json(&self, key: &str) -> Result<Option<Value>> {
        match tokio::fs::read(self.key_path(key)).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(_) => Ok(None),
        }
    }

    async fn put_json(&self, key: &str, data: &Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.path).await?;
        let serialized = serde_json::to_string_pretty(data)?;
        tokio::fs::write(self.key_path(key), serialized).await?;
        Ok(())
    }
}
