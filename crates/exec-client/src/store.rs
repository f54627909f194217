//! Key-value persistence used by the rate limiter.
//!
//! Neither provider offers an atomic read-modify-write; callers doing
//! get-then-set may race with each other.

use crate::error::ExecError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, ExecError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), ExecError>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, ExecError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), ExecError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// All keys in a single JSON object file, rewritten atomically on each set.
pub struct JsonFileStore {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Map<String, Value>, ExecError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => {
                return Err(ExecError::Store(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )))
            }
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ExecError::Store(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
            Err(err) => Err(ExecError::Store(format!(
                "failed to parse {}: {err}",
                self.path.display()
            ))),
        }
    }

    async fn write_all(&self, map: Map<String, Value>) -> Result<(), ExecError> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                ExecError::Store(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        let payload = serde_json::to_vec_pretty(&Value::Object(map))
            .map_err(|err| ExecError::Store(err.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload)
            .await
            .map_err(|err| ExecError::Store(format!("failed to write {}: {err}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|err| {
            ExecError::Store(format!("failed to replace {}: {err}", self.path.display()))
        })
    }
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, ExecError> {
        let _guard = self.io_lock.lock().await;
        Ok(self.read_all().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), ExecError> {
        let _guard = self.io_lock.lock().await;
        let mut map = self.read_all().await?;
        map.insert(key.to_string(), value);
        self.write_all(map).await
    }
}
