// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config service and storage port for Riffle hosts.
//!
//! Values are stored as pretty JSON blobs under a logical key (for example
//! `dispatch_host`). Storage is abstracted by [`ConfigStore`] so the service
//! binary can use the filesystem adapter while tests use [`MemoryConfigStore`].

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Storage port for raw config blobs, keyed by logical name.
pub trait ConfigStore {
    /// Load a raw blob. Returns [`ConfigError::NotFound`] when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw blob, replacing any previous value.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Blob is not valid JSON for the requested type.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Catch-all.
    #[error("other: {0}")]
    Other(String),
}

/// Serializes config values and delegates storage to a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Wrap `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Borrow the inner store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize the value for `key`. Missing or empty is `Ok(None)`.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) => {
                if bytes.is_empty() {
                    return Ok(None);
                }
                let value = serde_json::from_slice(&bytes)?;
                Ok(Some(value))
            }
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and persist `value` under `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Load `key`, falling back to `T::default()` when absent, and write the
    /// resolved value back if nothing was stored yet.
    ///
    /// A corrupt blob is an error; it is never silently overwritten.
    pub fn load_or_init<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        if let Some(value) = self.load(key)? {
            return Ok(value);
        }
        let value = T::default();
        self.save(key, &value)?;
        Ok(value)
    }
}

/// Process-local store, mostly for tests.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, ConfigError> {
        self.blobs
            .lock()
            .map_err(|_| ConfigError::Other("memory store poisoned".into()))
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        self.lock()?.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        self.lock()?.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Prefs {
        port: u16,
        queries: Vec<String>,
    }

    impl Default for Prefs {
        fn default() -> Self {
            Self {
                port: 50051,
                queries: Vec::new(),
            }
        }
    }

    #[test]
    fn missing_key_loads_as_none() {
        let svc = ConfigService::new(MemoryConfigStore::new());
        assert_eq!(svc.load::<Prefs>("dispatch_host").unwrap(), None);
    }

    #[test]
    fn save_then_load_returns_same_value() {
        let svc = ConfigService::new(MemoryConfigStore::new());
        let prefs = Prefs {
            port: 6000,
            queries: vec!["q1".into()],
        };
        svc.save("dispatch_host", &prefs).unwrap();
        assert_eq!(svc.load::<Prefs>("dispatch_host").unwrap(), Some(prefs));
    }

    #[test]
    fn empty_blob_is_treated_as_missing() {
        let store = MemoryConfigStore::new();
        store.save_raw("dispatch_host", b"").unwrap();
        let svc = ConfigService::new(store);
        assert_eq!(svc.load::<Prefs>("dispatch_host").unwrap(), None);
    }

    #[test]
    fn load_or_init_persists_defaults_once() {
        let svc = ConfigService::new(MemoryConfigStore::new());
        let prefs: Prefs = svc.load_or_init("dispatch_host").unwrap();
        assert_eq!(prefs, Prefs::default());
        let raw = svc.store().load_raw("dispatch_host").unwrap();
        assert!(std::str::from_utf8(&raw).unwrap().contains("50051"));
    }

    #[test]
    fn partial_blob_fills_remaining_fields_from_default() {
        let store = MemoryConfigStore::new();
        store.save_raw("dispatch_host", br#"{"port": 7000}"#).unwrap();
        let svc = ConfigService::new(store);
        let prefs: Prefs = svc.load_or_init("dispatch_host").unwrap();
        assert_eq!(prefs.port, 7000);
        assert!(prefs.queries.is_empty());
    }

    #[test]
    fn corrupt_blob_is_an_error_and_not_overwritten() {
        let store = MemoryConfigStore::new();
        store.save_raw("dispatch_host", b"{not json").unwrap();
        let svc = ConfigService::new(store);
        assert!(matches!(
            svc.load_or_init::<Prefs>("dispatch_host"),
            Err(ConfigError::Serde(_))
        ));
        assert_eq!(
            svc.into_inner().load_raw("dispatch_host").unwrap(),
            b"{not json".to_vec()
        );
    }
}
