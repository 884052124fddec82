//! Session storage abstractions plus filesystem and in-memory backends.
//!
//! The filesystem backend survives restarts. The memory backend lives only as
//! long as the process and is the degraded mode used when no durable location
//! is available; callers can ask a store which one they got.

mod fs_store;
mod mem_store;

pub use fs_store::FsStore;
pub use mem_store::MemStore;

use serde::{Serialize, de::DeserializeOwned};
use std::{io, path::Path, path::PathBuf, sync::Arc};

pub type StoreResult<T> = Result<T, StoreError>;
pub type DynStore = Arc<dyn Store>;

/// How long values written to a store survive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Durability {
    /// Survives process restarts.
    Durable,
    /// Lost when the process exits.
    PageLifetime,
}

/// Key/value store for session state.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn put(&self, key: &str, value: &str) -> StoreResult<()>;
    fn remove(&self, key: &str) -> StoreResult<()>;
    fn durability(&self) -> Durability;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON error for key '{key}': {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid store key '{0}'")]
    InvalidKey(String),
}

pub(crate) fn io_error(path: impl Into<PathBuf>, err: io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source: err,
    }
}

pub(crate) fn validate_key(key: &str) -> StoreResult<()> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !key.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Typed JSON access on top of any [`Store`].
pub trait JsonStoreExt {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>>;
    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()>;
}

impl<S: Store + ?Sized> JsonStoreExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Json {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })?;
        self.put(key, &raw)
    }
}

/// Opens the most durable store available.
///
/// Falls back to a [`MemStore`] when persistence is disallowed, no root is
/// configured, or the filesystem store cannot be opened. The fallback is
/// logged, not reported as an error.
pub fn open_preferred(root: Option<&Path>, persistence_allowed: bool) -> DynStore {
    let root = match root {
        Some(root) if persistence_allowed => root,
        _ => {
            tracing::warn!(
                persistence_allowed,
                "no durable storage location; session state is page-lifetime only"
            );
            return Arc::new(MemStore::new());
        }
    };
    match FsStore::open(root) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::warn!(
                error = %err,
                root = %root.display(),
                "durable storage unavailable; session state is page-lifetime only"
            );
            Arc::new(MemStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Marker {
        name: String,
        counter: u64,
    }

    #[test]
    fn keys_reject_path_tricks() {
        assert!(validate_key("session_id").is_ok());
        assert!(validate_key("app.v1-id").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("a/b").is_err());
    }

    #[test]
    fn json_helpers_round_trip_through_dyn_store() {
        let store: DynStore = Arc::new(MemStore::new());
        let value = Marker {
            name: "demo".into(),
            counter: 3,
        };
        store.put_json("marker", &value).expect("put");
        let loaded: Option<Marker> = store.get_json("marker").expect("get");
        assert_eq!(loaded, Some(value));
        let missing: Option<Marker> = store.get_json("absent").expect("get");
        assert!(missing.is_none());
    }

    #[test]
    fn corrupt_json_is_reported_with_key() {
        let store = MemStore::new();
        store.put("marker", "{not json").expect("put");
        let err = store.get_json::<Marker>("marker").unwrap_err();
        assert!(matches!(err, StoreError::Json { key, .. } if key == "marker"));
    }

    #[test]
    fn open_preferred_picks_durable_when_allowed() {
        let dir = TempDir::new().expect("tmp");
        let store = open_preferred(Some(dir.path()), true);
        assert_eq!(store.durability(), Durability::Durable);
    }

    #[test]
    fn open_preferred_degrades_without_persistence() {
        let dir = TempDir::new().expect("tmp");
        assert_eq!(
            open_preferred(Some(dir.path()), false).durability(),
            Durability::PageLifetime
        );
        assert_eq!(open_preferred(None, true).durability(), Durability::PageLifetime);
    }

    #[test]
    fn open_preferred_degrades_when_root_is_unusable() {
        let dir = TempDir::new().expect("tmp");
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"x").expect("write");
        let store = open_preferred(Some(&file), true);
        assert_eq!(store.durability(), Durability::PageLifetime);
    }
}
