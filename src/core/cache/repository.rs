use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::downloader::{digest_file, Checksum, HashAlgorithm, Validators};
use crate::core::error::{EngineError, EngineResult};

const INDEX_FILE: &str = "index.json";

/// A verified file in the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub algorithm: HashAlgorithm,
    pub hex_digest: String,
    pub cached_at: DateTime<Utc>,
    /// URL the file was downloaded from, when that is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Validators::is_empty")]
    pub validators: Validators,
}

impl CacheEntry {
    pub fn checksum(&self) -> Checksum {
        Checksum::computed(self.algorithm, self.hex_digest.clone())
    }

    /// Validators to revalidate this entry against `url` with, if it came
    /// from there and the server sent any.
    pub fn validators_for(&self, url: &str) -> Option<&Validators> {
        (self.origin.as_deref() == Some(url) && !self.validators.is_empty())
            .then_some(&self.validators)
    }
}

type ClaimMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Exclusive right to fill one cache key. Released on drop; the key's lock
/// is forgotten once nobody holds or waits for it.
pub struct CacheClaim {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    claims: Arc<Mutex<ClaimMap>>,
}

impl Drop for CacheClaim {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut claims = self.claims.lock();
        if claims
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            claims.remove(&self.key);
        }
    }
}

impl std::fmt::Debug for CacheClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClaim").field("key", &self.key).finish()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
}

/// Cache key → verified file mapping, persisted as JSON next to a
/// content-addressed store (`<root>/<algorithm>/<xx>/<hex>`).
///
/// Entries are re-verified on every [`restore`](Self::restore); a file that no
/// longer matches its digest is dropped from the index.
pub struct CacheRepository {
    root: PathBuf,
    index: RwLock<BTreeMap<String, CacheEntry>>,
    claims: Arc<Mutex<ClaimMap>>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl CacheRepository {
    /// Opens (or creates) the cache under `root`. An unreadable index is
    /// logged and replaced by an empty one.
    pub fn open(root: impl Into<PathBuf>) -> EngineResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| EngineError::io(&root, e))?;

        let index_path = root.join(INDEX_FILE);
        let entries = match std::fs::read_to_string(&index_path) {
            Ok(raw) => match serde_json::from_str::<CacheIndex>(&raw) {
                Ok(index) => index.entries,
                Err(e) => {
                    warn!("Unable to read cache index {:?}: {}", index_path, e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(EngineError::io(&index_path, e)),
        };
        info!("Opened cache at {:?} ({} entries)", root, entries.len());

        Ok(Self {
            root,
            index: RwLock::new(entries),
            claims: Arc::new(Mutex::new(HashMap::new())),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Location of a digest inside the content store.
    pub fn store_path(&self, checksum: &Checksum) -> PathBuf {
        let hex = checksum.hex_digest();
        self.root
            .join(checksum.algorithm().as_str())
            .join(&hex[..2.min(hex.len())])
            .join(hex)
    }

    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        self.index.read().get(key).cloned()
    }

    /// Serializes writers of one key. Held by a download for its whole run,
    /// so a second request for the same key waits and then hits the cache.
    pub async fn claim(&self, key: &str) -> CacheClaim {
        let lock = {
            let mut claims = self.claims.lock();
            Arc::clone(claims.entry(key.to_string()).or_default())
        };
        CacheClaim {
            key: key.to_string(),
            guard: Some(lock.lock_owned().await),
            claims: Arc::clone(&self.claims),
        }
    }

    /// Copies a verified file into the store and records it under `key`.
    pub async fn insert(
        &self,
        key: &str,
        source: &Path,
        checksum: &Checksum,
    ) -> EngineResult<CacheEntry> {
        self.record(key, source, checksum, None, Validators::default())
            .await
    }

    /// Like [`insert`](Self::insert), also remembering where the file came
    /// from and the validators the server sent with it.
    pub async fn insert_fetched(
        &self,
        key: &str,
        source: &Path,
        checksum: &Checksum,
        origin: &str,
        validators: Validators,
    ) -> EngineResult<CacheEntry> {
        self.record(key, source, checksum, Some(origin.to_string()), validators)
            .await
    }

    async fn record(
        &self,
        key: &str,
        source: &Path,
        checksum: &Checksum,
        origin: Option<String>,
        validators: Validators,
    ) -> EngineResult<CacheEntry> {
        let stored = self.store_path(checksum);
        let present = match tokio::fs::metadata(&stored).await {
            Ok(meta) if meta.is_file() => digest_file(checksum.algorithm(), &stored)
                .await
                .map(|actual| checksum.matches(&actual))
                .unwrap_or(false),
            _ => false,
        };
        if !present {
            copy_atomically(source, &stored).await?;
        }

        let entry = CacheEntry {
            path: stored,
            algorithm: checksum.algorithm(),
            hex_digest: checksum.hex_digest().to_string(),
            cached_at: Utc::now(),
            origin,
            validators,
        };
        self.index.write().insert(key.to_string(), entry.clone());
        self.persist().await?;
        debug!("Cached {} as {}", key, checksum);
        Ok(entry)
    }

    /// Drops `key` from the index. The stored file goes too unless another
    /// key still points at it.
    pub async fn invalidate(&self, key: &str) -> EngineResult<Option<CacheEntry>> {
        let (removed, shared) = {
            let mut index = self.index.write();
            let removed = index.remove(key);
            let shared = removed
                .as_ref()
                .map(|entry| index.values().any(|other| other.path == entry.path))
                .unwrap_or(false);
            (removed, shared)
        };
        let Some(entry) = removed else {
            return Ok(None);
        };

        if !shared {
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(EngineError::io(&entry.path, e)),
            }
        }
        self.persist().await?;
        info!("Invalidated cache entry {}", key);
        Ok(Some(entry))
    }

    /// Copies the cached file for `key` to `dest` after re-verifying it.
    ///
    /// `Ok(None)` is a miss: no entry, an entry for a different digest than
    /// `expected`, or a stored file that fails verification. The last two
    /// also invalidate the entry.
    pub async fn restore(
        &self,
        key: &str,
        expected: Option<&Checksum>,
        dest: &Path,
    ) -> EngineResult<Option<PathBuf>> {
        let Some(entry) = self.lookup(key) else {
            return Ok(None);
        };

        if let Some(expected) = expected {
            if expected.algorithm() != entry.algorithm || !expected.matches(&entry.hex_digest) {
                debug!("Cache entry {} is stale (want {})", key, expected);
                self.invalidate(key).await?;
                return Ok(None);
            }
        }

        let actual = match digest_file(entry.algorithm, &entry.path).await {
            Ok(actual) => actual,
            Err(e) => {
                warn!("Cached file for {} is unreadable: {}", key, e);
                self.invalidate(key).await?;
                return Ok(None);
            }
        };
        if !entry.checksum().matches(&actual) {
            warn!(
                "Cached file for {} is corrupted: expected {}, got {}",
                key, entry.hex_digest, actual
            );
            self.invalidate(key).await?;
            return Ok(None);
        }

        copy_atomically(&entry.path, dest).await?;
        debug!("Restored {} from cache to {:?}", key, dest);
        Ok(Some(dest.to_path_buf()))
    }

    async fn persist(&self) -> EngineResult<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = CacheIndex {
            entries: self.index.read().clone(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        let index_path = self.root.join(INDEX_FILE);
        let tmp = self.root.join(format!("{INDEX_FILE}.tmp"));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| EngineError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &index_path)
            .await
            .map_err(|e| EngineError::io(&index_path, e))
    }
}

impl std::fmt::Debug for CacheRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRepository")
            .field("root", &self.root)
            .field("entries", &self.len())
            .finish()
    }
}

/// Copies through a temporary sibling so readers never see half a file.
async fn copy_atomically(source: &Path, dest: &Path) -> EngineResult<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::io(parent, e))?;
    }
    let tmp = dest.with_file_name(format!(
        ".{}.{}.tmp",
        dest.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        Uuid::new_v4().simple()
    ));
    if let Err(e) = tokio::fs::copy(source, &tmp).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(EngineError::io(source, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(EngineError::io(dest, e));
    }
    Ok(())
}
