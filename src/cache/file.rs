use crate::cache::error::CacheError;
use crate::cache::{CacheEntry, CacheStore, Lookup, BINCODE_CONFIG};
use crate::clock::Clock;
use crate::key::CacheKey;
use crate::utils::ensure_cache_dir_exists;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::OwnedMutexGuard;
use tokio::task;

const ENTRY_EXTENSION: &str = "entry";

type KeyLock = Arc<tokio::sync::Mutex<()>>;
type KeyLocks = Arc<Mutex<HashMap<CacheKey, KeyLock>>>;

/// Exclusive access to one key. Dropping it releases the lock and prunes
/// lock slots nobody holds any more, wherever the drop happens.
struct HeldKeyLock {
    locks: KeyLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for HeldKeyLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Store that keeps one bincode file per key in a cache folder.
///
/// Writes go to a temporary file in the same folder which is then renamed
/// over the old entry, so readers see either the old or the new entry and
/// never a torn one. Writers and the eviction scan coordinate through a
/// per-key async lock; unrelated keys never contend.
#[derive(Debug)]
pub struct FileCacheStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    key_locks: KeyLocks,
}

impl FileCacheStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::DirCreation`] if the folder cannot be created or
    /// the path exists and is not a directory.
    pub async fn open(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        let dir = dir.into();
        ensure_cache_dir_exists(&dir).await?;
        Ok(Self {
            dir,
            clock,
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key, ENTRY_EXTENSION))
    }

    /// Waits for exclusive access to `key`. A caller dropped while waiting
    /// leaves no slot behind.
    async fn lock_key(&self, key: &CacheKey) -> HeldKeyLock {
        let lock = {
            let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let mut held = HeldKeyLock {
            locks: Arc::clone(&self.key_locks),
            guard: None,
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }

    #[cfg(test)]
    fn lock_slots(&self) -> usize {
        self.key_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Read(path.to_path_buf(), Arc::new(e))),
        };
        let (entry, _) = bincode::serde::decode_from_slice::<CacheEntry, _>(&bytes, BINCODE_CONFIG)
            .map_err(|e| CacheError::Decode(path.to_path_buf(), Arc::new(e)))?;
        Ok(Some(entry))
    }

    fn write_entry_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        let write_err = |e: io::Error| CacheError::Write(path.to_path_buf(), Arc::new(e));
        let mut temp_file = NamedTempFile::new_in(dir).map_err(write_err)?;
        temp_file.write_all(bytes).map_err(write_err)?;
        temp_file.as_file().sync_all().map_err(write_err)?;
        temp_file
            .persist(path)
            .map_err(|e| CacheError::Persist(path.to_path_buf(), Arc::new(e.error)))?;
        Ok(())
    }

    /// Keys of every entry file currently in the folder.
    async fn stored_keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        let scan_err = |e: io::Error| CacheError::Scan(self.dir.clone(), Arc::new(e));
        let mut read_dir = tokio::fs::read_dir(&self.dir).await.map_err(scan_err)?;
        let mut keys = Vec::new();
        while let Some(dir_entry) = read_dir.next_entry().await.map_err(scan_err)? {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(key) = path.file_stem().and_then(|s| s.to_str()).and_then(CacheKey::from_hex) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Deletes every entry matching `should_remove`. Each candidate is re-read
    /// under its key lock, so an entry replaced mid-scan is judged on its new
    /// contents. Undecodable entries are removed as well.
    async fn remove_where<F>(&self, should_remove: F) -> Result<usize, CacheError>
    where
        F: Fn(&CacheEntry) -> bool + Send + Sync,
    {
        let mut removed = 0;
        for key in self.stored_keys().await? {
            let held = self.lock_key(&key).await;
            let outcome = self.remove_if(&key, &should_remove).await;
            drop(held);
            if outcome? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn remove_if<F>(&self, key: &CacheKey, should_remove: &F) -> Result<bool, CacheError>
    where
        F: Fn(&CacheEntry) -> bool + Send + Sync,
    {
        let path = self.entry_path(key);
        let remove = match Self::read_entry(&path).await {
            Ok(Some(entry)) => should_remove(&entry),
            Ok(None) => return Ok(false),
            Err(CacheError::Decode(path, e)) => {
                warn!("Removing undecodable cache entry {}: {}", path.display(), e);
                true
            }
            Err(e) => return Err(e),
        };
        if !remove {
            return Ok(false);
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Delete(path, Arc::new(e))),
        }
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Lookup, CacheError> {
        let now = self.clock.now();
        Ok(match Self::read_entry(&self.entry_path(key)).await? {
            Some(entry) if entry.key == *key && entry.is_fresh_at(now) => Lookup::Hit(Arc::new(entry)),
            _ => Lookup::Miss,
        })
    }

    async fn put(&self, key: &CacheKey, payload: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let held = self.lock_key(key).await;
        let entry = CacheEntry::new(key.clone(), payload, self.clock.now(), ttl);
        let dir = self.dir.clone();
        let path = self.entry_path(key);
        // The lock travels with the write, so it stays held until the file is
        // in place even if this future is dropped first.
        task::spawn_blocking(move || -> Result<(), CacheError> {
            let _held = held;
            let bytes = bincode::serde::encode_to_vec(&entry, BINCODE_CONFIG)
                .map_err(|e| CacheError::Encode(Arc::new(e)))?;
            Self::write_entry_atomically(&dir, &path, &bytes)?;
            debug!("Wrote {} bytes to cache entry {}", bytes.len(), path.display());
            Ok(())
        })
        .await?
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<usize, CacheError> {
        self.remove_where(|entry| entry.expires_at < before).await
    }

    async fn delete_fetched_before(&self, cutoff: DateTime<Utc>) -> Result<usize, CacheError> {
        self.remove_where(|entry| entry.fetched_at < cutoff).await
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.stored_keys().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn key(n: u8) -> CacheKey {
        CacheKey::from_hex(&format!("{:064x}", n)).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn open_at(dir: &Path, t0: DateTime<Utc>) -> Result<(FileCacheStore, ManualClock), CacheError> {
        let clock = ManualClock::new(t0);
        let store = FileCacheStore::open(dir, Arc::new(clock.clone())).await?;
        Ok((store, clock))
    }

    #[tokio::test]
    async fn test_entry_is_fresh_until_ttl() -> Result<(), CacheError> {
        let dir = tempdir().unwrap();
        let (store, clock) = open_at(dir.path(), at(0)).await?;
        store.put(&key(1), vec![1, 2, 3], Duration::from_secs(60)).await?;

        clock.set(at(59));
        assert!(store.get(&key(1)).await?.is_hit());
        clock.set(at(61));
        assert_eq!(store.get(&key(1)).await?, Lookup::Miss);
        Ok(())
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() -> Result<(), CacheError> {
        let dir = tempdir().unwrap();
        {
            let (store, _) = open_at(dir.path(), at(0)).await?;
            store.put(&key(7), b"persisted".to_vec(), Duration::from_secs(60)).await?;
        }
        let (store, _) = open_at(dir.path(), at(30)).await?;
        let Lookup::Hit(entry) = store.get(&key(7)).await? else {
            panic!("entry did not survive reopening the store");
        };
        assert_eq!(entry.payload, b"persisted");
        assert_eq!(entry.fetched_at, at(0));
        assert_eq!(entry.expires_at, at(60));
        assert_eq!(store.len().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_gets_return_identical_payload() -> Result<(), CacheError> {
        let dir = tempdir().unwrap();
        let (store, _) = open_at(dir.path(), at(0)).await?;
        store.put(&key(1), (0..=255).collect(), Duration::from_secs(60)).await?;
        let (Lookup::Hit(a), Lookup::Hit(b)) = (store.get(&key(1)).await?, store.get(&key(1)).await?) else {
            panic!("expected two hits");
        };
        assert_eq!(a.payload, b.payload);
        Ok(())
    }

    #[tokio::test]
    async fn test_eviction_by_expiry_and_by_fetch_time() -> Result<(), CacheError> {
        let dir = tempdir().unwrap();
        let (store, clock) = open_at(dir.path(), at(0)).await?;
        store.put(&key(1), vec![1], Duration::from_secs(10)).await?;
        store.put(&key(2), vec![2], Duration::from_secs(1000)).await?;
        clock.set(at(60));
        store.put(&key(3), vec![3], Duration::from_secs(1000)).await?;

        assert_eq!(store.delete_expired(at(20)).await?, 1);
        assert_eq!(store.delete_fetched_before(at(50)).await?, 1);
        assert_eq!(store.len().await?, 1);
        assert!(store.get(&key(3)).await?.is_hit());
        Ok(())
    }

    #[tokio::test]
    async fn test_refreshed_entry_survives_eviction_scan() -> Result<(), CacheError> {
        let dir = tempdir().unwrap();
        let (store, clock) = open_at(dir.path(), at(0)).await?;
        store.put(&key(1), vec![1], Duration::from_secs(10)).await?;
        clock.set(at(15));

        let store = Arc::new(store);
        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.put(&key(1), vec![2], Duration::from_secs(10)).await })
        };
        let scan = store.delete_expired(at(20)).await?;
        writer.await.unwrap()?;

        // Whichever ran first, the refreshed entry is the one left behind.
        let Lookup::Hit(entry) = store.get(&key(1)).await? else {
            panic!("refreshed entry was evicted (scan removed {})", scan);
        };
        assert_eq!(entry.payload, vec![2]);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_an_error_on_read_and_removed_on_scan() -> Result<(), CacheError> {
        let dir = tempdir().unwrap();
        let (store, _) = open_at(dir.path(), at(0)).await?;
        tokio::fs::write(store.entry_path(&key(9)), b"garbage").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"ignored").await.unwrap();

        assert!(matches!(store.get(&key(9)).await, Err(CacheError::Decode(..))));
        assert_eq!(store.delete_expired(at(0)).await?, 1);
        assert_eq!(store.len().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_put_keeps_the_key_locked_until_written() -> Result<(), CacheError> {
        let dir = tempdir().unwrap();
        let (store, _) = open_at(dir.path(), at(0)).await?;
        let ttl = Duration::from_secs(60);

        // Polled once, then dropped while the write runs on the blocking pool.
        let abandoned_key = key(4);
        let abandoned = store.put(&abandoned_key, vec![1; 1 << 20], ttl);
        let _ = tokio::time::timeout(Duration::ZERO, abandoned).await;

        store.put(&key(4), vec![2], ttl).await?;
        let Lookup::Hit(entry) = store.get(&key(4)).await? else {
            panic!("expected a hit");
        };
        assert_eq!(entry.payload, vec![2]);
        assert_eq!(store.lock_slots(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_slots_are_pruned_after_use() -> Result<(), CacheError> {
        let dir = tempdir().unwrap();
        let (store, _) = open_at(dir.path(), at(0)).await?;
        for n in 0..8 {
            store.put(&key(n), vec![n], Duration::from_secs(1)).await?;
        }
        assert_eq!(store.delete_expired(at(10)).await?, 8);
        assert_eq!(store.lock_slots(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_rejects_a_file_path() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("not_a_dir");
        std::fs::write(&file_path, b"x").unwrap();
        let result = FileCacheStore::open(&file_path, Arc::new(ManualClock::new(at(0)))).await;
        assert!(matches!(result, Err(CacheError::DirCreation(..))));
    }
}
