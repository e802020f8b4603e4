use crate::cache::error::CacheError;
use crate::cache::{CacheEntry, CacheStore, Lookup};
use crate::clock::Clock;
use crate::key::CacheKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// In-process store backed by a sharded concurrent map.
///
/// Eviction goes through `retain`, which evaluates the predicate under each
/// shard's write lock, so a concurrent `put` is either seen (and kept, as its
/// expiry is later) or lands after the shard has been scanned.
#[derive(Debug)]
pub struct MemoryCacheStore {
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    fn remove_where(&self, should_remove: impl Fn(&CacheEntry) -> bool) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let remove = should_remove(&**entry);
            if remove {
                removed += 1;
            }
            !remove
        });
        removed
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Lookup, CacheError> {
        let now = self.clock.now();
        Ok(match self.entries.get(key) {
            Some(entry) if entry.is_fresh_at(now) => Lookup::Hit(Arc::clone(entry.value())),
            _ => Lookup::Miss,
        })
    }

    async fn put(&self, key: &CacheKey, payload: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry::new(key.clone(), payload, self.clock.now(), ttl);
        self.entries.insert(key.clone(), Arc::new(entry));
        Ok(())
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<usize, CacheError> {
        Ok(self.remove_where(|entry| entry.expires_at < before))
    }

    async fn delete_fetched_before(&self, cutoff: DateTime<Utc>) -> Result<usize, CacheError> {
        Ok(self.remove_where(|entry| entry.fetched_at < cutoff))
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn key(n: u8) -> CacheKey {
        CacheKey::from_hex(&format!("{:064x}", n)).unwrap()
    }

    fn store_at(t0: DateTime<Utc>) -> (MemoryCacheStore, ManualClock) {
        let clock = ManualClock::new(t0);
        (MemoryCacheStore::new(Arc::new(clock.clone())), clock)
    }

    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_entry_is_fresh_until_ttl() -> Result<(), CacheError> {
        let (store, clock) = store_at(epoch());
        store.put(&key(1), vec![1, 2, 3], Duration::from_secs(60)).await?;

        clock.set(Utc.timestamp_opt(59, 0).unwrap());
        assert!(store.get(&key(1)).await?.is_hit());

        clock.set(Utc.timestamp_opt(61, 0).unwrap());
        assert_eq!(store.get(&key(1)).await?, Lookup::Miss);
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_gets_return_identical_payload() -> Result<(), CacheError> {
        let (store, _) = store_at(epoch());
        store.put(&key(1), b"payload".to_vec(), Duration::from_secs(60)).await?;
        let (Lookup::Hit(a), Lookup::Hit(b)) = (store.get(&key(1)).await?, store.get(&key(1)).await?) else {
            panic!("expected two hits");
        };
        assert_eq!(a.payload, b.payload);
        assert_eq!(a.payload, b"payload");
        Ok(())
    }

    #[tokio::test]
    async fn test_put_replaces_without_mutating_previous_hit() -> Result<(), CacheError> {
        let (store, clock) = store_at(epoch());
        store.put(&key(1), vec![1], Duration::from_secs(60)).await?;
        let Lookup::Hit(old) = store.get(&key(1)).await? else {
            panic!("expected hit");
        };

        clock.advance(chrono::Duration::seconds(10));
        store.put(&key(1), vec![2], Duration::from_secs(60)).await?;
        let Lookup::Hit(new) = store.get(&key(1)).await? else {
            panic!("expected hit");
        };

        assert_eq!(old.payload, vec![1]);
        assert_eq!(new.payload, vec![2]);
        assert_eq!(new.fetched_at, Utc.timestamp_opt(10, 0).unwrap());
        assert_eq!(store.len().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_expired_counts_removed_entries() -> Result<(), CacheError> {
        let (store, _) = store_at(epoch());
        store.put(&key(1), vec![1], Duration::from_secs(10)).await?;
        store.put(&key(2), vec![2], Duration::from_secs(20)).await?;
        store.put(&key(3), vec![3], Duration::from_secs(300)).await?;

        let removed = store.delete_expired(Utc.timestamp_opt(25, 0).unwrap()).await?;
        assert_eq!(removed, 2);
        assert_eq!(store.len().await?, 1);
        assert!(store.get(&key(3)).await?.is_hit());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_fetched_before_uses_fetch_time() -> Result<(), CacheError> {
        let (store, clock) = store_at(Utc.timestamp_opt(40, 0).unwrap());
        store.put(&key(1), vec![1], Duration::from_secs(3600)).await?;
        clock.set(Utc.timestamp_opt(60, 0).unwrap());
        store.put(&key(2), vec![2], Duration::from_secs(3600)).await?;

        let removed = store.delete_fetched_before(Utc.timestamp_opt(50, 0).unwrap()).await?;
        assert_eq!(removed, 1);
        assert_eq!(store.get(&key(1)).await?, Lookup::Miss);
        assert!(store.get(&key(2)).await?.is_hit());
        Ok(())
    }

    #[tokio::test]
    async fn test_refreshed_entry_survives_eviction_scan() -> Result<(), CacheError> {
        let (store, clock) = store_at(epoch());
        store.put(&key(1), vec![1], Duration::from_secs(10)).await?;

        // The refresh lands before the scan whose reference time is past the
        // original expiry but before the new one.
        clock.set(Utc.timestamp_opt(15, 0).unwrap());
        store.put(&key(1), vec![2], Duration::from_secs(10)).await?;
        let removed = store.delete_expired(Utc.timestamp_opt(20, 0).unwrap()).await?;

        assert_eq!(removed, 0);
        let Lookup::Hit(entry) = store.get(&key(1)).await? else {
            panic!("refreshed entry was evicted");
        };
        assert_eq!(entry.payload, vec![2]);
        Ok(())
    }
}
