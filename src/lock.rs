use alloy_primitives::Address;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

/// Name of a mutex in the [`LockRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    Global,
    Address(Address),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Global => f.write_str("global"),
            LockKey::Address(address) => write!(f, "{address}"),
        }
    }
}

/// Process-scoped map from lock key to mutex.
///
/// Mutexes are created on first use and never removed. The tokio mutex hands
/// the lock out in FIFO order, so waiters on one key are served fairly.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Returns the mutex for `key`, creating it if this is the first lookup.
    fn lookup(&self, key: LockKey) -> Arc<Mutex<()>> {
        // The shard lock is held only long enough to clone the Arc, never
        // across an await.
        let entry = self.locks.entry(key).or_insert_with(|| {
            trace!(%key, "creating lock");
            Arc::new(Mutex::new(()))
        });
        Arc::clone(entry.value())
    }

    /// Waits until `key` is free and takes it.
    pub async fn acquire(&self, key: LockKey) -> ReleaseToken {
        let guard = self.lookup(key).lock_owned().await;
        debug!(%key, "lock acquired");
        ReleaseToken { key, _guard: guard }
    }

    pub async fn acquire_global(&self) -> ReleaseToken {
        self.acquire(LockKey::Global).await
    }

    pub async fn acquire_for(&self, address: Address) -> ReleaseToken {
        self.acquire(LockKey::Address(address)).await
    }

    /// Barrier on the global lock: waits for any holder to finish, then lets
    /// go immediately.
    pub async fn wait_global_clear(&self) {
        let mutex = self.lookup(LockKey::Global);
        drop(mutex.lock().await);
    }

    /// True while someone holds `key`.
    #[cfg(test)]
    pub(crate) fn is_held(&self, key: LockKey) -> bool {
        self.locks
            .get(&key)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Capability to release one held lock.
///
/// Consumed by [`ReleaseToken::release`]; dropping it releases as well, so a
/// lock cannot be released twice.
#[derive(Debug)]
#[must_use = "the lock stays held until the token is released"]
pub struct ReleaseToken {
    key: LockKey,
    _guard: OwnedMutexGuard<()>,
}

impl ReleaseToken {
    pub fn key(&self) -> LockKey {
        self.key
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        debug!(key = %self.key, "lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lookup_creates_one_mutex() {
        let registry = Arc::new(LockRegistry::new());
        let key = LockKey::Address(Address::repeat_byte(0x11));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.lookup(key) })
            })
            .collect();

        let mut mutexes = Vec::new();
        for handle in handles {
            mutexes.push(handle.await.unwrap());
        }

        assert_eq!(registry.len(), 1);
        assert!(mutexes.iter().all(|m| Arc::ptr_eq(m, &mutexes[0])));
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_released() {
        let registry = LockRegistry::new();
        let address = Address::repeat_byte(0x22);

        let token = registry.acquire_for(address).await;
        assert_eq!(token.key(), LockKey::Address(address));
        assert!(registry.is_held(LockKey::Address(address)));
        assert!(timeout(SHORT, registry.acquire_for(address)).await.is_err());

        token.release();
        assert!(!registry.is_held(LockKey::Address(address)));
        let again = timeout(SHORT, registry.acquire_for(address)).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let registry = LockRegistry::new();
        let _a = registry.acquire_for(Address::repeat_byte(0xaa)).await;
        let _global = registry.acquire_global().await;

        let b = timeout(SHORT, registry.acquire_for(Address::repeat_byte(0xbb))).await;
        assert!(b.is_ok());
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_global_barrier_waits_for_holder_but_does_not_hold() {
        let registry = LockRegistry::new();

        registry.wait_global_clear().await;
        assert!(!registry.is_held(LockKey::Global));

        let held = registry.acquire_global().await;
        assert!(timeout(SHORT, registry.wait_global_clear()).await.is_err());
        drop(held);
        assert!(timeout(SHORT, registry.wait_global_clear()).await.is_ok());
        assert!(!registry.is_held(LockKey::Global));
    }

    #[test]
    fn test_global_key_display() {
        assert_eq!(LockKey::Global.to_string(), "global");
    }
}
