use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use locus_core::CollectionId;
use tokio::sync::OwnedMutexGuard;

/// Per-collection async mutexes.
///
/// Two ingestions of the same collection run one after the other; different
/// collections never wait on each other.
///
/// # Examples
///
/// ```
/// use locus_core::CollectionId;
/// use locus_engine::CollectionLocks;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let locks = CollectionLocks::default();
/// let a = CollectionId::parse("repo-0000000a").unwrap();
/// let b = CollectionId::parse("repo-0000000b").unwrap();
///
/// let _held = locks.lock(&a).await;
/// assert!(locks.try_lock(&a).is_none());
/// assert!(locks.try_lock(&b).is_some());
/// # }
/// ```
#[derive(Debug, Default)]
pub struct CollectionLocks {
    inner: Mutex<HashMap<CollectionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl CollectionLocks {
    /// Wait for exclusive access to `id`.
    pub async fn lock(&self, id: &CollectionId) -> OwnedMutexGuard<()> {
        self.slot(id).lock_owned().await
    }

    /// Take the lock for `id` if nobody holds it.
    pub fn try_lock(&self, id: &CollectionId) -> Option<OwnedMutexGuard<()>> {
        self.slot(id).try_lock_owned().ok()
    }

    fn slot(&self, id: &CollectionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(id.clone()).or_default().clone()
    }
}
