use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per service name.
///
/// Deploy, rollback and delete of the same service run one at a time;
/// different services never wait on each other. The guard is owned so it
/// can travel into a spawned task.
#[derive(Clone, Default)]
pub struct NameLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out before awaiting so no shard lock is held.
        let lock = self.inner.entry(name.to_string()).or_default().clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_name_is_exclusive() {
        let locks = NameLocks::new();
        let guard = locks.acquire("web").await;

        let pending = tokio::time::timeout(Duration::from_millis(20), locks.acquire("web")).await;
        assert!(pending.is_err());

        drop(guard);
        let again = tokio::time::timeout(Duration::from_millis(20), locks.acquire("web")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn different_names_do_not_block() {
        let locks = NameLocks::new();
        let _web = locks.acquire("web").await;
        let api = tokio::time::timeout(Duration::from_millis(20), locks.acquire("api")).await;
        assert!(api.is_ok());
    }
}
