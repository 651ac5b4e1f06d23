use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Per-camera entries owned by one supervisor instance.
///
/// Entries are only inserted while holding the camera's command lock, so a
/// check followed by an insert under [`Registry::lock`] is atomic with
/// respect to other commands for the same camera.
pub struct Registry<T> {
    entries: RwLock<HashMap<String, T>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes commands for one camera
    pub async fn lock(&self, camera_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .await
            .entry(camera_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Camera ids that have ever received a command
    pub async fn known(&self) -> Vec<String> {
        self.locks.lock().await.keys().cloned().collect()
    }

    pub async fn contains(&self, camera_id: &str) -> bool {
        self.entries.read().await.contains_key(camera_id)
    }

    /// Inserts unless an entry exists, handing the value back in that case
    pub async fn insert_if_absent(&self, camera_id: &str, value: T) -> Result<(), T> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(camera_id) {
            return Err(value);
        }
        entries.insert(camera_id.to_string(), value);
        Ok(())
    }

    pub async fn with<R>(&self, camera_id: &str, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.entries.read().await.get(camera_id).map(f)
    }

    pub async fn map<R>(&self, f: impl Fn(&str, &T) -> R) -> Vec<R> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, v)| f(k, v))
            .collect()
    }

    pub async fn remove(&self, camera_id: &str) -> Option<T> {
        self.entries.write().await.remove(camera_id)
    }

    /// Removes the entry only if `pred` still holds for it
    pub async fn remove_if(&self, camera_id: &str, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut entries = self.entries.write().await;
        if entries.get(camera_id).is_some_and(pred) {
            entries.remove(camera_id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first() {
        let registry = Registry::new();
        assert!(registry.insert_if_absent("cam01", 1).await.is_ok());
        assert_eq!(registry.insert_if_absent("cam01", 2).await, Err(2));
        assert_eq!(registry.with("cam01", |v| *v).await, Some(1));
        assert_eq!(registry.map(|_, v| *v).await, vec![1]);
    }

    #[tokio::test]
    async fn test_remove_if_checks_owner() {
        let registry = Registry::new();
        registry.insert_if_absent("cam01", 7u64).await.unwrap();
        assert_eq!(registry.remove_if("cam01", |g| *g == 6).await, None);
        assert!(registry.contains("cam01").await);
        assert_eq!(registry.remove_if("cam01", |g| *g == 7).await, Some(7));
        assert!(!registry.contains("cam01").await);
    }

    #[tokio::test]
    async fn test_lock_is_per_camera() {
        let registry = Arc::new(Registry::<()>::new());
        let held = registry.lock("cam01").await;

        // other cameras are not blocked
        let other = tokio::time::timeout(Duration::from_millis(100), registry.lock("cam02")).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(50), registry.lock("cam01")).await;
        assert!(same.is_err());

        drop(held);
        let same = tokio::time::timeout(Duration::from_millis(100), registry.lock("cam01")).await;
        assert!(same.is_ok());

        let mut known = registry.known().await;
        known.sort();
        assert_eq!(known, vec!["cam01", "cam02"]);
    }
}
