use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

/// A set of locks used to prevent concurrent builds of the same resource.
#[derive(Debug, Default)]
pub(crate) struct Locks(Mutex<FxHashMap<String, Arc<Mutex<()>>>>);

impl Locks {
    /// Acquire the lock handle for the given resource key.
    pub(crate) async fn acquire(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.0.lock().await;
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
