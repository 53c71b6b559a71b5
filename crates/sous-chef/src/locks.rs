use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

/// A set of locks used to prevent concurrent materialization of the same cache resource.
#[derive(Debug, Default)]
pub(crate) struct Locks(Mutex<FxHashMap<String, Arc<Mutex<()>>>>);

impl Locks {
    /// Acquire a lock on the given resource.
    pub(crate) async fn acquire(&self, resource: &str) -> Arc<Mutex<()>> {
        let mut map = self.0.lock().await;
        map.entry(resource.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
