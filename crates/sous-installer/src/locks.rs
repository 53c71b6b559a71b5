use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

/// Per-package-name locks: operations on distinct names run freely in parallel, while
/// two operations naming the same distribution are serialized.
#[derive(Debug, Default)]
pub(crate) struct Locks(Mutex<FxHashMap<String, Arc<Mutex<()>>>>);

impl Locks {
    pub(crate) async fn acquire(&self, name: &str) -> Arc<Mutex<()>> {
        let mut map = self.0.lock().await;
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
