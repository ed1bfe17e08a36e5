use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

type DocLock = Arc<tokio::sync::Mutex<()>>;

/// Per-document async locks. Writes to different documents never wait on
/// each other; entries are dropped once no writer holds or awaits them.
#[derive(Default)]
pub(crate) struct DocLocks(Mutex<HashMap<String, DocLock>>);

/// One claim on a map entry. Dropping it releases the entry even when the
/// owning future is cancelled while waiting or running.
struct Claim<'a> {
    locks: &'a DocLocks,
    doc_id: &'a str,
    lock: DocLock,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.0.lock().unwrap_or_else(PoisonError::into_inner);
        // one reference in the map, one here
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(self.doc_id);
        }
    }
}

impl DocLocks {
    /// Runs `fut` while holding the lock for `doc_id`.
    pub(crate) async fn run<F, T>(&self, doc_id: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let claim = {
            let mut locks = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            let lock = Arc::clone(locks.entry(doc_id.to_string()).or_default());
            Claim { locks: self, doc_id, lock }
        };
        let _guard = claim.lock.lock().await;
        fut.await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
