use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Entry {
    id: u64,
    token: CancellationToken,
}

/// Topic → cancellation token for every live subscription loop.
///
/// Registering a topic that is already live cancels the older loop. Each registration gets
/// an id so a finishing loop only removes its own entry.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, topic: &str) -> (u64, CancellationToken) {
        let topic = topic.to_lowercase();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self.entries.lock().insert(
            topic.clone(),
            Entry {
                id,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(%topic, "replacing live subscription");
            previous.token.cancel();
        }
        (id, token)
    }

    /// Signals the loop for `topic` to stop. Returns false if the topic was not live.
    pub fn cancel(&self, topic: &str) -> bool {
        match self.entries.lock().remove(&topic.to_lowercase()) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Entry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.token.cancel();
        }
        drained.len()
    }

    pub fn is_enabled(&self, topic: &str) -> bool {
        self.entries
            .lock()
            .get(&topic.to_lowercase())
            .map(|e| !e.token.is_cancelled())
            .unwrap_or(false)
    }

    /// Drops the entry for `topic` if it still belongs to registration `id`.
    pub fn release(&self, topic: &str, id: u64) {
        let mut entries = self.entries.lock();
        if entries.get(topic).map(|e| e.id) == Some(id) {
            entries.remove(topic);
        }
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.entries.lock().keys().cloned().collect();
        topics.sort();
        topics
    }
}
