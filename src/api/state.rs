use std::sync::Arc;

use crate::detect::dedup::Deduplicator;
use crate::queue::TaskQueue;
use crate::storage::EventStore;

#[derive(Clone)]
pub struct AppState {
    pub store: EventStore,
    pub queue: TaskQueue,
    pub deduplicator: Arc<Deduplicator>,
}
