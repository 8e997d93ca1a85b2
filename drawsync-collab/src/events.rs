//! Mutation event collection.
//!
//! Observers run while a transaction commits, when the document cannot be
//! read through a fresh transaction. They only record what changed; the
//! patch is generated after the transaction has been released.
//!
//! ```text
//!   commit ──► observe_deep(pages)     ──┐
//!          └─► observe_deep(pageOrder) ──┴─► Pending { origin, events }
//!                                                  │
//!                          EventCollector::drain() ▼
//!                                             EventBatch
//! ```

use crate::origin::TransactionOrigin;
use crate::schema::ReplicatedDocument;
use std::sync::{Arc, Mutex, MutexGuard};
use yrs::types::{Event, Events, PathSegment};
use yrs::{DeepObservable, Subscription, TransactionMut};

/// Which root an event was raised on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    Pages,
    PageOrder,
}

/// One change below a root: the path from the root to the changed map and
/// the keys that changed in it. Array changes carry no keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent {
    pub target: EventTarget,
    pub path: Vec<String>,
    pub keys: Vec<String>,
}

impl MutationEvent {
    pub fn pages(path: &[&str], keys: &[&str]) -> Self {
        Self {
            target: EventTarget::Pages,
            path: path.iter().map(|s| s.to_string()).collect(),
            keys: keys.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Everything recorded since the last drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    pub origin: TransactionOrigin,
    pub events: Vec<MutationEvent>,
}

#[derive(Default)]
struct Pending {
    origin: Option<TransactionOrigin>,
    events: Vec<MutationEvent>,
}

/// Deep observers on the page content map and the page order array.
pub struct EventCollector {
    pending: Arc<Mutex<Pending>>,
    _pages: Subscription,
    _page_order: Subscription,
}

impl EventCollector {
    pub fn attach(replica: &ReplicatedDocument) -> Self {
        let pending = Arc::new(Mutex::new(Pending::default()));

        let sink = Arc::clone(&pending);
        let pages = replica
            .pages_map()
            .observe_deep(move |txn, events| record(&sink, EventTarget::Pages, txn, events));

        let sink = Arc::clone(&pending);
        let page_order = replica
            .page_order_array()
            .observe_deep(move |txn, events| record(&sink, EventTarget::PageOrder, txn, events));

        Self {
            pending,
            _pages: pages,
            _page_order: page_order,
        }
    }

    /// Take everything recorded so far.
    pub fn drain(&self) -> Option<EventBatch> {
        let mut pending = lock(&self.pending);
        let origin = pending.origin.take()?;
        Some(EventBatch {
            origin,
            events: std::mem::take(&mut pending.events),
        })
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.pending).origin.is_some()
    }
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn record(sink: &Mutex<Pending>, target: EventTarget, txn: &TransactionMut, events: &Events) {
    let mut pending = lock(sink);
    // Batches never span transactions in practice; if they do, the first
    // origin decides delivery.
    if pending.origin.is_none() {
        pending.origin = Some(TransactionOrigin::classify(txn.origin()));
    }

    for event in events.iter() {
        let path = event
            .path()
            .into_iter()
            .map(|segment| match segment {
                PathSegment::Key(key) => key.to_string(),
                PathSegment::Index(index) => index.to_string(),
            })
            .collect();
        let keys = match event {
            Event::Map(map) => map.keys(txn).keys().map(|k| k.to_string()).collect(),
            _ => Vec::new(),
        };
        pending.events.push(MutationEvent { target, path, keys });
    }
}
