//! Event ingest: gate, classify, enqueue.
//!
//! Runs inside the informer's callback, so nothing here blocks. Events for
//! resources this process does not own are dropped before they reach the
//! queue.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info, trace};

use crate::crd::{object_key, CStorResource};
use crate::informer::{Event, EventHandler};
use crate::queue::{Operation, QueueItem, WorkQueue};
use crate::tombstone::TombstoneIndex;

// ============================================================================
// Identity gate
// ============================================================================

/// Decides whether this process owns a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityGate {
    /// Admit everything.
    Open,
    /// Admit only the resource with this UID.
    Uid(String),
    /// Admit only resources carrying `key=value` as a label.
    Label { key: String, value: String },
}

impl IdentityGate {
    /// Gate for a volume sidecar bound to one CStorVolume.
    pub fn sidecar(identity: impl Into<String>) -> Self {
        IdentityGate::Uid(identity.into())
    }

    /// Gate from an optional identity; unset means open.
    pub fn uid_or_open(identity: Option<String>) -> Self {
        identity.map(IdentityGate::Uid).unwrap_or(IdentityGate::Open)
    }

    pub fn admits<K: CStorResource>(&self, obj: &K) -> bool {
        match self {
            IdentityGate::Open => true,
            IdentityGate::Uid(uid) => obj.uid().as_deref() == Some(uid.as_str()),
            IdentityGate::Label { key, value } => obj.labels().get(key) == Some(value),
        }
    }
}

/// What happens to delete events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Stash the payload and enqueue `Destroy`.
    Enqueue,
    /// Log and drop.
    LogOnly,
}

// ============================================================================
// Classification
// ============================================================================

/// Map an update to an operation, or `None` when it should be dropped.
///
/// Order matters: a status-only change is dropped even when the resource
/// version did not move, so a status write never loops back as work.
pub fn classify_update<K: CStorResource>(old: &K, new: &K) -> Option<Operation> {
    let spec_same = old.spec() == new.spec();
    let status_same = old.status() == new.status();
    let deletion_same = old.meta().deletion_timestamp == new.meta().deletion_timestamp;

    if spec_same && !status_same && deletion_same {
        return None;
    }
    if old.resource_version() == new.resource_version() {
        return Some(Operation::PeriodicSync);
    }
    if new.meta().deletion_timestamp.is_some() {
        return Some(Operation::Destroy);
    }
    Some(Operation::Modify)
}

// ============================================================================
// Ingest
// ============================================================================

/// Turns informer events into queue items for one kind.
pub struct EventIngest<K> {
    kind: &'static str,
    queue: Arc<WorkQueue<QueueItem>>,
    tombstones: Arc<TombstoneIndex<K>>,
    gate: IdentityGate,
    deletes: DeletePolicy,
}

impl<K: CStorResource> EventIngest<K> {
    pub fn new(
        kind: &'static str,
        queue: Arc<WorkQueue<QueueItem>>,
        tombstones: Arc<TombstoneIndex<K>>,
        gate: IdentityGate,
        deletes: DeletePolicy,
    ) -> Self {
        Self {
            kind,
            queue,
            tombstones,
            gate,
            deletes,
        }
    }

    fn enqueue(&self, key: String, operation: Operation) {
        debug!(kind = self.kind, key = %key, op = %operation, "Enqueue");
        self.queue.add(QueueItem::new(key, operation));
    }
}

impl<K: CStorResource> EventHandler<K> for EventIngest<K> {
    fn on_event(&self, event: Event<K>) {
        match event {
            Event::Add(obj) => {
                if !self.gate.admits(&obj) {
                    trace!(kind = self.kind, name = %obj.name_any(), "Add for foreign resource dropped");
                    return;
                }
                self.enqueue(object_key(&obj), Operation::Add);
            }
            Event::Update { old, new } => {
                if !self.gate.admits(&new) {
                    trace!(kind = self.kind, name = %new.name_any(), "Update for foreign resource dropped");
                    return;
                }
                match classify_update(&old, &new) {
                    Some(op) => self.enqueue(object_key(&new), op),
                    None => trace!(kind = self.kind, name = %new.name_any(), "Status-only update dropped"),
                }
            }
            Event::Delete(obj) => {
                let key = object_key(&obj);
                match self.deletes {
                    DeletePolicy::LogOnly => {
                        info!(kind = self.kind, key = %key, "Resource deleted");
                    }
                    DeletePolicy::Enqueue => {
                        if !self.gate.admits(&obj) {
                            trace!(kind = self.kind, key = %key, "Delete for foreign resource dropped");
                            return;
                        }
                        self.tombstones.stash(&key, obj);
                        self.enqueue(key, Operation::Destroy);
                    }
                }
            }
        }
    }
}
