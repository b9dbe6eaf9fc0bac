//! Kubernetes event recording.

use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Reasons attached to recorded events.
pub mod reason {
    pub const IMPORTED: &str = "Imported";
    pub const CREATED: &str = "Created";
    pub const FAILED_CREATE: &str = "FailedCreate";
    pub const DESTROYED: &str = "Destroyed";
    pub const FAILED_DESTROY: &str = "FailedDestroy";
    pub const INVALID: &str = "FailValidation";
    pub const SYNCED: &str = "Synced";
    pub const FAILED_SYNC: &str = "FailedSync";
}

/// Records events against a resource. Failures never reach the caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, object: ObjectReference, kind: EventKind, reason: &str, message: String);
}

/// Publishes events through the API server.
pub struct KubeEventSink {
    client: Client,
    reporter: Reporter,
}

impl KubeEventSink {
    pub fn new(client: Client, controller: &str) -> Self {
        let instance = hostname::get().ok().map(|h| h.to_string_lossy().to_string());
        Self {
            client,
            reporter: Reporter {
                controller: controller.to_string(),
                instance,
            },
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn record(&self, object: ObjectReference, kind: EventKind, reason: &str, message: String) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), object);
        let event = Event {
            type_: match kind {
                EventKind::Normal => EventType::Normal,
                EventKind::Warning => EventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(error = %e, reason, "Failed to record event");
        }
    }
}

/// Keeps events in memory; used by tests and when recording is disabled.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<(EventKind, String, String)>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(kind, reason, message)` triples.
    pub fn events(&self) -> Vec<(EventKind, String, String)> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|(_, r, _)| r).collect()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn record(&self, _object: ObjectReference, kind: EventKind, reason: &str, message: String) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((kind, reason.to_string(), message));
    }
}
