//! Lifecycle events emitted by the reconcilers.
//!
//! Every action taken on a resource is reported to an [`EventSink`]. Sinks
//! are presentation only: they return nothing and cannot fail or slow the
//! run down.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

use crate::cloud::ResourceKind;

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// The resource was created.
    Created,
    /// The resource was changed in place.
    Updated,
    /// The resource already matched and was left alone.
    Skipped,
    /// The resource was deleted.
    Deleted,
    /// The run is polling the resource.
    Waiting,
    /// A call on the resource failed transiently and is retried.
    Retrying,
    /// A call on the resource failed.
    Failed,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
            Self::Deleted => "deleted",
            Self::Waiting => "waiting",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A structured lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Action taken.
    pub action: EventAction,
    /// Resource name.
    pub name: String,
    /// Optional extra detail, e.g. an identifier or the wait condition.
    pub detail: Option<String>,
}

impl LifecycleEvent {
    /// Creates an event without detail.
    #[must_use]
    pub fn new(kind: ResourceKind, action: EventAction, name: impl Into<String>) -> Self {
        Self {
            kind,
            action,
            name: name.into(),
            detail: None,
        }
    }

    /// Adds detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} '{}'", self.kind, self.action, self.name)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// Receives lifecycle events.
pub trait EventSink: Send + Sync {
    /// Handles one event.
    fn emit(&self, event: &LifecycleEvent);
}

/// Sink that writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &LifecycleEvent) {
        match event.action {
            EventAction::Failed | EventAction::Retrying => warn!("{}", event),
            _ => info!("{}", event),
        }
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingSink {
    /// Creates an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the recorded events with the given action.
    #[must_use]
    pub fn with_action(&self, action: EventAction) -> Vec<LifecycleEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &LifecycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.emit(&LifecycleEvent::new(ResourceKind::Role, EventAction::Created, "a"));
        sink.emit(&LifecycleEvent::new(ResourceKind::Cluster, EventAction::Skipped, "b"));

        let names: Vec<_> = sink.events().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(sink.with_action(EventAction::Skipped).len(), 1);
    }

    #[test]
    fn test_event_display() {
        let event = LifecycleEvent::new(ResourceKind::LoadBalancer, EventAction::Deleted, "lb")
            .with_detail("tagged");
        assert_eq!(event.to_string(), "load balancer deleted 'lb' (tagged)");
    }
}
