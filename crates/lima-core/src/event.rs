//! Asynchronous event reporting.
//!
//! Failures on the acquisition thread cannot be returned to the caller, so
//! plugins report them through an [`EventSink`] instead.

use parking_lot::Mutex;
use std::time::SystemTime;

/// How bad an event is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Informational.
    Info,
    /// Something unexpected but harmless.
    Warning,
    /// The acquisition is degraded.
    Error,
    /// The acquisition cannot continue.
    Fatal,
}

/// Event classification understood by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventCode {
    /// Unclassified.
    Default,
    /// Camera reported a fault.
    CamFault,
    /// Camera produced frames faster than the consumer took them.
    CamOverrun,
    /// Camera ran out of memory.
    CamNoMemory,
}

/// One reported event.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Severity level.
    pub severity: Severity,
    /// Classification.
    pub code: EventCode,
    /// Free text for operators.
    pub description: String,
    /// When the event was created.
    pub timestamp: SystemTime,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(severity: Severity, code: EventCode, description: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            description: description.into(),
            timestamp: SystemTime::now(),
        }
    }
}

/// Receiver for events raised outside the control thread.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Must not block for long.
    fn report(&self, event: Event);
}

/// Records every event in memory.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True if nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drop recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for EventLog {
    fn report(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn report(&self, event: Event) {
        match event.severity {
            Severity::Info => tracing::info!(code = ?event.code, "{}", event.description),
            Severity::Warning => tracing::warn!(code = ?event.code, "{}", event.description),
            Severity::Error | Severity::Fatal => {
                tracing::error!(code = ?event.code, severity = ?event.severity, "{}", event.description)
            }
        }
    }
}
