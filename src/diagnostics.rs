//! Process-wide execution diagnostics.
//!
//! Every statement dispatched by the core is bracketed by a `before-execute`
//! event and exactly one terminal `after-execute` or `error-execute` event.
//! Events are only built when somebody listens: callers check
//! [`DiagnosticsChannel::is_enabled`] first, which is a single atomic load
//! when no observer is subscribed.
//!
//! Observers receive events by shared reference. The SQL and parameters they
//! see are a record of what was dispatched; rewriting SQL is the job of the
//! intercept hook, not of observers.

use crate::error::DbError;
use crate::models::Params;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, RwLock};
use tracing::{debug, error, info};
use uuid::Uuid;

pub const BEFORE_EXECUTE: &str = "before-execute";
pub const AFTER_EXECUTE: &str = "after-execute";
pub const ERROR_EXECUTE: &str = "error-execute";

/// Stable event identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BeforeExecute,
    AfterExecute,
    ErrorExecute,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::BeforeExecute,
        EventKind::AfterExecute,
        EventKind::ErrorExecute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeExecute => BEFORE_EXECUTE,
            Self::AfterExecute => AFTER_EXECUTE,
            Self::ErrorExecute => ERROR_EXECUTE,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::BeforeExecute => 0,
            Self::AfterExecute => 1,
            Self::ErrorExecute => 2,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static EVENTS_CONSTRUCTED: AtomicU64 = AtomicU64::new(0);

/// Number of events built since process start.
pub fn events_constructed() -> u64 {
    EVENTS_CONSTRUCTED.load(Ordering::Relaxed)
}

/// Read-only record of one execution step.
#[derive(Debug)]
pub struct DiagnosticEvent<'a> {
    /// Shared by the `before` event and its terminal event
    pub operation_id: Uuid,
    pub kind: EventKind,
    /// Core operation name (`query`, `execute`, `page`, ...)
    pub operation: &'static str,
    pub sql: &'a str,
    pub params: &'a Params,
    /// Masked connection target
    pub data_source: &'a str,
    pub timestamp_millis: i64,
    pub elapsed_millis: Option<u64>,
    pub error: Option<&'a DbError>,
}

impl<'a> DiagnosticEvent<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        operation_id: Uuid,
        kind: EventKind,
        operation: &'static str,
        sql: &'a str,
        params: &'a Params,
        data_source: &'a str,
        elapsed_millis: Option<u64>,
        error: Option<&'a DbError>,
    ) -> Self {
        EVENTS_CONSTRUCTED.fetch_add(1, Ordering::Relaxed);
        Self {
            operation_id,
            kind,
            operation,
            sql,
            params,
            data_source,
            timestamp_millis: chrono::Utc::now().timestamp_millis(),
            elapsed_millis,
            error,
        }
    }
}

/// Subscriber to the diagnostics channel. Delivery is synchronous.
pub trait DiagnosticObserver: Send + Sync {
    /// Which event kinds this observer wants. Evaluated once at subscription.
    fn wants(&self, _kind: EventKind) -> bool {
        true
    }

    fn on_event(&self, event: &DiagnosticEvent<'_>);
}

struct Registration {
    id: u64,
    kinds: [bool; 3],
    observer: Arc<dyn DiagnosticObserver>,
}

/// Process-wide event sink.
pub struct DiagnosticsChannel {
    observers: RwLock<Vec<Registration>>,
    listeners: [AtomicUsize; 3],
    next_id: AtomicU64,
}

static CHANNEL: LazyLock<DiagnosticsChannel> = LazyLock::new(DiagnosticsChannel::new);

/// The process-wide channel.
pub fn channel() -> &'static DiagnosticsChannel {
    &CHANNEL
}

impl DiagnosticsChannel {
    fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            listeners: [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)],
            next_id: AtomicU64::new(1),
        }
    }

    /// True if at least one observer wants `kind`.
    pub fn is_enabled(&self, kind: EventKind) -> bool {
        self.listeners[kind.index()].load(Ordering::Acquire) > 0
    }

    /// Register an observer. It stays subscribed until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe(&'static self, observer: Arc<dyn DiagnosticObserver>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kinds = EventKind::ALL.map(|kind| observer.wants(kind));

        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for kind in EventKind::ALL {
            if kinds[kind.index()] {
                self.listeners[kind.index()].fetch_add(1, Ordering::AcqRel);
            }
        }
        observers.push(Registration {
            id,
            kinds,
            observer,
        });

        Subscription { channel: self, id }
    }

    fn unsubscribe(&self, id: u64) {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pos) = observers.iter().position(|r| r.id == id) {
            let registration = observers.remove(pos);
            for kind in EventKind::ALL {
                if registration.kinds[kind.index()] {
                    self.listeners[kind.index()].fetch_sub(1, Ordering::AcqRel);
                }
            }
        }
    }

    /// Deliver an event to every observer interested in its kind.
    pub fn write(&self, event: &DiagnosticEvent<'_>) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for registration in observers.iter() {
            if registration.kinds[event.kind.index()] {
                registration.observer.on_event(event);
            }
        }
    }

    /// Number of live subscriptions.
    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .map(|o| o.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }
}

/// RAII handle; dropping it unsubscribes the observer.
#[must_use = "the observer is unsubscribed when the subscription is dropped"]
pub struct Subscription {
    channel: &'static DiagnosticsChannel,
    id: u64,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.channel.unsubscribe(self.id);
    }
}

/// Forwards diagnostics to `tracing` under the `sqlbridge::diagnostics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl DiagnosticObserver for TracingObserver {
    fn on_event(&self, event: &DiagnosticEvent<'_>) {
        match event.kind {
            EventKind::BeforeExecute => debug!(
                target: "sqlbridge::diagnostics",
                event = BEFORE_EXECUTE,
                operation_id = %event.operation_id,
                operation = event.operation,
                data_source = %event.data_source,
                sql = %event.sql,
                params = event.params.len(),
                "Executing statement"
            ),
            EventKind::AfterExecute => info!(
                target: "sqlbridge::diagnostics",
                event = AFTER_EXECUTE,
                operation_id = %event.operation_id,
                operation = event.operation,
                data_source = %event.data_source,
                elapsed_ms = event.elapsed_millis.unwrap_or_default(),
                sql = %event.sql,
                "Statement completed"
            ),
            EventKind::ErrorExecute => error!(
                target: "sqlbridge::diagnostics",
                event = ERROR_EXECUTE,
                operation_id = %event.operation_id,
                operation = event.operation,
                data_source = %event.data_source,
                elapsed_ms = event.elapsed_millis.unwrap_or_default(),
                error = ?event.error.map(|e| e.to_string()),
                sql = %event.sql,
                "Statement failed"
            ),
        }
    }
}
