//! Notification hooks invoked by the orchestrator.
//!
//! Hooks are synchronous and must return promptly; a sink that needs to do
//! I/O should hand events to its own task, which is what [`ChannelSink`] is
//! for. Nothing passed to a sink carries relay credentials.

use std::{sync::Arc, time::Duration};

use courier_common::{RedactedRelay, internal, tracing};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::types::{DeliveryMode, DispatchSummary, TransmissionOutcome};

/// Describes a dispatch that is about to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStarted {
    pub relay: RedactedRelay,
    pub mode: DeliveryMode,
    pub recipients: usize,
    pub batch_size: usize,
    pub pause_ms: u64,
}

/// Subscriber to orchestrator progress. Every hook defaults to doing nothing.
pub trait NotificationSink: Send + Sync {
    fn on_dispatch_started(&self, _started: &DispatchStarted) {}

    /// Called once per transmission, in attempt order.
    fn on_attempt_completed(&self, _index: usize, _outcome: &TransmissionOutcome) {}

    /// Called before the orchestrator sleeps between batches.
    fn on_pause(&self, _after_index: usize, _pause: Duration) {}

    fn on_summary_ready(&self, _summary: &DispatchSummary) {}
}

impl<T: NotificationSink + ?Sized> NotificationSink for Arc<T> {
    fn on_dispatch_started(&self, started: &DispatchStarted) {
        (**self).on_dispatch_started(started);
    }

    fn on_attempt_completed(&self, index: usize, outcome: &TransmissionOutcome) {
        (**self).on_attempt_completed(index, outcome);
    }

    fn on_pause(&self, after_index: usize, pause: Duration) {
        (**self).on_pause(after_index, pause);
    }

    fn on_summary_ready(&self, summary: &DispatchSummary) {
        (**self).on_summary_ready(summary);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl NotificationSink for NoopSink {}

/// Logs each event under the `internal` span.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn on_dispatch_started(&self, started: &DispatchStarted) {
        internal!(
            level = INFO,
            relay = %started.relay,
            mode = ?started.mode,
            recipients = started.recipients,
            "Dispatch started"
        );
    }

    fn on_attempt_completed(&self, index: usize, outcome: &TransmissionOutcome) {
        if outcome.success {
            internal!(
                level = DEBUG,
                index,
                target = ?outcome.target,
                message_id = outcome.message_id.as_deref().unwrap_or_default(),
                "Transmission delivered"
            );
        } else {
            internal!(
                level = WARN,
                index,
                target = ?outcome.target,
                error = outcome.error.as_deref().unwrap_or_default(),
                "Transmission failed"
            );
        }
    }

    fn on_pause(&self, after_index: usize, pause: Duration) {
        internal!(level = DEBUG, after_index, ?pause, "Pausing between batches");
    }

    fn on_summary_ready(&self, summary: &DispatchSummary) {
        internal!(
            level = INFO,
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Dispatch finished"
        );
    }
}

/// An owned copy of a hook invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DispatchEvent {
    Started(DispatchStarted),
    #[serde(rename_all = "camelCase")]
    AttemptCompleted {
        index: usize,
        outcome: TransmissionOutcome,
    },
    #[serde(rename_all = "camelCase")]
    Paused { after_index: usize, pause_ms: u64 },
    SummaryReady(DispatchSummary),
}

/// Forwards events over a bounded channel without ever waiting.
///
/// When the receiver falls behind, events are dropped with a warning.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<DispatchEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DispatchEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    fn forward(&self, event: DispatchEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(?event, "Notification subscriber is falling behind, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                internal!("Notification subscriber has gone away");
            }
        }
    }
}

impl NotificationSink for ChannelSink {
    fn on_dispatch_started(&self, started: &DispatchStarted) {
        self.forward(DispatchEvent::Started(started.clone()));
    }

    fn on_attempt_completed(&self, index: usize, outcome: &TransmissionOutcome) {
        self.forward(DispatchEvent::AttemptCompleted {
            index,
            outcome: outcome.clone(),
        });
    }

    fn on_pause(&self, after_index: usize, pause: Duration) {
        self.forward(DispatchEvent::Paused {
            after_index,
            pause_ms: u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
        });
    }

    fn on_summary_ready(&self, summary: &DispatchSummary) {
        self.forward(DispatchEvent::SummaryReady(summary.clone()));
    }
}

/// Invokes several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }
}

impl NotificationSink for FanoutSink {
    fn on_dispatch_started(&self, started: &DispatchStarted) {
        self.sinks
            .iter()
            .for_each(|sink| sink.on_dispatch_started(started));
    }

    fn on_attempt_completed(&self, index: usize, outcome: &TransmissionOutcome) {
        self.sinks
            .iter()
            .for_each(|sink| sink.on_attempt_completed(index, outcome));
    }

    fn on_pause(&self, after_index: usize, pause: Duration) {
        self.sinks
            .iter()
            .for_each(|sink| sink.on_pause(after_index, pause));
    }

    fn on_summary_ready(&self, summary: &DispatchSummary) {
        self.sinks
            .iter()
            .for_each(|sink| sink.on_summary_ready(summary));
    }
}
