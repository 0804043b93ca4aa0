//! The dispatch orchestrator.
//!
//! Individual mode is an explicit state machine over the recipient list
//! ([`IndividualState`]): the async driver only asks it for the next
//! [`Step`], performs it, and feeds the result back. Transmissions are strictly
//! sequential, so outcome order always equals recipient order.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use courier_common::{RelayConfig, internal, tracing};
use courier_tracing::traced;
use tokio_util::sync::CancellationToken;

use crate::{
    aggregate::aggregate,
    config::{DispatchConfig, ValidationLimits},
    error::DispatchError,
    notify::{DispatchStarted, NoopSink, NotificationSink},
    smtp_relay::SmtpRelay,
    transport::RelayTransport,
    types::{
        DeliveryMode, DispatchRequest, DispatchSummary, OutcomeTarget, SingleMessageRequest,
        TransmissionOutcome, TransmissionReceipt, ValidatedRequest,
    },
    validator::Validator,
};

/// Error recorded for recipients that were never attempted.
pub const CANCELLED_BEFORE_ATTEMPT: &str = "dispatch cancelled before attempt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Attempt(usize),
    Pause { after: usize },
    Done,
}

/// Progress through an individual-mode dispatch.
#[derive(Debug)]
struct IndividualState {
    index: usize,
    total: usize,
    batch_size: NonZeroUsize,
    pending_pause: bool,
    outcomes: Vec<TransmissionOutcome>,
}

impl IndividualState {
    fn new(total: usize, batch_size: NonZeroUsize) -> Self {
        Self {
            index: 0,
            total,
            batch_size,
            pending_pause: false,
            outcomes: Vec::with_capacity(total),
        }
    }

    fn next_step(&self) -> Step {
        if self.pending_pause {
            Step::Pause {
                after: self.index - 1,
            }
        } else if self.index < self.total {
            Step::Attempt(self.index)
        } else {
            Step::Done
        }
    }

    /// Records the outcome for the current index. A pause becomes pending
    /// when a batch is complete and recipients remain.
    fn record(&mut self, outcome: TransmissionOutcome) {
        let completed = self.index;
        self.outcomes.push(outcome);
        self.index += 1;
        self.pending_pause =
            (completed + 1) % self.batch_size.get() == 0 && completed + 1 < self.total;
    }

    const fn resume(&mut self) {
        self.pending_pause = false;
    }

    /// Fails every recipient from the current index on without attempting it.
    fn cancel_remaining(&mut self, recipients: &[String]) {
        self.outcomes.extend(recipients[self.index..].iter().map(|recipient| {
            TransmissionOutcome::failed(
                OutcomeTarget::Recipient(recipient.clone()),
                CANCELLED_BEFORE_ATTEMPT,
            )
        }));
        self.index = self.total;
        self.pending_pause = false;
    }
}

/// Drives requests through validation, transmission and aggregation.
pub struct Dispatcher<T = SmtpRelay> {
    transport: T,
    validator: Validator,
    sink: Arc<dyn NotificationSink>,
}

impl Dispatcher<SmtpRelay> {
    /// A dispatcher delivering over SMTP with the given configuration.
    #[must_use]
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(SmtpRelay::new(config), config.limits.clone())
    }
}

impl<T: RelayTransport> Dispatcher<T> {
    #[must_use]
    pub fn new(transport: T, limits: ValidationLimits) -> Self {
        Self {
            transport,
            validator: Validator::new(limits),
            sink: Arc::new(NoopSink),
        }
    }

    /// Replaces the notification sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    #[must_use]
    pub const fn validator(&self) -> &Validator {
        &self.validator
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Validates and runs a bulk request to completion.
    ///
    /// Per-recipient relay failures are recorded in the summary, never
    /// returned; inspect [`DispatchSummary::failed`].
    ///
    /// # Errors
    ///
    /// [`DispatchError::Validation`] before anything is sent, or
    /// [`DispatchError::InvariantViolation`] on an internal defect.
    pub async fn dispatch(
        &self,
        relay: &RelayConfig,
        request: DispatchRequest,
    ) -> Result<DispatchSummary, DispatchError> {
        self.dispatch_with_cancel(relay, request, CancellationToken::new())
            .await
    }

    /// Like [`Dispatcher::dispatch`], stopping between attempts once `cancel`
    /// fires. An attempt already in flight runs to completion; recipients not
    /// yet attempted are recorded as failed and the summary is marked
    /// cancelled.
    #[traced(instrument(level = tracing::Level::INFO, skip_all, fields(relay = %relay.redacted(), recipients = request.recipients.len())), timing(precision = "ms"))]
    pub async fn dispatch_with_cancel(
        &self,
        relay: &RelayConfig,
        request: DispatchRequest,
        cancel: CancellationToken,
    ) -> Result<DispatchSummary, DispatchError> {
        let request = self.validator.validate(relay, request).inspect_err(|err| {
            internal!(level = INFO, %err, "Rejected dispatch request");
        })?;

        self.run(relay, &request, &cancel).await
    }

    /// Runs an already validated request.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvariantViolation`] on an internal defect.
    pub async fn run(
        &self,
        relay: &RelayConfig,
        request: &ValidatedRequest,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary, DispatchError> {
        self.sink.on_dispatch_started(&DispatchStarted {
            relay: relay.redacted(),
            mode: request.mode,
            recipients: request.recipients.len(),
            batch_size: request.batch_size.get(),
            pause_ms: u64::try_from(request.pause.as_millis()).unwrap_or(u64::MAX),
        });

        let (outcomes, cancelled) = match request.mode {
            DeliveryMode::Individual => self.run_individual(relay, request, cancel).await,
            DeliveryMode::CombinedRecipients => self.run_combined(relay, request, cancel).await,
        };

        let mut summary = aggregate(request.mode, request.recipients.len(), outcomes)
            .inspect_err(|err| tracing::error!(%err, "Dispatch accounting is inconsistent"))?;
        summary.cancelled = cancelled;

        self.sink.on_summary_ready(&summary);
        Ok(summary)
    }

    async fn run_individual(
        &self,
        relay: &RelayConfig,
        request: &ValidatedRequest,
        cancel: &CancellationToken,
    ) -> (Vec<TransmissionOutcome>, bool) {
        let mut state = IndividualState::new(request.recipients.len(), request.batch_size);
        let mut cancelled = false;

        loop {
            match state.next_step() {
                Step::Attempt(_) | Step::Pause { .. } if cancel.is_cancelled() => {
                    internal!(
                        level = INFO,
                        remaining = state.total - state.index,
                        "Dispatch cancelled"
                    );
                    cancelled = true;
                    state.cancel_remaining(&request.recipients);
                }
                Step::Attempt(index) => {
                    let recipient = &request.recipients[index];
                    let envelope = request.envelope(vec![recipient.clone()]);
                    let result = self.transport.deliver(relay, &envelope).await;

                    let outcome = TransmissionOutcome::from_result(
                        OutcomeTarget::Recipient(recipient.clone()),
                        result,
                    );
                    self.sink.on_attempt_completed(index, &outcome);
                    state.record(outcome);
                }
                Step::Pause { after } => {
                    self.sink.on_pause(after, request.pause);
                    pause(request.pause, cancel).await;
                    state.resume();
                }
                Step::Done => break,
            }
        }

        (state.outcomes, cancelled)
    }

    async fn run_combined(
        &self,
        relay: &RelayConfig,
        request: &ValidatedRequest,
        cancel: &CancellationToken,
    ) -> (Vec<TransmissionOutcome>, bool) {
        let target = OutcomeTarget::Recipients(request.recipients.clone());

        if cancel.is_cancelled() {
            return (
                vec![TransmissionOutcome::failed(target, CANCELLED_BEFORE_ATTEMPT)],
                true,
            );
        }

        let envelope = request.envelope(request.recipients.clone());
        let result = self.transport.deliver(relay, &envelope).await;

        let outcome = TransmissionOutcome::from_result(target, result);
        self.sink.on_attempt_completed(0, &outcome);
        (vec![outcome], false)
    }

    /// Sends one message with explicit To, Cc and Bcc in a single transaction.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Validation`] for a malformed request, or
    /// [`DispatchError::Relay`] when the relay did not accept the message.
    #[traced(instrument(level = tracing::Level::INFO, skip_all, fields(relay = %relay.redacted())), timing(precision = "ms"))]
    pub async fn send_single(
        &self,
        relay: &RelayConfig,
        request: SingleMessageRequest,
    ) -> Result<TransmissionReceipt, DispatchError> {
        let validated = self.validator.validate_single(relay, request)?;
        let envelope = validated.envelope;

        let result = self.transport.deliver(relay, &envelope).await;

        let target = OutcomeTarget::Recipients(
            envelope
                .envelope_recipients()
                .map(ToString::to_string)
                .collect(),
        );
        self.sink
            .on_attempt_completed(0, &TransmissionOutcome::from_result(target, result.clone()));

        result.map_err(DispatchError::from)
    }

    /// Checks that the relay accepts a connection and the credentials.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Validation`] for an out-of-range port or missing
    /// host, [`DispatchError::Relay`] when the relay check fails.
    pub async fn verify(&self, relay: &RelayConfig) -> Result<(), DispatchError> {
        self.validator.validate_relay(relay)?;
        self.transport.verify(relay).await?;
        internal!(level = INFO, relay = %relay.redacted(), "Relay verified");
        Ok(())
    }
}

/// Sleeps for `duration` unless `cancel` fires first.
async fn pause(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {}
        () = tokio::time::sleep(duration) => {}
    }
}
