//! The seam between the orchestrator and the network.

use std::sync::Arc;

use async_trait::async_trait;
use courier_common::RelayConfig;

use crate::{
    error::RelayError,
    types::{MessageEnvelope, TransmissionReceipt},
};

/// Delivers envelopes to a relay.
///
/// Each call is independent: implementations keep no state between calls
/// beyond what is passed in, so one failed call never affects the next.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Connects, negotiates TLS and authenticates without sending mail.
    async fn verify(&self, relay: &RelayConfig) -> Result<(), RelayError>;

    /// Sends exactly one envelope in one relay transaction, however many
    /// recipients it addresses.
    async fn deliver(
        &self,
        relay: &RelayConfig,
        envelope: &MessageEnvelope,
    ) -> Result<TransmissionReceipt, RelayError>;
}

#[async_trait]
impl<T: RelayTransport + ?Sized> RelayTransport for Arc<T> {
    async fn verify(&self, relay: &RelayConfig) -> Result<(), RelayError> {
        (**self).verify(relay).await
    }

    async fn deliver(
        &self,
        relay: &RelayConfig,
        envelope: &MessageEnvelope,
    ) -> Result<TransmissionReceipt, RelayError> {
        (**self).deliver(relay, envelope).await
    }
}
