#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode},
};
use courier_api::{ApiConfig, ApiState, RateLimiter, router};
use courier_common::RelayConfig;
use courier_dispatch::{
    CancellationToken, Dispatcher, MessageEnvelope, RelayError, RelayTransport,
    TransmissionReceipt, ValidationLimits,
};
use tower::ServiceExt;

/// Accepts everything except listed recipients, and records each envelope.
#[derive(Default)]
pub struct FakeRelay {
    pub rejected: Vec<String>,
    pub refuse_connections: bool,
    pub envelopes: Mutex<Vec<MessageEnvelope>>,
}

#[async_trait]
impl RelayTransport for FakeRelay {
    async fn verify(&self, relay: &RelayConfig) -> Result<(), RelayError> {
        if self.refuse_connections {
            return Err(RelayError::Unreachable(format!(
                "Failed to connect to {}: connection refused",
                relay.address()
            )));
        }
        Ok(())
    }

    async fn deliver(
        &self,
        relay: &RelayConfig,
        envelope: &MessageEnvelope,
    ) -> Result<TransmissionReceipt, RelayError> {
        self.verify(relay).await?;
        self.envelopes.lock().unwrap().push(envelope.clone());

        if let Some(rejected) = envelope
            .envelope_recipients()
            .find(|recipient| self.rejected.iter().any(|r| r == recipient))
        {
            return Err(RelayError::RecipientRejected {
                recipient: rejected.to_string(),
                reason: "550 5.1.1 User unknown".to_string(),
            });
        }

        Ok(TransmissionReceipt {
            message_id: format!("<{}@fake>", envelope.to.join("+")),
            response: "250 OK".to_string(),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub relay: Arc<FakeRelay>,
    pub shutdown: CancellationToken,
}

impl TestApp {
    pub fn new(relay: FakeRelay) -> Self {
        Self::with_config(relay, &ApiConfig::default())
    }

    pub fn with_config(relay: FakeRelay, config: &ApiConfig) -> Self {
        let relay = Arc::new(relay);
        let transport: Arc<dyn RelayTransport> = relay.clone();
        let shutdown = CancellationToken::new();
        let state = Arc::new(ApiState {
            dispatcher: Dispatcher::new(transport, ValidationLimits::default()),
            shutdown: shutdown.clone(),
        });

        let router = router(
            config,
            state,
            Arc::new(RateLimiter::new(config.send_rate_limit, "send limited")),
            Arc::new(RateLimiter::new(config.verify_rate_limit, "test limited")),
        );

        Self {
            router,
            relay,
            shutdown,
        }
    }

    pub async fn post(&self, uri: &str, body: &serde_json::Value) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        json(self.send(request).await).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub async fn json(response: Response<Body>) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

pub fn smtp() -> serde_json::Value {
    serde_json::json!({
        "host": "smtp.example.com",
        "port": 587,
        "secure": false,
        "username": "me@example.com",
        "password": "super-secret",
        "fromName": "Example"
    })
}
