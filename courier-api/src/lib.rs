//! HTTP interface for the courier dispatch engine.
//!
//! # Endpoints
//!
//! - **`GET /health`** - liveness, version and server time
//! - **`POST /api/test-smtp`** - connect and authenticate against a relay
//! - **`POST /api/send-email`** - one message with To, Cc and Bcc
//! - **`POST /api/send-bulk-email`** - paced individual sends or one combined send
//!
//! Send and test endpoints are rate limited per client address.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use courier_api::{ApiConfig, ApiServer};
//! use courier_dispatch::{DispatchConfig, Dispatcher, RelayTransport, SmtpRelay};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatch = DispatchConfig::default();
//! let transport: Arc<dyn RelayTransport> = Arc::new(SmtpRelay::new(&dispatch));
//! let dispatcher = Dispatcher::new(transport, dispatch.limits);
//!
//! let server = ApiServer::new(&ApiConfig::default(), dispatcher).await?;
//! // server.serve(shutdown_receiver).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
pub mod handlers;
pub mod rate_limit;
mod server;
pub mod wire;

pub use config::{ApiConfig, RateLimit};
pub use error::{ApiError, ServerError};
pub use handlers::ApiState;
pub use rate_limit::RateLimiter;
pub use server::{ApiServer, router};
