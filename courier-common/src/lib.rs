pub mod address;
pub mod logging;
pub mod relay;

pub use address::{AddressError, Mailbox};
pub use relay::{RedactedRelay, RelayConfig};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
