use std::sync::{Arc, LazyLock};

use courier_api::ApiServer;
use courier_common::{Signal, internal, logging, tracing};
use courier_dispatch::{Dispatcher, RelayTransport, SmtpRelay, TracingSink};
use courier_tracing::traced;
use tokio::sync::broadcast;

use crate::Courier;

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Resolves on SIGINT or SIGTERM.
///
/// # Errors
///
/// If the SIGTERM handler cannot be installed.
pub async fn termination() -> std::io::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

#[traced(instrument(level = tracing::Level::TRACE))]
async fn shutdown() -> anyhow::Result<()> {
    termination().await?;

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    // Graceful shutdown continues in the server; a second interrupt forces it.
    tokio::signal::ctrl_c().await?;
    internal!(level = WARN, "Forced shutdown");
    Ok(())
}

impl Courier {
    /// A dispatcher over SMTP that logs its progress.
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher<Arc<dyn RelayTransport>> {
        let transport: Arc<dyn RelayTransport> = Arc::new(SmtpRelay::new(&self.dispatch));
        Dispatcher::new(transport, self.dispatch.limits.clone()).with_sink(TracingSink)
    }

    /// Run the API until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// This function will return an error if the server cannot bind or fails
    /// while serving.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        if self.dispatch.accept_invalid_certs {
            tracing::warn!("TLS certificate validation is disabled for all relays");
        }

        let server = ApiServer::new(&self.api, self.dispatcher()).await?;

        internal!(level = INFO, "Controller running");

        let ret = tokio::select! {
            r = server.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = shutdown() => {
                r
            }
        };

        internal!(level = INFO, "Shutting down...");

        ret
    }
}
