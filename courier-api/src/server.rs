//! API HTTP server

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header::CONTENT_TYPE},
    middleware,
    routing::{get, post},
};
use courier_common::{Signal, internal};
use courier_dispatch::{CancellationToken, Dispatcher, RelayTransport};
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::{
    config::ApiConfig,
    error::ServerError,
    handlers::{self, ApiState},
    rate_limit::{self, RateLimiter},
};

const SEND_LIMITED: &str = "Too many email requests from this IP, please try again later.";
const VERIFY_LIMITED: &str = "Too many test requests from this IP, please try again later.";

fn cors(config: &ApiConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    if config.allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins = config
        .allowed_origins
        .iter()
        .filter_map(|origin| {
            HeaderValue::from_str(origin)
                .inspect_err(|_| tracing::warn!(%origin, "Ignoring invalid CORS origin"))
                .ok()
        })
        .collect::<Vec<_>>();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Builds the application router.
///
/// Exposed separately from [`ApiServer`] so it can be driven without a socket.
pub fn router(
    config: &ApiConfig,
    state: Arc<ApiState>,
    send_limiter: Arc<RateLimiter>,
    verify_limiter: Arc<RateLimiter>,
) -> Router {
    let send = Router::new()
        .route("/api/send-email", post(handlers::send_email))
        .route("/api/send-bulk-email", post(handlers::send_bulk_email))
        .route_layer(middleware::from_fn_with_state(
            send_limiter,
            rate_limit::enforce,
        ));

    let verify = Router::new()
        .route("/api/test-smtp", post(handlers::test_smtp))
        .route_layer(middleware::from_fn_with_state(
            verify_limiter,
            rate_limit::enforce,
        ));

    Router::new()
        .route(
            "/health",
            get(handlers::health).layer(TimeoutLayer::new(Duration::from_secs(1))),
        )
        .merge(send)
        .merge(verify)
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors(config))
}

/// The HTTP front end of the dispatch engine.
pub struct ApiServer {
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
    limiters: [Arc<RateLimiter>; 2],
}

impl ApiServer {
    /// Binds the listener and assembles the routes.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the configured address fails.
    pub async fn new(
        config: &ApiConfig,
        dispatcher: Dispatcher<Arc<dyn RelayTransport>>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|source| ServerError::BindError {
                address: config.listen_address.clone(),
                source,
            })?;

        tracing::info!(address = %config.listen_address, "API server bound successfully");

        let shutdown = CancellationToken::new();
        let state = Arc::new(ApiState {
            dispatcher,
            shutdown: shutdown.clone(),
        });
        let send_limiter = Arc::new(RateLimiter::new(config.send_rate_limit, SEND_LIMITED));
        let verify_limiter = Arc::new(RateLimiter::new(config.verify_rate_limit, VERIFY_LIMITED));

        Ok(Self {
            listener,
            router: router(
                config,
                state,
                Arc::clone(&send_limiter),
                Arc::clone(&verify_limiter),
            ),
            shutdown,
            limiters: [send_limiter, verify_limiter],
        })
    }

    /// # Errors
    ///
    /// Returns an error if the local address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|err| ServerError::ServeError(err.to_string()))
    }

    /// Serves until a shutdown signal arrives, then cancels in-progress bulk
    /// sends and waits for open requests to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), ServerError> {
        tracing::info!("API server starting");

        let sweepers = self
            .limiters
            .into_iter()
            .map(|limiter| {
                tokio::spawn(async move {
                    let mut interval =
                        tokio::time::interval(limiter.window().max(Duration::from_secs(1)));
                    loop {
                        interval.tick().await;
                        limiter.evict_idle();
                    }
                })
            })
            .collect::<Vec<_>>();

        let cancel = self.shutdown;
        let result = axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            internal!(level = INFO, "API server received shutdown signal");
            cancel.cancel();
        })
        .await
        .map_err(|err| ServerError::ServeError(err.to_string()));

        for sweeper in sweepers {
            sweeper.abort();
        }

        tracing::info!("API server stopped");
        result
    }
}
