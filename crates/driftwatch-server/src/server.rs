//! `DriftwatchServer`: axum router plus a graceful-shutdown listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use driftwatch_engine::Dispatcher;
use driftwatch_settings::DriftwatchSettings;
use driftwatch_store::Database;
use secrecy::SecretString;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::handlers;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    /// 0 binds an ephemeral port.
    pub port: u16,
    /// Upper bound on any request, inline polls included.
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            request_timeout: Duration::from_secs(180),
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &DriftwatchSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            request_timeout: Duration::from_secs(settings.server.request_timeout_secs),
        }
    }
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub dispatcher: Arc<Dispatcher>,
    /// Bearer token for the cron endpoint; `None` leaves it open.
    pub cron_secret: Option<SecretString>,
    pub start_time: Instant,
}

pub struct DriftwatchServer {
    config: ServerConfig,
    state: AppState,
    shutdown: CancellationToken,
}

impl DriftwatchServer {
    pub fn new(
        config: ServerConfig,
        db: Database,
        dispatcher: Arc<Dispatcher>,
        cron_secret: Option<SecretString>,
    ) -> Self {
        Self {
            config,
            state: AppState {
                db,
                dispatcher,
                cron_secret,
                start_time: Instant::now(),
            },
            shutdown: CancellationToken::new(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/cron/poll", get(handlers::cron_poll))
            .route("/api/events/{id}/poll", post(handlers::trigger_poll))
            .route("/api/events/{id}/poll-direct", post(handlers::poll_direct))
            .route("/api/events/{id}/synthesize", post(handlers::synthesize))
            .route("/api/events/{id}/timeline", get(handlers::timeline))
            .layer(TimeoutLayer::new(self.config.request_timeout))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.state.dispatcher
    }

    /// Bind and serve in a background task until [`Self::shutdown`].
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server exited with error");
            }
        });
        info!(%addr, "listening");
        Ok((addr, handle))
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
