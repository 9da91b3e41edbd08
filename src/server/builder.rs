//! ServerBuilder for fluent API to build HTTP servers

use anyhow::Result;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::endpoint::Endpoint;
use super::endpoint_registry::EndpointRegistry;
use super::handlers::panic_response;
use crate::core::dispatch::Drain;
use crate::core::model::Model;

/// Builder for creating HTTP servers from endpoints
///
/// # Example
///
/// ```ignore
/// ServerBuilder::new()
///     .register(Endpoint::new("/api/pages", db.clone(), Page::default))
///     .register(Endpoint::new("/api/notes", db, Note::default))
///     .serve("127.0.0.1:3000")
///     .await?;
/// ```
pub struct ServerBuilder {
    registry: EndpointRegistry,
    custom_routes: Vec<Router>,
    cors: Option<CorsLayer>,
}

/// A built application plus the handles needed to drain it
pub struct App {
    pub router: Router,
    drains: Vec<Arc<dyn Drain>>,
}

impl App {
    /// Wait for every endpoint's post-write queue to drain
    pub async fn drain(&self) {
        for drain in &self.drains {
            drain.drain().await;
        }
    }
}

impl ServerBuilder {
    /// Create a new ServerBuilder
    pub fn new() -> Self {
        Self {
            registry: EndpointRegistry::new(),
            custom_routes: Vec::new(),
            cors: None,
        }
    }

    /// Register an endpoint
    pub fn register<M: Model>(mut self, endpoint: Endpoint<M>) -> Self {
        self.registry.register(Box::new(endpoint));
        self
    }

    /// Add custom routes to the server
    ///
    /// Use this for routes that don't fit the CRUD pattern, such as
    /// authentication or webhooks.
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Answer cross-origin requests with the given policy
    pub fn with_cors(mut self, cors: CorsLayer) -> Self {
        self.cors = Some(cors);
        self
    }

    /// Build the router and drain handles
    ///
    /// Includes `GET /health`, request tracing and a panic safety net that
    /// answers 500 with the generic error envelope.
    pub fn build_app(self) -> Result<App> {
        let resources = self.registry.resources();
        let (mut router, drains) = self.registry.build_routes()?;

        router = router.route("/health", get(health_check));
        for custom in self.custom_routes {
            router = router.merge(custom);
        }

        if let Some(cors) = self.cors {
            router = router.layer(cors);
        }

        let router = router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(panic_response)),
        );

        tracing::debug!(resources = ?resources, "endpoints mounted");
        Ok(App { router, drains })
    }

    /// Build the final router
    ///
    /// Post-write queues are not drained when the router is dropped; use
    /// [`build_app`](Self::build_app) or [`serve`](Self::serve) for that.
    pub fn build(self) -> Result<Router> {
        Ok(self.build_app()?.router)
    }

    /// Serve the application with graceful shutdown
    ///
    /// This will:
    /// - Bind to the provided address
    /// - Start serving requests
    /// - Handle SIGTERM and SIGINT (Ctrl+C) for graceful shutdown
    /// - Drain every endpoint's post-write queue before returning
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build_app()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app.router.clone())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Draining post-write queues...");
        app.drain().await;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
