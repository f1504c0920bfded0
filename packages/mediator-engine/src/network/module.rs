//! Mediator server with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` launches the startup
//! components and binds the TCP listener, and `serve()` accepts connections
//! until the shutdown future resolves.

use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use super::handlers::{ingress_handler, AppState};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::MediatorContext;

/// Manages the full HTTP server lifecycle for one mediator.
///
/// 1. `new()` -- allocates shared state (context, shutdown controller)
/// 2. `start()` -- initializes startup components, binds the listener
/// 3. `serve()` -- accepts connections until shutdown is signalled
pub struct MediatorServer {
    context: MediatorContext,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl MediatorServer {
    /// Creates a server without binding any port.
    #[must_use]
    pub fn new(context: MediatorContext) -> Self {
        Self {
            context,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn context(&self) -> &MediatorContext {
        &self.context
    }

    /// Returns a shared reference to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router: one fallback for every method and path,
    /// wrapped in the transport middleware.
    #[must_use]
    pub fn build_router(&self) -> Router {
        build_router(self.context.clone(), Arc::clone(&self.shutdown))
    }

    /// Initializes startup components, then binds the TCP listener.
    ///
    /// Returns the actual bound port, which differs from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if a startup component fails to initialize or the
    /// address cannot be bound. No traffic is accepted in either case.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        self.context.components.init_all(&self.context).await?;

        let network = &self.context.config.network;
        let addr = format!("{}:{}", network.host, network.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(
            mediator = %self.context.config.name,
            routes = self.context.config.routing_table.len(),
            "TCP listener bound to {}:{}",
            network.host,
            port
        );

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves, then drains in-flight
    /// requests and shuts startup components down.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, if TLS material
    /// cannot be loaded, or if the server hits a fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .ok_or_else(|| anyhow!("start() must be called before serve()"))?;
        let context = self.context;
        let shutdown_ctrl = self.shutdown;

        let router = build_router(context.clone(), Arc::clone(&shutdown_ctrl));

        // Transition to Ready so the ingress accepts traffic.
        shutdown_ctrl.set_ready();

        let served = if let Some(tls_config) = context.config.network.tls.clone() {
            serve_tls(listener, router, &tls_config, shutdown).await
        } else {
            serve_plain(listener, router, shutdown).await
        };

        drain(&context, &shutdown_ctrl).await;
        served
    }
}

fn build_router(context: MediatorContext, shutdown: Arc<ShutdownController>) -> Router {
    let layers = build_http_layers(&context.config.network);
    let state = AppState { context, shutdown };

    Router::new()
        .fallback(ingress_handler)
        .layer(layers)
        .with_state(state)
}

/// Serves plain HTTP connections using axum's built-in server.
async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("Serving plain HTTP connections");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Serves TLS connections using `axum-server` with rustls.
///
/// Reuses the pre-bound TCP listener by converting it to a `std::net::TcpListener`.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls_config: &super::config::TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls_config.cert_path, &tls_config.key_path)
        .await
        .map_err(|e| anyhow!("Failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!("Serving TLS connections on {}", addr);

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

/// Waits for in-flight requests, then shuts startup components down in
/// reverse order.
async fn drain(context: &MediatorContext, shutdown_ctrl: &ShutdownController) {
    shutdown_ctrl.trigger_shutdown();

    let drained = shutdown_ctrl
        .wait_for_drain(context.config.network.drain_timeout)
        .await;
    if drained {
        info!("All in-flight requests drained");
    } else {
        warn!(
            in_flight = shutdown_ctrl.in_flight_count(),
            "Drain timeout expired with in-flight requests remaining"
        );
    }

    if let Err(e) = context.components.shutdown_all().await {
        error!(error = %e, "startup component failed to shut down");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    use super::*;
    use crate::network::HealthState;
    use crate::service::routing::{handler_fn, RoutingTable};
    use crate::service::testing::test_context;
    use crate::service::{ComponentRegistry, ManagedComponent};

    fn loopback_context(table: RoutingTable) -> MediatorContext {
        let (mut context, _core_rx) = test_context(table);
        let mut config = (*context.config).clone();
        config.network.host = "127.0.0.1".to_string();
        context.config = Arc::new(config);
        context
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    struct Unreachable;

    #[async_trait]
    impl ManagedComponent for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }
        async fn init(&self, _context: &MediatorContext) -> anyhow::Result<()> {
            anyhow::bail!("cannot reach upstream")
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn new_creates_server_without_binding() {
        let server = MediatorServer::new(loopback_context(RoutingTable::new()));
        assert!(server.listener.is_none());
        assert_eq!(server.shutdown_controller().health_state(), HealthState::Starting);
    }

    #[test]
    fn shutdown_controller_returns_shared_arc() {
        let server = MediatorServer::new(loopback_context(RoutingTable::new()));
        assert!(Arc::ptr_eq(
            &server.shutdown_controller(),
            &server.shutdown_controller()
        ));
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut server = MediatorServer::new(loopback_context(RoutingTable::new()));
        let port = server.start().await.unwrap();
        assert!(port > 0, "OS-assigned port should be > 0");
        assert!(server.listener.is_some());
    }

    #[tokio::test]
    async fn failing_component_prevents_binding() {
        let registry = ComponentRegistry::new();
        registry.register(Unreachable);
        let context = loopback_context(RoutingTable::new()).with_components(registry);
        let mut server = MediatorServer::new(context);

        let err = server.start().await.unwrap_err();
        assert_eq!(err.to_string(), "cannot reach upstream");
        assert!(server.listener.is_none());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let server = MediatorServer::new(loopback_context(RoutingTable::new()));
        let err = server.serve(std::future::pending::<()>()).await.unwrap_err();
        assert!(err.to_string().contains("start() must be called"));
    }

    #[tokio::test]
    async fn serves_requests_until_shutdown() {
        let mut table = RoutingTable::new();
        table.add_route(
            "/test",
            handler_fn("basic", |_, _, handle| async move {
                handle.finish("basic-routing", "text/plain", 200);
            }),
        );
        let mut server = MediatorServer::new(loopback_context(table));
        let port = server.start().await.unwrap();
        let controller = server.shutdown_controller();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve(async move {
            let _ = stop_rx.await;
        }));

        let response = reqwest::get(format!("http://127.0.0.1:{port}/test"))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response.headers()["content-type"],
            "application/json+openhim"
        );
        assert!(response.headers().contains_key("x-request-id"));
        assert!(response.text().await.unwrap().contains(r#""body":"basic-routing""#));

        stop_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn router_wraps_unknown_path_in_404_envelope() {
        let server = MediatorServer::new(loopback_context(RoutingTable::new()));

        let response = server
            .build_router()
            .oneshot(Request::get("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()["content-type"],
            "application/json+openhim"
        );
        let envelope: serde_json::Value =
            serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(envelope["status"], "Completed");
        assert_eq!(envelope["response"]["status"], 404);
        assert_eq!(envelope["response"]["body"], "/missing not found");
    }

    #[tokio::test]
    async fn router_acknowledges_async_work_and_updates_core() {
        let mut table = RoutingTable::new();
        table.add_route(
            "/test-async",
            handler_fn("async", |_, _, handle| async move {
                handle.accept_async();
                handle.finish("async-done", "text/plain", 200);
            }),
        );
        let (context, mut core_rx) = test_context(table);
        let server = MediatorServer::new(context);

        let response = server
            .build_router()
            .oneshot(
                Request::post("/test-async")
                    .header("X-OpenHIM-TransactionID", "test-async")
                    .body(Body::from("payload"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let envelope: serde_json::Value =
            serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(envelope["status"], "Processing");
        assert_eq!(envelope["response"]["body"], "Accepted request");

        let update = core_rx.recv().await.unwrap();
        assert_eq!(update.method, "PUT");
        assert_eq!(update.path, "/transactions/test-async");
        let reported: serde_json::Value =
            serde_json::from_str(update.body.as_deref().unwrap()).unwrap();
        assert_eq!(reported["response"]["body"], "async-done");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_before_containment() {
        let mut table = RoutingTable::new();
        table.add_route(
            "/upload",
            handler_fn("upload", |_, _, handle| async move {
                handle.finish("stored", "text/plain", 201);
            }),
        );
        let (mut context, _core_rx) = test_context(table);
        let mut config = (*context.config).clone();
        config.network.max_body_bytes = 8;
        context.config = Arc::new(config);
        let server = MediatorServer::new(context);

        let response = server
            .build_router()
            .oneshot(
                Request::post("/upload")
                    .header("content-length", "32")
                    .body(Body::from("x".repeat(32)))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn draining_server_turns_requests_away() {
        let server = MediatorServer::new(loopback_context(RoutingTable::new()));
        server.shutdown_controller().trigger_shutdown();

        let response = server
            .build_router()
            .oneshot(Request::get("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "mediator is shutting down");
        assert_eq!(server.shutdown_controller().in_flight_count(), 0);
    }
}
