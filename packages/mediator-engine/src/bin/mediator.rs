//! Mediator binary.
//!
//! Serves a small set of demonstration routes:
//!
//! - `/echo` answers synchronously with the request body
//! - `/async/.*` acknowledges with 202 and reports the result to the
//!   management API
//! - `/upstream/.*` forwards to `--upstream-host` when one is configured

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use mediator_core::Orchestration;
use mediator_engine::service::{CoreApiConfig, RegistrationConfig};
use mediator_engine::{
    handler_fn, ConnectorSet, MediatorConfig, MediatorContext, MediatorHttpRequest,
    MediatorHttpResponse, MediatorServer, NetworkConfig, RoutingTable,
};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Plain,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "mediator")]
#[command(about = "HTTP mediator that wraps every result in a transaction envelope", long_about = None)]
struct Cli {
    #[arg(long, env = "MEDIATOR_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "MEDIATOR_PORT", default_value_t = 8500)]
    port: u16,

    /// Containment timeout for a single request.
    #[arg(long, env = "MEDIATOR_ROOT_TIMEOUT_MS", default_value_t = 60_000)]
    root_timeout_ms: u64,

    /// Registration descriptor (JSON) carrying the mediator URN.
    #[arg(long, env = "MEDIATOR_REGISTRATION")]
    registration: Option<PathBuf>,

    #[arg(long, env = "MEDIATOR_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    #[arg(long, env = "MEDIATOR_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    #[arg(long, env = "CORE_API_HOST", default_value = "localhost")]
    core_host: String,

    #[arg(long, env = "CORE_API_PORT", default_value_t = 8080)]
    core_port: u16,

    #[arg(long, env = "CORE_API_SCHEME", default_value = "https")]
    core_scheme: String,

    #[arg(long, env = "CORE_API_USERNAME", default_value = "root@openhim.org")]
    core_username: String,

    #[arg(long, env = "CORE_API_PASSWORD", default_value = "", hide_env_values = true)]
    core_password: String,

    /// Accept self-signed certificates from the management API.
    #[arg(long, env = "CORE_API_TRUST_SELF_SIGNED")]
    trust_self_signed: bool,

    #[arg(long, env = "MEDIATOR_UPSTREAM_HOST")]
    upstream_host: Option<String>,

    #[arg(long, env = "MEDIATOR_UPSTREAM_PORT", default_value_t = 80)]
    upstream_port: u16,

    #[arg(long, value_enum, default_value = "plain")]
    log_format: LogFormat,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<MediatorConfig> {
        let registration = self
            .registration
            .as_deref()
            .map(RegistrationConfig::from_path)
            .transpose()?;
        let tls = self
            .tls_cert
            .zip(self.tls_key)
            .map(|(cert_path, key_path)| mediator_engine::TlsConfig {
                cert_path,
                key_path,
            });

        let routes = demo_routes(self.upstream_host, self.upstream_port)?;

        Ok(MediatorConfig {
            name: registration
                .as_ref()
                .and_then(|r| r.name.clone())
                .unwrap_or_else(|| "mediator".to_string()),
            network: NetworkConfig {
                host: self.host,
                port: self.port,
                tls,
                ..NetworkConfig::default()
            },
            core: CoreApiConfig {
                host: self.core_host,
                port: self.core_port,
                scheme: self.core_scheme,
                username: self.core_username,
                password: self.core_password,
                trust_self_signed: self.trust_self_signed,
                ..CoreApiConfig::default()
            },
            root_timeout: Duration::from_millis(self.root_timeout_ms),
            registration,
            ..MediatorConfig::default()
        }
        .with_routing_table(routes))
    }
}

fn demo_routes(upstream_host: Option<String>, upstream_port: u16) -> anyhow::Result<RoutingTable> {
    let mut table = RoutingTable::new();

    table.add_route(
        "/echo",
        handler_fn("echo", |_, request, handle| async move {
            let mime_type = request
                .headers
                .get("content-type")
                .unwrap_or("text/plain")
                .to_string();
            let body = request.body.clone().unwrap_or_default();
            let response = MediatorHttpResponse::new(200)
                .with_header("Content-Type", mime_type.clone())
                .with_body(body.clone());

            handle.add_orchestration(Orchestration::new(
                "echo",
                request.to_orchestration_request(),
                response.to_orchestration_response(),
            ));
            handle.put_property("echoed-bytes", body.len().to_string());
            handle.finish(body, mime_type, 200);
        }),
    );

    table.add_regex_route(
        "/async/.*",
        handler_fn("async", |_, request, handle| async move {
            if !handle.accept_async() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.finish(
                format!("processed {} {}", request.method, request.path),
                "text/plain",
                200,
            );
        }),
    )?;

    if let Some(host) = upstream_host {
        table.add_regex_route(
            "/upstream/.*",
            handler_fn("upstream", move |context: MediatorContext, request, handle| {
                let host = host.clone();
                async move {
                    let path = request.path.trim_start_matches("/upstream").to_string();
                    let mut outbound = MediatorHttpRequest::new(
                        request.method.clone(),
                        "http",
                        host,
                        upstream_port,
                        path,
                    )
                    .with_orchestration("upstream");
                    outbound.headers = request.headers.clone();
                    outbound.headers.remove("host");
                    outbound.headers.remove("content-length");
                    outbound.body = request.body.clone();
                    outbound.params = request.params.clone();

                    match context.connectors.http.send(outbound.clone()).await {
                        Ok(response) => {
                            handle.add_orchestration(Orchestration::new(
                                "upstream",
                                outbound.to_orchestration_request(),
                                response.to_orchestration_response(),
                            ));
                            let mime_type =
                                response.content_type().unwrap_or("text/plain").to_string();
                            handle.finish(
                                response.body.unwrap_or_default(),
                                mime_type,
                                response.status,
                            );
                        }
                        Err(e) => {
                            handle.error(e);
                        }
                    }
                }
            }),
        )?;
    }

    Ok(table)
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mediator=info,mediator_engine=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Plain => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = cli.into_config()?;
    let connectors = ConnectorSet::from_config(&config)?;
    let context = MediatorContext::new(config, connectors);

    let mut server = MediatorServer::new(context);
    let port = server.start().await?;
    info!(port, urn = server.context().config.urn(), "mediator started");

    server
        .serve(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
        })
        .await
}
