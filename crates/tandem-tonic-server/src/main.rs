#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use futures::Stream;
use server::config::{CliArgs, ServerConfig};
use server::store::MemoryStore;
use server::telemetry::{MetricsObserver, TelemetryProviders, init_telemetry};
use std::sync::Arc;
use tandem::{DispatchConfig, Dispatcher};
use tandem_tonic_core::{
    RpcServer, ServiceName,
    proto::{BlogService, CalculatorService, GreetService},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;
            let uds_path = config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)?;
            let incoming = UnixListenerStream::new(uds);
            log_startup_info(&uds_path, &config);
            let res = run_server_with_incoming(providers, incoming, config).await;
            // A panic can still leave the socket file behind.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path).await?;
        let incoming = TcpListenerStream::new(tcp);
        log_startup_info(&tcp_path, &config);
        run_server_with_incoming(providers, incoming, config).await
    }
}

async fn run_server_with_incoming<I, IO, IE>(
    providers: TelemetryProviders,
    incoming: I,
    config: ServerConfig,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let registry = server::service::registry(&config, Arc::new(MemoryStore::new()))?;
    let dispatcher = Arc::new(
        Dispatcher::new(
            registry,
            DispatchConfig {
                response_buffer: config.stream_buffer_size,
                drain_timeout: config.shutdown_timeout,
            },
        )
        .with_observer(Arc::new(MetricsObserver)),
    );

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<RpcServer<CalculatorService>>()
        .await;
    health_reporter.set_serving::<RpcServer<GreetService>>().await;
    health_reporter.set_serving::<RpcServer<BlogService>>().await;

    #[allow(unused_mut)]
    let mut builder = Server::builder();

    #[cfg(feature = "tls")]
    if let Some(files) = &config.tls {
        builder = builder.tls_config(load_tls(files).await?)?;
    }

    builder
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(build_service::<CalculatorService>(&dispatcher))
        .add_service(build_service::<GreetService>(&dispatcher))
        .add_service(build_service::<BlogService>(&dispatcher))
        .serve_with_incoming_shutdown(
            incoming,
            shutdown_signal(Arc::clone(&dispatcher), health_reporter, providers),
        )
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(addr: &str, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting tandem on {} with full config: {:#?}", addr, config);
    } else {
        tracing::info!(
            "Starting tandem on {} (stream buffer {}, shutdown timeout {:?})",
            addr,
            config.stream_buffer_size,
            config.shutdown_timeout
        );
    }
}

fn build_service<N: ServiceName>(dispatcher: &Arc<Dispatcher>) -> RpcServer<N> {
    RpcServer::new(Arc::clone(dispatcher))
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

#[cfg(feature = "tls")]
async fn load_tls(
    files: &server::config::TlsFiles,
) -> anyhow::Result<tonic::transport::ServerTlsConfig> {
    use anyhow::Context;
    use tonic::transport::{Identity, ServerTlsConfig};

    let cert = tokio::fs::read(&files.cert)
        .await
        .with_context(|| format!("failed to read TLS_CERT {}", files.cert.display()))?;
    let key = tokio::fs::read(&files.key)
        .await
        .with_context(|| format!("failed to read TLS_KEY {}", files.key.display()))?;
    Ok(ServerTlsConfig::new().identity(Identity::from_pem(cert, key)))
}

async fn shutdown_signal(
    dispatcher: Arc<Dispatcher>,
    health_reporter: HealthReporter,
    providers: TelemetryProviders,
) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Publish the status
    health_reporter
        .set_not_serving::<RpcServer<CalculatorService>>()
        .await;
    health_reporter
        .set_not_serving::<RpcServer<GreetService>>()
        .await;
    health_reporter
        .set_not_serving::<RpcServer<BlogService>>()
        .await;

    // 2. Drain in-flight calls, cancelling the stragglers
    let cancelled = dispatcher.shutdown().await;
    if cancelled > 0 {
        tracing::warn!("Cancelled {} calls that outlived the shutdown timeout", cancelled);
    }

    // 3. Flush exporters
    providers.shutdown();
}
