mod config;
mod engine;
mod handlers;
mod health;
mod metrics;
mod response;
mod tls;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use clap::Parser;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as HttpBuilder;
use hyper_util::service::TowerToHyperService;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(
    name = "k8s-graceguard",
    about = "Admission webhook defaulting and enforcing pod termination grace periods"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "/etc/graceguard/config.yaml", env = "GRACEGUARD_CONFIG")]
    config: String,
}

async fn shutdown_signal(shutdown_tx: watch::Sender<()>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received CTRL+C, starting graceful shutdown"),
            _ = sigterm.recv() => info!("received SIGTERM, starting graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
        info!("received CTRL+C, starting graceful shutdown");
    }

    let _ = shutdown_tx.send(());
}

async fn run_https_server(
    addr: SocketAddr,
    tls_acceptor: TlsAcceptor,
    router: Router,
    ready: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let listener = TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind HTTPS on {addr}: {e}"));

    info!(%addr, "HTTPS webhook server listening");
    ready.store(true, Ordering::Relaxed);

    loop {
        let (tcp_stream, remote_addr) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("failed to accept TCP connection: {e}");
                        continue;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                info!("HTTPS server shutting down");
                break;
            }
        };

        let tls_acceptor = tls_acceptor.clone();
        let router = router.clone();

        tokio::spawn(async move {
            let tls_stream = match tls_acceptor.accept(tcp_stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(%remote_addr, "TLS handshake failed: {e}");
                    return;
                }
            };

            let io = TokioIo::new(tls_stream);
            let service = TowerToHyperService::new(router.into_service());

            if let Err(e) = HttpBuilder::new(hyper_util::rt::TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                error!(%remote_addr, "error serving connection: {e}");
            }
        });
    }
}

async fn run_http_server(
    addr: SocketAddr,
    router: Router,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let listener = TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind HTTP on {addr}: {e}"));

    info!(%addr, "HTTP metrics/health server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            info!("HTTP server shutting down");
        })
        .await
        .unwrap_or_else(|e| error!("HTTP server error: {e}"));
}

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install default CryptoProvider");

    let cli = Cli::parse();

    let config = config::GuardConfig::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load config from {}: {e}", cli.config);
        std::process::exit(1);
    });

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        listen_addr = %config.listen_addr,
        metrics_addr = %config.metrics_addr,
        log_level = %config.log_level,
        grace_period_seconds = config.grace_period_seconds,
        "k8s-graceguard starting"
    );

    if config.grace_period_seconds <= engine::MIN_GRACE_PERIOD_SECONDS {
        warn!(
            grace_period_seconds = config.grace_period_seconds,
            floor = engine::MIN_GRACE_PERIOD_SECONDS,
            "configured default does not clear the validation floor; \
             mutated objects will be denied by the validating webhook"
        );
    }

    let tls_config = tls::load_tls_config(&config.tls_cert_path, &config.tls_key_path)
        .unwrap_or_else(|e| {
            eprintln!("Failed to load TLS config: {e}");
            std::process::exit(1);
        });
    let tls_acceptor = TlsAcceptor::from(tls_config);

    let mut registry = Registry::default();
    let guard_metrics = metrics::GuardMetrics::new(&mut registry);
    let registry = Arc::new(registry);

    let app_state = Arc::new(handlers::AppState {
        engine: engine::GraceEngine::new(config.grace_period_seconds),
        metrics: guard_metrics,
    });

    let webhook_router = Router::new()
        .route("/mutate", post(handlers::handle_mutate))
        .route("/validate", post(handlers::handle_validate))
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .with_state(app_state);

    let ready = Arc::new(AtomicBool::new(false));
    let health_state = Arc::new(health::HealthState {
        registry,
        ready: ready.clone(),
    });

    let metrics_router = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics_handler))
        .with_state(health_state);

    let listen_addr: SocketAddr = config.listen_addr.parse().unwrap_or_else(|e| {
        eprintln!("Invalid listen_addr '{}': {e}", config.listen_addr);
        std::process::exit(1);
    });
    let metrics_addr: SocketAddr = config.metrics_addr.parse().unwrap_or_else(|e| {
        eprintln!("Invalid metrics_addr '{}': {e}", config.metrics_addr);
        std::process::exit(1);
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let https_shutdown_rx = shutdown_rx.clone();
    let http_shutdown_rx = shutdown_rx;

    tokio::spawn(shutdown_signal(shutdown_tx));

    tokio::join!(
        run_https_server(listen_addr, tls_acceptor, webhook_router, ready, https_shutdown_rx),
        run_http_server(metrics_addr, metrics_router, http_shutdown_rx),
    );

    info!("k8s-graceguard shut down gracefully");
}
