//! Disk Inventory Agent
//!
//! Runs on every storage node: watches the kernel device tree, resolves the
//! backplane slot of each supported disk and keeps one `Disk` custom
//! resource per drive up to date.
//!
//! # Signals
//!
//! - `SIGINT` / `SIGTERM`: stop monitoring and exit
//! - `SIGHUP`: rescan every disk now

use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use disk_inventory::{
    parse_duration, resolve_node_name, AgentConfig, DeviceClassifier, DiskMonitor, DiskResource,
    DiskScanner, Error, KubeDiskStore, MonitorConfig, Reconciler, ReconcilerConfig, Result,
    ScanTrigger, SyncMetrics, SysfsTopology,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Disk Inventory - physical disk discovery and slot mapping for storage nodes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interval between full rescans (e.g. 30s, 1m, 1h)
    #[arg(long, env = "SCAN_INTERVAL", default_value = "1m")]
    interval: String,

    /// Mark newly discovered disks as enabled
    #[arg(long, env = "ENABLE_DISKS")]
    enable_disks: bool,

    /// Name of this node (defaults to the host name)
    #[arg(long, env = "NODE_NAME")]
    node_name: Option<String>,

    /// Root of the sysfs tree
    #[arg(long, env = "SYSFS_ROOT", default_value = "/sys")]
    sysfs_root: PathBuf,

    /// udev database directory
    #[arg(long, env = "UDEV_DATA_DIR", default_value = "/run/udev/data")]
    udev_data_dir: PathBuf,

    /// Health and metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the Disk CustomResourceDefinition as YAML and exit
    #[arg(long)]
    print_crd: bool,
}

impl Args {
    fn agent_config(&self) -> Result<AgentConfig> {
        Ok(AgentConfig {
            node_name: resolve_node_name(self.node_name.as_deref()),
            scan_interval: parse_duration(&self.interval)?,
            enable_disks: self.enable_disks,
            sysfs_root: self.sysfs_root.clone(),
            udev_data_dir: self.udev_data_dir.clone(),
        })
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        return print_crd();
    }

    init_logging(&args);

    let config = args.agent_config()?;
    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics address: {}", e)))?;

    info!("Starting Disk Inventory agent");
    info!("  Version: {}", disk_inventory::VERSION);
    info!("  Node: {}", config.node_name);
    info!("  Scan interval: {:?}", config.scan_interval);
    info!("  Enable disks: {}", config.enable_disks);
    info!("  Sysfs root: {}", config.sysfs_root.display());

    let client = kube::Client::try_default().await?;
    let store = Arc::new(KubeDiskStore::new(client));
    let metrics = SyncMetrics::new(prometheus::default_registry())?;

    let cancel = CancellationToken::new();
    let ready = Arc::new(AtomicBool::new(false));

    // Health and metrics server
    {
        let ready = ready.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(metrics_addr, ready, cancel).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    // Device monitor
    let topology = Arc::new(SysfsTopology::new(&config.sysfs_root, &config.udev_data_dir));
    let scanner = DiskScanner::new(topology, Arc::new(DeviceClassifier::new()));
    let monitor = DiskMonitor::new(
        scanner,
        MonitorConfig {
            interval: config.scan_interval,
        },
    );
    spawn_rescan_on_hangup(monitor.trigger(), cancel.clone());
    let (updates, monitor_handle) = monitor.start(cancel.clone());

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown requested");
            cancel.cancel();
        }
    });

    ready.store(true, Ordering::SeqCst);

    let reconciler = Reconciler::new(
        store,
        ReconcilerConfig {
            node_name: config.node_name.clone(),
            enable_disks: config.enable_disks,
        },
    )
    .with_metrics(metrics);
    reconciler.run(updates, cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = monitor_handle.await {
        error!("Disk monitor task failed: {}", e);
    }

    info!("Agent shutdown complete");
    Ok(())
}

fn print_crd() -> Result<()> {
    use kube::CustomResourceExt;

    let yaml = serde_yaml::to_string(&DiskResource::crd())
        .map_err(|e| Error::Internal(format!("Failed to render CRD: {}", e)))?;
    print!("{}", yaml);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Signals
// =============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(unix)]
fn spawn_rescan_on_hangup(trigger: ScanTrigger, cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!("Failed to listen for SIGHUP, manual rescans disabled: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("SIGHUP received, rescanning disks");
                    if !trigger.trigger() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_rescan_on_hangup(_trigger: ScanTrigger, _cancel: CancellationToken) {}

// =============================================================================
// Health and Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: SocketAddr,
    ready: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.clone();
                async move { Ok::<_, Infallible>(route(req.uri().path(), &ready)) }
            }))
        }
    });

    info!("Health and metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind {}: {}", addr, e)))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

fn route(path: &str, ready: &AtomicBool) -> hyper::Response<hyper::Body> {
    use hyper::StatusCode;
    use prometheus::{Encoder, TextEncoder};

    match path {
        "/healthz" | "/livez" => text(StatusCode::OK, "ok"),
        "/readyz" if ready.load(Ordering::SeqCst) => text(StatusCode::OK, "ok"),
        "/readyz" => text(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        "/metrics" => {
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            match encoder.encode(&prometheus::gather(), &mut buffer) {
                Ok(()) => {
                    let mut response = hyper::Response::new(hyper::Body::from(buffer));
                    if let Ok(value) = hyper::header::HeaderValue::from_str(encoder.format_type()) {
                        response
                            .headers_mut()
                            .insert(hyper::header::CONTENT_TYPE, value);
                    }
                    response
                }
                Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
            }
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

fn text(status: hyper::StatusCode, body: &str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body.to_string()));
    *response.status_mut() = status;
    response
}
