use clap::{Parser, Subcommand};
use natgate::capture::{interface_mac, AfPacketSocket, Capture, RecvBackoff};
use natgate::config::{self, Config};
use natgate::dataplane::{
    DispatchSettings, Gateway, IcmpDispatcher, NdpHandler, PassThrough, PortIndex,
    QueueTransport, TxFrame,
};
use natgate::telemetry::{init_logging, MetricsRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Large enough for a VLAN-tagged 1500-byte frame
const RX_BUFFER_SIZE: usize = 2048;

type DaemonGateway = Gateway<QueueTransport, NdpHandler<QueueTransport>, PassThrough>;

#[derive(Parser)]
#[command(name = "natgate")]
#[command(about = "ICMP/ICMPv6 fast path of a stateful NAT gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run the gateway daemon
    Run {
        /// Path to natgate.toml
        #[arg(short, long, default_value = "natgate.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate natgate.toml and print diagnostics
    Validate {
        /// Path to natgate.toml
        #[arg(short, long, default_value = "natgate.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Config {
            action: ConfigAction::Validate { config },
        }) => {
            init_logging(None);
            cmd_config_validate(&config)
        }
        Some(Commands::Run { config }) => cmd_run(&config),
        None => cmd_run(&PathBuf::from("natgate.toml")),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn load_validated(config_path: &PathBuf) -> Result<Config, String> {
    let cfg = config::load(config_path).map_err(|e| format!("Failed to load config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        return Err("Validation failed".to_string());
    }
    Ok(cfg)
}

fn cmd_config_validate(config_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());
    load_validated(config_path)?;
    println!("[INFO] Configuration is valid");
    Ok(())
}

fn cmd_run(config_path: &PathBuf) -> Result<(), String> {
    let cfg = load_validated(config_path)?;

    // RUST_LOG still takes priority over [log]
    init_logging(Some(&cfg.log));
    info!("Loaded {}", config_path.display());

    let ports = config::build_ports(&cfg, interface_mac)
        .map_err(|e| format!("Failed to set up ports: {}", e))?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let metrics = Arc::new(MetricsRegistry::new());

        let mut transport = QueueTransport::new(cfg.dump, metrics.clone());
        let tx_queues: Vec<_> = ports
            .iter()
            .map(|port| (port.index, transport.add_port(port.index)))
            .collect();
        let transport = Arc::new(transport);

        let checksum = cfg.checksum.policy();
        let ndp = NdpHandler::new(transport.clone(), checksum, metrics.clone());
        let dispatcher = IcmpDispatcher::new(
            transport.clone(),
            ndp,
            DispatchSettings {
                connection_timeout: cfg.nat.connection_timeout(),
                checksum,
            },
            metrics.clone(),
        );
        let gateway: Arc<DaemonGateway> = Arc::new(Gateway::new(
            ports,
            dispatcher,
            transport,
            PassThrough::new(metrics.clone()),
            metrics.clone(),
        ));

        let mut tx_queues = tx_queues.into_iter();
        for port in gateway.ports() {
            info!("Binding to interface {}...", port.name);
            let socket = Arc::new(AfPacketSocket::bind(&port.name, true).map_err(|e| {
                format!(
                    "Failed to bind to {}: {}. Run with root privileges.",
                    port.name, e
                )
            })?);

            let fallback = match &port.fallback {
                Some(name) => {
                    let socket = AfPacketSocket::bind(name, false).map_err(|e| {
                        format!("Failed to bind to fallback {}: {}", name, e)
                    })?;
                    Some(Arc::new(socket))
                }
                None => None,
            };

            if let Some((index, rx)) = tx_queues.next() {
                debug_assert_eq!(index, port.index);
                tokio::spawn(run_writer(
                    port.name.clone(),
                    socket.clone(),
                    rx,
                    metrics.clone(),
                ));
            }

            if let Some(fallback) = &fallback {
                tokio::spawn(run_fallback_reader(
                    port.index,
                    fallback.clone(),
                    gateway.clone(),
                ));
            }

            tokio::spawn(run_port_reader(
                port.index,
                socket,
                fallback,
                gateway.clone(),
                metrics.clone(),
            ));

            info!(
                "  {} configured: role={}, MAC={}, IPv4={}/{}, IPv6={}, fallback={}",
                port.name,
                port.role,
                port.mac,
                port.subnet4.addr,
                port.subnet4.prefix_len,
                port.subnet6
                    .map(|s| format!("{}/{} ({})", s.addr, s.prefix_len, s.link_local))
                    .unwrap_or_else(|| "-".to_string()),
                port.fallback.as_deref().unwrap_or("-")
            );
        }

        let aging_gateway = gateway.clone();
        let mut aging_timer = DaemonGateway::aging_interval(cfg.nat.aging_interval());
        tokio::spawn(async move {
            loop {
                aging_timer.tick().await;
                aging_gateway.run_aging();
            }
        });

        info!("Gateway started, processing packets...");

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| format!("Failed to wait for shutdown signal: {}", e))?;

        info!("Shutting down");
        for (name, value) in metrics.export() {
            info!("  {} = {}", name, value);
        }
        Ok(())
    })
}

async fn run_port_reader(
    index: PortIndex,
    socket: Arc<AfPacketSocket>,
    fallback: Option<Arc<AfPacketSocket>>,
    gateway: Arc<DaemonGateway>,
    metrics: Arc<MetricsRegistry>,
) {
    let mut buf = vec![0u8; RX_BUFFER_SIZE];
    let mut backoff = RecvBackoff::new();

    loop {
        let len = match socket.recv(&mut buf).await {
            Ok(len) => {
                backoff.reset();
                len
            }
            Err(e) => {
                metrics.record_rx_error(socket.name());
                if !wait_after_error(&mut backoff, socket.name(), &e).await {
                    return;
                }
                continue;
            }
        };

        let Some(frame) = gateway.handle_frame(index, buf[..len].to_vec()) else {
            continue;
        };

        match &fallback {
            Some(fallback) => {
                if let Err(e) = fallback.send(&frame).await {
                    warn!("Failed to send on fallback {}: {}", fallback.name(), e);
                }
            }
            None => debug!("No fallback socket for {}", socket.name()),
        }
    }
}

async fn run_fallback_reader(
    index: PortIndex,
    socket: Arc<AfPacketSocket>,
    gateway: Arc<DaemonGateway>,
) {
    let mut buf = vec![0u8; RX_BUFFER_SIZE];
    let mut backoff = RecvBackoff::new();

    loop {
        match socket.recv(&mut buf).await {
            Ok(len) => {
                backoff.reset();
                gateway.handle_fallback_frame(index, buf[..len].to_vec());
            }
            Err(e) => {
                if !wait_after_error(&mut backoff, socket.name(), &e).await {
                    return;
                }
            }
        }
    }
}

/// Sleep before the next receive; false once `name` has failed too often.
async fn wait_after_error(backoff: &mut RecvBackoff, name: &str, e: &natgate::Error) -> bool {
    match backoff.failed() {
        Some(delay) => {
            warn!("Receive error on {}: {}, retrying in {:?}", name, e, delay);
            tokio::time::sleep(delay).await;
            true
        }
        None => {
            error!(
                "Stopping reader on {} after {} consecutive receive errors: {}",
                name,
                backoff.failures(),
                e
            );
            false
        }
    }
}

async fn run_writer<C: Capture + 'static>(
    name: String,
    socket: Arc<C>,
    mut rx: mpsc::UnboundedReceiver<TxFrame>,
    metrics: Arc<MetricsRegistry>,
) {
    while let Some(frame) = rx.recv().await {
        let data = frame.into_wire();
        match socket.send(&data).await {
            Ok(len) => metrics.record_tx(&name, len),
            Err(e) => {
                warn!("Failed to send on {}: {}", name, e);
                metrics.record_tx_error(&name);
            }
        }
    }
    debug!("Transmit queue of {} closed", name);
}
