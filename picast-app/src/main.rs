// picast daemon -- drives an SI4713 FM/RDS transmitter from a JSON station
// file, either over an I2C bridge or against the in-process chip simulator.
//
// Usage:
//   picast --bridge 192.168.1.50:5000 run --config station.json
//   picast --mock run --config station.json --status-every 5
//   picast check station.json
//   picast diff old.json new.json

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use picast::manager::diff;
use picast::si4713::Si4713Builder;
use picast::transport::BridgeTransport;
use picast::{ConfigSnapshot, Transmitter, TransmitterManager, TxEvent, format_freq_mhz};
use picast_test_harness::SimulatedSi4713;

/// Station file poll period for hot reload.
const RELOAD_POLL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// picast -- SI4713 FM/RDS transmitter manager.
#[derive(Parser)]
#[command(name = "picast", version, about)]
struct Cli {
    /// Address of the I2C bridge (host:port).
    #[arg(long, conflicts_with = "mock")]
    bridge: Option<String>,

    /// Drive the built-in chip simulator instead of hardware.
    #[arg(long)]
    mock: bool,

    /// Default log filter; RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start broadcasting and follow the station file until Ctrl-C.
    Run {
        /// Station configuration (JSON).
        #[arg(long)]
        config: PathBuf,

        /// Print the status snapshot as JSON every N seconds.
        #[arg(long)]
        status_every: Option<u64>,

        /// Log every transmitter event.
        #[arg(long)]
        events: bool,
    },

    /// Validate a station file and print a summary.
    Check {
        config: PathBuf,
    },

    /// Print the operations that move the transmitter from OLD to NEW.
    Diff {
        old: PathBuf,
        new: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_logging(default: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))
}

fn load_config(path: &Path) -> Result<ConfigSnapshot> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let cfg = ConfigSnapshot::from_json_str(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(cfg)
}

fn config_name(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

// ---------------------------------------------------------------------------
// Transmitter construction
// ---------------------------------------------------------------------------

async fn create_transmitter(cli: &Cli) -> Result<Arc<dyn Transmitter>> {
    let builder = Si4713Builder::new();
    if cli.mock {
        tracing::info!("Using simulated SI4713");
        let tx = builder.build_uninitialized(Box::new(SimulatedSi4713::new()));
        return Ok(Arc::new(tx));
    }
    let Some(addr) = cli.bridge.as_deref() else {
        bail!("one of --bridge <addr> or --mock is required");
    };
    let link = BridgeTransport::connect(addr)
        .await
        .with_context(|| format!("failed to connect to bridge at {addr}"))?;
    tracing::info!(addr, "Connected to I2C bridge");
    Ok(Arc::new(builder.build_uninitialized(Box::new(link))))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_check(path: &Path) -> Result<()> {
    let cfg = load_config(path)?;
    let (rf, rds) = (&cfg.rf, &cfg.rds);
    println!("{}: OK", path.display());
    println!(
        "  RF:      {}, power {} dBuV, antenna cap {:?}",
        format_freq_mhz(rf.frequency_khz),
        rf.power,
        rf.antenna_cap
    );
    println!(
        "  RDS:     {} (PI {:04X}, PTY {})",
        if cfg.effective_rds_enabled() { "on" } else { "off" },
        rds.pi,
        rds.pty
    );
    println!("  PS:      {} entr(ies) every {:?}", rds.ps.len(), rds.ps_interval());
    let rt_count = if rds.rt.texts.is_empty() {
        usize::from(!rds.rt.text.is_empty())
    } else {
        rds.rt.texts.len()
    };
    println!("  RT:      {} message(s), {:?} mode", rt_count, rds.rt.ab_mode);
    if let Some(file) = &rds.rt.file_path {
        println!("           overridden by {}", file.display());
    }
    println!(
        "  UECP:    {}",
        if cfg.uecp.enabled {
            cfg.uecp.bind_addr()
        } else {
            "off".to_string()
        }
    );
    println!(
        "  Monitor: health {}, ASQ {}, every {:?}",
        cfg.monitor.health, cfg.monitor.asq, cfg.monitor.interval()
    );
    Ok(())
}

fn cmd_diff(old: &Path, new: &Path) -> Result<()> {
    let old_cfg = load_config(old)?;
    let new_cfg = load_config(new)?;
    let ops = diff::diff(Some(&old_cfg), &new_cfg);
    if ops.is_empty() {
        println!("No changes.");
        return Ok(());
    }
    for op in &ops {
        let marker = if op.touches_chip() { "chip" } else { "    " };
        println!("  [{:?}] {marker} {op:?}", op.stage());
    }
    println!("{} operation(s).", ops.len());
    Ok(())
}

async fn cmd_run(cli: &Cli, path: &Path, status_every: Option<u64>, events: bool) -> Result<()> {
    let cfg = load_config(path)?;
    let tx = create_transmitter(cli).await?;
    let manager = TransmitterManager::new(tx);
    let name = config_name(path);

    if events {
        let mut rx = manager.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(TxEvent::PsChanged { text, .. }) => tracing::info!(ps = %text, "PS"),
                    Ok(event) => tracing::info!(?event, "Event"),
                    Err(RecvError::Lagged(n)) => tracing::warn!(missed = n, "Event monitor lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    if let Err(e) = manager.start_broadcast(&name, cfg).await {
        manager.shutdown().await;
        return Err(e).context("failed to start broadcast");
    }
    tracing::info!(config = %name, "On air");

    let mut last_modified = modified(path);
    let mut reload = tokio::time::interval(RELOAD_POLL);
    let status_period = Duration::from_secs(status_every.unwrap_or(0).max(1));
    let mut status_tick = tokio::time::interval(status_period);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            biased;
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    tracing::warn!("Signal handler failed: {e}");
                }
                break;
            }
            _ = reload.tick() => {
                let current = modified(path);
                if current == last_modified {
                    continue;
                }
                last_modified = current;
                match load_config(path) {
                    Ok(cfg) => match manager.apply_config(&name, cfg).await {
                        Ok(ops) => tracing::info!(operations = ops, "Reloaded station file"),
                        Err(e) => tracing::error!("Reload failed: {e}"),
                    },
                    Err(e) => tracing::warn!("Ignoring station file change: {e:#}"),
                }
            }
            _ = status_tick.tick(), if status_every.is_some() => {
                match serde_json::to_string(&manager.status()) {
                    Ok(json) => println!("{json}"),
                    Err(e) => tracing::warn!("Failed to encode status: {e}"),
                }
            }
        }
    }

    tracing::info!("Shutting down");
    let stopped = manager.stop_broadcast().await;
    manager.shutdown().await;
    stopped.context("failed to stop broadcast")
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match &cli.command {
        Command::Check { config } => cmd_check(config),
        Command::Diff { old, new } => cmd_diff(old, new),
        Command::Run {
            config,
            status_every,
            events,
        } => cmd_run(&cli, config, *status_every, *events).await,
    }
}
