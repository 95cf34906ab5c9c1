//! Door Controller - CLI to provision and operate door controllers
//!
//! Usage:
//!   DOORLINK_HOME=/tmp/doorlink cargo run -p door-controller -- <command>
//!
//! Commands:
//!   provision [--monitor]          - Send Wi-Fi credentials over BLE
//!   open <apartment|suite>         - Press a door button
//!   send <cmd> <target>            - Send a raw command
//!   monitor                        - Watch the controller until it is lost
//!   pair-request                   - Ask the controller to re-enter pairing mode
//!   scan [--duration SECS]         - List nearby BLE devices
//!   config show | set <key> <value>

mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use doorlink_ble_controller::{BtleplugRadio, WriteStrategy, ble};
use doorlink_node::{
    Command, CommandChannel, HeartbeatConfig, HeartbeatMonitor, Session, Settings, StatusEvent, StatusReceiver,
    StatusSink, SystemNetwork, pairing,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use config::ConfigStore;

#[derive(Parser)]
#[command(name = "door-controller")]
#[command(about = "Provision, monitor and operate door controllers")]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send Wi-Fi credentials to a nearby controller over BLE
    Provision {
        /// Keep watching the controller after provisioning
        #[arg(long)]
        monitor: bool,
        /// Write without waiting for the controller to acknowledge
        #[arg(long)]
        no_ack: bool,
    },
    /// Open a door
    Open {
        target: Door,
        /// How long to hold the button, in milliseconds
        #[arg(long)]
        duration_ms: Option<i64>,
    },
    /// Send a raw command
    Send {
        cmd: String,
        target: String,
        #[arg(long, default_value = "0")]
        duration_ms: u32,
    },
    /// Watch the controller until it stops answering
    Monitor,
    /// Broadcast a pairing-mode request
    PairRequest,
    /// Scan for BLE devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Door {
    Apartment,
    Suite,
}

impl Door {
    fn as_str(self) -> &'static str {
        match self {
            Door::Apartment => "apartment",
            Door::Suite => "suite",
        }
    }
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print current settings
    Show,
    /// Change one setting
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .init();

    let store = ConfigStore::open(&config::doorlink_home()?);

    match cli.command {
        Commands::Provision { monitor, no_ack } => cmd_provision(&store, monitor, no_ack).await?,
        Commands::Open { target, duration_ms } => {
            let settings = store.load()?;
            let outcome = channel(&settings).send_door_command(target.as_str(), duration_ms).await;
            report(outcome.success, &outcome.message)?;
        }
        Commands::Send { cmd, target, duration_ms } => {
            let settings = store.load()?;
            let outcome = channel(&settings).send_command(&Command::new(cmd, target, duration_ms)).await;
            report(outcome.success, &outcome.message)?;
        }
        Commands::Monitor => cmd_monitor(&store).await?,
        Commands::PairRequest => {
            let settings = store.load()?;
            let port = settings.endpoint().pairing_broadcast_port;
            let target = SocketAddr::new(pairing::BROADCAST_ADDR, port);
            let sent = pairing::request_pairing(target).await;
            report(sent, if sent { "Pairing request sent" } else { "Pairing request failed" })?;
        }
        Commands::Scan { duration } => cmd_scan(duration).await?,
        Commands::Config { action } => match action {
            ConfigCommands::Show => {
                println!("# {}", store.path().display());
                println!("{:#?}", store.load()?);
            }
            ConfigCommands::Set { key, value } => {
                store.set(&key, &value)?;
                println!("Updated {key}");
            }
        },
    }

    Ok(())
}

fn channel(settings: &Settings) -> CommandChannel {
    CommandChannel::new(settings.endpoint()).with_timeout(settings.command_timeout())
}

fn report(success: bool, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    if success {
        println!("{message}");
        Ok(())
    } else {
        Err(message.into())
    }
}

async fn cmd_provision(store: &ConfigStore, monitor: bool, no_ack: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = store.load()?;
    config::resolve_password(&mut settings);

    let strategy = if no_ack { WriteStrategy::WithoutResponse } else { WriteStrategy::WithResponse };
    let radio = BtleplugRadio::new().await?.with_write_strategy(strategy);
    let (_settings_tx, settings_rx) = watch::channel(settings);
    let (status, mut events) = StatusSink::channel();
    let session = Session::new(radio, settings_rx, Arc::new(SystemNetwork), status);

    println!("Looking for a controller...");
    session.provision()?;

    let outcome = loop {
        match events.recv().await {
            Some(StatusEvent::ProvisioningState(state)) => println!("  {state:?}"),
            Some(StatusEvent::Provisioning(outcome)) => break outcome,
            Some(_) => {}
            None => return Err("status channel closed".into()),
        }
    };
    if !outcome.success {
        session.shutdown().await;
        return Err(outcome.message.into());
    }
    println!("{}", outcome.message);

    if monitor {
        println!("Monitoring controller at {} (Ctrl-C to stop)", session.endpoint().address);
        watch_until_lost(&mut events).await;
    }
    session.shutdown().await;
    Ok(())
}

async fn cmd_monitor(store: &ConfigStore) -> Result<(), Box<dyn std::error::Error>> {
    let settings = store.load()?;
    let endpoint = settings.endpoint();
    let (status, mut events) = StatusSink::channel();

    let monitor = HeartbeatMonitor::new();
    println!("Monitoring controller at {} (Ctrl-C to stop)", endpoint.address);
    monitor.start(endpoint, HeartbeatConfig::default(), status);

    watch_until_lost(&mut events).await;
    if let Some(handle) = monitor.stop() {
        handle.join().await;
    }
    Ok(())
}

async fn watch_until_lost(events: &mut StatusReceiver) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(StatusEvent::Connectivity(state)) => println!("  {state:?}"),
                Some(StatusEvent::HeartbeatLost(outcome)) => {
                    println!("{}", outcome.message);
                    return;
                }
                Some(_) => {}
                None => return,
            },
            _ = tokio::signal::ctrl_c() => return,
        }
    }
}

async fn cmd_scan(duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for BLE devices ({duration} seconds)...");
    let devices = ble::scan(duration).await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device.rssi.map(|r| format!("{r} dBm")).unwrap_or_else(|| "N/A".to_string());
        let marker = if device.is_controller { " [CONTROLLER]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
    }
    Ok(())
}
