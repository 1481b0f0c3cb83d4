//! MeshWifi Daemon
//!
//! Brings the mesh interface up and down on request, polls mesh topology, and
//! publishes network state to subscribers.

use clap::Parser;
use meshwifi_common::{
    ChannelEvent, CommandRunner, MeshController, NetworkTracker, ShellExecutor, StateBridge,
    SubscriberChannel, SystemInterfaces, TrackerEvent,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod listener;
mod service;
mod settings;

use config::DaemonConfig;
use listener::{PeerLogger, PromptLogger};
use service::{MeshService, MeshSwitch};
use settings::BootSettings;

#[derive(Parser)]
#[command(name = "meshwifid")]
#[command(about = "MeshWifi daemon - mesh interface control and state publication")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Mesh interface name
    #[arg(short, long)]
    interface: Option<String>,

    /// Turn the mesh on or off and remember the choice for the next boot
    #[arg(short, long, value_enum)]
    mesh: Option<MeshSwitch>,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    write_config: bool,

    /// Start topology polling immediately
    #[arg(short, long)]
    poll_topology: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("MeshWifi daemon v{}", meshwifi_common::VERSION);

    // Load configuration, then apply command line overrides
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(meshwifi_common::default_config_path);
    let mut config = DaemonConfig::load(&config_path)?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(interface) = cli.interface {
        config.mesh.interface = interface;
    }
    if cli.poll_topology {
        config.poll_topology_at_start = true;
    }
    config.mesh.validate()?;
    if cli.write_config {
        config.save(&config_path)?;
        info!("Configuration written to {}", config_path.display());
    }

    // Ensure store directory exists
    tokio::fs::create_dir_all(&config.store_path).await?;

    // Start the controller with the bridge and console listeners attached
    let bridge = Arc::new(StateBridge::new());
    let prompts = Arc::new(PromptLogger::new());
    let runner: Arc<dyn CommandRunner> = Arc::new(ShellExecutor::new(config.shell.clone()));
    let (handle, mut controller_handle) = MeshController::new(config.mesh.clone(), runner)
        .with_listener(bridge.clone())
        .with_listener(prompts.clone())
        .with_listener(Arc::new(PeerLogger))
        .spawn();

    // Console subscriber for state changes
    let (channel, mut changes) = SubscriberChannel::new();
    bridge.handle_channel_event(ChannelEvent::FullConnectionRequested { channel });
    let console_handle = tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            info!("State change: {:?}", change);
        }
    });

    // Network tracker feeding the connectivity log
    let (tracker_tx, mut tracker_rx) = mpsc::unbounded_channel();
    let tracker = Arc::new(NetworkTracker::new(
        config.mesh.interface.clone(),
        Arc::new(SystemInterfaces),
        tracker_tx,
    ));
    let tracker_handle = tokio::spawn(tracker.clone().run(bridge.watch()));
    let connectivity_handle = tokio::spawn(async move {
        while let Some(TrackerEvent::StateChanged { state, link }) = tracker_rx.recv().await {
            let addresses: Vec<String> = link.addresses.iter().map(|a| a.to_string()).collect();
            info!(
                "Mesh network {} on {} [{}]",
                state,
                link.interface,
                addresses.join(", ")
            );
        }
    });

    // Apply the requested mesh state, falling back to the boot setting
    let service = MeshService::new(handle.clone(), BootSettings::new(config.settings_path()));
    service.start(cli.mesh)?;
    if config.poll_topology_at_start {
        service.set_topology_polling(true)?;
    }

    info!(
        "Daemon started on {} (mesh {})",
        config.mesh.interface,
        service.state_name()
    );

    // Wait for shutdown signal
    let controller_done = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        result = &mut controller_handle => {
            if let Err(e) = result {
                error!("Mesh controller error: {}", e);
            }
            true
        }
    };

    if !controller_done {
        if let Err(e) = handle.shutdown() {
            warn!("Failed to stop mesh controller: {}", e);
        }
        if let Err(e) = controller_handle.await {
            error!("Mesh controller error: {}", e);
        }
    }

    if let Some(prompt) = prompts.last_prompt() {
        info!("Last prompt shown: {}", prompt);
    }

    tracker_handle.abort();
    connectivity_handle.abort();
    console_handle.abort();

    info!("Daemon shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_switch_flag() {
        let cli = Cli::try_parse_from(["meshwifid", "--mesh", "off"]).unwrap();
        assert_eq!(cli.mesh, Some(MeshSwitch::Off));

        let cli = Cli::try_parse_from(["meshwifid", "-m", "on", "--write-config"]).unwrap();
        assert_eq!(cli.mesh, Some(MeshSwitch::On));
        assert!(cli.write_config);

        let cli = Cli::try_parse_from(["meshwifid"]).unwrap();
        assert_eq!(cli.mesh, None);
    }

    #[test]
    fn test_mesh_switch_rejects_unknown_value() {
        assert!(Cli::try_parse_from(["meshwifid", "--mesh", "maybe"]).is_err());
    }
}
