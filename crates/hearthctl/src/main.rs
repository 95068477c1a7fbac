//! hearthctl: Hearth panel operator CLI
//!
//! Drives the lifecycle core against the configured data store and the real
//! node daemons: probe nodes, resolve server state, send power actions, run
//! installs and inspect marker files and worlds.

use clap::{Parser, Subcommand};
use hearth_proto::PowerAction;
use hearthctl::Panel;
use hearthctl::config::PanelConfig;
use hearthctl::error::{CtlError, CtlResult};
use serde::Serialize;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "hearthctl")]
#[command(about = "Hearth game-server panel operator CLI")]
#[command(version)]
struct Cli {
    /// Path to the panel config file
    #[arg(short, long, global = true, default_value = "/etc/hearth/panel.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every registered node
    Probe,

    /// Resolve the lifecycle state of a server
    Status { server: Uuid },

    /// Send a power action (start, stop, restart)
    Power { server: Uuid, action: PowerAction },

    /// Tear down the container and queue a fresh install
    Reinstall { server: Uuid },

    /// Queue the install of a server
    Install { server: Uuid },

    /// Check the install marker on the node
    Installed { server: Uuid },

    /// Check EULA acceptance on the node
    Eula { server: Uuid },

    /// List world folders in the server root
    Worlds { server: Uuid },

    /// Suspend a server (forces a stop), or lift a suspension with --lift
    Suspend {
        server: Uuid,
        #[arg(long)]
        lift: bool,
    },

    /// Remove the container, then the server record
    Delete { server: Uuid },

    /// Re-enqueue installs interrupted by a restart
    Reconcile,

    /// Write a default config file
    InitConfig {
        /// Where to write the config (defaults to --config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Data store directory
        #[arg(long, default_value = "/var/lib/hearth")]
        state_path: PathBuf,
    },
}

#[derive(Serialize)]
struct ProbeLine {
    id: Uuid,
    #[serde(flatten)]
    info: hearth_proto::NodeInfo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // logs go to stderr so stdout stays clean JSON
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("hearth=info".parse()?))
        .init();

    if let Commands::InitConfig { output, state_path } = &cli.command {
        let output = output.clone().unwrap_or_else(|| cli.config.clone());
        init_config(&output, state_path.clone())?;
        return Ok(());
    }

    let config = PanelConfig::load(&cli.config)?;
    let panel = Panel::open(&config)?;
    let result = run(&panel, cli.command).await;
    panel.close().await;

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "command failed");
            let envelope = serde_json::json!({
                "ok": false,
                "status": e.status_code(),
                "error": e.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            std::process::exit(1);
        }
    }
}

async fn run(panel: &Panel, command: Commands) -> CtlResult<serde_json::Value> {
    let lifecycle = &panel.lifecycle;
    let value = match command {
        Commands::Probe => {
            let lines: Vec<ProbeLine> = lifecycle
                .probe_nodes()
                .await?
                .into_iter()
                .map(|(id, info)| ProbeLine { id, info })
                .collect();
            serde_json::to_value(lines)?
        }
        Commands::Status { server } => serde_json::to_value(lifecycle.server_state(server).await?)?,
        Commands::Power { server, action } => {
            serde_json::to_value(lifecycle.apply_power_action(server, action).await?)?
        }
        Commands::Reinstall { server } => serde_json::to_value(lifecycle.reinstall(server).await?)?,
        Commands::Install { server } => serde_json::to_value(lifecycle.install(server).await?)?,
        Commands::Installed { server } => serde_json::to_value(lifecycle.check_installed(server).await?)?,
        Commands::Eula { server } => serde_json::to_value(lifecycle.check_eula(server).await?)?,
        Commands::Worlds { server } => serde_json::to_value(lifecycle.list_worlds(server).await?)?,
        Commands::Suspend { server, lift } => {
            serde_json::to_value(lifecycle.set_suspended(server, !lift).await?)?
        }
        Commands::Delete { server } => serde_json::to_value(lifecycle.delete_server(server).await?)?,
        Commands::Reconcile => serde_json::json!({ "resumed": lifecycle.reconcile_queued().await? }),
        Commands::InitConfig { .. } => {
            return Err(CtlError::Config("init-config is handled before opening the panel".to_string()));
        }
    };
    Ok(value)
}

fn init_config(output: &std::path::Path, state_path: PathBuf) -> anyhow::Result<()> {
    let config = PanelConfig {
        state_path,
        ..PanelConfig::default()
    };
    config.save(output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Register nodes and servers in the data store, then run:");
    println!("  hearthctl --config {} probe", output.display());
    Ok(())
}
