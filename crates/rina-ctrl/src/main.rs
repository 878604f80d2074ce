//! RINA control tool.
//!
//! `rina-ctrl serve` runs a registry behind the TCP control device; the other
//! subcommands act as a control agent against a running server.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rina_core::{ControlClient, ControlServer, DifType, EntrySnapshot, ProcessName, Registry};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "rina-ctrl")]
#[command(about = "Manage IPC processes through the RINA control device")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Control device address used by the agent subcommands
    #[arg(long, global = true, default_value = "127.0.0.1:7070")]
    addr: SocketAddr,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a registry with the default factories behind the control device
    Serve {
        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "7070")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Create an IPC process
    Create {
        /// DIF type: "normal", "shim-dummy" or a numeric tag
        #[arg(long, default_value = "normal")]
        dif_type: String,

        /// Process name, components separated by '/'
        #[arg(long)]
        name: String,
    },
    /// Destroy an IPC process
    Destroy {
        #[arg(long)]
        id: u16,
    },
    /// List IPC processes
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Assign an IPC process to a DIF
    Assign {
        #[arg(long)]
        id: u32,

        /// DIF name
        #[arg(long)]
        dif: String,
    },
}

#[derive(Serialize)]
struct Listing {
    count: usize,
    ipcps: Vec<EntrySnapshot>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match args.command {
        Command::Serve { port, host } => serve(&host, port).await,
        command => run_agent(args.addr, command).await,
    }
}

async fn serve(host: &str, port: u16) -> Result<()> {
    info!("Starting RINA control device");

    let registry = Arc::new(Registry::with_default_factories()?);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", host, port))?;
    let mut handle = ControlServer::start(registry, addr).await?;

    // Print port for scripts to read (intentional stdout)
    println!("RINA_CTRL_PORT={}", handle.port);

    info!("Control device running on {}", handle.addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    handle.shutdown();

    Ok(())
}

async fn run_agent(addr: SocketAddr, command: Command) -> Result<()> {
    let client = ControlClient::connect(addr)
        .await
        .with_context(|| format!("cannot reach control device at {}", addr))?;

    match command {
        Command::Create { dif_type, name } => {
            let Some(dif_type) = DifType::from_str(&dif_type) else {
                bail!("unknown DIF type '{}'", dif_type);
            };
            let name: ProcessName = name.parse()?;
            let id = client.create_ipcp(dif_type, name).await?;
            println!("{}", id);
        }
        Command::Destroy { id } => {
            if !client.destroy_ipcp(id).await? {
                bail!("no IPC process with id {}", id);
            }
        }
        Command::List { json } => {
            let ipcps = client.fetch_all().await?;
            if json {
                let listing = Listing {
                    count: ipcps.len(),
                    ipcps,
                };
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                println!("{:>5}  {:<12}  {:<24}  DIF", "ID", "TYPE", "NAME");
                for entry in &ipcps {
                    println!(
                        "{:>5}  {:<12}  {:<24}  {}",
                        entry.id,
                        entry.dif_type.to_string(),
                        entry.name.to_string(),
                        entry
                            .dif_name
                            .as_ref()
                            .map_or_else(|| "-".to_string(), ToString::to_string)
                    );
                }
            }
        }
        Command::Assign { id, dif } => {
            let dif_name: ProcessName = dif.parse()?;
            if !client.assign_to_dif(id, dif_name).await? {
                bail!("no IPC process with id {}", id);
            }
        }
        Command::Serve { .. } => bail!("serve is not an agent command"),
    }

    Ok(())
}
