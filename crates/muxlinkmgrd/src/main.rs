//! muxlinkmgrd - qmi_wwan mux link manager
//!
//! Adds, removes and lists multiplexed links of a qmi_wwan interface.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sonic_muxlinkmgrd::{LinkBackend, MuxId, MuxIdRequest, MuxLinkConfig, MuxLinkManager};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "muxlinkmgrd", version, about = "qmi_wwan mux link manager")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = sonic_muxlinkmgrd::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the root of the network interface tree
    #[arg(long)]
    sysfs_root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a mux link
    Add {
        /// Base interface (e.g. wwan0)
        #[arg(short, long)]
        iface: String,

        /// Mux id: "auto", decimal or 0x-prefixed hex
        #[arg(short, long, default_value = "auto")]
        mux_id: MuxIdRequest,

        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Remove a mux link
    Del {
        /// Base interface (e.g. wwan0)
        #[arg(short, long)]
        iface: String,

        /// Link to remove (e.g. qmimux0)
        #[arg(short, long)]
        link: String,

        /// Mux id of the link (decimal or 0x-prefixed hex), if the kernel
        /// doesn't report it
        #[arg(short, long)]
        mux_id: Option<MuxId>,

        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// List the mux links of an interface
    Links {
        /// Base interface (e.g. wwan0)
        #[arg(short, long)]
        iface: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = MuxLinkConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(root) = cli.sysfs_root {
        config.sysfs.class_net_path = root;
    }
    config.validate()?;

    let timeout_or_default =
        |secs: Option<u64>| secs.map(Duration::from_secs).unwrap_or(config.default_timeout());

    match cli.command {
        Command::Add {
            iface,
            mux_id,
            timeout,
        } => {
            let mgr = MuxLinkManager::new(&iface, &config).await?;
            let cancel = cancel_on_ctrl_c();
            let link = mgr
                .add_link(mux_id, &iface, timeout_or_default(timeout), cancel)
                .await
                .with_context(|| format!("adding link on {}", iface))?;
            info!(link = %link.iface, mux_id = %link.mux_id, "Link created");
            println!("{} {}", link.iface, link.mux_id.value());
        }
        Command::Del {
            iface,
            link,
            mux_id,
            timeout,
        } => {
            let mgr = MuxLinkManager::new(&iface, &config).await?;
            let cancel = cancel_on_ctrl_c();
            mgr.del_link(&link, mux_id, timeout_or_default(timeout), cancel)
                .await
                .with_context(|| format!("removing link {} from {}", link, iface))?;
            info!(link = %link, "Link removed");
        }
        Command::Links { iface } => {
            let backend = LinkBackend::sysfs(&config.sysfs.class_net_path);
            for info in backend.link_info(&iface).await? {
                match info.mux_id {
                    Some(id) => println!("{} {}", info.name, id.value()),
                    None => println!("{} unknown", info.name),
                }
            }
        }
    }

    Ok(())
}

/// Returns a token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT, cancelling");
            child.cancel();
        }
    });

    token
}
