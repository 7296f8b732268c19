//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Control CLI for exercising R-EMS messaging sockets."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use r_ems_common::config::MessagingConfig;
use r_ems_logging as logging;

mod patterns;

use patterns::{Pace, PairRole, PipelineRole, ServerRole};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "R-EMS messaging control utility",
    long_about = None
)]
struct Cli {
    /// Messaging configuration (TOML). Falls back to R_EMS_CONFIG.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Two nodes exchanging their names.
    Pair {
        #[arg(value_enum)]
        role: PairRole,
        url: String,
        #[command(flatten)]
        pace: Pace,
    },
    /// A bus node broadcasting its name to every connected node.
    Bus {
        name: String,
        /// Address this node listens on.
        listen: String,
        /// Addresses of other nodes.
        dial: Vec<String>,
        #[command(flatten)]
        pace: Pace,
    },
    /// Pull collector (node0) or one-shot push producer (node1).
    Pipeline {
        #[arg(value_enum)]
        role: PipelineRole,
        url: String,
        /// Message sent by node1; "STOP" ends node0.
        message: Option<String>,
    },
    /// Date publisher (server) or subscriber (client).
    Pubsub {
        #[arg(value_enum)]
        role: ServerRole,
        url: String,
        /// Client name.
        name: Option<String>,
        #[command(flatten)]
        pace: Pace,
    },
    /// Date service (node0) or one-shot requester (node1).
    Reqrep {
        #[arg(value_enum)]
        role: PairRole,
        url: String,
        #[command(flatten)]
        pace: Pace,
    },
    /// Date surveyor (server) or respondent (client).
    Survey {
        #[arg(value_enum)]
        role: ServerRole,
        url: String,
        /// Client name.
        name: Option<String>,
        #[command(flatten)]
        pace: Pace,
    },
    /// Open a socket defined in the configuration and print what it receives.
    Socket {
        /// Name of the `[sockets.<name>]` table.
        name: String,
        /// Messages to send before receiving.
        #[arg(long = "send", value_name = "MESSAGE")]
        messages: Vec<String>,
        #[command(flatten)]
        pace: Pace,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Option<MessagingConfig>> {
    match path {
        Some(path) => MessagingConfig::from_path(path)
            .map(Some)
            .with_context(|| format!("loading {}", path.display())),
        None if std::env::var_os(MessagingConfig::ENV_CONFIG_PATH).is_some() => {
            MessagingConfig::load::<PathBuf>(&[]).map(Some)
        }
        None => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    match &config {
        Some(config) => r_ems_common::init_tracing("r-emsctl", &config.logging)?,
        None => logging::init(),
    }

    match cli.command {
        Commands::Pair { role, url, pace } => patterns::pair(role, &url, pace).await,
        Commands::Bus {
            name,
            listen,
            dial,
            pace,
        } => patterns::bus(&name, &listen, &dial, pace).await,
        Commands::Pipeline { role, url, message } => {
            patterns::pipeline(role, &url, message.as_deref()).await
        }
        Commands::Pubsub {
            role,
            url,
            name,
            pace,
        } => patterns::pubsub(role, &url, name.as_deref(), pace).await,
        Commands::Reqrep { role, url, pace } => patterns::reqrep(role, &url, pace).await,
        Commands::Survey {
            role,
            url,
            name,
            pace,
        } => patterns::survey(role, &url, name.as_deref(), pace).await,
        Commands::Socket {
            name,
            messages,
            pace,
        } => {
            let config = config.context("the socket command needs --config or R_EMS_CONFIG")?;
            patterns::configured(&config, &name, &messages, pace).await
        }
    }
}
