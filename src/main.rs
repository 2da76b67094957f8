use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rboted::crypto::EmailKeypair;
use rboted::transport::MemoryHub;
use rboted::{Config, EmailIdentity, Node, NodeDeps};

#[derive(Parser, Debug)]
#[command(name = "rboted")]
#[command(author, version, about = "serverless encrypted-mail peer node", long_about = None)]
struct Args {
    /// Path to the config file (JSON).
    #[arg(short, long)]
    conf: Option<PathBuf>,

    /// Root for persistent state; overrides the config file.
    #[arg(short, long)]
    datadir: Option<PathBuf>,

    /// Seed node destination in base64; repeatable, appended to the
    /// config file's bootstrap list.
    #[arg(short = 'B', long = "bootstrap", value_name = "DEST")]
    bootstrap: Vec<String>,

    /// Minimal log level (overrides the config file).
    #[arg(short, long)]
    loglevel: Option<String>,

    /// Public name of an email identity to create fresh key material for;
    /// repeatable. Useful for standalone runs and experiments.
    #[arg(long = "identity", value_name = "NAME")]
    identities: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // config load is fatal on a missing/unreadable explicit file
    let mut config = match &args.conf {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(datadir) = &args.datadir {
        config.datadir = datadir.to_string_lossy().into_owned();
    }
    if let Some(loglevel) = &args.loglevel {
        config.loglevel = loglevel.clone();
    }
    config.bootstrap.address.extend(args.bootstrap.iter().cloned());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.loglevel.clone()));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let identities: Vec<EmailIdentity> = args
        .identities
        .iter()
        .map(|name| EmailIdentity { name: name.clone(), keypair: EmailKeypair::generate() })
        .collect();
    for identity in &identities {
        info!(
            name = %identity.name,
            address = %identity.address().to_v1_b64(),
            "email identity"
        );
    }

    // The overlay bridge (SAM datagram session at sam.address) is an
    // external collaborator plugged in through the OverlaySession seam.
    // Without one, run on a process-local overlay: the full stack works
    // but only reaches nodes in this process.
    warn!(
        sam = %format!("{}:{}", config.sam.address, config.sam.udp),
        "no overlay bridge attached, running on a process-local overlay"
    );
    let hub = MemoryHub::new();
    let session = hub.open(&config.sam.name);

    let mut deps = NodeDeps::new(session);
    deps.identities = identities;
    let node = Node::new(config, deps)?;
    node.start()?;
    info!(destination = %node.local_destination(), "node running");

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal, exiting gracefully");
    node.stop().await;
    Ok(())
}
