//! # lanchat
//!
//! Serverless chat for the local network. Peers find each other by UDP
//! broadcast and exchange direct messages over TCP.
//!
//! ## Usage
//!
//! ```bash
//! lanchat --name ada
//! > peers
//! > send grace
//! Enter message: lunch?
//! > inbox
//! > exit
//! ```

use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use lanchat_core::{ChatConfig, logging};
use lanchat_network::{ChatNode, NodeEvents};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::info;

mod commands;
mod output;
mod repl;

/// LAN chat
#[derive(Parser, Debug)]
#[command(name = "lanchat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Nickname to announce (prompted for if not given or configured)
    #[arg(short, long)]
    name: Option<String>,

    /// Config file (defaults to ~/.lanchat/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// UDP port for discovery announcements
    #[arg(long)]
    discovery_port: Option<u16>,

    /// TCP port for direct messages
    #[arg(long)]
    message_port: Option<u16>,

    /// Address to announce instead of the detected outbound address
    #[arg(long)]
    advertise_ip: Option<IpAddr>,

    /// Directory for log files (defaults to ~/.lanchat/logs)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut ChatConfig) {
        if let Some(name) = &self.name {
            config.nickname = Some(name.clone());
        }
        if let Some(port) = self.discovery_port {
            config.network.discovery_port = port;
        }
        if let Some(port) = self.message_port {
            config.network.message_port = port;
        }
        if let Some(ip) = self.advertise_ip {
            config.network.advertise_ip = Some(ip);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => ChatConfig::load_from_path(path)?,
        None => ChatConfig::load()?,
    };
    cli.apply(&mut config);

    let _log_guard = match &cli.log_dir {
        Some(dir) => logging::init_logging_to_dir(dir, &config.log_level)?,
        None => logging::init_logging(&config.log_level)?,
    };

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let nickname = match config.nickname.clone().filter(|n| !n.trim().is_empty()) {
        Some(name) => name,
        None => match ask_nickname(&mut input).await? {
            Some(name) => name,
            None => return Ok(()),
        },
    };

    let mut node = ChatNode::resolve(nickname, config.network.clone())
        .await
        .context("Failed to determine this machine's LAN address")?;
    let events = node.start().await.context("Failed to start networking")?;
    println!("Private listener started.");
    info!(
        "Running as '{}' at {}",
        node.identity().nickname,
        node.identity().outbound_ip
    );

    tokio::spawn(print_events(events));

    let mut repl = repl::Repl::new(
        node.state(),
        node.sender(),
        config.network.stale_threshold,
        std::io::stdout(),
    );
    repl.run(&mut input).await?;

    node.stop();
    Ok(())
}

/// Prompt until a non-blank nickname is entered. `None` on end of input.
async fn ask_nickname<R: AsyncBufRead + Unpin>(input: &mut Lines<R>) -> Result<Option<String>> {
    loop {
        print!("Enter your name: ");
        std::io::stdout().flush()?;
        match input.next_line().await? {
            Some(line) if !line.trim().is_empty() => return Ok(Some(line.trim().to_string())),
            Some(_) => continue,
            None => return Ok(None),
        }
    }
}

async fn print_events(mut events: NodeEvents) {
    loop {
        tokio::select! {
            Some(event) = events.discovery.recv() => {
                println!("{}", output::discovery_event(&event));
            }
            Some(entry) = events.inbox.recv() => {
                println!("{}", output::new_message(&entry));
            }
            else => break,
        }
    }
}
