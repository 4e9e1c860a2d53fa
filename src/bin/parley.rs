//! parley command-line client
//!
//! # Usage
//!
//! ```text
//! parley register alice
//! parley create alice team
//! parley join bob team
//! parley members team
//! parley invite alice bob      # creates the "alice+bob" group
//! parley groups --for bob      # rooms plus invitations addressed to bob
//! parley chat alice team       # stdin lines go to the group, /quit leaves
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use parley_client::{ChatClient, ChatStream, ClientConfig};
use parley_core::{ClientName, GroupListing};

// ============================================================================
// CLI Arguments
// ============================================================================

/// parley - group chat client
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
struct Args {
    /// Broker address (defaults to $PARLEY_ADDR, then 127.0.0.1:12021)
    #[arg(short, long, global = true)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered clients
    Clients,
    /// List groups and pending invitations
    Groups {
        /// Only show invitations addressed to this client
        #[arg(long = "for")]
        for_client: Option<String>,
    },
    /// List the members of a group
    Members { group: String },
    /// Register a client name
    Register { name: String },
    /// Remove a client and all its memberships
    Unregister { name: String },
    /// Create a group and join it
    Create { client: String, group: String },
    /// Join an existing group
    Join { client: String, group: String },
    /// Announce departure and leave a group
    Leave { client: String, group: String },
    /// Invite another client to a 1:1 chat
    Invite { client: String, peer: String },
    /// Chat in a group, reading messages from stdin
    Chat { client: String, group: String },
    /// Check that the broker answers
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("parley_client=warn".parse()?),
        )
        .init();

    let config = match args.addr {
        Some(addr) => ClientConfig::new(addr),
        None => ClientConfig::from_env(),
    };

    match args.command {
        Command::Chat { client, group } => run_chat(&config, client, group).await,
        command => run_control(&config, command).await,
    }
}

async fn run_control(config: &ClientConfig, command: Command) -> Result<()> {
    let mut client = ChatClient::connect(config)
        .await
        .with_context(|| format!("Failed to connect to {}", config.addr))?;

    match command {
        Command::Clients => {
            for name in client.list_clients().await? {
                println!("{name}");
            }
        }
        Command::Groups { for_client } => {
            let listing = client.group_listing().await?;
            print_listing(&listing, for_client.map(ClientName::new).as_ref());
        }
        Command::Members { group } => {
            for name in client.list_members(group).await? {
                println!("{name}");
            }
        }
        Command::Register { name } => client.register(name).await?,
        Command::Unregister { name } => client.unregister(name).await?,
        Command::Create { client: name, group } => client.create_group(name, group).await?,
        Command::Join { client: name, group } => client.join_group(name, group).await?,
        Command::Leave { client: name, group } => client.leave_chat_room(name, group).await?,
        Command::Invite { client: name, peer } => {
            let group = client.invite(name, peer).await?;
            println!("{group}");
        }
        Command::Ping => {
            let seq = client.ping(1).await?;
            println!("pong {seq} (connection {})", client.connection_id());
        }
        Command::Chat { .. } => {}
    }

    if let Err(e) = client.disconnect().await {
        debug!(error = %e, "Disconnect notice not delivered");
    }
    Ok(())
}

fn print_listing(listing: &GroupListing, for_client: Option<&ClientName>) {
    for room in &listing.rooms {
        println!("{room}");
    }
    let invitations = listing
        .invitations
        .iter()
        .filter(|invitation| for_client.map_or(true, |c| invitation.is_addressed_to(c)));
    for invitation in invitations {
        println!(
            "{} (invitation from {} to {})",
            invitation.group_name(),
            invitation.inviter,
            invitation.invitee
        );
    }
}

// ============================================================================
// Interactive Chat
// ============================================================================

async fn run_chat(config: &ClientConfig, client: String, group: String) -> Result<()> {
    let stream = ChatStream::connect(config, client.as_str(), group.as_str())
        .await
        .with_context(|| format!("Failed to open chat stream to {}", config.addr))?;
    let (mut receiver, mut sender) = stream.into_split()?;

    let printer = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(Some(message)) if message.is_departure() => print!("{}", message.body),
                Ok(Some(message)) => println!("{}: {}", message.sender, message.body),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Chat stream closed with error");
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim() == "/quit" {
            break;
        }
        if printer.is_finished() {
            break;
        }
        sender.send(line).await?;
    }

    if !printer.is_finished() {
        sender.leave().await?;
    }
    if let Err(e) = printer.await {
        warn!(error = %e, "Printer task failed");
    }
    Ok(())
}
