use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use friend_ping::common::{Color, PresenceEvent, Signal};
use friend_ping::config;
use friend_ping::storage::MessageFilter;
use friend_ping::{Coordinator, PresenceError};
use serde::Serialize;
use tokio::signal;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(
    name = "friend_ping",
    version,
    about = "Group presence and color signaling for friend pings"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a friend in a group and assign it a color
    Create { friend_id: String, group_id: String },
    /// Show one friend
    Get { friend_id: String },
    /// List friends, optionally only one group
    List {
        #[arg(long)]
        group: Option<String>,
    },
    /// Record a liveness ping with the friend's current tiles (JSON)
    Ping {
        friend_id: String,
        #[arg(long, default_value = "null")]
        tiles: String,
    },
    /// Overwrite the last-ping timestamp (RFC 3339)
    Touch {
        friend_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Set the daily reachability window, HH:MM to HH:MM in UTC
    SetTimeout {
        friend_id: String,
        start: String,
        end: String,
    },
    /// Show the reachability window and whether it is open now
    GetTimeout { friend_id: String },
    /// Push a color signal into a friend's queue
    Send {
        friend_id: String,
        #[arg(required = true)]
        colors: Vec<String>,
    },
    /// Take every pending signal out of a friend's queue
    Drain { friend_id: String },
    /// Append a message to the log
    Message {
        from: String,
        to: String,
        /// JSON payload; plain text is wrapped as {"text": ...}
        body: String,
    },
    /// Messages newest first
    History {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Generate a code for a friend, or show the existing one
    Code { friend_id: String },
    /// Purge stale friends once
    Sweep,
    /// Run the presence monitor until Ctrl-C
    Monitor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);
    let coordinator = Coordinator::open(&app_config)?;

    match cli.command {
        Command::Create {
            friend_id,
            group_id,
        } => print_json(&coordinator.registry.create_friend(&friend_id, &group_id)?),
        Command::Get { friend_id } => print_json(&coordinator.registry.get_friend(&friend_id)?),
        Command::List { group } => {
            let friends = match group {
                Some(group_id) => coordinator.registry.get_friends_in_group(&group_id)?,
                None => coordinator.registry.get_all_friends()?,
            };
            print_json(&friends)
        }
        Command::Ping { friend_id, tiles } => {
            let tiles: serde_json::Value = serde_json::from_str(&tiles)?;
            coordinator.registry.ping(&friend_id, tiles)?;
            print_json(&coordinator.registry.get_friend(&friend_id)?)
        }
        Command::Touch {
            friend_id,
            timestamp,
        } => {
            coordinator
                .registry
                .update_timestamp(&friend_id, timestamp)?;
            print_json(&coordinator.registry.get_friend(&friend_id)?)
        }
        Command::SetTimeout {
            friend_id,
            start,
            end,
        } => print_json(&coordinator.registry.set_timeout(&friend_id, &start, &end)?),
        Command::GetTimeout { friend_id } => {
            let window = coordinator.registry.get_timeout(&friend_id)?;
            let reachable = coordinator.registry.is_reachable(&friend_id)?;
            print_json(&serde_json::json!({ "timeout": window, "reachable_now": reachable }))
        }
        Command::Send { friend_id, colors } => {
            let signal = Signal(colors.into_iter().map(Color::new).collect());
            let depth = coordinator.signals.enqueue(&friend_id, signal)?;
            print_json(&serde_json::json!({ "friend_id": friend_id, "depth": depth }))
        }
        Command::Drain { friend_id } => print_json(&coordinator.signals.drain(&friend_id)?),
        Command::Message { from, to, body } => {
            let body = serde_json::from_str::<serde_json::Value>(&body)
                .unwrap_or_else(|_| serde_json::json!({ "text": body }));
            print_json(&coordinator.messages.append(&from, &to, body)?)
        }
        Command::History { from, to, limit } => {
            let filter = MessageFilter {
                from,
                to,
                since: None,
                limit,
            };
            print_json(&coordinator.messages.query_ordered(&filter)?)
        }
        Command::Code { friend_id } => match coordinator.codes.get(&friend_id) {
            Ok(code) => print_json(&code),
            Err(PresenceError::NotFound(_)) => print_json(&coordinator.codes.generate(&friend_id)?),
            Err(err) => Err(err.into()),
        },
        Command::Sweep => print_json(&coordinator.monitor().sweep()?),
        Command::Monitor => run_monitor(&coordinator).await,
    }
}

async fn run_monitor(coordinator: &Coordinator) -> Result<(), Box<dyn Error>> {
    let (event_tx, mut event_rx) = mpsc::channel(100);
    let monitor = Arc::new(coordinator.monitor());

    let listener = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                PresenceEvent::FriendPurged {
                    friend_id,
                    group_id,
                    color,
                } => log::info!("{friend_id} left {group_id}, {color} released"),
                PresenceEvent::SweepFailed(reason) => log::warn!("Sweep failed: {reason}"),
            }
        }
    });

    monitor
        .run(event_tx, async {
            if let Err(err) = signal::ctrl_c().await {
                log::error!("Unable to listen for shutdown signal: {err}");
            }
        })
        .await;

    listener.await?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
