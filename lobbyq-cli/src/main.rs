//! Minimal line-mode lobbyq client.
//!
//! Connects as an already-authenticated identity, joins a lobby, prints
//! chat, updates, alerts and the typing roster, and sends whatever you
//! type as chat messages. Commands:
//!
//!   /lobby <id>   switch lobby
//!   /leave        leave the current lobby
//!   /typing       send a typing ping
//!   /unread       print the unread-notification count
//!   /read-all     mark every notification read
//!   /quit         exit

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use lobbyq_sdk::lobby::{LobbyClient, LobbyConfig, ReconnectPolicy};
use lobbyq_sdk::session::{ConnectConfig, Identity};

#[derive(Parser)]
#[command(name = "lobbyq", about = "Line-mode lobbyq client")]
struct Args {
    /// Push-channel server address (host:port).
    #[arg(long, env = "LOBBYQ_SERVER", default_value = "127.0.0.1:4820")]
    server: String,
    /// Base URL of the request/response fallback API.
    #[arg(long, env = "LOBBYQ_API", default_value = "http://127.0.0.1:3000")]
    api: String,
    /// Bearer token for the fallback API.
    #[arg(long, env = "LOBBYQ_TOKEN")]
    token: Option<String>,
    /// Use TLS for the push channel.
    #[arg(long)]
    tls: bool,
    /// Skip TLS certificate verification (self-signed dev servers).
    #[arg(long)]
    tls_insecure: bool,
    /// Authenticated user id.
    #[arg(long, env = "LOBBYQ_USER_ID")]
    user_id: u64,
    /// Display name.
    #[arg(long, env = "LOBBYQ_USERNAME")]
    username: String,
    /// Lobby to join on startup.
    #[arg(long)]
    lobby: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    tracing::debug!(server = %args.server, api = %args.api, "starting");

    let config = LobbyConfig {
        connect: ConnectConfig {
            server_addr: args.server.clone(),
            tls: args.tls,
            tls_insecure: args.tls_insecure,
        },
        api_base: args.api.clone(),
        api_token: args.token.clone(),
        reconnect: ReconnectPolicy::default(),
    };
    let identity = Identity {
        user_id: args.user_id,
        username: args.username.clone(),
    };

    let (client, mut alerts) = LobbyClient::spawn(config, identity);
    if let Some(lobby) = args.lobby {
        client.switch_topic(lobby).await;
        println!("* joining lobby {lobby}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut render = tokio::time::interval(Duration::from_millis(500));
    let mut seen_messages = 0usize;
    let mut last_status = client.connection_status();
    let mut last_roster = String::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if !handle_input(&client, line, &mut seen_messages).await {
                    break;
                }
            }
            alert = alerts.recv() => {
                if let Some(alert) = alert {
                    println!("* {}: {}", alert.title, alert.body);
                }
            }
            _ = render.tick() => {
                let status = client.connection_status();
                if status != last_status {
                    println!("* connection: {}", status.label());
                    last_status = status;
                }

                let messages = client.messages();
                if messages.len() < seen_messages {
                    seen_messages = messages.len();
                }
                if messages.len() > seen_messages {
                    let fresh = messages.len() - seen_messages;
                    // Newest first in the log; print the backlog in
                    // chronological order, skipping our own echoes.
                    for msg in messages[..fresh].iter().rev() {
                        if msg.user_id == Some(args.user_id) {
                            continue;
                        }
                        let who = msg.username.as_deref().unwrap_or("anon");
                        println!("<{who}> {}", msg.text);
                    }
                    seen_messages = messages.len();
                }

                let roster = client
                    .typing_users()
                    .iter()
                    .map(|t| t.username.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                if roster != last_roster {
                    if !roster.is_empty() {
                        println!("* typing: {roster}");
                    }
                    last_roster = roster;
                }
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_input(client: &LobbyClient, line: &str, seen_messages: &mut usize) -> bool {
    if let Some(rest) = line.strip_prefix("/lobby ") {
        match rest.trim().parse() {
            Ok(id) => {
                client.switch_topic(id).await;
                *seen_messages = 0;
                println!("* switched to lobby {id}");
            }
            Err(_) => println!("* usage: /lobby <id>"),
        }
    } else if line == "/leave" {
        client.leave_topic().await;
        *seen_messages = 0;
        println!("* left the lobby");
    } else if line == "/typing" {
        client.send_typing_ping().await;
    } else if line == "/unread" {
        println!("* unread: {}", client.unread_count());
    } else if line == "/read-all" {
        match client.mark_all_notifications_read().await {
            Ok(()) => println!("* all notifications read"),
            Err(e) => eprintln!("! mark-all-read failed: {e}"),
        }
    } else if line == "/quit" {
        return false;
    } else if line.starts_with('/') {
        println!("* unknown command: {line}");
    } else {
        // Chat-send failures must reach the user.
        match client.send_message(line).await {
            Ok(msg) => println!("> {}", msg.text),
            Err(e) => eprintln!("! send failed: {e}"),
        }
    }
    true
}
