use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use clap::Parser;
use client_core::{load_settings, ChatClient, ClientEvent, ConnectionState, SessionState};
use shared::domain::EntityId;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{parse_command, Command, HELP};

#[derive(Parser, Debug)]
struct Args {
    /// Client config file; `client.toml` in the working directory is used when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    info!(server_url = %settings.server_url, "cli: starting");

    let client = ChatClient::new(settings);
    let printer = tokio::spawn(print_events(
        Arc::clone(&client),
        client.subscribe_events(),
    ));

    let identity = match client.restore_session().await? {
        Some(identity) => identity,
        None => match (args.email.as_deref(), args.password.as_deref()) {
            (Some(email), Some(password)) => client.login(email, password).await?,
            _ => bail!("no stored session; pass --email and --password to log in"),
        },
    };
    println!("Logged in as {} ({})", identity.full_name, identity.email);
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match run_command(&client, parse_command(&line)).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => warn!(error = %err, "cli: command failed"),
        }
    }

    printer.abort();
    Ok(())
}

/// Returns `false` when the session should end.
async fn run_command(client: &Arc<ChatClient>, command: Command) -> Result<bool> {
    match command {
        Command::Open(id) => client.open_conversation(&EntityId::from(id)).await?,
        Command::Room(id) => client.create_room(&EntityId::from(id)).await?,
        Command::CreateGroup(name) => client.create_group(&name).await?,
        Command::Say(body) => client.send_message(&body).await?,
        Command::Users => {
            for (id, name) in client.roster().await.users {
                println!("  {id}  {name}");
            }
        }
        Command::Groups => {
            for (id, name) in client.roster().await.groups {
                println!("  {id}  {name}");
            }
        }
        Command::History => match client.conversation_state().await {
            (Some(address), SessionState::Open) => {
                println!("-- {address}");
                for line in client.transcript().await {
                    println!(
                        "[{}] {}: {}",
                        line.sent_at.format("%H:%M"),
                        line.sender_label,
                        line.body
                    );
                }
            }
            (Some(address), _) => println!("-- {address} (loading history)"),
            (None, _) => println!("no conversation open"),
        },
        Command::Logout => {
            client.logout().await?;
            println!("Logged out");
            return Ok(false);
        }
        Command::Quit => return Ok(false),
        Command::Help => println!("{HELP}"),
        Command::Unknown(line) => println!("unknown command: {line} (try /help)"),
    }
    Ok(true)
}

async fn print_events(client: Arc<ChatClient>, mut events: broadcast::Receiver<ClientEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "cli: event printer fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            ClientEvent::RosterUpdated { users, groups } => {
                println!("* roster: {users} contacts, {groups} groups")
            }
            ClientEvent::ConversationOpened { address } => println!("* opening {address}"),
            ClientEvent::HistoryLoaded { address, count } => {
                println!("* {address}: {count} messages loaded")
            }
            ClientEvent::MessageAppended {
                address, message, ..
            } => {
                let sender = client.sender_label(&message.sender_id).await;
                println!("[{address}] {sender}: {}", message.body);
            }
            ClientEvent::RoomCreated { room } => println!("* room {room} is ready"),
            ClientEvent::Notice(notice) => println!("! {notice}"),
            ClientEvent::Connection(ConnectionState::Connected) => println!("* connected"),
            ClientEvent::Connection(ConnectionState::Disconnected) => println!("* disconnected"),
            ClientEvent::Error(reason) => println!("! {reason}"),
        }
    }
}
