//! Chat command - interactive session on a relay.
//!
//! Reads lines from stdin and prints the conversation to stdout.
//!
//! ## Input
//!
//! - `<text>` - Send to the selected peer
//! - `//<text>` - Send text that starts with `/`
//! - `/peers` - List connected peers
//! - `/to <name|key-prefix>` - Select a peer
//! - `/history` - Print the conversation so far
//! - `/quit` - Disconnect and exit

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};

use relaychat::chat::{
    ChatClient, Delivery, Direction, HistoryItem, Identity, SessionEvent, SessionSnapshot,
};
use relaychat::PeerKey;

use super::{CommandExecutor, LoadedConfig};

/// Join a relay and chat with the other participants.
#[derive(Args, Debug)]
pub struct ChatCommand {
    /// Display name announced to the relay
    #[arg(short, long)]
    pub name: String,

    /// Relay WebSocket URL (overrides the config file)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Close the session after this many idle seconds (0 disables)
    #[arg(long)]
    pub idle_timeout: Option<u64>,
}

impl CommandExecutor for ChatCommand {
    fn execute(&self, loaded: &LoadedConfig) -> Result<()> {
        let mut config = loaded.config.clone();
        if let Some(url) = &self.url {
            config = config.with_relay_url(url.clone());
        }
        if let Some(secs) = self.idle_timeout {
            config = config.with_idle_timeout_secs(secs);
        }
        config.validate().context("Invalid configuration")?;

        let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
        rt.block_on(self.run(ChatClient::websocket(config)))
    }
}

impl ChatCommand {
    async fn run(&self, mut client: ChatClient) -> Result<()> {
        println!("Connecting to {} as {}...", client.config().relay_url, self.name.trim());
        client
            .connect(&self.name)
            .await
            .context("Failed to start session")?;
        client
            .wait_active()
            .await
            .context("Failed to connect to relay")?;

        if let Some(me) = client.snapshot().me {
            println!("Connected. Your key: {}", me.public_key.fingerprint());
        }
        println!("Type /peers to list participants, /to <name> to pick one, /quit to leave.");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read input")? else {
                        break;
                    };
                    if !self.handle_input(&client, &line).await {
                        break;
                    }
                }
                event = client.next_event() => {
                    let Some(event) = event else { break };
                    if !print_event(&client.snapshot(), event) {
                        break;
                    }
                }
            }
        }

        client.disconnect().await;
        println!("Disconnected.");
        Ok(())
    }

    /// Returns `false` when the user asked to leave.
    async fn handle_input(&self, client: &ChatClient, line: &str) -> bool {
        let snapshot = client.snapshot();
        match Input::parse(line) {
            Input::Empty => {}
            Input::Quit => return false,
            Input::Help => print_help(),
            Input::Peers => {
                if snapshot.peers.is_empty() {
                    println!("* nobody else is here");
                }
                for peer in &snapshot.peers {
                    let marker = if snapshot.selected.as_ref() == Some(peer) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{} {} ({})", marker, peer.name, peer.public_key.fingerprint());
                }
            }
            Input::History => {
                for delivery in &snapshot.history.to_vec() {
                    println!("{}", format_delivery(&snapshot, delivery));
                }
            }
            Input::To(query) => match resolve_peer(&snapshot.peers, &query) {
                Ok(key) => match client.select(&key).await {
                    Ok(peer) => println!("* talking to {} ({})", peer.name, key.fingerprint()),
                    Err(e) => println!("! {}", e),
                },
                Err(message) => println!("! {}", message),
            },
            Input::Unknown(command) => println!("! unknown command /{}; try /help", command),
            Input::Text(text) => match &snapshot.selected {
                Some(peer) => {
                    if let Err(e) = client.send(&peer.public_key, &text).await {
                        println!("! {}", e);
                    }
                }
                None => println!("! no peer selected; use /to <name>"),
            },
        }
        true
    }
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Empty,
    Text(String),
    Peers,
    To(String),
    History,
    Help,
    Quit,
    Unknown(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Input::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Input::Text(line.to_string());
        };
        if command.starts_with('/') {
            return Input::Text(command.to_string());
        }

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command.trim(), ""),
        };
        match name {
            "peers" => Input::Peers,
            "to" if !arg.is_empty() => Input::To(arg.to_string()),
            "history" => Input::History,
            "help" => Input::Help,
            "quit" | "exit" => Input::Quit,
            other => Input::Unknown(other.to_string()),
        }
    }
}

/// Resolve `/to` input: an exact display name, or an unambiguous key prefix.
fn resolve_peer(peers: &[Identity], query: &str) -> std::result::Result<PeerKey, String> {
    let by_name: Vec<&Identity> = peers.iter().filter(|p| p.name == query).collect();
    match by_name.as_slice() {
        [one] => return Ok(one.public_key),
        [] => {}
        many => {
            let keys: Vec<String> = many.iter().map(|p| p.public_key.fingerprint()).collect();
            return Err(format!(
                "{} peers are named {}; use a key prefix: {}",
                many.len(),
                query,
                keys.join(", ")
            ));
        }
    }

    let prefix = query.to_lowercase();
    if prefix.chars().all(|c| c.is_ascii_hexdigit()) {
        let by_key: Vec<&Identity> = peers
            .iter()
            .filter(|p| p.public_key.to_hex().starts_with(&prefix))
            .collect();
        match by_key.as_slice() {
            [one] => return Ok(one.public_key),
            [] => {}
            _ => return Err(format!("key prefix {} is ambiguous", query)),
        }
    }

    Err(format!("no peer matches {}", query))
}

fn display_name(snapshot: &SessionSnapshot, key: &PeerKey) -> String {
    if let Some(me) = snapshot.me.as_ref().filter(|me| &me.public_key == key) {
        return me.name.clone();
    }
    snapshot
        .peers
        .iter()
        .find(|p| &p.public_key == key)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| key.fingerprint())
}

fn format_delivery(snapshot: &SessionSnapshot, delivery: &Delivery) -> String {
    match &delivery.item {
        HistoryItem::Entry(entry) => {
            let arrow = match entry.direction {
                Direction::Sent => "->",
                Direction::Received => "<-",
            };
            let other = match entry.direction {
                Direction::Sent => &entry.to,
                Direction::Received => &entry.from,
            };
            format!(
                "[{}] {} {}: {}",
                entry.timestamp,
                arrow,
                display_name(snapshot, other),
                entry.text
            )
        }
        HistoryItem::Failed {
            from,
            timestamp,
            error,
            ..
        } => format!(
            "[{}] !! message from {} rejected: {}",
            timestamp,
            display_name(snapshot, from),
            error
        ),
    }
}

/// Print an event. Returns `false` once the session has closed.
fn print_event(snapshot: &SessionSnapshot, event: SessionEvent) -> bool {
    match event {
        SessionEvent::StateChanged(state) => {
            tracing::debug!(state = %state, "state changed");
        }
        SessionEvent::Roster(change) => {
            for joined in &change.joined {
                if snapshot.me.as_ref() != Some(joined) {
                    println!("* {} ({}) joined", joined.name, joined.public_key.fingerprint());
                }
            }
            for departed in &change.departed {
                println!("* {} left", departed.name);
            }
            if change.deselected.is_some() {
                println!("* your conversation partner left; use /to to pick another");
            }
        }
        SessionEvent::Delivered(delivery) => {
            let is_echo = matches!(
                &delivery.item,
                HistoryItem::Entry(entry) if entry.direction == Direction::Sent
            );
            if !is_echo {
                println!("{}", format_delivery(snapshot, &delivery));
            }
        }
        SessionEvent::Closed { reason } => {
            println!("* session closed: {}", reason);
            return false;
        }
    }
    true
}

fn print_help() {
    println!("  <text>              send to the selected peer");
    println!("  //<text>            send text starting with /");
    println!("  /peers              list connected peers");
    println!("  /to <name|key>      select a peer by name or key prefix");
    println!("  /history            show the conversation");
    println!("  /quit               disconnect and exit");
}
