//! Chat bot example: joins rooms, answers a few commands, logs moderation.
//!
//! Usage:
//!   cargo run --example chat_bot -- --channel somechannel --username mybot
//!
//! The OAuth token is read from `TWITCH_TOKEN`. Without a username the bot
//! connects anonymously and only reads.
//!
//! Commands (in chat):
//!   !ping     reply with the measured keep-alive latency
//!   !mods     ask the server for the moderator list
//!   !echo x   repeat x

use anyhow::Result;
use clap::Parser;
use tmi_sdk::{Client, ClientConfig, Event};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chat-bot", about = "Twitch chat bot example")]
struct Args {
    /// Room to join; may be repeated.
    #[arg(long = "channel", required = true)]
    channels: Vec<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long, env = "TWITCH_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// TOML config file; command line flags override it.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    /// Use plain ws:// instead of wss://.
    #[arg(long)]
    insecure_transport: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    config.channels.extend(args.channels.iter().cloned());
    if args.username.is_some() {
        config.identity.username = args.username.clone();
        config.identity.password = args.token.clone();
    }
    config.connection.secure = !args.insecure_transport;
    if args.insecure_transport {
        config.connection.port = Some(80);
    }

    let client = Client::new(config);
    let mut events = client.events();
    client.connect().await?;

    while let Some(event) = events.recv().await {
        match &event {
            Event::Connected { server, port } => {
                tracing::info!(server, port, "Connected");
            }
            Event::Join { channel, is_self: true, .. } => {
                tracing::info!(channel, "Joined");
            }
            Event::Disconnected { reason } => {
                tracing::warn!(reason, "Disconnected");
            }
            Event::MaxReconnect => {
                tracing::error!("Giving up");
                break;
            }
            Event::Ban { channel, username, .. } => {
                tracing::info!(channel, username, "Banned");
            }
            Event::Timeout { channel, username, duration, .. } => {
                tracing::info!(channel, username, duration, "Timed out");
            }
            Event::Mods { channel, mods } => {
                let list = if mods.is_empty() { "none".to_string() } else { mods.join(", ") };
                if let Err(e) = client.say(channel, &format!("Moderators: {list}")).await {
                    tracing::warn!(error = %e, "Reply failed");
                }
            }
            Event::Chat(msg) if !msg.is_self => {
                if let Err(e) = handle_command(&client, msg).await {
                    tracing::warn!(error = %e, "Command failed");
                }
            }
            _ => {}
        }
    }
    Ok(())
}

async fn handle_command(client: &Client, msg: &tmi_sdk::ChatMessage) -> Result<()> {
    if client.is_anonymous() {
        return Ok(());
    }
    let parent = msg.tags.text("id").unwrap_or_default();
    let (command, rest) = msg
        .message
        .split_once(' ')
        .unwrap_or((msg.message.as_str(), ""));
    match command {
        "!ping" => {
            let latency = client.latency();
            client
                .reply(&msg.channel, &format!("pong ({} ms)", latency.as_millis()), parent)
                .await?;
        }
        "!mods" => client.mods(&msg.channel)?,
        "!echo" if !rest.is_empty() => client.say(&msg.channel, rest).await?,
        _ => {}
    }
    Ok(())
}
