mod chat;
mod config;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;

use rayabaari_client::RoomDirectory;
use rayabaari_crypto::Codec;
use rayabaari_db::Database;
use rayabaari_gateway::{BlobStore, LocalBackend};
use rayabaari_push::{Notifier, RelayTransport};
use rayabaari_types::Backend;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "rayabaari")]
#[command(about = "Rayabaari - end-to-end encrypted room chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Join a room and chat
    Chat {
        /// Display name
        #[arg(short, long)]
        user: String,

        /// Room secret code
        #[arg(short, long)]
        code: String,
    },

    /// Manage rooms
    Rooms {
        #[command(subcommand)]
        command: RoomsCommand,
    },

    /// Register a push subscription for a user
    Push {
        #[arg(short, long)]
        user: String,

        /// Subscription JSON as issued by the browser
        #[arg(short, long)]
        subscription: String,
    },
}

#[derive(Subcommand)]
enum RoomsCommand {
    List,
    Create {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        code: String,
    },
    Update {
        /// Current room name
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        new_name: Option<String>,
        #[arg(short, long)]
        code: String,
    },
    /// Delete a room and all of its messages
    Delete {
        #[arg(short, long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rayabaari=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let codec = Arc::new(Codec::from_secret(&config.encryption_key)?);
    let db = Database::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let local = LocalBackend::new(db, BlobStore::new(&config.storage_dir, &config.public_url));
    let backend: Arc<dyn Backend> = Arc::new(local.clone());
    info!("Using database {}", config.db_path.display());

    if let Some(url) = &config.push_relay_url {
        let notifier = Notifier::new(local.database(), Arc::new(RelayTransport::new(url.as_str())?));
        tokio::spawn(notifier.run(local.dispatcher().subscribe_inserts()));
        info!("Push fan-out enabled");
    }

    let rooms = RoomDirectory::new(backend.clone(), codec.clone());
    match cli.command {
        Command::Chat { user, code } => {
            let login = rooms.login(&user, &code).await?;
            chat::run(backend, codec, login).await
        }
        Command::Rooms { command } => manage_rooms(&rooms, command).await,
        Command::Push { user, subscription } => {
            let subscription: serde_json::Value =
                serde_json::from_str(&subscription).context("subscription is not JSON")?;
            backend.register_push(&user, subscription).await?;
            println!("Registered push subscription for {}", user);
            Ok(())
        }
    }
}

async fn manage_rooms(rooms: &RoomDirectory, command: RoomsCommand) -> Result<()> {
    match command {
        RoomsCommand::List => {
            for room in rooms.list().await? {
                println!("{}\t{}", room.name, room.secret_code);
            }
        }
        RoomsCommand::Create { name, code } => {
            rooms.create(&name, &code).await?;
            println!("Created {}", name);
        }
        RoomsCommand::Update {
            name,
            new_name,
            code,
        } => {
            let target = new_name.as_deref().unwrap_or(&name);
            rooms.update(&name, target, &code).await?;
            println!("Updated {}", target);
        }
        RoomsCommand::Delete { name } => {
            let room = rooms
                .list()
                .await?
                .into_iter()
                .find(|r| r.name == name)
                .ok_or_else(|| anyhow!("no room named {}", name))?;
            let removed = rooms.delete(&room).await?;
            println!("Deleted {} ({} messages)", name, removed);
        }
    }
    Ok(())
}
