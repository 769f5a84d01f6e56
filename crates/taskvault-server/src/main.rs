use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use taskvault_db::{Database, DbConfig, SqliteDatabase};
use taskvault_server::auth;
use taskvault_server::config::ServeConfig;

#[derive(Parser)]
#[command(name = "taskvault-server", about = "Task tracker with streaming attachment storage")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeConfig,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new API key
    Keygen {
        /// Human-readable name for the key
        #[arg(long, default_value = "")]
        name: String,
    },
    /// List all API keys (metadata only, no secrets)
    ListKeys,
    /// Revoke (delete) an API key by ID
    RevokeKey {
        /// The API key ID to revoke
        id: String,
    },
    /// Delete stored objects that no task references
    SweepOrphans {
        /// Only list what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let db: Arc<dyn Database> = Arc::new(SqliteDatabase::open(&DbConfig::from_env())?);

    match cli.command {
        Some(Commands::Keygen { name }) => {
            let raw_key = auth::generate_api_key();
            let hash = auth::sha256_hex(&raw_key);
            let api_key = db.insert_api_key(&name, &hash).await?;
            eprintln!("Created API key (id: {})", api_key.id);
            if !name.is_empty() {
                eprintln!("  name: {name}");
            }
            // Print the raw key to stdout so it can be captured
            println!("{raw_key}");
            eprintln!("\nSave this key, it cannot be retrieved again.");
        }
        Some(Commands::ListKeys) => {
            let keys = db.list_api_keys().await?;
            if keys.is_empty() {
                eprintln!("No API keys found.");
            } else {
                println!("{:<38} {:<20} {:<28} LAST USED", "ID", "NAME", "CREATED");
                for key in keys {
                    println!(
                        "{:<38} {:<20} {:<28} {}",
                        key.id,
                        if key.name.is_empty() { "-" } else { &key.name },
                        key.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        key.last_used_at
                            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                            .unwrap_or_else(|| "never".into()),
                    );
                }
            }
        }
        Some(Commands::RevokeKey { id }) => {
            db.delete_api_key(&id).await?;
            eprintln!("Revoked API key {id}");
        }
        Some(Commands::SweepOrphans { dry_run }) => {
            let state = taskvault_server::build_state(db, &cli.serve).await?;
            let orphans = state.service.sweep_orphans(dry_run).await?;
            for key in &orphans {
                println!("{key}");
            }
            let verb = if dry_run { "found" } else { "deleted" };
            eprintln!("{verb} {} orphaned object(s)", orphans.len());
        }
        None => {
            let addr = cli.serve.addr();
            let state = taskvault_server::build_state(db, &cli.serve).await?;
            if state.auth.is_some() {
                tracing::info!("authentication enabled");
            } else {
                tracing::warn!("authentication disabled (no TASKVAULT_API_KEY or DB keys)");
            }

            let listener = TcpListener::bind(addr).await?;
            tracing::info!(%addr, public_url = %cli.serve.public_url(), "taskvault-server listening");

            taskvault_server::serve(listener, state).await?;
        }
    }

    Ok(())
}
