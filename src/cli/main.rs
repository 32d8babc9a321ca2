//! DoubleCheck Sync Entry Point
//!
//! Runs the offline queue against Supabase and manages queued actions from a
//! terminal.
//!
//! ## Commands
//!
//! - `doublecheck-sync run` - drain continuously until interrupted
//! - `doublecheck-sync status` - queue statistics
//! - `doublecheck-sync list [--status failed]` - queued actions
//! - `doublecheck-sync retry <id>` - give a failed action a fresh attempt budget
//! - `doublecheck-sync dismiss <id>` - discard an action
//! - `doublecheck-sync enqueue-photo` / `enqueue-inspection` - queue an action

#[cfg(feature = "cli")]
mod app {
    use clap::{Parser, Subcommand};
    use doublecheck_sync::local_db::SqliteBackend;
    use doublecheck_sync::offline::action::{
        ActionId, ActionKind, ActionStatus, InspectionCreatePayload, PhotoUploadPayload,
    };
    use doublecheck_sync::offline::store::ActionStore;
    use doublecheck_sync::offline::OfflineQueue;
    use doublecheck_sync::remote::register_supabase_executors;
    use doublecheck_sync::shared::clock::SystemClock;
    use doublecheck_sync::shared::config::SyncConfig;
    use doublecheck_sync::sync::{ConnectivitySource, ExecutorRegistry, HttpProbe};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    /// DoubleCheck offline action queue
    #[derive(Debug, Parser)]
    #[command(name = "doublecheck-sync")]
    #[command(author, version, about, long_about = None)]
    pub struct Cli {
        /// TOML configuration file
        #[arg(long, short)]
        pub config: Option<PathBuf>,

        /// Queue database, overriding the configuration
        #[arg(long)]
        pub database: Option<PathBuf>,

        #[command(subcommand)]
        pub command: Command,
    }

    #[derive(Debug, Subcommand)]
    pub enum Command {
        /// Drain the queue until interrupted
        Run,
        /// Print queue statistics
        Status,
        /// List queued actions, oldest first
        List {
            /// Only actions with this status (pending, in_flight, failed)
            #[arg(long)]
            status: Option<String>,
        },
        /// Reset a failed action and drain it
        Retry { id: String },
        /// Discard an action
        Dismiss { id: String },
        /// Queue a photo upload
        EnqueuePhoto {
            #[arg(long)]
            inspection_id: String,
            #[arg(long)]
            checklist_item_id: String,
            #[arg(long)]
            file: PathBuf,
            #[arg(long, default_value = "image/jpeg")]
            content_type: String,
        },
        /// Queue an inspection insert
        EnqueueInspection {
            #[arg(long)]
            property_id: String,
            #[arg(long)]
            inspector_id: String,
            #[arg(long)]
            notes: Option<String>,
        },
    }

    impl Command {
        /// Commands that execute queued actions and so need executors
        pub fn drains(&self) -> bool {
            matches!(self, Command::Run | Command::Retry { .. })
        }
    }

    pub async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
        let mut config = SyncConfig::load(cli.config.as_deref())?;
        if let Some(path) = cli.database {
            config.database_path = Some(path);
        }

        let backend = SqliteBackend::open(config.database_path()).await?;
        let store = Arc::new(ActionStore::open(Arc::new(backend), Arc::new(SystemClock)).await?);

        let mut executors = ExecutorRegistry::new();
        match register_supabase_executors(&mut executors, &config) {
            Ok(()) => {}
            // Queue management works without credentials; only draining needs them
            Err(e) if !cli.command.drains() => {
                tracing::debug!(error = %e, "Supabase executors not registered");
            }
            Err(e) => return Err(e.into()),
        }

        let probe_url = config.supabase_url.clone();
        let queue = OfflineQueue::new(Arc::clone(&store), executors, config);

        match cli.command {
            Command::Run => {
                let probe = match probe_url {
                    Some(url) => Some(Arc::new(HttpProbe::new(url, Duration::from_secs(5))?)
                        as Arc<dyn ConnectivitySource>),
                    None => None,
                };
                queue.start(probe).await?;
                tracing::info!("Sync running, press Ctrl-C to stop");

                tokio::signal::ctrl_c().await?;
                queue.stop().await;

                let stats = queue.stats().await?;
                tracing::info!(
                    pending = stats.pending,
                    failed = stats.failed,
                    "Sync stopped"
                );
            }
            Command::Status => {
                let stats = queue.stats().await?;
                println!("pending:   {}", stats.pending);
                println!("in_flight: {}", stats.in_flight);
                println!("failed:    {}", stats.failed);
            }
            Command::List { status } => {
                let filter = status
                    .map(|s| s.parse::<ActionStatus>())
                    .transpose()?;
                for action in store.list(filter).await? {
                    println!(
                        "{}  {:<18} {:<9} attempts={} {}",
                        action.id,
                        action.kind,
                        action.status,
                        action.attempts,
                        action.last_error.as_deref().unwrap_or("")
                    );
                }
            }
            Command::Retry { id } => {
                let id = ActionId::from(id);
                if queue.coordinator().requeue(&id).await? {
                    let report = queue.drain().await?;
                    println!(
                        "retried {} (succeeded {}, retrying {}, failed {})",
                        id, report.succeeded, report.retried, report.failed
                    );
                } else {
                    println!("{} is in flight", id);
                }
            }
            Command::Dismiss { id } => {
                let id = ActionId::from(id);
                queue.dismiss(&id).await?;
                println!("dismissed {}", id);
            }
            Command::EnqueuePhoto {
                inspection_id,
                checklist_item_id,
                file,
                content_type,
            } => {
                let payload = PhotoUploadPayload {
                    inspection_id,
                    checklist_item_id,
                    file_path: file.to_string_lossy().into_owned(),
                    content_type,
                };
                let id = store
                    .enqueue(ActionKind::PhotoUpload, serde_json::to_value(payload)?)
                    .await?;
                println!("{}", id);
            }
            Command::EnqueueInspection {
                property_id,
                inspector_id,
                notes,
            } => {
                let payload = InspectionCreatePayload {
                    property_id,
                    inspector_id,
                    status: "draft".to_string(),
                    notes,
                };
                let id = store
                    .enqueue(ActionKind::InspectionCreate, serde_json::to_value(payload)?)
                    .await?;
                println!("{}", id);
            }
        }
        Ok(())
    }
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use clap::Parser;

    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_target(false)
        .init();

    app::run(app::Cli::parse()).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("The command-line interface requires the 'cli' feature.");
    eprintln!("Run with: cargo run --bin doublecheck-sync --features cli");
    std::process::exit(1);
}
