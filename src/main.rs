use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use schoolyard::cli::{SyncOptions, WatchOptions, open_store, run_init, run_sync, run_watch};
use schoolyard::config::{AuthMode, FileConfig, ServerConfig};
use schoolyard::photos::{DirectoryBackup, PhotoBackup};
use schoolyard::server::{AppState, create_router};
use schoolyard::store::Store;

#[derive(Parser)]
#[command(name = "schoolyard")]
#[command(about = "A multi-tenant school management server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and the superadmin account
    Init {
        /// Data directory for the database and uploads
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        /// Superadmin username
        #[arg(long, default_value = "superadmin")]
        username: String,
    },

    /// Start the server
    Serve {
        /// TOML file with server settings; flags override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Host to bind to [default: 127.0.0.1]
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to [default: 8080]
        #[arg(long, short)]
        port: Option<u16>,

        /// Data directory for the database and uploads [default: ./data]
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// strict rejects anonymous callers, demo serves them as a guest [default: strict]
        #[arg(long)]
        auth_mode: Option<AuthMode>,

        /// Session lifetime in hours [default: 24]
        #[arg(long)]
        session_ttl_hours: Option<i64>,

        /// Mirror uploaded photos into this directory
        #[arg(long)]
        backup_dir: Option<PathBuf>,
    },

    /// Show the live attendance feed of a running server
    Watch {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,

        /// Seconds between fetches
        #[arg(long, default_value = "5")]
        interval: u64,

        /// Only show one institution's records
        #[arg(long)]
        institution_code: Option<String>,
    },

    /// Push new rows of a face-recognition CSV log to a running server
    Sync {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,

        /// Recognition log to follow
        #[arg(long)]
        csv: PathBuf,

        /// Where processed row keys are kept
        #[arg(long, default_value = "processed_records.json")]
        state: PathBuf,

        /// Seconds between checks of the log
        #[arg(long, default_value = "5")]
        interval: u64,

        /// Institution code attached to every row
        #[arg(long)]
        institution_code: Option<String>,

        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
}

struct ServeFlags {
    config: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    auth_mode: Option<AuthMode>,
    session_ttl_hours: Option<i64>,
    backup_dir: Option<PathBuf>,
}

/// Defaults, then the config file, then explicit flags.
fn resolve_config(flags: ServeFlags) -> anyhow::Result<ServerConfig> {
    let mut config = ServerConfig::default();
    if let Some(path) = &flags.config {
        config.merge(FileConfig::load(path)?);
    }

    if let Some(host) = flags.host {
        config.host = host;
    }
    if let Some(port) = flags.port {
        config.port = port;
    }
    if let Some(data_dir) = flags.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(auth_mode) = flags.auth_mode {
        config.auth_mode = auth_mode;
    }
    if let Some(ttl) = flags.session_ttl_hours {
        if ttl <= 0 {
            anyhow::bail!("--session-ttl-hours must be positive");
        }
        config.session_ttl_hours = ttl;
    }
    if flags.backup_dir.is_some() {
        config.backup_dir = flags.backup_dir;
    }
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let store = Arc::new(open_store(&config)?);

    let expired = store.delete_expired_sessions(Utc::now())?;
    if expired > 0 {
        info!("Removed {expired} expired sessions");
    }

    let backup: Option<Arc<dyn PhotoBackup>> = config.backup_dir.as_deref().map(|dir| {
        info!("Mirroring photos to {}", dir.display());
        Arc::new(DirectoryBackup::new(dir)) as Arc<dyn PhotoBackup>
    });

    let addr = config.socket_addr()?;
    info!("Auth mode: {}", config.auth_mode);

    let state = Arc::new(AppState::new(store.clone(), config, backup));
    let app = create_router(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("schoolyard=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { data_dir, username } => {
            let config = ServerConfig {
                data_dir,
                ..ServerConfig::default()
            };
            let outcome = run_init(&config, &username)?;

            println!();
            println!("========================================");
            println!("Superadmin '{}' created with password:", outcome.username);
            println!();
            println!("  {}", outcome.password);
            println!();
            println!("Also saved to: {}", outcome.password_file.display());
            println!("========================================");
            println!();
        }
        Commands::Serve {
            config,
            host,
            port,
            data_dir,
            auth_mode,
            session_ttl_hours,
            backup_dir,
        } => {
            let config = resolve_config(ServeFlags {
                config,
                host,
                port,
                data_dir,
                auth_mode,
                session_ttl_hours,
                backup_dir,
            })?;
            serve(config).await?;
        }
        Commands::Watch {
            url,
            interval,
            institution_code,
        } => {
            run_watch(WatchOptions {
                url,
                interval: Duration::from_secs(interval.max(1)),
                institution_code,
            })
            .await?;
        }
        Commands::Sync {
            url,
            csv,
            state,
            interval,
            institution_code,
            once,
        } => {
            run_sync(SyncOptions {
                url,
                csv,
                state,
                interval: Duration::from_secs(interval.max(1)),
                institution_code,
                once,
            })
            .await?;
        }
    }

    Ok(())
}
