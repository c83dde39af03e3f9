//! elect-loader - election protocol import service
//!
//! Operator CLI and HTTP service: imports precinct protocols from delimited
//! files or the scraped results page into the SQLite store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use elect_common::config::{default_config_path, load_toml_config};
use elect_common::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use elect_loader::config::LoaderConfig;
use elect_loader::models::{ImportParameters, ImportState, UnknownEntityAction, UpdatePolicy};
use elect_loader::services::{HttpFetcher, ImportManager, ImportRequest, ImportServices};
use elect_loader::sources::{LayoutKind, PageLocation, ImportSource};
use elect_loader::AppState;

/// Command-line arguments for elect-loader
#[derive(Parser, Debug)]
#[command(name = "elect-loader")]
#[command(about = "Election protocol import and reconciliation service")]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config dir>/elect/config.toml)
    #[arg(long, env = "ELECT_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the database and the image cache
    #[arg(long)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service
    Serve {
        /// Listen address, overrides the configuration file
        #[arg(long)]
        listen: Option<String>,
    },

    /// Import a delimited protocol file
    ImportCsv {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = LayoutKind::Ruelect)]
        layout: LayoutKind,
        #[command(flatten)]
        options: ImportOptions,
    },

    /// Import the results page
    ImportHtml {
        #[command(flatten)]
        page: PageArgs,
        /// Parse without refreshing the local image cache first
        #[arg(long)]
        no_prefetch: bool,
        #[command(flatten)]
        options: ImportOptions,
    },

    /// List region names of a delimited file that the store does not know
    CheckRegions {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = LayoutKind::Ruelect)]
        layout: LayoutKind,
    },

    /// Create every region named in a delimited file
    LoadRegions {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = LayoutKind::Ruelect)]
        layout: LayoutKind,
    },

    /// Download every image the results page links into the local cache
    PrefetchImages {
        #[command(flatten)]
        page: PageArgs,
    },
}

#[derive(Args, Debug)]
struct PageArgs {
    /// Page URL (default: configured page)
    #[arg(long, conflicts_with = "page_file")]
    url: Option<String>,

    /// Local copy of the page
    #[arg(long = "page-file")]
    page_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ImportOptions {
    /// create | ignore | stop
    #[arg(long, default_value = "create")]
    unknown_region: UnknownEntityAction,

    /// create | ignore | stop
    #[arg(long, default_value = "create")]
    unknown_commission: UnknownEntityAction,

    /// Fetch image bytes for images that only carry a URI
    #[arg(long)]
    download_images: bool,

    /// Keep stored protocols whose values changed instead of rewriting them
    #[arg(long)]
    keep_changed: bool,

    /// Result provider name
    #[arg(long)]
    provider: Option<String>,
}

impl ImportOptions {
    fn parameters(&self) -> ImportParameters {
        ImportParameters {
            unknown_region: self.unknown_region,
            unknown_commission: self.unknown_commission,
            update_policy: if self.keep_changed {
                UpdatePolicy::SkipWithWarning
            } else {
                UpdatePolicy::Replace
            },
            download_images: self.download_images,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(default_config_path);
    let toml = match &config_path {
        Some(path) => load_toml_config(path)?,
        None => Default::default(),
    };

    // Initialize tracing
    let default_filter = format!(
        "elect_loader={level},elect_common={level},tower_http=info",
        level = toml.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting elect-loader {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config file: {}", path.display());
    }

    let config = LoaderConfig::resolve(cli.root_folder.as_deref(), &toml)
        .context("Failed to resolve configuration")?;
    config.ensure_folders().context("Failed to create data folders")?;
    info!("Database: {}", config.database.display());

    let db_pool = elect_loader::db::init_database_pool(&config.database)
        .await
        .context("Failed to open database")?;

    let event_bus = EventBus::new(1000);
    let fetcher = Arc::new(HttpFetcher::new().context("Failed to build HTTP client")?);
    let listen = config.listen.clone();
    let manager = ImportManager::new(ImportServices::new(db_pool, event_bus, fetcher, config));

    match cli.command {
        Command::Serve { listen: cli_listen } => serve(manager, cli_listen.unwrap_or(listen)).await,
        Command::ImportCsv {
            file,
            layout,
            options,
        } => {
            let request = ImportRequest {
                source: ImportSource::Delimited { path: file, layout },
                provider: options.provider.clone(),
                parameters: options.parameters(),
            };
            run_import(&manager, request).await
        }
        Command::ImportHtml {
            page,
            no_prefetch,
            options,
        } => {
            let request = ImportRequest {
                source: ImportSource::Html {
                    url: page.url,
                    file: page.page_file,
                    prefetch_images: !no_prefetch,
                },
                provider: options.provider.clone(),
                parameters: options.parameters(),
            };
            run_import(&manager, request).await
        }
        Command::CheckRegions { file, layout } => {
            let unknown = manager.services().check_regions(&file, layout).await?;
            if unknown.is_empty() {
                println!("All regions are known");
            } else {
                println!("Unknown regions ({}):", unknown.len());
                for name in &unknown {
                    println!("  {}", name);
                }
            }
            Ok(())
        }
        Command::LoadRegions { file, layout } => {
            let created = manager.services().load_regions(&file, layout).await?;
            println!("Regions created: {}", created);
            Ok(())
        }
        Command::PrefetchImages { page } => {
            let location = match (page.page_file, page.url) {
                (Some(file), _) => PageLocation::File(file),
                (None, Some(url)) => PageLocation::Url(url),
                (None, None) => PageLocation::Url(manager.services().config.page_url.clone()),
            };
            let cancel = cancel_on_ctrl_c();
            let summary = manager.services().prefetch(&location, &cancel).await?;
            println!(
                "Total files: {}, new: {}, failed: {}",
                summary.total, summary.fetched, summary.failed
            );
            Ok(())
        }
    }
}

async fn serve(manager: ImportManager, listen: String) -> Result<()> {
    let app = elect_loader::build_router(AppState::new(manager));

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind to {}", listen))?;
    info!("Listening on http://{}", listen);
    info!("Health check: http://{}/health", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn run_import(manager: &ImportManager, request: ImportRequest) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let session = manager.run_to_completion(request, cancel).await?;

    let c = session.counters;
    println!(
        "{:?}: total {}, new {}, updated {}, skipped {} ({} s)",
        session.state,
        c.total,
        c.created,
        c.updated,
        c.skipped,
        session.elapsed_seconds()
    );

    match session.state {
        ImportState::Completed => Ok(()),
        ImportState::Cancelled => {
            warn!("Import cancelled");
            Ok(())
        }
        _ => bail!(
            "Import failed: {}",
            session.last_error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

/// Token cancelled on the first Ctrl+C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling");
            trigger.cancel();
        }
    });
    token
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
