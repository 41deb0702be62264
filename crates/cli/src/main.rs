//! OmniCRM CLI - migrations, customer sync and maintenance jobs.
//!
//! # Usage
//!
//! ```bash
//! # Apply database migrations
//! omnicrm migrate
//!
//! # Sync a few handles seen on WhatsApp
//! omnicrm sync --channel WA 5215512345678 ana@example.com
//!
//! # Sync handles from a file without touching the database
//! omnicrm sync --handles-file handles.txt --dry-run
//!
//! # Re-fetch orders that are missing a financial or fulfillment status
//! omnicrm refresh-orders --limit 200
//!
//! # List inactive customers
//! omnicrm ghosts
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `sync` - Resolve handles against Shopify and import customers and orders
//! - `refresh-orders` - Order status catch-up
//! - `ghosts` - Inactive customer report

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::borrow::Cow;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use omnicrm_sync::SyncConfig;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

#[derive(Parser)]
#[command(name = "omnicrm")]
#[command(author, version, about = "OmniCRM customer sync tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Resolve handles and sync their customers and orders
    Sync {
        /// Email addresses or phone numbers
        handles: Vec<String>,

        /// File with one handle per line (`#` starts a comment)
        #[arg(long)]
        handles_file: Option<PathBuf>,

        /// Channel the handles were seen on
        #[arg(short, long, default_value = "UNKNOWN")]
        channel: String,

        /// Write to an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Re-fetch orders missing a financial or fulfillment status
    RefreshOrders {
        /// Maximum number of orders to refresh
        #[arg(short, long, default_value_t = 100)]
        limit: i64,
    },
    /// Report inactive customers
    Ghosts,
}

/// Initialize Sentry error tracking if `SENTRY_DSN` is configured.
fn init_sentry(config: &SyncConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;
    let environment = config
        .sentry_environment
        .clone()
        .unwrap_or_else(|| "development".to_string());

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(Cow::Owned(environment)),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Errors and warnings become Sentry events, info and debug become breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "omnicrm_sync=info,omnicrm_cli=info".into());

    let is_json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let json_layer = is_json.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!is_json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    // Both reqwest and sentry talk TLS; pin the provider before either starts.
    // An Err means a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    // Sentry must be initialized before the tracing subscriber
    let config = SyncConfig::from_env();
    let _sentry_guard = config.as_ref().ok().and_then(init_sentry);
    init_tracing();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let result: Result<(), Box<dyn std::error::Error>> = run(cli, config).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: SyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run(&config).await?,
        Commands::Sync {
            handles,
            handles_file,
            channel,
            dry_run,
        } => {
            let mut handles = handles;
            if let Some(path) = handles_file {
                handles.extend(commands::sync::read_handles_file(&path).await?);
            }
            commands::sync::run(&config, &handles, &channel, dry_run).await?;
        }
        Commands::RefreshOrders { limit } => commands::refresh::run(&config, limit).await?,
        Commands::Ghosts => commands::ghosts::run(&config).await?,
    }
    Ok(())
}
