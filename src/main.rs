//! printdesk - order file handling for a print shop Telegram bot
//!
//! Usage:
//!   printdesk init --bot-token <token>          - Write a configuration file
//!   printdesk decode <identifier>                - Show what an identifier points at
//!   printdesk order-add --client <name>          - Create an order and its folder
//!   printdesk fetch --order <id> name=identifier - Download files into an order
//!   printdesk reconcile [--order <id>]           - Sync order folders with metadata
//!   printdesk daemon                             - Reconcile periodically

use clap::{Parser, Subcommand};
use futures::StreamExt;
use printdesk::{
    config::Config,
    fileid::{self, RemoteLocation},
    orders::{OrderId, OrderStore, SledOrderStore},
    reconcile::{ReconcileReport, Reconciler},
    telegram,
    transfer::{BatchReport, FetchPipeline, FetchRequest},
    Error, Result,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "printdesk")]
#[command(version)]
#[command(about = "Order file handling for a print shop Telegram bot")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/printdesk/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new configuration file
    Init {
        /// Bot token from @BotFather
        #[arg(long)]
        bot_token: Option<String>,

        /// Telegram API ID (from my.telegram.org), needed for large files
        #[arg(long)]
        api_id: Option<i32>,

        /// Telegram API hash
        #[arg(long)]
        api_hash: Option<String>,

        /// Root directory for order folders
        #[arg(long)]
        orders_dir: Option<PathBuf>,
    },

    /// Decode a file identifier and print its locator
    Decode {
        identifier: String,
    },

    /// Create an order record and its folder
    OrderAdd {
        /// Client name, used in the folder name
        #[arg(long)]
        client: String,
    },

    /// Mark an order as closed
    OrderClose {
        #[arg(long)]
        order: OrderId,
    },

    /// Re-open a recently closed order
    OrderRestore {
        #[arg(long)]
        order: OrderId,
    },

    /// Download files into an order folder
    Fetch {
        #[arg(long)]
        order: OrderId,

        /// Files as name=identifier or name=identifier:size
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Reconcile one order, or all active orders
    Reconcile {
        #[arg(long)]
        order: Option<OrderId>,
    },

    /// Reconcile periodically until interrupted
    Daemon,
}

fn main() {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
    }

    let config_path = expand_tilde(&cli.config);

    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &Path) -> Result<()> {
    match command {
        Commands::Init {
            bot_token,
            api_id,
            api_hash,
            orders_dir,
        } => cmd_init(config_path, bot_token, api_id, api_hash, orders_dir),

        Commands::Decode { identifier } => cmd_decode(&identifier),

        Commands::OrderAdd { client } => cmd_order_add(config_path, &client),

        Commands::OrderClose { order } => cmd_order_close(config_path, order),

        Commands::OrderRestore { order } => cmd_order_restore(config_path, order),

        Commands::Fetch { order, files } => cmd_fetch(config_path, order, &files),

        Commands::Reconcile { order } => cmd_reconcile(config_path, order),

        Commands::Daemon => cmd_daemon(config_path),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| Error::Internal(e.to_string()))
}

fn open_store(config: &Config) -> Result<SledOrderStore> {
    SledOrderStore::open(
        &config.storage.database_path,
        config.reconcile.closed_grace(),
    )
}

fn reconciler(config: &Config, store: Arc<SledOrderStore>) -> Reconciler {
    Reconciler::new(store, &config.storage.orders_dir)
        .with_workers(config.reconcile.workers)
        .with_interval(config.reconcile.interval())
}

/// Cancel `token` on Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping...");
            token.cancel();
        }
    });
}

fn cmd_init(
    config_path: &Path,
    bot_token: Option<String>,
    api_id: Option<i32>,
    api_hash: Option<String>,
    orders_dir: Option<PathBuf>,
) -> Result<()> {
    info!("Initializing printdesk...");

    let mut config = Config::default();
    config.apply_env_overrides();
    if let Some(token) = bot_token {
        config.telegram.bot_token = token;
    }
    if let Some(id) = api_id {
        config.telegram.api_id = id;
    }
    if let Some(hash) = api_hash {
        config.telegram.api_hash = hash;
    }
    if let Some(dir) = orders_dir {
        config.storage.orders_dir = expand_tilde(&dir);
    }
    config.validate()?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.save(config_path)?;
    config.ensure_directories()?;

    info!("Configuration saved to {:?}", config_path);
    info!("Orders directory: {:?}", config.storage.orders_dir);
    if !config.has_mtproto_credentials() {
        warn!(
            "No API ID/hash set: files over {} bytes cannot be downloaded",
            config.fetch.size_threshold
        );
    }

    Ok(())
}

fn cmd_decode(identifier: &str) -> Result<()> {
    let locator = fileid::decode(identifier)?;

    println!("Version:        {} (sub-version {})", locator.version, locator.sub_version);
    println!("Type:           {}", locator.file_type);
    println!("Datacenter:     {}", locator.dc_id);
    match &locator.file_reference {
        Some(reference) => println!("File reference: {}", hex::encode(reference)),
        None => println!("File reference: none"),
    }
    match &locator.location {
        RemoteLocation::Web { url, access_hash } => {
            println!("URL:            {}", url);
            println!("Access hash:    {}", access_hash);
        }
        RemoteLocation::Direct {
            id,
            access_hash,
            photo,
        } => {
            println!("ID:             {}", id);
            println!("Access hash:    {}", access_hash);
            if let Some(photo) = photo {
                println!("Photo source:   {:?}", photo.source);
                if let Some(volume_id) = photo.volume_id {
                    println!("Volume ID:      {}", volume_id);
                }
                if let Some(local_id) = photo.local_id {
                    println!("Local ID:       {}", local_id);
                }
            }
        }
    }

    Ok(())
}

fn cmd_order_add(config_path: &Path, client: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = open_store(&config)?;

    let order = store.create_order(client, chrono::Utc::now())?;
    std::fs::create_dir_all(config.storage.orders_dir.join(&order.folder))?;

    println!("Order {} created", order.id);
    println!("Folder: {:?}", config.storage.orders_dir.join(&order.folder));
    Ok(())
}

fn cmd_order_close(config_path: &Path, order_id: OrderId) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = open_store(&config)?;

    store.close_order(order_id, chrono::Utc::now())?;
    println!(
        "Order {} closed; its folder is removed after {} hours",
        order_id, config.reconcile.closed_grace_hours
    );
    Ok(())
}

fn cmd_order_restore(config_path: &Path, order_id: OrderId) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = open_store(&config)?;

    let order = store.restore_order(order_id, chrono::Utc::now())?;
    println!("Order {} is active again ({})", order.id, order.folder);
    Ok(())
}

/// Parse `name=identifier[:size]`
fn parse_file_arg(arg: &str) -> Result<FetchRequest> {
    let (name, rest) = arg
        .split_once('=')
        .ok_or_else(|| Error::Internal(format!("Expected name=identifier, got {:?}", arg)))?;

    let (identifier, size) = match rest.rsplit_once(':') {
        Some((identifier, size)) => {
            let size = size
                .parse::<u64>()
                .map_err(|_| Error::Internal(format!("Invalid size in {:?}", arg)))?;
            (identifier, Some(size))
        }
        None => (rest, None),
    };

    Ok(FetchRequest::new(name, identifier, size))
}

fn cmd_fetch(config_path: &Path, order_id: OrderId, files: &[String]) -> Result<()> {
    let config = Config::load(config_path)?;
    let requests = files
        .iter()
        .map(|arg| parse_file_arg(arg))
        .collect::<Result<Vec<_>>>()?;

    let store = Arc::new(open_store(&config)?);
    let fetchers = telegram::fetchers(&config)?;
    let pipeline = FetchPipeline::new(fetchers, config.fetch.workers);
    let reconciler = reconciler(&config, store.clone());

    let runtime = runtime()?;
    runtime.block_on(async {
        let order = store
            .order(order_id)
            .await?
            .ok_or(Error::OrderNotFound(order_id))?;
        let dir = config.storage.orders_dir.join(&order.folder);

        let cancel = CancellationToken::new();
        cancel_on_interrupt(cancel.clone());

        let _guard = reconciler.locks().lock(order_id).await;

        let mut stream = pipeline.submit(&dir, requests, cancel);
        let mut report = BatchReport::default();
        while let Some(result) = stream.next().await {
            match &result.error {
                None => println!("[{}/{}] {}: ok", result.index, result.total, result.name),
                Some(e) => println!(
                    "[{}/{}] {}: {} ({})",
                    result.index,
                    result.total,
                    result.name,
                    e.kind().describe(),
                    e
                ),
            }
            report.results.push(result);
        }

        let records = report.records();
        if !records.is_empty() {
            store.add_files(order_id, &records).await?;
        }
        store.flush().await?;

        println!("{}", report.summary());
        if report.failures().next().is_some() {
            return Err(Error::Internal(report.summary()));
        }
        Ok(())
    })
}

fn print_report(report: &ReconcileReport) {
    if report.is_clean() {
        println!("Order {}: consistent", report.order_id);
        return;
    }

    println!(
        "Order {}: {} added, {} removed, {} updated",
        report.order_id,
        report.added.len(),
        report.removed.len(),
        report.updated.len()
    );
    for failure in &report.failed_repairs {
        println!("  repair failed: {}", failure);
    }
}

fn cmd_reconcile(config_path: &Path, order_id: Option<OrderId>) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = Arc::new(open_store(&config)?);
    let reconciler = reconciler(&config, store.clone());

    let runtime = runtime()?;
    runtime.block_on(async {
        match order_id {
            Some(id) => print_report(&reconciler.reconcile_one(id).await?),
            None => {
                let cancel = CancellationToken::new();
                cancel_on_interrupt(cancel.clone());

                let sweep = reconciler.reconcile_all(cancel).await?;
                for report in &sweep.reports {
                    print_report(report);
                }
                for (id, reason) in &sweep.failed_orders {
                    println!("Order {}: failed ({})", id, reason);
                }
                for path in &sweep.removed_orphans {
                    println!("Removed orphan {:?}", path);
                }
            }
        }
        store.flush().await
    })
}

fn cmd_daemon(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    config.ensure_directories()?;
    let store = Arc::new(open_store(&config)?);
    let reconciler = reconciler(&config, store.clone());

    let runtime = runtime()?;
    runtime.block_on(async {
        let cancel = CancellationToken::new();
        cancel_on_interrupt(cancel.clone());

        reconciler.run(cancel).await;
        store.flush().await
    })
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
