use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use dotenvy::dotenv;
use futures::future::join_all;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use flowwatch_cli::{state_file_path, AnySink, AnyStore, Command, Config, StdoutSink, WatcherArgs};
use flowwatch_client::{N8nClient, WebhookSink};
use flowwatch_core::{
    load_watchers_config, should_emit, AppError, HttpConfig, JsonFileWatermarkStore, Poller,
    WatchSummary, WatcherConfig, WatermarkStore,
};
use flowwatch_db::WatermarkRepository;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv().ok();

    // Parse command line arguments
    let config = Config::parse();

    // Setup logging (stderr to keep stdout clean for emitted records)
    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(config).await {
        match e.downcast_ref::<AppError>() {
            Some(app_err) => error!("{}", app_err.user_message()),
            None => error!("{:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    match config.command {
        Command::Check {
            ref updated_at,
            ref last_sync,
            ref seen_at,
        } => {
            let emit = should_emit(Some(updated_at.as_str()), last_sync.as_deref(), seen_at.as_deref());
            println!("{}", if emit { "emit" } else { "skip" });
        }
        Command::Status { ref scope } => {
            let store = open_store(&config).await?;
            status(&store, scope.as_deref()).await?;
        }
        Command::Reset { ref scope, yes } => {
            let store = open_store(&config).await?;
            reset(&store, scope, yes).await?;
        }
        Command::Watch {
            ref watcher,
            once,
            config: ref config_path,
            ref watcher_name,
            ref webhook_url,
            ref webhook_token,
        } => {
            let watchers = resolve_watchers(watcher, config_path.clone(), watcher_name.as_deref())?;
            let sink = match webhook_url {
                Some(url) => AnySink::Webhook(
                    WebhookSink::new(url, &HttpConfig::default(), webhook_token.clone())
                        .context("Invalid webhook URL")?,
                ),
                None => AnySink::Stdout(StdoutSink),
            };
            let store = open_store(&config).await?;
            watch(store, sink, &watchers, once).await?;
        }
    }

    Ok(())
}

/// Opens PostgreSQL when a database URL is set, else the JSON state file
async fn open_store(config: &Config) -> anyhow::Result<AnyStore> {
    let store = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .context("Failed to connect to database")?;
            let repo = WatermarkRepository::new(pool);
            repo.ensure_schema().await?;
            AnyStore::Postgres(repo)
        }
        None => {
            let path = state_file_path(config.state_file.clone())?;
            AnyStore::File(JsonFileWatermarkStore::new(path))
        }
    };

    info!("Using {}", store.describe());
    Ok(store)
}

/// Watchers from flags, or from the config file
fn resolve_watchers(
    args: &WatcherArgs,
    config_path: Option<PathBuf>,
    name: Option<&str>,
) -> anyhow::Result<Vec<WatcherConfig>> {
    if let Some(watcher) = args.to_watcher_config() {
        watcher.validate()?;
        return Ok(vec![watcher]);
    }

    let file = load_watchers_config(config_path.as_deref())?.context(
        "No watchers configured. Pass --base-url or create watchers.toml (see --help)",
    )?;

    match name {
        Some(name) => {
            let watcher = file
                .find_by_name(name)
                .with_context(|| format!("Watcher '{}' not found in config", name))?;
            Ok(vec![watcher.clone()])
        }
        None => {
            let enabled: Vec<WatcherConfig> =
                file.enabled_watchers().into_iter().cloned().collect();
            if enabled.is_empty() {
                bail!("No enabled watchers in config");
            }
            Ok(enabled)
        }
    }
}

/// Run watchers once, or until Ctrl-C
async fn watch(
    store: AnyStore,
    sink: AnySink,
    watchers: &[WatcherConfig],
    once: bool,
) -> anyhow::Result<()> {
    let store = Arc::new(store);
    let sink = Arc::new(sink);

    let mut pollers = Vec::with_capacity(watchers.len());
    for watcher in watchers {
        let client = N8nClient::from_watcher(watcher)
            .with_context(|| format!("Invalid watcher '{}'", watcher.name))?;
        pollers.push(Poller::new(
            watcher,
            Arc::new(client),
            store.clone(),
            sink.clone(),
        )?);
    }

    if once {
        let reports = join_all(pollers.iter().map(|p| p.run_cycle())).await;

        let mut summary = WatchSummary::new();
        for report in reports {
            summary.add(report);
        }

        info!(
            "Cycle complete: {} records emitted, {} watchers ok, {} failed",
            summary.total_emitted(),
            summary.successful_count(),
            summary.failed_count()
        );
        if summary.failed_count() > 0 {
            bail!(
                "{} of {} watchers failed",
                summary.failed_count(),
                summary.reports.len()
            );
        }
        return Ok(());
    }

    info!("Starting {} watcher(s). Press Ctrl-C to stop.", pollers.len());
    let shutdown = CancellationToken::new();
    let handles: Vec<_> = pollers
        .into_iter()
        .map(|poller| poller.spawn(shutdown.child_token()))
        .collect();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Stopping, running cycles will finish first...");
    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.join().await {
            warn!("{}", e);
        }
    }

    Ok(())
}

/// Show stored watermarks
async fn status(store: &AnyStore, scope: Option<&str>) -> anyhow::Result<()> {
    if let Some(scope) = scope {
        let state = store.load(scope).await?;
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    let lines = store.list_scopes().await?;
    if lines.is_empty() {
        println!("No watermarks stored in {}.", store.describe());
        return Ok(());
    }

    println!("\nWatermarks ({})\n", store.describe());
    for line in lines {
        println!(
            "  {:<20} last sync {}   {} workflows seen",
            line.scope, line.last_sync, line.seen
        );
    }
    println!();

    Ok(())
}

/// Delete a scope's watermarks
async fn reset(store: &AnyStore, scope: &str, confirmed: bool) -> anyhow::Result<()> {
    if !confirmed {
        eprintln!(
            "This deletes all watermarks of '{}'; every workflow will be reported again.\nRe-run with --yes to confirm.",
            scope
        );
        return Ok(());
    }

    if store.reset(scope).await? {
        info!("Watermarks of '{}' deleted", scope);
    } else {
        info!("Nothing stored for '{}'", scope);
    }
    Ok(())
}
