use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mnemosyne_chronos::chronos::{grid::Grid, planner, static_planner};
use mnemosyne_chronos::config::Config;
use mnemosyne_chronos::settings::{self, ChronosMode, Settings};
use mnemosyne_chronos::store::sqlite::SqliteStore;
use mnemosyne_chronos::store::{PostStatus, PostStore};

#[derive(Parser, Debug)]
#[command(about = "Chronos scheduling loop for the moderated content-suggestion pipeline core")]
struct Cli {
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        Config::load_from_file(&cli.config).context("failed to load config")?
    } else {
        warn!(path = ?cli.config, "config file not found, using defaults");
        Config::default()
    };

    let store: Arc<dyn PostStore> =
        Arc::new(SqliteStore::open(std::path::Path::new(&config.store.db_path)).context("failed to open store")?);
    let settings = Settings::new(store.clone());
    seed_settings(&settings, &config).await?;

    info!("chronos scheduling loop starting");

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    let mut publish_ticker = tokio::time::interval(std::time::Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = replan_once(&store, &settings, &config).await {
                    warn!(error = %e, "replan tick failed");
                }
            }
            _ = publish_ticker.tick() => {
                if let Err(e) = publish_due(&store, &settings).await {
                    warn!(error = %e, "publish tick failed");
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutdown signal received, exiting");
                break;
            }
        }
    }

    Ok(())
}

/// Publishes every post whose `scheduled_at` has arrived, in
/// `(scheduled_at, id)` order. A single post's failure is logged and left
/// `scheduled` for the next tick to retry; it does not abort the batch.
async fn publish_due(store: &Arc<dyn PostStore>, settings: &Settings) -> Result<()> {
    if settings.bot_paused().await? {
        return Ok(());
    }
    let now = chrono::Utc::now();
    let due = store.list_due(now).await?;
    for post in due {
        if let Err(e) = store
            .set_post_status(post.id, PostStatus::Published, post.scheduled_at, post.approved_at, Some(now))
            .await
        {
            warn!(error = %e, post_id = post.id, "publish failed, will retry next tick");
            continue;
        }
        info!(post_id = post.id, "post published");
    }
    Ok(())
}

async fn seed_settings(settings: &Settings, config: &Config) -> Result<()> {
    if settings.int_or(settings::KEY_CHRONOS_START, -1).await? < 0 {
        settings
            .set_int(settings::KEY_CHRONOS_START, config.chronos.start_hour as i64)
            .await?;
        settings
            .set_int(settings::KEY_CHRONOS_END, config.chronos.end_hour as i64)
            .await?;
        settings
            .set_int(settings::KEY_CHRONOS_STEP_MINUTES, config.chronos.step_minutes as i64)
            .await?;
        settings.set_bool(settings::KEY_CHRONOS_INSTANT, config.chronos.instant).await?;
    }
    Ok(())
}

async fn current_grid(settings: &Settings, config: &Config) -> Result<Grid> {
    let mut grid = config.chronos.grid()?;
    grid.start_hour = settings
        .int_or(settings::KEY_CHRONOS_START, grid.start_hour as i64)
        .await? as u32;
    grid.end_hour = settings
        .int_or(settings::KEY_CHRONOS_END, grid.end_hour as i64)
        .await? as u32;
    grid.step_minutes = settings
        .int_or(settings::KEY_CHRONOS_STEP_MINUTES, grid.step_minutes as i64)
        .await? as u32;
    grid.instant = settings.bool_or(settings::KEY_CHRONOS_INSTANT, grid.instant).await?;
    Ok(grid)
}

async fn replan_once(store: &Arc<dyn PostStore>, settings: &Settings, config: &Config) -> Result<()> {
    if settings.bot_paused().await? {
        return Ok(());
    }
    let grid = current_grid(settings, config).await?;
    let mode = settings.chronos_mode(config.chronos.mode()).await?;
    let now = chrono::Utc::now();

    match mode {
        ChronosMode::Dynamic => {
            if let Some(plan) = planner::run_dynamic(store.as_ref(), &grid, now).await? {
                planner::apply_plan(store.as_ref(), &plan).await?;
                info!(assignments = plan.assignments.len(), "dynamic replan applied");
            }
        }
        ChronosMode::Static => {
            let plan = static_planner::run_static(store.as_ref(), &grid, now).await?;
            if !plan.assignments.is_empty() {
                planner::apply_plan(store.as_ref(), &plan).await?;
                info!(assignments = plan.assignments.len(), "static plan applied");
            }
        }
    }
    Ok(())
}
