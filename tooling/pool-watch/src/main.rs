use pool_watch::{
    alerter::TelegramAlerter,
    bot::{run_bot, Admins},
    commands::CommandHandler,
    config::AppConfig,
    fetcher::{HeightFetcher, HttpStatsSource},
    roster::HttpRoster,
    service::{poll_loop, refresh_roster, roster_loop},
    store::PoolStore,
    watchers::{WatchFile, WatchRegistry},
};
use std::{sync::Arc, time::SystemTime};
use teloxide::Bot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(error) = run().await {
        error!(error = %error, "pool-watch startup failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config = AppConfig::from_env().map_err(|error| error.to_string())?;

    let store = Arc::new(PoolStore::new(SystemTime::now()));
    let registry = Arc::new(WatchRegistry::new(store.clone(), WatchFile::new(&config.watch_file)));
    if let Err(error) = registry.restore().await {
        warn!(error = %error, "could not read watch file, starting without registrations");
    }

    let roster = HttpRoster::new(config.roster_url.clone(), config.fetch_timeout)
        .map_err(|error| error.to_string())?;
    if let Err(error) = refresh_roster(&store, &roster).await {
        warn!(error = %error, "initial roster download failed, retrying on the next refresh");
    }

    let source = HttpStatsSource::new(config.fetch_timeout).map_err(|error| error.to_string())?;
    let fetcher = HeightFetcher::new(source, config.fetch_timeout).map_err(|error| error.to_string())?;

    let bot = Bot::new(config.telegram_bot_token.clone());
    let alerter = TelegramAlerter::new(bot.clone(), config.telegram_chat_id);

    info!(
        poll_seconds = config.poll_interval.as_secs(),
        roster_seconds = config.roster_refresh_interval.as_secs(),
        "pool-watch started"
    );

    tokio::spawn(poll_loop(
        store.clone(),
        fetcher,
        alerter,
        config.monitor.clone(),
        config.poll_interval,
    ));
    tokio::spawn(roster_loop(
        store.clone(),
        roster,
        config.roster_refresh_interval,
        config.poll_interval,
    ));

    let handler = Arc::new(CommandHandler::new(
        store,
        registry,
        config.telegram_chat_id.to_string(),
    ));
    run_bot(bot, handler, Admins(config.admin_ids)).await;

    info!("pool-watch stopped");
    Ok(())
}
