//! services/bot/src/bin/pdfbot.rs

use pdfbot_lib::{
    adapters::{ilovepdf::ILovePdfAdapter, staging::Staging, telegram::TelegramTransport},
    chat::{
        commands::{schema, BotName, Command},
        AppState, BotEngine,
    },
    config::Config,
    error::BotError,
};
use pdfbot_core::validation::Limits;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), BotError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting bot...");

    // --- 2. Prepare the Staging Area ---
    let staging = Staging::new(config.staging_dir.clone());
    staging.purge_all().await?;
    info!("Staging area ready at {}.", staging.root().display());

    // --- 3. Initialize Service Adapters ---
    let bot = Bot::new(config.bot_token.clone());
    let transport = Arc::new(TelegramTransport::new(bot.clone()));
    let gateway = Arc::new(
        ILovePdfAdapter::from_config(&config)
            .map_err(|e| BotError::Internal(format!("Failed to build the HTTP client: {}", e)))?,
    );

    let me = bot.get_me().await?;
    let bot_name = BotName(me.user.username.clone().unwrap_or_default());
    bot.set_my_commands(Command::bot_commands()).await?;
    info!("Logged in as @{}; commands registered.", bot_name.0);

    // --- 4. Build the Shared AppState & Start the Engine ---
    let app_state = Arc::new(AppState::new(
        transport,
        gateway,
        staging.clone(),
        Limits {
            max_file_size: config.max_file_size,
        },
    ));
    let shutdown = CancellationToken::new();
    let (engine, tasks) =
        BotEngine::start(app_state, config.max_concurrent_jobs, shutdown.clone());

    // --- 5. Run the Dispatcher Until Ctrl-C ---
    info!("Listening for updates...");
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![engine, bot_name])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    // --- 6. Shut Down ---
    info!("Shutting down...");
    shutdown.cancel();
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    staging.purge_all().await?;
    info!("Staging area purged. Bye.");
    Ok(())
}
