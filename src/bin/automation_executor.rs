use colored::*;
use log::{error, info, warn};
use orb_autominer::{
    automation::AutomationManager,
    client::{LedgerClient, OreClient},
    config::BotConfig,
    executor::AutomationExecutor,
    instructions::{InstructionBuilder, OreInstructions},
    notify::{LogNotifier, Notifier, TelegramNotifier},
    store::{MemoryStore, Store},
};
use std::sync::Arc;

#[cfg(feature = "database")]
use orb_autominer::db::{DbConfig, PgStore, UnencryptedKeys};

async fn open_store(config: &BotConfig) -> anyhow::Result<Arc<dyn Store>> {
    #[cfg(feature = "database")]
    if let Some(url) = &config.database_url {
        let db_config = DbConfig { url: url.clone() };
        let store = PgStore::connect(&db_config, Arc::new(UnencryptedKeys::new())).await?;
        return Ok(Arc::new(store));
    }

    match &config.users_file {
        Some(path) => {
            info!("📂 Loading users from {}", path);
            Ok(Arc::new(MemoryStore::from_users_file(path)?))
        }
        None => {
            #[cfg(not(feature = "database"))]
            if config.database_url.is_some() {
                warn!("DATABASE_URL is set but this build has no database feature");
            }
            anyhow::bail!("No user source: set USERS_FILE or DATABASE_URL")
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!(
        "{}",
        r#"
    ╔═══════════════════════════════════════════════════════════════════════╗
    ║                     ORB AUTOMATION EXECUTOR                           ║
    ║           Deploys every round for every automated wallet              ║
    ╚═══════════════════════════════════════════════════════════════════════╝
    "#
        .bright_cyan()
    );

    // Load configuration
    let config = if std::env::var("RPC_URL").is_ok() {
        info!("📋 Loading config from environment variables");
        BotConfig::from_env()
    } else {
        let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
        match BotConfig::from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Could not read {} ({}), using environment", config_path, e);
                BotConfig::from_env()
            }
        }
    };

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return;
    }

    info!("📡 RPC: {}", config.rpc_url);
    info!(
        "⏱️  Poll every {}s, {}ms between users, {} user(s) at a time",
        config.executor.poll_interval_secs, config.executor.user_delay_ms, config.executor.max_concurrent_users
    );

    let store = match open_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open user store: {}", e);
            return;
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.notify.telegram_bot_token {
        Some(token) => {
            info!("📣 Notifications via Telegram");
            Arc::new(TelegramNotifier::new(token))
        }
        None => Arc::new(LogNotifier),
    };

    let ledger: Arc<dyn LedgerClient> = Arc::new(OreClient::new(config.rpc_url.clone(), config.ledger.clone()));
    let instructions: Arc<dyn InstructionBuilder> = Arc::new(OreInstructions);
    let lifecycle = AutomationManager::new(ledger.clone(), instructions.clone(), config.automation.clone());

    let executor = Arc::new(AutomationExecutor::new(
        ledger,
        instructions,
        lifecycle,
        store,
        notifier,
        config.executor.clone(),
    ));

    // Setup graceful shutdown
    let shutdown = executor.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        shutdown.stop();
    }) {
        error!("Failed to install signal handler: {}", e);
        return;
    }

    info!("{}", "✅ Executor running. Press Ctrl+C to stop.".green());

    if let Some(handle) = executor.start() {
        if let Err(e) = handle.await {
            error!("Executor task failed: {}", e);
        }
    }
}
