use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// RPC endpoint URL
    pub rpc_url: String,

    /// PostgreSQL URL for users, settings and history
    pub database_url: Option<String>,

    /// JSON users file, used when no database is configured
    pub users_file: Option<String>,

    pub executor: ExecutorConfig,
    pub ledger: LedgerConfig,
    pub automation: AutomationConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Board polling interval in seconds
    pub poll_interval_secs: u64,

    /// Pause after each user's turn, in milliseconds
    pub user_delay_ms: u64,

    /// Pause between closing and recreating a drained automation
    pub restart_settle_ms: u64,

    /// Upper bound on one user's whole decision sequence
    pub user_timeout_secs: u64,

    /// Users processed at once. 1 keeps the sequential behaviour.
    pub max_concurrent_users: usize,

    /// Rounds to wait after a failed auto-restart before trying again
    pub restart_backoff_rounds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Shared RPC budget across all users
    pub rpc_calls_per_second: u32,

    /// How long to wait for a submitted transaction to land
    pub confirm_timeout_secs: u64,

    /// Retry window for read calls
    pub read_retry_secs: u64,

    pub compute_unit_limit: u32,

    /// Priority fee in micro-lamports per compute unit
    pub compute_unit_price: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Executor fee charged per automated deploy
    pub fee_per_execution_lamports: u64,

    /// Auto-reload SOL winnings into the automation balance
    pub reload: bool,

    /// Hard cap on rounds funded by a single create
    pub max_target_rounds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    /// Telegram bot token; notifications go to the log when unset
    pub telegram_bot_token: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            database_url: None,
            users_file: None,
            executor: ExecutorConfig::default(),
            ledger: LedgerConfig::default(),
            automation: AutomationConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            user_delay_ms: 1_000,
            restart_settle_ms: 2_000,
            user_timeout_secs: 120,
            max_concurrent_users: 1,
            restart_backoff_rounds: 3,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_calls_per_second: 10,
            confirm_timeout_secs: 45,
            read_retry_secs: 10,
            compute_unit_limit: 1_400_000,
            compute_unit_price: 1_000,
        }
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            fee_per_execution_lamports: 0,
            reload: false,
            max_target_rounds: 1_000,
        }
    }
}

impl ExecutorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn user_delay(&self) -> Duration {
        Duration::from_millis(self.user_delay_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn user_timeout(&self) -> Duration {
        Duration::from_secs(self.user_timeout_secs)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval_secs: env_parse("POLL_INTERVAL_SECS").unwrap_or(defaults.poll_interval_secs),
            user_delay_ms: env_parse("USER_DELAY_MS").unwrap_or(defaults.user_delay_ms),
            restart_settle_ms: env_parse("RESTART_SETTLE_MS").unwrap_or(defaults.restart_settle_ms),
            user_timeout_secs: env_parse("USER_TIMEOUT_SECS").unwrap_or(defaults.user_timeout_secs),
            max_concurrent_users: env_parse("MAX_CONCURRENT_USERS")
                .unwrap_or(defaults.max_concurrent_users)
                .max(1),
            restart_backoff_rounds: env_parse("RESTART_BACKOFF_ROUNDS")
                .unwrap_or(defaults.restart_backoff_rounds),
        }
    }
}

impl LedgerConfig {
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn read_retry(&self) -> Duration {
        Duration::from_secs(self.read_retry_secs)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rpc_calls_per_second: env_parse("RPC_CALLS_PER_SECOND")
                .unwrap_or(defaults.rpc_calls_per_second)
                .max(1),
            confirm_timeout_secs: env_parse("CONFIRM_TIMEOUT_SECS").unwrap_or(defaults.confirm_timeout_secs),
            read_retry_secs: env_parse("READ_RETRY_SECS").unwrap_or(defaults.read_retry_secs),
            compute_unit_limit: env_parse("COMPUTE_UNIT_LIMIT").unwrap_or(defaults.compute_unit_limit),
            compute_unit_price: env_parse("COMPUTE_UNIT_PRICE").unwrap_or(defaults.compute_unit_price),
        }
    }
}

impl AutomationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fee_per_execution_lamports: env_parse("FEE_PER_EXECUTION_LAMPORTS")
                .unwrap_or(defaults.fee_per_execution_lamports),
            reload: std::env::var("AUTOMATION_RELOAD")
                .map(|v| v == "true")
                .unwrap_or(defaults.reload),
            max_target_rounds: env_parse("MAX_TARGET_ROUNDS").unwrap_or(defaults.max_target_rounds),
        }
    }
}

impl NotifyConfig {
    pub fn from_env() -> Self {
        Self {
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
        }
    }
}

impl BotConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BotConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// A user's turn can confirm a checkpoint and a deploy back to back, so
    /// the per-user timeout has to cover two confirmations plus the reads.
    pub fn validate(&self) -> anyhow::Result<()> {
        let needed = 2 * self.ledger.confirm_timeout_secs + READ_MARGIN_SECS;
        if self.executor.user_timeout_secs < needed {
            anyhow::bail!(
                "user_timeout_secs ({}) must be at least {} (2 x confirm_timeout_secs + {}s for reads)",
                self.executor.user_timeout_secs,
                needed,
                READ_MARGIN_SECS
            );
        }
        if self.executor.max_concurrent_users == 0 {
            anyhow::bail!("max_concurrent_users must be at least 1");
        }
        Ok(())
    }

    /// Load config from environment variables (container deployments)
    pub fn from_env() -> Self {
        let rpc_url = std::env::var("RPC_URL")
            .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string());

        Self {
            rpc_url,
            database_url: std::env::var("DATABASE_URL").ok(),
            users_file: std::env::var("USERS_FILE").ok(),
            executor: ExecutorConfig::from_env(),
            ledger: LedgerConfig::from_env(),
            automation: AutomationConfig::from_env(),
            notify: NotifyConfig::from_env(),
        }
    }
}

/// Slack left for account reads in a user's turn
const READ_MARGIN_SECS: u64 = 20;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
