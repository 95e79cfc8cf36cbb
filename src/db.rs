use crate::{
    error::{BotError, Result},
    utils::keypair_from_str,
};
use log::warn;
use solana_sdk::signature::Keypair;
use std::env;

#[cfg(feature = "database")]
use crate::store::{
    CredentialStore, HistoryRecorder, RoundParticipation, SettingsStore, TransactionRecord, UserDirectory,
    UserId, UserSettings, UserWallet,
};
#[cfg(feature = "database")]
use async_trait::async_trait;
#[cfg(feature = "database")]
use log::info;
#[cfg(feature = "database")]
use solana_sdk::pubkey::Pubkey;
#[cfg(feature = "database")]
use std::{str::FromStr, sync::Arc};

// Database schema statements (executed one at a time)
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // Chat users and their custodial wallets
    r#"CREATE TABLE IF NOT EXISTS users (
        user_id BIGINT PRIMARY KEY,
        public_key TEXT NOT NULL,
        encrypted_private_key TEXT NOT NULL,
        created_at TIMESTAMPTZ DEFAULT NOW()
    )"#,
    // Per-user automation settings
    r#"CREATE TABLE IF NOT EXISTS user_settings (
        user_id BIGINT PRIMARY KEY REFERENCES users(user_id) ON DELETE CASCADE,
        motherload_threshold DOUBLE PRECISION NOT NULL,
        sol_per_block DOUBLE PRECISION NOT NULL,
        num_blocks BIGINT NOT NULL,
        automation_budget_percent DOUBLE PRECISION NOT NULL,
        updated_at TIMESTAMPTZ DEFAULT NOW()
    )"#,
    // Every transaction the executor or admin tool submitted
    r#"CREATE TABLE IF NOT EXISTS transactions (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL,
        kind TEXT NOT NULL,
        signature TEXT,
        round_id BIGINT,
        amount_lamports BIGINT NOT NULL DEFAULT 0,
        success BOOLEAN NOT NULL,
        error TEXT,
        created_at TIMESTAMPTZ DEFAULT NOW()
    )"#,
    // Rounds a user's automation deployed in
    r#"CREATE TABLE IF NOT EXISTS round_participation (
        user_id BIGINT NOT NULL,
        round_id BIGINT NOT NULL,
        motherlode BIGINT NOT NULL,
        lamports_deployed BIGINT NOT NULL,
        unit_count BIGINT NOT NULL,
        created_at TIMESTAMPTZ DEFAULT NOW(),
        PRIMARY KEY (user_id, round_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_round ON transactions(round_id)",
];

/// Database connection configuration
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
}

impl DbConfig {
    pub fn from_env() -> Option<Self> {
        env::var("DATABASE_URL").ok().map(|url| Self { url })
    }
}

/// Turns the stored private key column back into key material.
pub trait KeyCipher: Send + Sync {
    /// Returns the keypair as base58 or a JSON byte array.
    fn decrypt(&self, stored: &str) -> Result<String>;

    fn keypair(&self, stored: &str) -> Result<Keypair> {
        keypair_from_str(&self.decrypt(stored)?)
    }
}

/// Keys stored in the clear. Only for local development databases.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnencryptedKeys;

impl UnencryptedKeys {
    pub fn new() -> Self {
        warn!("Private keys are read from the database unencrypted");
        Self
    }
}

impl KeyCipher for UnencryptedKeys {
    fn decrypt(&self, stored: &str) -> Result<String> {
        if stored.trim().is_empty() {
            return Err(BotError::Config("Empty private key".to_string()));
        }
        Ok(stored.trim().to_string())
    }
}

/// PostgreSQL-backed store for users, settings and history.
#[cfg(feature = "database")]
pub struct PgStore {
    pool: sqlx::PgPool,
    cipher: Arc<dyn KeyCipher>,
}

#[cfg(feature = "database")]
fn db_err(what: &str) -> impl FnOnce(sqlx::Error) -> BotError + '_ {
    move |e| BotError::Database(format!("{}: {}", what, e))
}

#[cfg(feature = "database")]
impl PgStore {
    pub async fn connect(config: &DbConfig, cipher: Arc<dyn KeyCipher>) -> Result<Self> {
        info!("🔌 Connecting to database...");

        let pool = sqlx::PgPool::connect(&config.url)
            .await
            .map_err(db_err("Database connection failed"))?;

        info!("✅ Database connected");

        let store = Self { pool, cipher };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn init_schema(&self) -> Result<()> {
        for (i, statement) in SCHEMA_STATEMENTS.iter().enumerate() {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| BotError::Database(format!("Schema statement {} failed: {}", i + 1, e)))?;
        }

        info!("✅ Database schema ready ({} statements)", SCHEMA_STATEMENTS.len());
        Ok(())
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl SettingsStore for PgStore {
    async fn user_settings(&self, user: UserId) -> Result<UserSettings> {
        let defaults = UserSettings::default();
        sqlx::query(
            r#"
            INSERT INTO user_settings (user_id, motherload_threshold, sol_per_block, num_blocks,
                                       automation_budget_percent)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO NOTHING
        "#,
        )
        .bind(user)
        .bind(defaults.motherload_threshold)
        .bind(defaults.sol_per_block)
        .bind(defaults.num_blocks as i64)
        .bind(defaults.automation_budget_percent)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to create settings"))?;

        let (motherload_threshold, sol_per_block, num_blocks, automation_budget_percent) =
            sqlx::query_as::<_, (f64, f64, i64, f64)>(
                r#"
            SELECT motherload_threshold, sol_per_block, num_blocks, automation_budget_percent
            FROM user_settings WHERE user_id = $1
        "#,
            )
            .bind(user)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Failed to load settings"))?;

        Ok(UserSettings {
            motherload_threshold,
            sol_per_block,
            num_blocks: num_blocks.max(0) as u64,
            automation_budget_percent,
        })
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl CredentialStore for PgStore {
    async fn signing_key(&self, user: UserId) -> Result<Option<Arc<Keypair>>> {
        let stored = sqlx::query_scalar::<_, String>("SELECT encrypted_private_key FROM users WHERE user_id = $1")
            .bind(user)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to load key"))?;

        stored
            .map(|stored| self.cipher.keypair(&stored).map(Arc::new))
            .transpose()
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl UserDirectory for PgStore {
    async fn users_with_wallet(&self) -> Result<Vec<UserWallet>> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT user_id, public_key FROM users WHERE public_key <> '' ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list users"))?;

        Ok(rows
            .into_iter()
            .filter_map(|(user_id, public_key)| match Pubkey::from_str(&public_key) {
                Ok(public_key) => Some(UserWallet { user_id, public_key }),
                Err(e) => {
                    warn!("Skipping user {} with bad public key {}: {}", user_id, public_key, e);
                    None
                }
            })
            .collect())
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl HistoryRecorder for PgStore {
    async fn record_transaction(&self, record: &TransactionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (user_id, kind, signature, round_id, amount_lamports,
                                      success, error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
        )
        .bind(record.user_id)
        .bind(record.kind.to_string())
        .bind(&record.signature)
        .bind(record.round_id.map(|r| r as i64))
        .bind(record.amount_lamports as i64)
        .bind(record.success)
        .bind(&record.error)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to insert transaction"))?;

        Ok(())
    }

    async fn record_round_participation(&self, entry: &RoundParticipation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO round_participation (user_id, round_id, motherlode, lamports_deployed, unit_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, round_id) DO UPDATE SET
                motherlode = EXCLUDED.motherlode,
                lamports_deployed = EXCLUDED.lamports_deployed,
                unit_count = EXCLUDED.unit_count
        "#,
        )
        .bind(entry.user_id)
        .bind(entry.round_id as i64)
        .bind(entry.motherlode as i64)
        .bind(entry.lamports_deployed as i64)
        .bind(entry.unit_count as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to insert round participation"))?;

        Ok(())
    }
}
