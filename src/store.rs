use crate::{
    error::{BotError, Result},
    utils::{keypair_from_str, sol_to_lamports},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Chat user id; also the Telegram chat notifications are sent to.
pub type UserId = i64;

/// Per-user automation settings, edited through the bot UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Skip rounds whose motherlode (whole ORE) is below this
    pub motherload_threshold: f64,
    /// SOL deployed per block each round
    pub sol_per_block: f64,
    /// Blocks deployed each round
    pub num_blocks: u64,
    /// Share of the wallet balance a new automation may take
    pub automation_budget_percent: f64,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            motherload_threshold: 0.0,
            sol_per_block: 0.001,
            num_blocks: 25,
            automation_budget_percent: 50.0,
        }
    }
}

impl UserSettings {
    pub fn lamports_per_block(&self) -> u64 {
        sol_to_lamports(self.sol_per_block)
    }

    pub fn lamports_per_round(&self) -> u64 {
        self.lamports_per_block().saturating_mul(self.num_blocks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserWallet {
    pub user_id: UserId,
    pub public_key: Pubkey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    CreateAutomation,
    CloseAutomation,
    Checkpoint,
    Deploy,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::CreateAutomation => write!(f, "create_automation"),
            TransactionKind::CloseAutomation => write!(f, "close_automation"),
            TransactionKind::Checkpoint => write!(f, "checkpoint"),
            TransactionKind::Deploy => write!(f, "deploy"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub signature: Option<String>,
    pub round_id: Option<u64>,
    pub amount_lamports: u64,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(user_id: UserId, kind: TransactionKind, amount_lamports: u64) -> Self {
        Self {
            user_id,
            kind,
            signature: None,
            round_id: None,
            amount_lamports,
            success: false,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn in_round(mut self, round_id: u64) -> Self {
        self.round_id = Some(round_id);
        self
    }

    pub fn succeeded(mut self, signature: impl ToString) -> Self {
        self.signature = Some(signature.to_string());
        self.success = true;
        self
    }

    pub fn failed(mut self, signature: Option<String>, error: impl ToString) -> Self {
        self.signature = signature;
        self.success = false;
        self.error = Some(error.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundParticipation {
    pub user_id: UserId,
    pub round_id: u64,
    /// Raw ORE motherlode when the deploy landed
    pub motherlode: u64,
    pub lamports_deployed: u64,
    pub unit_count: u64,
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Settings of `user`, created with defaults on first read.
    async fn user_settings(&self, user: UserId) -> Result<UserSettings>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn signing_key(&self, user: UserId) -> Result<Option<Arc<Keypair>>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn users_with_wallet(&self) -> Result<Vec<UserWallet>>;
}

#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    async fn record_transaction(&self, record: &TransactionRecord) -> Result<()>;

    async fn record_round_participation(&self, entry: &RoundParticipation) -> Result<()>;
}

/// Everything the executor needs from storage.
pub trait Store: SettingsStore + CredentialStore + UserDirectory + HistoryRecorder {}

impl<T> Store for T where T: SettingsStore + CredentialStore + UserDirectory + HistoryRecorder {}

struct MemoryUser {
    keypair: Arc<Keypair>,
    settings: Option<UserSettings>,
}

/// Entry of a users file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFileEntry {
    pub user_id: UserId,
    /// Base58 or JSON-array keypair
    pub keypair: String,
    #[serde(default)]
    pub settings: Option<UserSettings>,
}

/// In-process store. Backs tests and single-host deployments that list
/// their users in a JSON file.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<UserId, MemoryUser>>,
    transactions: Mutex<Vec<TransactionRecord>>,
    participations: Mutex<Vec<RoundParticipation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_users_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let entries: Vec<UserFileEntry> = serde_json::from_str(&contents)?;

        let mut users = HashMap::new();
        for entry in entries {
            let keypair = keypair_from_str(&entry.keypair).map_err(|e| {
                BotError::Config(format!("user {} in {}: {}", entry.user_id, path, e))
            })?;
            users.insert(
                entry.user_id,
                MemoryUser {
                    keypair: Arc::new(keypair),
                    settings: entry.settings,
                },
            );
        }

        Ok(Self {
            users: RwLock::new(users),
            ..Default::default()
        })
    }

    pub async fn add_user(&self, user: UserId, keypair: Keypair, settings: Option<UserSettings>) {
        self.users.write().await.insert(
            user,
            MemoryUser {
                keypair: Arc::new(keypair),
                settings,
            },
        );
    }

    pub async fn set_settings(&self, user: UserId, settings: UserSettings) {
        if let Some(entry) = self.users.write().await.get_mut(&user) {
            entry.settings = Some(settings);
        }
    }

    pub async fn transactions(&self) -> Vec<TransactionRecord> {
        self.transactions.lock().await.clone()
    }

    pub async fn participations(&self) -> Vec<RoundParticipation> {
        self.participations.lock().await.clone()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn user_settings(&self, user: UserId) -> Result<UserSettings> {
        let mut users = self.users.write().await;
        match users.get_mut(&user) {
            Some(entry) => Ok(entry.settings.get_or_insert_with(UserSettings::default).clone()),
            None => Ok(UserSettings::default()),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn signing_key(&self, user: UserId) -> Result<Option<Arc<Keypair>>> {
        Ok(self.users.read().await.get(&user).map(|entry| entry.keypair.clone()))
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn users_with_wallet(&self) -> Result<Vec<UserWallet>> {
        let users = self.users.read().await;
        let mut wallets: Vec<UserWallet> = users
            .iter()
            .map(|(user_id, entry)| UserWallet {
                user_id: *user_id,
                public_key: entry.keypair.pubkey(),
            })
            .collect();
        wallets.sort_by_key(|w| w.user_id);
        Ok(wallets)
    }
}

#[async_trait]
impl HistoryRecorder for MemoryStore {
    async fn record_transaction(&self, record: &TransactionRecord) -> Result<()> {
        self.transactions.lock().await.push(record.clone());
        Ok(())
    }

    async fn record_round_participation(&self, entry: &RoundParticipation) -> Result<()> {
        self.participations.lock().await.push(entry.clone());
        Ok(())
    }
}
