use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Solana client error: {0}")]
    SolanaClient(#[from] solana_client::client_error::ClientError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("RPC timeout: {0}")]
    RpcTimeout(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Notification error: {0}")]
    Notification(#[from] reqwest::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BotError>;

/// Why a deploy was rejected. Only used to pick a log line; every variant
/// ends the user's turn for the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployFailure {
    CheckpointRequired,
    AlreadyDeployed,
    InsufficientBalance,
    Chain,
}

impl DeployFailure {
    /// Map chain error text to a failure kind. Unknown text is `Chain`.
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("checkpoint") {
            DeployFailure::CheckpointRequired
        } else if msg.contains("already deployed") || msg.contains("alreadydeployed") {
            DeployFailure::AlreadyDeployed
        } else if msg.contains("insufficient") {
            DeployFailure::InsufficientBalance
        } else {
            DeployFailure::Chain
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            DeployFailure::CheckpointRequired => "checkpoint required",
            DeployFailure::AlreadyDeployed => "already deployed this round",
            DeployFailure::InsufficientBalance => "insufficient automation balance",
            DeployFailure::Chain => "chain error",
        }
    }
}

impl BotError {
    pub fn deploy_failure(&self) -> DeployFailure {
        DeployFailure::classify(&self.to_string())
    }
}
