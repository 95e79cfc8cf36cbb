use crate::{
    config::LedgerConfig,
    error::{BotError, Result},
    utils::RateLimiter,
};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use log::{debug, info, warn};
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_request::{RpcError, RpcResponseErrorData},
};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Read and write access to the chain.
///
/// Implementations must be safe to share between concurrently processed
/// users; none of the calls carry per-user state.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Raw account data, or `None` if the account does not exist.
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>>;

    async fn get_slot(&self) -> Result<u64>;

    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64>;

    async fn get_latest_blockhash(&self) -> Result<Hash>;

    /// Sign with `signer` (also the fee payer) and submit without waiting.
    async fn send_transaction(&self, instructions: &[Instruction], signer: &Keypair) -> Result<Signature>;

    /// Wait until the transaction lands. An on-chain error is returned as
    /// `TransactionFailed`, a transaction that never lands as `RpcTimeout`.
    async fn confirm_transaction(&self, signature: &Signature) -> Result<()>;

    async fn send_and_confirm(&self, instructions: &[Instruction], signer: &Keypair) -> Result<Signature> {
        let signature = self.send_transaction(instructions, signer).await?;
        self.confirm_transaction(&signature).await?;
        Ok(signature)
    }
}

pub struct OreClient {
    pub rpc_client: Arc<RpcClient>,
    limiter: RateLimiter,
    config: LedgerConfig,
}

impl OreClient {
    pub fn new(rpc_url: String, config: LedgerConfig) -> Self {
        let rpc_client = Arc::new(RpcClient::new_with_commitment(
            rpc_url,
            CommitmentConfig::confirmed(),
        ));

        Self {
            rpc_client,
            limiter: RateLimiter::new(config.rpc_calls_per_second),
            config,
        }
    }

    /// Run a read call under the shared rate limit, retrying with backoff.
    async fn read<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, ClientError>>,
    {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.read_retry()),
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(2),
            ..Default::default()
        };

        let op = &op;
        let limiter = &self.limiter;
        retry(backoff, move || async move {
            limiter.acquire().await;
            op().await.map_err(|e| {
                debug!("{} failed, retrying: {}", what, e);
                backoff::Error::transient(BotError::RpcTimeout(format!("{} failed: {}", what, e)))
            })
        })
        .await
    }
}

#[async_trait]
impl LedgerClient for OreClient {
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        let response = self
            .read("get_account", || {
                self.rpc_client
                    .get_account_with_commitment(address, CommitmentConfig::confirmed())
            })
            .await?;
        Ok(response.value.map(|account| account.data))
    }

    async fn get_slot(&self) -> Result<u64> {
        self.read("get_slot", || self.rpc_client.get_slot()).await
    }

    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64> {
        self.read("get_balance", || self.rpc_client.get_balance(pubkey)).await
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        self.read("get_latest_blockhash", || self.rpc_client.get_latest_blockhash())
            .await
    }

    async fn send_transaction(&self, instructions: &[Instruction], signer: &Keypair) -> Result<Signature> {
        let mut all_instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(self.config.compute_unit_limit),
            ComputeBudgetInstruction::set_compute_unit_price(self.config.compute_unit_price),
        ];
        all_instructions.extend_from_slice(instructions);

        let blockhash = self.get_latest_blockhash().await?;
        let transaction = Transaction::new_signed_with_payer(
            &all_instructions,
            Some(&signer.pubkey()),
            &[signer],
            blockhash,
        );

        // Sends are never retried; a resubmit could land twice.
        self.limiter.acquire().await;
        let signature = self
            .rpc_client
            .send_transaction(&transaction)
            .await
            .map_err(|e| BotError::TransactionFailed(describe_send_error(&e)))?;

        info!("🚀 Tx sent: {}", signature);
        Ok(signature)
    }

    async fn confirm_transaction(&self, signature: &Signature) -> Result<()> {
        let deadline = Instant::now() + self.config.confirm_timeout();

        loop {
            self.limiter.acquire().await;
            match self.rpc_client.get_signature_status(signature).await {
                Ok(Some(Ok(()))) => return Ok(()),
                Ok(Some(Err(e))) => {
                    return Err(BotError::TransactionFailed(format!("{}: {}", signature, e)))
                }
                Ok(None) => {}
                Err(e) => warn!("Signature status for {} unavailable: {}", signature, e),
            }

            if Instant::now() >= deadline {
                return Err(BotError::RpcTimeout(format!(
                    "{} not confirmed within {}s",
                    signature, self.config.confirm_timeout_secs
                )));
            }
            sleep(CONFIRM_POLL_INTERVAL).await;
        }
    }
}

/// Preflight failures carry the program logs, which hold the useful text.
fn describe_send_error(err: &ClientError) -> String {
    if let ClientErrorKind::RpcError(RpcError::RpcResponseError {
        data: RpcResponseErrorData::SendTransactionPreflightFailure(result),
        ..
    }) = err.kind()
    {
        if let Some(logs) = &result.logs {
            return format!("{} | {}", err, logs.join(" | "));
        }
    }
    err.to_string()
}
