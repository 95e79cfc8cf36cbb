//! Once-per-round deploy scheduler.
//!
//! Every tick polls the board. When a new round shows up, each user with an
//! automation account goes through these gates in order, and the first one
//! that fires decides the user's outcome for the round:
//!
//! 1. motherlode below the user's threshold: skip
//! 2. automation account gone: skip
//! 3. balance drained or below one round's cost: close, recreate, no deploy
//! 4. round already over: skip
//! 5. miner behind on checkpoints: checkpoint first, failures are tolerated
//! 6. deploy
//!
//! Users are independent. An error or timeout for one user is logged as a
//! `Failed` outcome and the tick moves on.

use crate::{
    accounts::{fetch_automation, fetch_miner, fetch_treasury, AutomationInfo, BoardState, TreasuryState},
    automation::{AutomationManager, LifecycleError},
    bot::{BotStatus, StatusCell},
    client::LedgerClient,
    config::ExecutorConfig,
    error::{BotError, Result},
    instructions::InstructionBuilder,
    notify::Notifier,
    round::RoundDetector,
    store::{
        RoundParticipation, Store, TransactionKind, TransactionRecord, UserId, UserSettings, UserWallet,
    },
    utils::{lamports_to_sol, ore_to_ui},
};
use colored::*;
use futures::{
    stream::{self, StreamExt},
    FutureExt,
};
use log::{debug, error, info, warn};
use serde::Serialize;
use solana_sdk::signature::{Keypair, Signer};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    SkippedBelowThreshold,
    SkippedNoAccount,
    SkippedRoundEnded,
    /// A previous auto-restart failed; retried from `retry_at`
    SkippedRestartBackoff { retry_at: u64 },
    /// Automation was closed and recreated. No deploy this round.
    Restarted,
    Deployed { signature: String },
    Failed { reason: String },
}

impl ExecutionOutcome {
    fn failed(reason: impl ToString) -> Self {
        ExecutionOutcome::Failed {
            reason: reason.to_string(),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::SkippedBelowThreshold
                | ExecutionOutcome::SkippedNoAccount
                | ExecutionOutcome::SkippedRoundEnded
                | ExecutionOutcome::SkippedRestartBackoff { .. }
        )
    }
}

/// What one round's pass over the users did.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub round_id: u64,
    /// Sorted by user id
    pub outcomes: Vec<(UserId, ExecutionOutcome)>,
}

impl TickReport {
    pub fn outcome(&self, user: UserId) -> Option<&ExecutionOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == user)
            .map(|(_, outcome)| outcome)
    }

    pub fn deployed(&self) -> usize {
        self.count(|o| matches!(o, ExecutionOutcome::Deployed { .. }))
    }

    pub fn restarted(&self) -> usize {
        self.count(|o| matches!(o, ExecutionOutcome::Restarted))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ExecutionOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(ExecutionOutcome::is_skip)
    }

    fn count(&self, pred: impl Fn(&ExecutionOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, outcome)| pred(outcome)).count()
    }
}

/// Clears the in-progress flag when a tick ends, however it ends.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Where a user's gates ended up.
enum Turn {
    Done(ExecutionOutcome),
    /// Automation is drained; close and recreate it
    Restart {
        keypair: Arc<Keypair>,
        settings: UserSettings,
        automation: AutomationInfo,
    },
}

pub struct AutomationExecutor {
    ledger: Arc<dyn LedgerClient>,
    instructions: Arc<dyn InstructionBuilder>,
    lifecycle: AutomationManager,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    config: ExecutorConfig,
    detector: RoundDetector,
    status: StatusCell,
    tick_in_progress: AtomicBool,
    /// Round of each user's last failed auto-restart
    failed_restarts: Mutex<HashMap<UserId, u64>>,
}

impl AutomationExecutor {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        instructions: Arc<dyn InstructionBuilder>,
        lifecycle: AutomationManager,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            ledger,
            instructions,
            lifecycle,
            store,
            notifier,
            config,
            detector: RoundDetector::new(),
            status: StatusCell::new(),
            tick_in_progress: AtomicBool::new(false),
            failed_restarts: Mutex::new(HashMap::new()),
        }
    }

    pub fn status(&self) -> BotStatus {
        self.status.get()
    }

    pub fn last_round(&self) -> Option<u64> {
        self.detector.last_seen()
    }

    /// Spawn the polling loop. The first tick runs immediately. Returns
    /// `None` if the loop is already running.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.status.set(BotStatus::Running) == BotStatus::Running {
            warn!("Automation executor is already running");
            return None;
        }

        info!(
            "🤖 Starting automation executor (poll every {}s, {} user(s) at a time)",
            self.config.poll_interval_secs,
            self.config.max_concurrent_users.max(1)
        );

        let executor = Arc::clone(self);
        Some(tokio::spawn(async move { executor.run().await }))
    }

    /// Stop scheduling ticks. A tick already running is allowed to finish.
    pub fn stop(&self) {
        if self.status.set(BotStatus::Stopped) != BotStatus::Stopped {
            info!("🛑 Stopping automation executor");
        }
    }

    async fn run(&self) {
        let mut status = self.status.subscribe();
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *status.borrow_and_update() == BotStatus::Stopped {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_tick().await {
                        error!("Tick failed: {}", e);
                    }
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Automation executor stopped");
    }

    /// One poll. Returns `None` when the round has not changed or another
    /// tick is still running.
    pub async fn run_tick(&self) -> Result<Option<TickReport>> {
        if self
            .tick_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous tick still running, skipping");
            return Ok(None);
        }
        let _guard = TickGuard(&self.tick_in_progress);

        // Shared reads happen before the detector, so a failed read leaves
        // the round unseen and the next tick retries it.
        let treasury = fetch_treasury(self.ledger.as_ref()).await?;
        let users = self.store.users_with_wallet().await?;

        let transition = match self.detector.poll(self.ledger.as_ref()).await? {
            Some(transition) => transition,
            None => return Ok(None),
        };

        let report = self.execute_round(transition.board, treasury, users).await;
        info!(
            "{}",
            format!(
                "📊 Round {} done: {} deployed, {} restarted, {} skipped, {} failed",
                report.round_id,
                report.deployed(),
                report.restarted(),
                report.skipped(),
                report.failed()
            )
            .cyan()
        );

        Ok(Some(report))
    }

    async fn execute_round(
        &self,
        board: BoardState,
        treasury: TreasuryState,
        users: Vec<UserWallet>,
    ) -> TickReport {
        info!(
            "🚀 Round {}: motherlode {:.2} ORE, {} user(s) with wallets",
            board.round_id,
            ore_to_ui(treasury.motherlode),
            users.len()
        );

        let mut eligible = Vec::with_capacity(users.len());
        for user in users {
            match fetch_automation(self.ledger.as_ref(), &user.public_key).await {
                Ok(Some(_)) => eligible.push(user),
                Ok(None) => debug!("User {} has no automation", user.user_id),
                Err(e) => {
                    // Let the user's own turn retry the read and report it.
                    warn!("Could not read automation of user {}: {}", user.user_id, e);
                    eligible.push(user);
                }
            }
        }

        let this = self;
        let mut outcomes: Vec<(UserId, ExecutionOutcome)> = stream::iter(eligible)
            .map(move |user| async move {
                let outcome = this.run_user(user, board, treasury).await;
                sleep(this.config.user_delay()).await;
                (user.user_id, outcome)
            })
            .buffer_unordered(self.config.max_concurrent_users.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|(user_id, _)| *user_id);

        TickReport {
            round_id: board.round_id,
            outcomes,
        }
    }

    async fn run_user(&self, user: UserWallet, board: BoardState, treasury: TreasuryState) -> ExecutionOutcome {
        let turn = AssertUnwindSafe(self.process_user(user, board, treasury)).catch_unwind();
        let turn = match timeout(self.config.user_timeout(), turn).await {
            Ok(Ok(Ok(turn))) => turn,
            Ok(Ok(Err(e))) => {
                error!("{}", format!("❌ User {}: {}", user.user_id, e).red());
                return ExecutionOutcome::failed(e);
            }
            Ok(Err(_)) => {
                error!("{}", format!("❌ User {}: turn panicked", user.user_id).red());
                return ExecutionOutcome::failed("internal error");
            }
            Err(_) => {
                error!(
                    "{}",
                    format!(
                        "⏱️  User {} timed out after {}s",
                        user.user_id, self.config.user_timeout_secs
                    )
                    .red()
                );
                return ExecutionOutcome::failed(format!("timed out after {}s", self.config.user_timeout_secs));
            }
        };

        match turn {
            Turn::Done(outcome) => outcome,
            // Bounded step by step inside `restart`, so a timeout between the
            // close and the create still reaches the user.
            Turn::Restart {
                keypair,
                settings,
                automation,
            } => {
                let restart = self.restart(&user, &keypair, &settings, &automation, board.round_id);
                match AssertUnwindSafe(restart).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!("{}", format!("❌ User {}: restart panicked", user.user_id).red());
                        self.restart_failed(user.user_id, board.round_id, "internal error".to_string())
                            .await
                    }
                }
            }
        }
    }

    async fn process_user(
        &self,
        user: UserWallet,
        board: BoardState,
        treasury: TreasuryState,
    ) -> Result<Turn> {
        let settings = self.store.user_settings(user.user_id).await?;

        let motherlode = ore_to_ui(treasury.motherlode);
        if motherlode < settings.motherload_threshold {
            info!(
                "⏭️  User {}: motherlode {:.2} ORE below threshold {:.2}",
                user.user_id, motherlode, settings.motherload_threshold
            );
            return Ok(Turn::Done(ExecutionOutcome::SkippedBelowThreshold));
        }

        let automation = match fetch_automation(self.ledger.as_ref(), &user.public_key).await? {
            Some(automation) => automation,
            None => {
                info!("⏭️  User {}: automation account is gone", user.user_id);
                return Ok(Turn::Done(ExecutionOutcome::SkippedNoAccount));
            }
        };

        let keypair = match self.store.signing_key(user.user_id).await? {
            Some(keypair) if keypair.pubkey() == user.public_key => keypair,
            Some(_) => {
                error!("{}", format!("❌ User {}: signing key does not match the wallet", user.user_id).red());
                return Ok(Turn::Done(ExecutionOutcome::failed("signing key does not match the wallet")));
            }
            None => {
                error!("{}", format!("❌ User {}: no signing key stored", user.user_id).red());
                return Ok(Turn::Done(ExecutionOutcome::failed("no signing key stored")));
            }
        };

        if automation.remaining_balance == 0 || automation.remaining_balance < automation.cost_per_round {
            return Ok(Turn::Restart {
                keypair,
                settings,
                automation,
            });
        }

        let slot = self.ledger.get_slot().await?;
        if slot >= board.end_slot {
            info!(
                "⏭️  User {}: round {} ended at slot {} (now {})",
                user.user_id, board.round_id, board.end_slot, slot
            );
            return Ok(Turn::Done(ExecutionOutcome::SkippedRoundEnded));
        }

        self.checkpoint_if_needed(&user, &keypair, board.round_id).await;

        Ok(Turn::Done(
            self.deploy(&user, &keypair, &automation, board, treasury).await,
        ))
    }

    /// Close a drained automation and open a fresh one from the wallet.
    async fn restart(
        &self,
        user: &UserWallet,
        keypair: &Keypair,
        settings: &UserSettings,
        automation: &AutomationInfo,
        round_id: u64,
    ) -> ExecutionOutcome {
        let state = if automation.remaining_balance == 0 {
            "is depleted".to_string()
        } else {
            format!(
                "has {:.6} SOL, one round costs {:.6} SOL",
                lamports_to_sol(automation.remaining_balance),
                lamports_to_sol(automation.cost_per_round)
            )
        };

        let last_failure = self.failed_restarts.lock().await.get(&user.user_id).copied();
        if let Some(failed_round) = last_failure {
            let retry_at = failed_round.saturating_add(self.config.restart_backoff_rounds);
            if round_id < retry_at {
                info!(
                    "⏸️  User {}: automation {}, auto-restart paused until round {}",
                    user.user_id, state, retry_at
                );
                return ExecutionOutcome::SkippedRestartBackoff { retry_at };
            }
        }

        warn!(
            "{}",
            format!("♻️  User {}: automation {}, restarting", user.user_id, state).yellow()
        );

        let close_record = TransactionRecord::new(
            user.user_id,
            TransactionKind::CloseAutomation,
            automation.remaining_balance,
        )
        .in_round(round_id);
        match self.bounded(self.lifecycle.close(keypair)).await {
            Ok(closed) => self.record(close_record.succeeded(closed.signature)).await,
            Err(e) => {
                self.record(close_record.failed(None, &e)).await;
                return self
                    .restart_failed(user.user_id, round_id, format!("could not close the old automation: {}", e))
                    .await;
            }
        }

        sleep(self.config.restart_settle()).await;

        match self.bounded(self.lifecycle.create(keypair, settings)).await {
            Ok(created) => {
                self.record(
                    TransactionRecord::new(user.user_id, TransactionKind::CreateAutomation, created.deposited)
                        .in_round(round_id)
                        .succeeded(created.signature),
                )
                .await;
                self.failed_restarts.lock().await.remove(&user.user_id);

                info!(
                    "{}",
                    format!(
                        "✅ User {}: automation restarted with {:.4} SOL for {} rounds",
                        user.user_id,
                        created.deposited_sol(),
                        created.target_rounds
                    )
                    .green()
                );
                self.notify(
                    user.user_id,
                    &format!(
                        "♻️ Your automation ran out and was restarted: {:.4} SOL deposited for {} rounds.",
                        created.deposited_sol(),
                        created.target_rounds
                    ),
                )
                .await;
                ExecutionOutcome::Restarted
            }
            Err(e) => {
                // Only chain errors got as far as a submission.
                if let LifecycleError::Chain(_) = e {
                    self.record(
                        TransactionRecord::new(user.user_id, TransactionKind::CreateAutomation, 0)
                            .in_round(round_id)
                            .failed(None, &e),
                    )
                    .await;
                }
                self.restart_failed(user.user_id, round_id, e.to_string()).await
            }
        }
    }

    /// Run one lifecycle step under the per-user timeout.
    async fn bounded<T>(
        &self,
        step: impl std::future::Future<Output = std::result::Result<T, LifecycleError>>,
    ) -> std::result::Result<T, LifecycleError> {
        timeout(self.config.user_timeout(), step).await.unwrap_or_else(|_| {
            Err(LifecycleError::Chain(format!(
                "timed out after {}s",
                self.config.user_timeout_secs
            )))
        })
    }

    async fn restart_failed(&self, user: UserId, round_id: u64, reason: String) -> ExecutionOutcome {
        error!("{}", format!("❌ User {}: auto-restart failed: {}", user, reason).red());
        self.failed_restarts.lock().await.insert(user, round_id);
        self.notify(user, &format!("⚠️ Auto-restart of your automation failed: {}", reason))
            .await;
        ExecutionOutcome::failed(format!("auto-restart failed: {}", reason))
    }

    /// Checkpoint the miner's last round when the board has moved past its
    /// last checkpoint. Never blocks the deploy.
    async fn checkpoint_if_needed(&self, user: &UserWallet, keypair: &Keypair, round_id: u64) {
        let miner = match fetch_miner(self.ledger.as_ref(), &user.public_key).await {
            Ok(Some(miner)) => miner,
            Ok(None) => return,
            Err(e) => {
                warn!("User {}: could not read miner, deploying without checkpoint: {}", user.user_id, e);
                return;
            }
        };
        if miner.checkpoint_id >= round_id {
            return;
        }

        info!("🧾 User {}: checkpointing round {}", user.user_id, miner.round_id);
        let ix = self
            .instructions
            .checkpoint(keypair.pubkey(), user.public_key, miner.round_id);
        let record = TransactionRecord::new(user.user_id, TransactionKind::Checkpoint, 0).in_round(miner.round_id);

        match self.ledger.send_and_confirm(&[ix], keypair).await {
            Ok(signature) => {
                debug!("User {}: checkpoint {}", user.user_id, signature);
                self.record(record.succeeded(signature)).await;
            }
            Err(e) => {
                warn!(
                    "{}",
                    format!("⚠️  User {}: checkpoint failed, deploying anyway: {}", user.user_id, e).yellow()
                );
                self.record(record.failed(None, &e)).await;
            }
        }
    }

    async fn deploy(
        &self,
        user: &UserWallet,
        keypair: &Keypair,
        automation: &AutomationInfo,
        board: BoardState,
        treasury: TreasuryState,
    ) -> ExecutionOutcome {
        let ixs = self.instructions.execute_automation(
            keypair.pubkey(),
            user.public_key,
            automation.deposit_per_unit,
            automation.unit_mask,
            board.round_id,
        );
        let record = TransactionRecord::new(user.user_id, TransactionKind::Deploy, automation.cost_per_round)
            .in_round(board.round_id);

        let signature = match self.ledger.send_transaction(&ixs, keypair).await {
            Ok(signature) => signature,
            Err(e) => return self.deploy_failed(user.user_id, record, None, e).await,
        };
        if let Err(e) = self.ledger.confirm_transaction(&signature).await {
            return self
                .deploy_failed(user.user_id, record, Some(signature.to_string()), e)
                .await;
        }

        info!(
            "{}",
            format!(
                "✅ User {}: deployed {:.4} SOL on {} blocks in round {} ({})",
                user.user_id,
                lamports_to_sol(automation.cost_per_round),
                automation.unit_mask,
                board.round_id,
                signature
            )
            .green()
        );

        self.record(record.succeeded(signature)).await;
        let participation = RoundParticipation {
            user_id: user.user_id,
            round_id: board.round_id,
            motherlode: treasury.motherlode,
            lamports_deployed: automation.cost_per_round,
            unit_count: automation.unit_mask,
        };
        if let Err(e) = self.store.record_round_participation(&participation).await {
            warn!("Failed to record round {} for user {}: {}", board.round_id, user.user_id, e);
        }

        ExecutionOutcome::Deployed {
            signature: signature.to_string(),
        }
    }

    async fn deploy_failed(
        &self,
        user: UserId,
        record: TransactionRecord,
        signature: Option<String>,
        err: BotError,
    ) -> ExecutionOutcome {
        let failure = err.deploy_failure();
        error!(
            "{}",
            format!("❌ User {}: deploy failed ({}): {}", user, failure.describe(), err).red()
        );
        self.record(record.failed(signature, &err)).await;
        ExecutionOutcome::failed(format!("{}: {}", failure.describe(), err))
    }

    async fn record(&self, record: TransactionRecord) {
        if let Err(e) = self.store.record_transaction(&record).await {
            warn!("Failed to record {} for user {}: {}", record.kind, record.user_id, e);
        }
    }

    async fn notify(&self, user: UserId, message: &str) {
        if let Err(e) = self.notifier.notify(user, message).await {
            warn!("Failed to notify user {}: {}", user, e);
        }
    }
}
