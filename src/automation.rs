//! Create, close and inspect a wallet's automation account.
//!
//! Every operation returns a `LifecycleError` instead of propagating chain
//! errors, so callers can hand the message to the user as is.

use crate::{
    accounts::{fetch_automation, AutomationInfo},
    client::LedgerClient,
    config::AutomationConfig,
    error::BotError,
    instructions::{AutomateParams, InstructionBuilder},
    store::UserSettings,
    utils::lamports_to_sol,
};
use colored::*;
use log::{info, warn};
use serde::Serialize;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::sync::Arc;
use thiserror::Error;

fn sol(lamports: &u64) -> f64 {
    lamports_to_sol(*lamports)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Automation is already active with {:.4} SOL left. Close it before creating a new one.", sol(.balance))]
    AlreadyActive { balance: u64 },

    #[error("No automation account to close")]
    NoAutomation,

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error(
        "Insufficient balance: budget of {:.4} SOL does not cover one round of {:.4} SOL",
        sol(.available),
        sol(.needed)
    )]
    InsufficientBalance { needed: u64, available: u64 },

    #[error("Chain error: {0}")]
    Chain(String),
}

impl From<BotError> for LifecycleError {
    fn from(err: BotError) -> Self {
        LifecycleError::Chain(err.to_string())
    }
}

/// How a new automation is funded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetPlan {
    pub lamports_per_block: u64,
    pub lamports_per_round: u64,
    pub target_rounds: u64,
    /// `target_rounds * lamports_per_round`
    pub deposit: u64,
}

/// Size an automation from the wallet balance and the user's settings.
///
/// The budget is `automation_budget_percent` of the wallet; the number of
/// funded rounds is capped at `max_rounds`.
pub fn plan_budget(
    wallet_balance: u64,
    settings: &UserSettings,
    max_rounds: u64,
) -> std::result::Result<BudgetPlan, LifecycleError> {
    let lamports_per_block = settings.lamports_per_block();
    let lamports_per_round = settings.lamports_per_round();
    if lamports_per_round == 0 {
        return Err(LifecycleError::InvalidSettings(
            "sol_per_block and num_blocks must both be positive".to_string(),
        ));
    }

    let percent = settings.automation_budget_percent;
    if !percent.is_finite() || percent <= 0.0 || percent > 100.0 {
        return Err(LifecycleError::InvalidSettings(format!(
            "automation_budget_percent must be within (0, 100], got {}",
            percent
        )));
    }

    // Basis points keep the budget math in integers.
    let basis_points = (percent * 100.0).round() as u128;
    let max_budget = (wallet_balance as u128 * basis_points / 10_000) as u64;

    let target_rounds = (max_budget / lamports_per_round).min(max_rounds);
    let deposit = target_rounds * lamports_per_round;

    if deposit < lamports_per_round {
        return Err(LifecycleError::InsufficientBalance {
            needed: lamports_per_round,
            available: max_budget,
        });
    }

    Ok(BudgetPlan {
        lamports_per_block,
        lamports_per_round,
        target_rounds,
        deposit,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutomationStatus {
    pub exists: bool,
    /// Exists and still holds a balance
    pub active: bool,
    pub balance: u64,
    pub cost_per_round: u64,
    pub estimated_rounds: u64,
}

impl AutomationStatus {
    pub fn from_info(info: Option<AutomationInfo>) -> Self {
        match info {
            Some(info) => Self {
                exists: true,
                active: info.is_active(),
                balance: info.remaining_balance,
                cost_per_round: info.cost_per_round,
                estimated_rounds: info.estimated_rounds(),
            },
            None => Self {
                exists: false,
                active: false,
                balance: 0,
                cost_per_round: 0,
                estimated_rounds: 0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationCreated {
    pub deposited: u64,
    pub target_rounds: u64,
    pub signature: Signature,
}

impl AutomationCreated {
    pub fn deposited_sol(&self) -> f64 {
        lamports_to_sol(self.deposited)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationClosed {
    /// Balance read just before the close was submitted
    pub returned: u64,
    pub signature: Signature,
}

impl AutomationClosed {
    pub fn returned_sol(&self) -> f64 {
        lamports_to_sol(self.returned)
    }
}

pub struct AutomationManager {
    ledger: Arc<dyn LedgerClient>,
    instructions: Arc<dyn InstructionBuilder>,
    config: AutomationConfig,
}

impl AutomationManager {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        instructions: Arc<dyn InstructionBuilder>,
        config: AutomationConfig,
    ) -> Self {
        Self {
            ledger,
            instructions,
            config,
        }
    }

    pub async fn status(&self, owner: &Pubkey) -> std::result::Result<AutomationStatus, LifecycleError> {
        let info = fetch_automation(self.ledger.as_ref(), owner).await?;
        Ok(AutomationStatus::from_info(info))
    }

    pub async fn create(
        &self,
        owner: &Keypair,
        settings: &UserSettings,
    ) -> std::result::Result<AutomationCreated, LifecycleError> {
        let owner_pubkey = owner.pubkey();

        let status = self.status(&owner_pubkey).await?;
        if status.active {
            return Err(LifecycleError::AlreadyActive {
                balance: status.balance,
            });
        }

        let wallet_balance = self.ledger.get_balance(&owner_pubkey).await?;
        let plan = plan_budget(wallet_balance, settings, self.config.max_target_rounds)?;

        info!("📋 Automation setup for {}:", owner_pubkey);
        info!("   Wallet balance: {:.4} SOL", lamports_to_sol(wallet_balance));
        info!(
            "   Per round: {:.4} SOL ({} blocks × {:.6} SOL)",
            lamports_to_sol(plan.lamports_per_round),
            settings.num_blocks,
            lamports_to_sol(plan.lamports_per_block)
        );
        info!(
            "   Deposit: {:.4} SOL for {} rounds",
            lamports_to_sol(plan.deposit),
            plan.target_rounds
        );

        let ix = self.instructions.automate(&AutomateParams {
            owner: owner_pubkey,
            executor: owner_pubkey,
            deposit_per_unit: plan.lamports_per_block,
            deposit: plan.deposit,
            fee_per_execution: self.config.fee_per_execution_lamports,
            unit_mask: settings.num_blocks,
            reload: self.config.reload,
        });

        let signature = self.ledger.send_and_confirm(&[ix], owner).await?;
        info!("{}", format!("✅ Automation created: {}", signature).green());

        Ok(AutomationCreated {
            deposited: plan.deposit,
            target_rounds: plan.target_rounds,
            signature,
        })
    }

    /// Close the automation account and refund its balance. A drained
    /// account can still be closed; only a missing one is an error.
    pub async fn close(&self, owner: &Keypair) -> std::result::Result<AutomationClosed, LifecycleError> {
        let owner_pubkey = owner.pubkey();

        let info = fetch_automation(self.ledger.as_ref(), &owner_pubkey)
            .await?
            .ok_or(LifecycleError::NoAutomation)?;

        let ix = self.instructions.close_automation(owner_pubkey);
        let signature = self.ledger.send_and_confirm(&[ix], owner).await?;

        info!(
            "{}",
            format!(
                "🔒 Automation closed: {} ({:.4} SOL returned)",
                signature,
                lamports_to_sol(info.remaining_balance)
            )
            .yellow()
        );

        // The refund is whatever the program held at execution time; the
        // pre-close read is only reported.
        match fetch_automation(self.ledger.as_ref(), &owner_pubkey).await {
            Ok(Some(_)) => warn!("Automation for {} still readable after close {}", owner_pubkey, signature),
            Ok(None) => {}
            Err(e) => warn!("Could not verify close for {}: {}", owner_pubkey, e),
        }

        Ok(AutomationClosed {
            returned: info.remaining_balance,
            signature,
        })
    }
}
