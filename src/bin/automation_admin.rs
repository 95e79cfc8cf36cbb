//! Inspect, create or close a single wallet's automation account.
//!
//! Usage:
//!   KEYPAIR_B58=<key> RPC_URL=<rpc> automation-admin status
//!   KEYPAIR_B58=<key> RPC_URL=<rpc> automation-admin create --sol-per-block 0.01 --blocks 20 --budget-percent 50
//!   KEYPAIR_B58=<key> RPC_URL=<rpc> automation-admin close
//!
//! Environment Variables:
//!   KEYPAIR_B58 or KEYPAIR_JSON - Wallet private key (otherwise --keypair)
//!   RPC_URL - Solana RPC endpoint
//!   FEE_PER_EXECUTION_LAMPORTS, AUTOMATION_RELOAD, MAX_TARGET_ROUNDS - see the executor config

use clap::{Parser, Subcommand};
use colored::*;
use log::error;
use orb_autominer::{
    automation::AutomationManager,
    client::{LedgerClient, OreClient},
    config::BotConfig,
    instructions::OreInstructions,
    store::UserSettings,
    utils::{lamports_to_sol, load_keypair},
};
use solana_sdk::signature::Signer;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "automation-admin", about = "Manage an ORE automation account")]
struct Cli {
    /// Keypair file, used when KEYPAIR_B58 and KEYPAIR_JSON are unset
    #[arg(long, default_value = "keypair.json")]
    keypair: String,

    /// RPC endpoint, overrides RPC_URL
    #[arg(long)]
    rpc_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the automation balance and remaining rounds
    Status,
    /// Fund a new automation from the wallet
    Create {
        #[arg(long, default_value_t = 0.001)]
        sol_per_block: f64,
        #[arg(long, default_value_t = 25)]
        blocks: u64,
        /// Share of the wallet balance to deposit
        #[arg(long, default_value_t = 50.0)]
        budget_percent: f64,
    },
    /// Close the automation and refund its balance
    Close,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = BotConfig::from_env();
    if let Some(rpc_url) = cli.rpc_url {
        config.rpc_url = rpc_url;
    }

    let keypair = match load_keypair(&cli.keypair) {
        Ok(kp) => kp,
        Err(e) => {
            error!("Failed to load keypair: {}", e);
            error!("");
            error!("Set one of:");
            error!("  - KEYPAIR_B58 (base58 encoded private key)");
            error!("  - KEYPAIR_JSON (JSON array of bytes)");
            error!("  - --keypair pointing to a keypair file");
            std::process::exit(1);
        }
    };

    let ledger: Arc<dyn LedgerClient> = Arc::new(OreClient::new(config.rpc_url.clone(), config.ledger.clone()));
    let manager = AutomationManager::new(ledger.clone(), Arc::new(OreInstructions), config.automation.clone());

    println!("📡 RPC: {}", config.rpc_url);
    println!("🔑 Wallet: {}", keypair.pubkey());

    match cli.command {
        Command::Status => {
            let status = match manager.status(&keypair.pubkey()).await {
                Ok(status) => status,
                Err(e) => {
                    error!("{}", e);
                    std::process::exit(1);
                }
            };

            if !status.exists {
                println!("{}", "No automation account".yellow());
                return;
            }

            let state = if status.active { "active".green() } else { "drained".red() };
            println!("📊 Automation: {}", state);
            println!("   Balance: {:.6} SOL", lamports_to_sol(status.balance));
            println!("   Per round: {:.6} SOL", lamports_to_sol(status.cost_per_round));
            println!("   Rounds left: {}", status.estimated_rounds);

            if let Ok(balance) = ledger.get_balance(&keypair.pubkey()).await {
                println!("   Wallet: {:.6} SOL", lamports_to_sol(balance));
            }
        }
        Command::Create {
            sol_per_block,
            blocks,
            budget_percent,
        } => {
            let settings = UserSettings {
                sol_per_block,
                num_blocks: blocks,
                automation_budget_percent: budget_percent,
                ..Default::default()
            };

            match manager.create(&keypair, &settings).await {
                Ok(created) => {
                    println!(
                        "{}",
                        format!(
                            "✅ Deposited {:.4} SOL for {} rounds",
                            created.deposited_sol(),
                            created.target_rounds
                        )
                        .green()
                    );
                    println!("   Signature: {}", created.signature);
                }
                Err(e) => {
                    error!("{}", e);
                    std::process::exit(1);
                }
            }
        }
        Command::Close => match manager.close(&keypair).await {
            Ok(closed) => {
                println!(
                    "{}",
                    format!("🔒 Closed, {:.4} SOL returned", closed.returned_sol()).yellow()
                );
                println!("   Signature: {}", closed.signature);
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
    }
}
