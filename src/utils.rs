use crate::error::{BotError, Result};
use solana_sdk::signature::{read_keypair_file, Keypair};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

pub fn sol_to_lamports(sol: f64) -> u64 {
    if !sol.is_finite() || sol <= 0.0 {
        return 0;
    }
    (sol * LAMPORTS_PER_SOL as f64).round() as u64
}

/// Raw ORE amount to whole ORE.
pub fn ore_to_ui(amount: u64) -> f64 {
    amount as f64 / 10f64.powi(ore_api::consts::TOKEN_DECIMALS as i32)
}

/// Decode a keypair from base58 text or a JSON byte array.
pub fn keypair_from_str(encoded: &str) -> Result<Keypair> {
    let trimmed = encoded.trim();
    let bytes: Vec<u8> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        bs58::decode(trimmed)
            .into_vec()
            .map_err(|e| BotError::Config(format!("Failed to decode base58 keypair: {}", e)))?
    };
    Keypair::from_bytes(&bytes)
        .map_err(|e| BotError::Config(format!("Failed to create keypair from bytes: {}", e)))
}

/// Load keypair from KEYPAIR_B58, KEYPAIR_JSON, or a keypair file
pub fn load_keypair(keypair_path: &str) -> Result<Keypair> {
    if let Ok(keypair_b58) = std::env::var("KEYPAIR_B58") {
        return keypair_from_str(&keypair_b58);
    }

    if let Ok(keypair_json) = std::env::var("KEYPAIR_JSON") {
        return keypair_from_str(&keypair_json);
    }

    read_keypair_file(keypair_path).map_err(|e| {
        BotError::Config(format!("Failed to read keypair file '{}': {}", keypair_path, e))
    })
}

/// Rate limiter for RPC calls
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(calls_per_second: u32) -> Self {
        Self {
            min_interval: Duration::from_millis(1000 / calls_per_second.max(1) as u64),
            last_call: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        // Holding the lock while sleeping queues callers in arrival order.
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
