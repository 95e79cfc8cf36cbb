use crate::{
    accounts::{fetch_board, BoardState},
    client::LedgerClient,
    error::Result,
};
use colored::*;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};

const UNSET: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTransition {
    /// Round seen before this one, `None` on the first observation
    pub previous: Option<u64>,
    pub board: BoardState,
}

impl RoundTransition {
    pub fn round_id(&self) -> u64 {
        self.board.round_id
    }
}

/// Fires once per round id observed on the board, in increasing order.
#[derive(Debug)]
pub struct RoundDetector {
    last_seen: AtomicU64,
}

impl Default for RoundDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundDetector {
    pub fn new() -> Self {
        Self {
            last_seen: AtomicU64::new(UNSET),
        }
    }

    pub fn last_seen(&self) -> Option<u64> {
        match self.last_seen.load(Ordering::Acquire) {
            UNSET => None,
            round_id => Some(round_id),
        }
    }

    /// Record a board read. Returns the transition if `board.round_id` is
    /// newer than every round seen so far. Stale reads that go backwards are
    /// ignored, and concurrent observers of the same id see at most one
    /// transition between them.
    pub fn observe(&self, board: BoardState) -> Option<RoundTransition> {
        let mut previous = self.last_seen.load(Ordering::Acquire);
        loop {
            if previous != UNSET && board.round_id <= previous {
                if board.round_id < previous {
                    warn!("Stale board read: round {} after round {}, ignoring", board.round_id, previous);
                }
                return None;
            }

            match self
                .last_seen
                .compare_exchange_weak(previous, board.round_id, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => previous = actual,
            }
        }

        Some(RoundTransition {
            previous: (previous != UNSET).then_some(previous),
            board,
        })
    }

    pub async fn poll(&self, ledger: &dyn LedgerClient) -> Result<Option<RoundTransition>> {
        let board = fetch_board(ledger).await?;
        let transition = self.observe(board);

        match &transition {
            Some(RoundTransition { previous: Some(prev), board }) => info!(
                "{}",
                format!("🎲 New round started: {} → {}", prev, board.round_id).cyan()
            ),
            Some(RoundTransition { previous: None, board }) => {
                info!("📊 Current round: {}", board.round_id)
            }
            None => debug!("Round {} unchanged", board.round_id),
        }

        Ok(transition)
    }
}
