//! Decoding of the on-chain accounts the executor reads.
//!
//! Automation accounts are read field by field at fixed offsets. Board,
//! treasury and miner accounts are read as their `ore_api` structs after the
//! 8 byte discriminator and reduced to the fields the executor acts on.

use crate::{
    client::LedgerClient,
    error::{BotError, Result},
};
use bytemuck::Pod;
use ore_api::state::{automation_pda, board_pda, miner_pda, treasury_pda, Board, Miner, Treasury};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Minimum automation account length: the unit mask ends at byte 112.
pub const AUTOMATION_MIN_LEN: usize = 112;

const DEPOSIT_PER_UNIT_OFFSET: usize = 8;
const REMAINING_BALANCE_OFFSET: usize = 48;
const UNIT_MASK_OFFSET: usize = 104;

const DISCRIMINATOR_LEN: usize = 8;

/// Decoded automation account of one wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationInfo {
    /// Lamports deployed per unit each round
    pub deposit_per_unit: u64,
    /// Lamports left in the account
    pub remaining_balance: u64,
    /// Units deployed per round
    pub unit_mask: u64,
    /// `deposit_per_unit * unit_mask`, saturating
    pub cost_per_round: u64,
}

impl AutomationInfo {
    /// Decode raw account data. Absent or short data means the wallet has
    /// no automation account; this never fails.
    pub fn decode(data: Option<&[u8]>) -> Option<Self> {
        let data = data?;
        if data.len() < AUTOMATION_MIN_LEN {
            return None;
        }

        let deposit_per_unit = read_u64(data, DEPOSIT_PER_UNIT_OFFSET)?;
        let remaining_balance = read_u64(data, REMAINING_BALANCE_OFFSET)?;
        let unit_mask = read_u64(data, UNIT_MASK_OFFSET)?;

        Some(Self {
            deposit_per_unit,
            remaining_balance,
            unit_mask,
            cost_per_round: deposit_per_unit.saturating_mul(unit_mask),
        })
    }

    /// Whole rounds the remaining balance still covers.
    pub fn estimated_rounds(&self) -> u64 {
        if self.cost_per_round == 0 {
            0
        } else {
            self.remaining_balance / self.cost_per_round
        }
    }

    pub fn is_active(&self) -> bool {
        self.remaining_balance > 0
    }
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset + 8)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

/// Read a `Pod` account body that follows the discriminator.
fn read_pod<T: Pod>(data: &[u8]) -> Option<T> {
    let body = data.get(DISCRIMINATOR_LEN..DISCRIMINATOR_LEN + std::mem::size_of::<T>())?;
    bytemuck::try_pod_read_unaligned::<T>(body).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    pub round_id: u64,
    pub end_slot: u64,
}

impl BoardState {
    pub fn decode(data: &[u8]) -> Option<Self> {
        let board = read_pod::<Board>(data)?;
        Some(Self {
            round_id: board.round_id,
            end_slot: board.end_slot,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryState {
    /// Raw ORE amount in the motherlode pool
    pub motherlode: u64,
}

impl TreasuryState {
    pub fn decode(data: &[u8]) -> Option<Self> {
        let treasury = read_pod::<Treasury>(data)?;
        Some(Self {
            motherlode: treasury.motherlode,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerState {
    /// Last round the miner deployed in
    pub round_id: u64,
    /// Last round whose rewards were checkpointed
    pub checkpoint_id: u64,
}

impl MinerState {
    pub fn decode(data: &[u8]) -> Option<Self> {
        let miner = read_pod::<Miner>(data)?;
        Some(Self {
            round_id: miner.round_id,
            checkpoint_id: miner.checkpoint_id,
        })
    }
}

pub async fn fetch_automation(ledger: &dyn LedgerClient, owner: &Pubkey) -> Result<Option<AutomationInfo>> {
    let (address, _) = automation_pda(*owner);
    let data = ledger.get_account_data(&address).await?;
    Ok(AutomationInfo::decode(data.as_deref()))
}

pub async fn fetch_board(ledger: &dyn LedgerClient) -> Result<BoardState> {
    let (address, _) = board_pda();
    let data = ledger
        .get_account_data(&address)
        .await?
        .ok_or_else(|| BotError::AccountNotFound(format!("board {}", address)))?;
    BoardState::decode(&data)
        .ok_or_else(|| BotError::Serialization("Failed to deserialize Board".to_string()))
}

pub async fn fetch_treasury(ledger: &dyn LedgerClient) -> Result<TreasuryState> {
    let (address, _) = treasury_pda();
    let data = ledger
        .get_account_data(&address)
        .await?
        .ok_or_else(|| BotError::AccountNotFound(format!("treasury {}", address)))?;
    TreasuryState::decode(&data)
        .ok_or_else(|| BotError::Serialization("Failed to deserialize Treasury".to_string()))
}

/// `None` when the wallet has never deployed.
pub async fn fetch_miner(ledger: &dyn LedgerClient, owner: &Pubkey) -> Result<Option<MinerState>> {
    let (address, _) = miner_pda(*owner);
    match ledger.get_account_data(&address).await? {
        Some(data) => MinerState::decode(&data)
            .map(Some)
            .ok_or_else(|| BotError::Serialization("Failed to deserialize Miner".to_string())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn automation_bytes(deposit: u64, balance: u64, mask: u64, len: usize) -> Vec<u8> {
        let mut data = vec![0xAB; len.max(AUTOMATION_MIN_LEN)];
        data[DEPOSIT_PER_UNIT_OFFSET..DEPOSIT_PER_UNIT_OFFSET + 8].copy_from_slice(&deposit.to_le_bytes());
        data[REMAINING_BALANCE_OFFSET..REMAINING_BALANCE_OFFSET + 8].copy_from_slice(&balance.to_le_bytes());
        data[UNIT_MASK_OFFSET..UNIT_MASK_OFFSET + 8].copy_from_slice(&mask.to_le_bytes());
        data.truncate(len);
        data
    }

    #[test]
    fn test_decode_reads_fixed_offsets() {
        let data = automation_bytes(1_000_000, 50_000_000, 25, 120);
        let info = AutomationInfo::decode(Some(&data)).unwrap();

        assert_eq!(info.deposit_per_unit, 1_000_000);
        assert_eq!(info.remaining_balance, 50_000_000);
        assert_eq!(info.unit_mask, 25);
        assert_eq!(info.cost_per_round, 25_000_000);
        assert_eq!(info.estimated_rounds(), 2);
    }

    #[test]
    fn test_decode_is_deterministic_and_cost_is_product() {
        for (deposit, mask) in [(0, 0), (1, 1), (7_500, 3), (u64::MAX, 2)] {
            let data = automation_bytes(deposit, 42, mask, AUTOMATION_MIN_LEN);
            let first = AutomationInfo::decode(Some(&data)).unwrap();
            let second = AutomationInfo::decode(Some(&data)).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.cost_per_round, deposit.saturating_mul(mask));
        }
    }

    #[test]
    fn test_short_or_absent_buffer_is_missing_account() {
        assert!(AutomationInfo::decode(None).is_none());
        assert!(AutomationInfo::decode(Some(&[])).is_none());
        let short = automation_bytes(1, 1, 1, AUTOMATION_MIN_LEN - 1);
        assert!(AutomationInfo::decode(Some(&short)).is_none());
    }

    #[test]
    fn test_drained_account_exists_but_is_inactive() {
        let data = automation_bytes(1_000, 0, 5, AUTOMATION_MIN_LEN);
        let info = AutomationInfo::decode(Some(&data)).unwrap();
        assert!(!info.is_active());
        assert_eq!(info.estimated_rounds(), 0);
    }

    #[test]
    fn test_zero_cost_has_no_estimated_rounds() {
        let data = automation_bytes(0, 1_000, 0, AUTOMATION_MIN_LEN);
        let info = AutomationInfo::decode(Some(&data)).unwrap();
        assert_eq!(info.estimated_rounds(), 0);
    }

    #[test]
    fn test_board_decode_skips_discriminator() {
        let mut board: Board = bytemuck::Zeroable::zeroed();
        board.round_id = 42;
        board.end_slot = 9_000;
        let mut data = vec![0u8; DISCRIMINATOR_LEN];
        data.extend_from_slice(bytemuck::bytes_of(&board));

        let state = BoardState::decode(&data).unwrap();
        assert_eq!(state.round_id, 42);
        assert_eq!(state.end_slot, 9_000);
        assert!(BoardState::decode(&data[..data.len() - 1]).is_none());
    }
}
