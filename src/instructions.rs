use solana_sdk::{instruction::Instruction, pubkey::Pubkey};

/// Squares on the ORE board.
pub const BOARD_SQUARES: usize = 25;

/// Random strategy: the program picks `unit_mask` squares each round.
const STRATEGY_RANDOM: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutomateParams {
    pub owner: Pubkey,
    pub executor: Pubkey,
    /// Lamports per unit per round
    pub deposit_per_unit: u64,
    /// Lamports moved from the wallet into the automation account
    pub deposit: u64,
    pub fee_per_execution: u64,
    /// Units per round
    pub unit_mask: u64,
    pub reload: bool,
}

/// Builds protocol instructions. Implementations are pure.
pub trait InstructionBuilder: Send + Sync {
    fn automate(&self, params: &AutomateParams) -> Instruction;

    fn close_automation(&self, owner: Pubkey) -> Instruction;

    fn checkpoint(&self, executor: Pubkey, owner: Pubkey, round_id: u64) -> Instruction;

    fn execute_automation(
        &self,
        executor: Pubkey,
        owner: Pubkey,
        deposit_per_unit: u64,
        unit_mask: u64,
        round_id: u64,
    ) -> Vec<Instruction>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OreInstructions;

impl InstructionBuilder for OreInstructions {
    fn automate(&self, params: &AutomateParams) -> Instruction {
        ore_api::sdk::automate(
            params.owner,
            params.deposit_per_unit,
            params.deposit,
            params.executor,
            params.fee_per_execution,
            params.unit_mask,
            STRATEGY_RANDOM,
            params.reload,
        )
    }

    fn close_automation(&self, owner: Pubkey) -> Instruction {
        // A default executor tells the program to close the account and
        // refund its balance to the owner.
        ore_api::sdk::automate(owner, 0, 0, Pubkey::default(), 0, 0, STRATEGY_RANDOM, false)
    }

    fn checkpoint(&self, executor: Pubkey, owner: Pubkey, round_id: u64) -> Instruction {
        ore_api::sdk::checkpoint(executor, owner, round_id)
    }

    fn execute_automation(
        &self,
        executor: Pubkey,
        owner: Pubkey,
        deposit_per_unit: u64,
        unit_mask: u64,
        round_id: u64,
    ) -> Vec<Instruction> {
        vec![ore_api::sdk::deploy(
            executor,
            owner,
            deposit_per_unit,
            round_id,
            unit_squares(unit_mask),
        )]
    }
}

/// The first `count` squares. The program reselects them for random
/// strategies; this only has to be a valid selection.
pub fn unit_squares(count: u64) -> [bool; BOARD_SQUARES] {
    let mut squares = [false; BOARD_SQUARES];
    let count = (count as usize).min(BOARD_SQUARES);
    for square in squares.iter_mut().take(count) {
        *square = true;
    }
    squares
}
