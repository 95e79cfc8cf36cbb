#![allow(dead_code)]

use async_trait::async_trait;
use bytemuck::{Pod, Zeroable};
use orb_autominer::{
    accounts::{AutomationInfo, MinerState, AUTOMATION_MIN_LEN},
    automation::AutomationManager,
    client::LedgerClient,
    config::{AutomationConfig, ExecutorConfig},
    error::{BotError, Result},
    executor::AutomationExecutor,
    instructions::{AutomateParams, InstructionBuilder},
    notify::Notifier,
    store::{MemoryStore, UserId},
};
use ore_api::state::{automation_pda, board_pda, miner_pda, treasury_pda, Board, Miner, Treasury};
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// One ORE in raw token units.
pub const ONE_ORE: u64 = 100_000_000_000;

/// Program id of the instructions built by `FakeInstructions`.
pub const FAKE_PROGRAM: Pubkey = Pubkey::new_from_array([7u8; 32]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Automate,
    Close,
    Checkpoint,
    Deploy,
}

impl Op {
    fn tag(self) -> u8 {
        match self {
            Op::Automate => 1,
            Op::Close => 2,
            Op::Checkpoint => 3,
            Op::Deploy => 4,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Op::Automate),
            2 => Some(Op::Close),
            3 => Some(Op::Checkpoint),
            4 => Some(Op::Deploy),
            _ => None,
        }
    }
}

fn fake_ix(op: Op, owner: Pubkey, args: &[u64]) -> Instruction {
    let mut data = vec![op.tag()];
    for arg in args {
        data.extend_from_slice(&arg.to_le_bytes());
    }
    Instruction {
        program_id: FAKE_PROGRAM,
        accounts: vec![AccountMeta::new(owner, true)],
        data,
    }
}

fn arg(data: &[u8], index: usize) -> u64 {
    let start = 1 + index * 8;
    u64::from_le_bytes(data[start..start + 8].try_into().unwrap())
}

/// Instructions the mock ledger understands.
#[derive(Default)]
pub struct FakeInstructions;

impl InstructionBuilder for FakeInstructions {
    fn automate(&self, params: &AutomateParams) -> Instruction {
        fake_ix(
            Op::Automate,
            params.owner,
            &[params.deposit_per_unit, params.deposit, params.unit_mask],
        )
    }

    fn close_automation(&self, owner: Pubkey) -> Instruction {
        fake_ix(Op::Close, owner, &[])
    }

    fn checkpoint(&self, _executor: Pubkey, owner: Pubkey, round_id: u64) -> Instruction {
        fake_ix(Op::Checkpoint, owner, &[round_id])
    }

    fn execute_automation(
        &self,
        _executor: Pubkey,
        owner: Pubkey,
        _deposit_per_unit: u64,
        _unit_mask: u64,
        round_id: u64,
    ) -> Vec<Instruction> {
        vec![fake_ix(Op::Deploy, owner, &[round_id])]
    }
}

#[derive(Debug, Clone, Copy)]
struct FakeAutomation {
    deposit_per_unit: u64,
    balance: u64,
    mask: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub op: Op,
    pub owner: Pubkey,
    pub ok: bool,
}

#[derive(Default)]
struct LedgerState {
    round_id: u64,
    end_slot: u64,
    slot: u64,
    motherlode: u64,
    /// Keyed by owner
    automations: HashMap<Pubkey, FakeAutomation>,
    /// Keyed by owner: (round_id, checkpoint_id)
    miners: HashMap<Pubkey, (u64, u64)>,
    wallets: HashMap<Pubkey, u64>,
    attempts: Vec<Attempt>,
    send_failures: HashMap<(Op, Option<Pubkey>), String>,
    read_failures: HashSet<Pubkey>,
    panic_on_send: HashSet<Pubkey>,
    hang_on_send: HashSet<(Op, Pubkey)>,
}

fn pod_account<T: Pod>(value: &T) -> Vec<u8> {
    let mut data = vec![0u8; 8];
    data.extend_from_slice(bytemuck::bytes_of(value));
    data
}

fn automation_account(automation: &FakeAutomation) -> Vec<u8> {
    let mut data = vec![0u8; AUTOMATION_MIN_LEN];
    data[8..16].copy_from_slice(&automation.deposit_per_unit.to_le_bytes());
    data[48..56].copy_from_slice(&automation.balance.to_le_bytes());
    data[104..112].copy_from_slice(&automation.mask.to_le_bytes());
    data
}

/// In-memory chain. Transactions built by `FakeInstructions` take effect
/// as soon as they are sent.
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl MockLedger {
    pub fn new(round_id: u64) -> Self {
        let ledger = Self::default();
        ledger.set_round(round_id, 1_000);
        ledger.set_motherlode(100 * ONE_ORE);
        ledger
    }

    pub fn set_round(&self, round_id: u64, end_slot: u64) {
        let mut state = self.state.lock().unwrap();
        state.round_id = round_id;
        state.end_slot = end_slot;
    }

    pub fn set_slot(&self, slot: u64) {
        self.state.lock().unwrap().slot = slot;
    }

    pub fn set_motherlode(&self, raw: u64) {
        self.state.lock().unwrap().motherlode = raw;
    }

    pub fn set_automation(&self, owner: Pubkey, deposit_per_unit: u64, balance: u64, mask: u64) {
        self.state.lock().unwrap().automations.insert(
            owner,
            FakeAutomation {
                deposit_per_unit,
                balance,
                mask,
            },
        );
    }

    pub fn set_miner(&self, owner: Pubkey, round_id: u64, checkpoint_id: u64) {
        self.state
            .lock()
            .unwrap()
            .miners
            .insert(owner, (round_id, checkpoint_id));
    }

    pub fn set_wallet(&self, owner: Pubkey, lamports: u64) {
        self.state.lock().unwrap().wallets.insert(owner, lamports);
    }

    /// Fail sends of `op`, for one owner or for everyone.
    pub fn fail_send(&self, op: Op, owner: Option<Pubkey>, message: &str) {
        self.state
            .lock()
            .unwrap()
            .send_failures
            .insert((op, owner), message.to_string());
    }

    /// Panic inside any send signed for `owner`.
    pub fn panic_on_send(&self, owner: Pubkey) {
        self.state.lock().unwrap().panic_on_send.insert(owner);
    }

    /// Never return from sends of `op` signed for `owner`.
    pub fn hang_on_send(&self, op: Op, owner: Pubkey) {
        self.state.lock().unwrap().hang_on_send.insert((op, owner));
    }

    pub fn fail_reads(&self, address: Pubkey) {
        self.state.lock().unwrap().read_failures.insert(address);
    }

    pub fn heal_reads(&self) {
        self.state.lock().unwrap().read_failures.clear();
    }

    pub fn automation(&self, owner: &Pubkey) -> Option<AutomationInfo> {
        let data = self
            .state
            .lock()
            .unwrap()
            .automations
            .get(owner)
            .map(automation_account);
        AutomationInfo::decode(data.as_deref())
    }

    pub fn miner(&self, owner: &Pubkey) -> Option<MinerState> {
        self.state
            .lock()
            .unwrap()
            .miners
            .get(owner)
            .map(|&(round_id, checkpoint_id)| MinerState { round_id, checkpoint_id })
    }

    pub fn wallet(&self, owner: &Pubkey) -> u64 {
        self.state.lock().unwrap().wallets.get(owner).copied().unwrap_or(0)
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// Ops attempted for `owner`, in order.
    pub fn ops_for(&self, owner: &Pubkey) -> Vec<Op> {
        self.attempts()
            .into_iter()
            .filter(|a| a.owner == *owner)
            .map(|a| a.op)
            .collect()
    }

    fn apply(state: &mut LedgerState, op: Op, owner: Pubkey, data: &[u8]) {
        match op {
            Op::Automate => {
                let deposit = arg(data, 1);
                state.automations.insert(
                    owner,
                    FakeAutomation {
                        deposit_per_unit: arg(data, 0),
                        balance: deposit,
                        mask: arg(data, 2),
                    },
                );
                let wallet = state.wallets.entry(owner).or_default();
                *wallet = wallet.saturating_sub(deposit);
            }
            Op::Close => {
                if let Some(automation) = state.automations.remove(&owner) {
                    *state.wallets.entry(owner).or_default() += automation.balance;
                }
            }
            Op::Checkpoint => {
                let round_id = arg(data, 0);
                if let Some(miner) = state.miners.get_mut(&owner) {
                    miner.1 = round_id;
                }
            }
            Op::Deploy => {
                let round_id = arg(data, 0);
                if let Some(automation) = state.automations.get_mut(&owner) {
                    let cost = automation.deposit_per_unit * automation.mask;
                    automation.balance = automation.balance.saturating_sub(cost);
                }
                let miner = state.miners.entry(owner).or_insert((round_id, round_id));
                miner.0 = round_id;
            }
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock().unwrap();
        if state.read_failures.contains(address) {
            return Err(BotError::RpcTimeout(format!("read of {}", address)));
        }

        if *address == board_pda().0 {
            let mut board = Board::zeroed();
            board.round_id = state.round_id;
            board.end_slot = state.end_slot;
            return Ok(Some(pod_account(&board)));
        }
        if *address == treasury_pda().0 {
            let mut treasury = Treasury::zeroed();
            treasury.motherlode = state.motherlode;
            return Ok(Some(pod_account(&treasury)));
        }

        for (owner, automation) in &state.automations {
            if *address == automation_pda(*owner).0 {
                return Ok(Some(automation_account(automation)));
            }
        }
        for (owner, &(round_id, checkpoint_id)) in &state.miners {
            if *address == miner_pda(*owner).0 {
                let mut miner = Miner::zeroed();
                miner.round_id = round_id;
                miner.checkpoint_id = checkpoint_id;
                return Ok(Some(pod_account(&miner)));
            }
        }

        Ok(None)
    }

    async fn get_slot(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().slot)
    }

    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64> {
        Ok(self.wallet(pubkey))
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        Ok(Hash::default())
    }

    async fn send_transaction(&self, instructions: &[Instruction], _signer: &Keypair) -> Result<Signature> {
        let hangs = {
            let state = self.state.lock().unwrap();
            instructions
                .iter()
                .filter(|ix| ix.program_id == FAKE_PROGRAM)
                .filter_map(|ix| Op::from_tag(ix.data[0]).map(|op| (op, ix.accounts[0].pubkey)))
                .any(|key| state.hang_on_send.contains(&key))
        };
        if hangs {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();

        for ix in instructions.iter().filter(|ix| ix.program_id == FAKE_PROGRAM) {
            let op = Op::from_tag(ix.data[0]).expect("unknown fake instruction");
            let owner = ix.accounts[0].pubkey;

            if state.panic_on_send.contains(&owner) {
                drop(state);
                panic!("send for {} blew up", owner);
            }

            let failure = state
                .send_failures
                .get(&(op, Some(owner)))
                .or_else(|| state.send_failures.get(&(op, None)))
                .cloned();
            state.attempts.push(Attempt {
                op,
                owner,
                ok: failure.is_none(),
            });
            if let Some(message) = failure {
                return Err(BotError::TransactionFailed(message));
            }

            Self::apply(&mut state, op, owner, &ix.data);
        }

        Ok(Signature::new_unique())
    }

    async fn confirm_transaction(&self, _signature: &Signature) -> Result<()> {
        Ok(())
    }
}

/// Keeps every message instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(UserId, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(UserId, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user: UserId, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push((user, message.to_string()));
        Ok(())
    }
}

pub fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        poll_interval_secs: 1,
        user_delay_ms: 0,
        restart_settle_ms: 0,
        user_timeout_secs: 5,
        max_concurrent_users: 1,
        restart_backoff_rounds: 3,
    }
}

pub fn manager(ledger: &Arc<MockLedger>) -> AutomationManager {
    AutomationManager::new(ledger.clone(), Arc::new(FakeInstructions), AutomationConfig::default())
}

pub struct Harness {
    pub ledger: Arc<MockLedger>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub executor: Arc<AutomationExecutor>,
}

impl Harness {
    pub fn new(round_id: u64, config: ExecutorConfig) -> Self {
        let ledger = Arc::new(MockLedger::new(round_id));
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let executor = Arc::new(AutomationExecutor::new(
            ledger.clone(),
            Arc::new(FakeInstructions),
            manager(&ledger),
            store.clone(),
            notifier.clone(),
            config,
        ));

        Self {
            ledger,
            store,
            notifier,
            executor,
        }
    }

    /// Register a user and return their wallet address.
    pub async fn add_user(&self, user: UserId) -> Pubkey {
        let keypair = Keypair::new();
        let pubkey = solana_sdk::signer::Signer::pubkey(&keypair);
        self.store.add_user(user, keypair, None).await;
        pubkey
    }
}
