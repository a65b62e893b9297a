use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cashback::{CashbackEngine, CashbackMode, CashbackRule};

pub type UserId = i64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("user {user_id} not found")]
    UserNotFound { user_id: UserId },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub balance: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub user_id: UserId,
    pub amount: f64,
    pub cashback_applied: bool,
}

impl Transaction {
    pub fn new(user_id: UserId, amount: f64) -> Self {
        Self {
            user_id,
            amount,
            cashback_applied: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CashbackOutcome {
    pub user: User,
    pub cashback: f64,
    pub qualifying: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CashbackPreview {
    pub user_id: UserId,
    pub cashback: f64,
    pub qualifying: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LedgerSnapshot {
    pub users: Vec<User>,
    pub transactions: Vec<Transaction>,
    pub user_count: usize,
    pub transaction_count: usize,
    pub state_root: String,
}

/// Registry and log; every method assumes the caller holds the ledger lock.
#[derive(Default)]
pub struct LedgerState {
    pub users: BTreeMap<UserId, User>,
    pub transactions: Vec<Transaction>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&mut self, username: String, email: String) -> User {
        // no deletion exists, so size + 1 never collides
        let id = self.users.len() as UserId + 1;
        let user = User {
            id,
            username,
            email,
            balance: 0.0,
        };
        self.users.insert(id, user.clone());
        debug!(user_id = id, "user created");
        user
    }

    pub fn add_transaction(&mut self, user_id: UserId, amount: f64) {
        self.transactions.push(Transaction::new(user_id, amount));
        match self.users.get_mut(&user_id) {
            Some(user) => {
                user.balance += amount;
                debug!(user_id, amount, balance = user.balance, "transaction recorded");
            }
            None => debug!(user_id, amount, "transaction recorded for unknown user"),
        }
    }

    pub fn user(&self, user_id: UserId) -> Result<&User, LedgerError> {
        self.users
            .get(&user_id)
            .ok_or(LedgerError::UserNotFound { user_id })
    }

    pub fn preview_cashback(
        &self,
        rule: &CashbackRule,
        mode: CashbackMode,
        user_id: UserId,
    ) -> Result<CashbackPreview, LedgerError> {
        self.user(user_id)?;
        let plan = CashbackEngine::new(rule, mode).calculate(user_id, &self.transactions);
        Ok(CashbackPreview {
            user_id,
            cashback: plan.total_amount(),
            qualifying: plan.awards.len(),
        })
    }

    pub fn apply_cashback(
        &mut self,
        rule: &CashbackRule,
        mode: CashbackMode,
        user_id: UserId,
    ) -> Result<CashbackOutcome, LedgerError> {
        let user = self
            .users
            .get_mut(&user_id)
            .ok_or(LedgerError::UserNotFound { user_id })?;
        let plan = CashbackEngine::new(rule, mode).calculate(user_id, &self.transactions);
        for award in &plan.awards {
            self.transactions[award.position].cashback_applied = true;
        }
        let cashback = plan.total_amount();
        user.balance += cashback;
        debug!(
            user_id,
            cashback,
            qualifying = plan.awards.len(),
            balance = user.balance,
            "cashback credited"
        );
        Ok(CashbackOutcome {
            user: user.clone(),
            cashback,
            qualifying: plan.awards.len(),
        })
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            users: self.users.values().cloned().collect(),
            transactions: self.transactions.clone(),
            user_count: self.users.len(),
            transaction_count: self.transactions.len(),
            state_root: hex::encode(compute_state_root(&self.users, &self.transactions)),
        }
    }
}

/// Shared ledger. A single lock covers both the registry and the log, and is
/// held for the whole of each operation.
pub struct Ledger {
    rule: CashbackRule,
    mode: CashbackMode,
    state: Mutex<LedgerState>,
}

impl Ledger {
    pub fn new(rule: CashbackRule, mode: CashbackMode) -> Self {
        Self {
            rule,
            mode,
            state: Mutex::new(LedgerState::new()),
        }
    }

    // operations never leave the state half-written; poisoning is ignored
    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user(&self, username: impl Into<String>, email: impl Into<String>) -> User {
        self.state().add_user(username.into(), email.into())
    }

    pub fn add_transaction(&self, user_id: UserId, amount: f64) {
        self.state().add_transaction(user_id, amount)
    }

    pub fn compute_cashback(&self, user_id: UserId) -> Result<CashbackOutcome, LedgerError> {
        self.state().apply_cashback(&self.rule, self.mode, user_id)
    }

    pub fn preview_cashback(&self, user_id: UserId) -> Result<CashbackPreview, LedgerError> {
        self.state().preview_cashback(&self.rule, self.mode, user_id)
    }

    pub fn user(&self, user_id: UserId) -> Result<User, LedgerError> {
        self.state().user(user_id).cloned()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.state().snapshot()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(CashbackRule::default(), CashbackMode::default())
    }
}

fn compute_state_root(users: &BTreeMap<UserId, User>, transactions: &[Transaction]) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::with_capacity(users.len() + transactions.len());
    for (id, user) in users {
        let mut hasher = Sha256::new();
        hasher.update(b"user");
        hasher.update(id.to_le_bytes());
        hasher.update((user.username.len() as u64).to_le_bytes());
        hasher.update(user.username.as_bytes());
        hasher.update((user.email.len() as u64).to_le_bytes());
        hasher.update(user.email.as_bytes());
        hasher.update(user.balance.to_bits().to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (position, tx) in transactions.iter().enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(b"tx");
        hasher.update((position as u64).to_le_bytes());
        hasher.update(tx.user_id.to_le_bytes());
        hasher.update(tx.amount.to_bits().to_le_bytes());
        hasher.update([tx.cashback_applied as u8]);
        leaves.push(hasher.finalize().into());
    }
    build_tree(leaves)
}

fn build_tree(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"cashback-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            // odd node out is paired with itself
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
