use clap::ValueEnum;

use crate::ledger::{Transaction, UserId};

pub const DEFAULT_THRESHOLD: f64 = 100.0;
pub const DEFAULT_RATE: f64 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CashbackRule {
    pub threshold: f64,
    pub rate: f64,
}

impl CashbackRule {
    /// Strictly above the threshold; NaN never qualifies.
    pub fn qualifies(&self, amount: f64) -> bool {
        amount > self.threshold
    }

    pub fn award(&self, amount: f64) -> f64 {
        amount * self.rate
    }
}

impl Default for CashbackRule {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            rate: DEFAULT_RATE,
        }
    }
}

/// How repeated cashback computations treat transactions that were already
/// rewarded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CashbackMode {
    /// Every qualifying transaction is rewarded on every call.
    Compound,
    /// A qualifying transaction is rewarded at most once.
    #[default]
    Once,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CashbackAward {
    /// Position of the rewarded transaction in the ledger log.
    pub position: usize,
    pub amount: f64,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct CashbackPlan {
    pub awards: Vec<CashbackAward>,
}

impl CashbackPlan {
    pub fn total_amount(&self) -> f64 {
        self.awards.iter().map(|a| a.amount).sum()
    }
}

pub struct CashbackEngine<'a> {
    rule: &'a CashbackRule,
    mode: CashbackMode,
}

impl<'a> CashbackEngine<'a> {
    pub fn new(rule: &'a CashbackRule, mode: CashbackMode) -> Self {
        Self { rule, mode }
    }

    /// Scans the whole log; the log carries no per-user index.
    pub fn calculate(&self, user_id: UserId, transactions: &[Transaction]) -> CashbackPlan {
        let mut awards = Vec::new();
        for (position, tx) in transactions.iter().enumerate() {
            if tx.user_id != user_id || !self.rule.qualifies(tx.amount) {
                continue;
            }
            if self.mode == CashbackMode::Once && tx.cashback_applied {
                continue;
            }
            awards.push(CashbackAward {
                position,
                amount: self.rule.award(tx.amount),
            });
        }
        CashbackPlan { awards }
    }
}
