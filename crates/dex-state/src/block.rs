//! Drives a sequence of transactions against a [`State`], finalizes the
//! protocol-fee and operator accounts, and assembles the block witness.
//!
//! Grounded in `original_source/.../state.py`'s top-level block loop: for
//! each transaction, call `executeTransaction`, then at the end of the
//! block re-prove account 0 (the protocol-fee account, whose balance
//! changes accrued all block long without touching the accounts tree —
//! see [`crate::state::State::with_account_balances_only_mut`]) and bump
//! the operator account's nonce, each producing one more
//! [`crate::leaf::AccountUpdateData`] appended after the transaction list.

use crate::error::ExecutorError;
use crate::executor::{self, Context};
use crate::leaf::AccountUpdateData;
use crate::state::State;
use crate::tx::{TxInput, TxWitness};
use dex_field::Field;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Per-block header, supplied by the caller (`SPEC_FULL.md` §4.6).
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub exchange_id: u32,
    pub timestamp: u32,
    pub protocol_taker_fee_bips: u16,
    pub protocol_maker_fee_bips: u16,
    pub operator_account_id: u32,
}

/// One executed transaction: its witness alongside the input that produced
/// it. `SPEC_FULL.md` §6.2 describes the output JSON's discriminated-union
/// nesting (`{ witness, <txType>: <originalInput> }`); the exact wire shape
/// is a caller-owned concern (spec.md §1 lists "JSON serialization shapes"
/// as out of scope), so this crate keeps `input`/`witness` as plain
/// sibling fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxRecord {
    pub input: TxInput,
    pub witness: TxWitness,
}

/// The assembled block: pre-root, per-tx witnesses, post-root, and the
/// finalization records for the protocol-fee and operator accounts
/// (`SPEC_FULL.md` §6.2).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub exchange_id: u32,
    pub merkle_root_before: Field,
    pub merkle_root_after: Field,
    pub timestamp: u32,
    pub protocol_taker_fee_bips: u16,
    pub protocol_maker_fee_bips: u16,
    pub operator_account_id: u32,
    pub transactions: Vec<TxRecord>,
    pub account_update_p: AccountUpdateData,
    pub account_update_o: AccountUpdateData,
    pub block_size: usize,
    pub num_conditional_transactions: u32,
}

pub struct BlockBuilder {
    header: BlockHeader,
    transactions: Vec<TxInput>,
}

impl BlockBuilder {
    pub fn new(header: BlockHeader) -> Self {
        Self {
            header,
            transactions: Vec::new(),
        }
    }

    pub fn with_transactions(header: BlockHeader, transactions: Vec<TxInput>) -> Self {
        Self { header, transactions }
    }

    pub fn push(&mut self, tx: TxInput) -> &mut Self {
        self.transactions.push(tx);
        self
    }

    /// Execute every queued transaction against `state` in order, then
    /// finalize account 0 and the operator account. On `Err` the caller
    /// must discard `state` entirely (§5/§7: no partial commit).
    #[instrument(skip(self, state), fields(exchange_id = self.header.exchange_id, num_tx = self.transactions.len()))]
    pub fn build(self, state: &mut State) -> Result<Block, ExecutorError> {
        let merkle_root_before = state.root();
        let mut ctx = Context {
            timestamp: self.header.timestamp,
            protocol_taker_fee_bips: self.header.protocol_taker_fee_bips,
            protocol_maker_fee_bips: self.header.protocol_maker_fee_bips,
            operator_account_id: self.header.operator_account_id,
            num_conditional_transactions: 0,
        };

        let block_size = self.transactions.len();
        let mut records = Vec::with_capacity(block_size);
        for tx in self.transactions {
            let witness = executor::execute(state, &mut ctx, &tx)?;
            records.push(TxRecord { input: tx, witness });
        }

        // No-delta merkle update: the protocol-fee account's balances
        // already accrued every fee this block; this just folds its
        // current leaf into one accounts-tree proof, proved once per
        // block rather than once per transaction.
        let (account_update_p, ()) = state.with_account_mut(0, |_| {});

        // Operator account nonce bump, proving the operator authorized
        // this block.
        let (account_update_o, ()) = state.with_account_mut(self.header.operator_account_id, |leaf| {
            leaf.nonce += 1;
        });

        let merkle_root_after = state.root();
        info!(
            merkle_root_before = %merkle_root_before,
            merkle_root_after = %merkle_root_after,
            num_conditional_transactions = ctx.num_conditional_transactions,
            "block executed"
        );

        Ok(Block {
            exchange_id: self.header.exchange_id,
            merkle_root_before,
            merkle_root_after,
            timestamp: self.header.timestamp,
            protocol_taker_fee_bips: self.header.protocol_taker_fee_bips,
            protocol_maker_fee_bips: self.header.protocol_maker_fee_bips,
            operator_account_id: self.header.operator_account_id,
            transactions: records,
            account_update_p,
            account_update_o,
            block_size,
            num_conditional_transactions: ctx.num_conditional_transactions,
        })
    }
}
