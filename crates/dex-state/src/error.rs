//! Error categories for the executor and snapshot I/O.
//!
//! Kept as two distinct enums so a snapshot failure can never be confused
//! with a reason a block was rejected. `SpotTrade` precondition violations
//! are deliberately *not* represented here — they are absorbed into a
//! [`crate::order::RingFillResult`] with `valid: false` and zeroed fills,
//! matching the "the circuit must still prove the no-op" design note.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error(
        "account {account_id} has insufficient balance of token {token_id}: has {available}, needs {needed}"
    )]
    InsufficientBalance {
        account_id: u32,
        token_id: u32,
        available: u128,
        needed: u128,
    },

    #[error("transaction valid_until {valid_until} has already passed at timestamp {timestamp}")]
    Expired { valid_until: u32, timestamp: u32 },

    #[error("fee {fee} exceeds the caller-supplied max fee {max_fee}")]
    FeeExceedsMax { fee: u128, max_fee: u128 },

    #[error("float encoding rejected amount: {0}")]
    Float(#[from] dex_float::FloatError),

    #[error("merkle key out of range: {0}")]
    Merkle(#[from] dex_merkle::MerkleError),
}

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot at {path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot node hash {hash:?} is not a valid field element: {source}")]
    CorruptNodeHash {
        hash: String,
        #[source]
        source: dex_field::FieldError,
    },
}
