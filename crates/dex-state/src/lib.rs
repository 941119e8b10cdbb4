//! Off-chain state transition and witness-generation engine for a
//! zkSNARK-secured DEX rollup.
//!
//! A [`block::BlockBuilder`] drives an ordered batch of [`tx::TxInput`]s
//! against a [`state::State`], producing a [`block::Block`] whose
//! per-transaction [`tx::TxWitness`] values are the circuit's private input
//! and whose final accounts root is the public one committed on-chain.
//! [`store`] snapshots/restores a `State` to the canonical file shape of
//! `SPEC_FULL.md` §6.3.

pub mod block;
pub mod error;
pub mod executor;
pub mod leaf;
pub mod order;
pub mod state;
pub mod store;
pub mod tx;

pub use block::{Block, BlockBuilder, BlockHeader};
pub use error::{ExecutorError, StateStoreError};
pub use executor::{execute, Context};
pub use order::{match_ring, Order};
pub use state::{State, TreeConfig};
pub use store::{StateSnapshot, StateStoreConfig};
pub use tx::{EddsaSignature, TxInput, TxWitness};
