//! Algebraic hash oracles used throughout the state tree.
//!
//! Every leaf and internal node hash in the engine goes through one of the
//! fixed-arity functions here rather than through a generic variable-length
//! hash: `state.py`'s `Account.hash()`, `BalanceLeaf.hash()`, and
//! `StorageLeaf.hash()` each call a specific Poseidon instantiation for
//! their own input count, and the 4-ary sparse Merkle tree internal node
//! uses a fourth, independently-parameterized instantiation. `HashOracle`
//! exists so the legacy MiMC oracle and Poseidon share one interface for
//! testing and historical replay, even though only Poseidon is wired into
//! `dex-state`.

mod mimc;
mod poseidon;

pub use mimc::Mimc7;
pub use poseidon::PoseidonParams;

use dex_field::Field;
use std::sync::OnceLock;

/// A fixed-input-count algebraic hash function over the scalar field.
pub trait HashOracle {
    /// Number of field elements this instance accepts.
    fn arity(&self) -> usize;
    fn hash(&self, inputs: &[Field]) -> Field;
}

impl HashOracle for PoseidonParams {
    fn arity(&self) -> usize {
        self.width()
    }

    fn hash(&self, inputs: &[Field]) -> Field {
        PoseidonParams::hash(self, inputs)
    }
}

fn storage_params() -> &'static PoseidonParams {
    static P: OnceLock<PoseidonParams> = OnceLock::new();
    P.get_or_init(PoseidonParams::storage)
}

fn balance_params() -> &'static PoseidonParams {
    static P: OnceLock<PoseidonParams> = OnceLock::new();
    P.get_or_init(PoseidonParams::balance)
}

fn account_params() -> &'static PoseidonParams {
    static P: OnceLock<PoseidonParams> = OnceLock::new();
    P.get_or_init(PoseidonParams::account)
}

fn node4_params() -> &'static PoseidonParams {
    static P: OnceLock<PoseidonParams> = OnceLock::new();
    P.get_or_init(PoseidonParams::node4)
}

/// `H_storage(data, storageID) : F^2 -> F`.
pub fn hash_storage(data: Field, storage_id: Field) -> Field {
    storage_params().hash(&[data, storage_id])
}

/// `H_balance(balance, weightAMM, storageRoot) : F^3 -> F`.
pub fn hash_balance(balance: Field, weight_amm: Field, storage_root: Field) -> Field {
    balance_params().hash(&[balance, weight_amm, storage_root])
}

/// `H_account(owner, publicKeyX, publicKeyY, nonce, feeBipsAMM, balancesRoot) : F^6 -> F`.
pub fn hash_account(
    owner: Field,
    public_key_x: Field,
    public_key_y: Field,
    nonce: Field,
    fee_bips_amm: Field,
    balances_root: Field,
) -> Field {
    account_params().hash(&[
        owner,
        public_key_x,
        public_key_y,
        nonce,
        fee_bips_amm,
        balances_root,
    ])
}

/// Internal node hash of the fan-out-4 sparse Merkle tree, `F^4 -> F`.
pub fn hash_node4(children: &[Field]) -> Field {
    node4_params().hash(children)
}
