//! The three nested leaf types and the update primitives that mutate them.
//!
//! Each leaf owns both a sparse Merkle subtree (for hashes and proofs) and a
//! sparse map of the actual materialized values (for reads and snapshotting).
//! This mirrors `state.py`'s split between `Account._balancesTree` (hashes)
//! and `Account._balances` (`BalanceLeaf` objects) — the SMT alone can't
//! answer "what is account 9's balance of token 3", since it only stores
//! hashes.

use dex_field::Field;
use dex_hash::hash_node4;
use dex_merkle::SparseMerkleTree;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn capacity(tree: &SparseMerkleTree) -> u128 {
    (tree.fanout() as u128).pow(tree.depth())
}

/// `(data, storageID)`, hashed as `H_storage(data, storageID)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLeaf {
    pub data: u128,
    pub storage_id: u128,
}

impl StorageLeaf {
    pub fn hash(&self) -> Field {
        dex_hash::hash_storage(Field::from_u128(self.data), Field::from_u128(self.storage_id))
    }
}

/// The sibling path and before/after values produced by a single storage
/// slot write, in the shape the witness carries it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageUpdateData {
    pub storage_id: u128,
    pub sibling_path: Vec<Field>,
    pub root_before: Field,
    pub root_after: Field,
    pub leaf_before: StorageLeaf,
    pub leaf_after: StorageLeaf,
}

pub struct BalanceLeaf {
    pub balance: u128,
    pub weight_amm: u128,
    storage: HashMap<u128, StorageLeaf>,
    storage_tree: SparseMerkleTree,
}

impl BalanceLeaf {
    pub fn new(store_levels: u32) -> Self {
        Self {
            balance: 0,
            weight_amm: 0,
            storage: HashMap::new(),
            storage_tree: SparseMerkleTree::new(store_levels, 4, StorageLeaf::default().hash(), hash_node4),
        }
    }

    pub fn hash(&self) -> Field {
        dex_hash::hash_balance(
            Field::from_u128(self.balance),
            Field::from_u128(self.weight_amm),
            self.storage_tree.root(),
        )
    }

    pub fn storage_root(&self) -> Field {
        self.storage_tree.root()
    }

    pub fn materialized_storage(&self) -> &HashMap<u128, StorageLeaf> {
        &self.storage
    }

    /// Storage-slot-trimmed read: a slot's `data` only counts if its stored
    /// `storageID` matches exactly; any other occupant (including a
    /// never-written default leaf) reads as the zero leaf.
    pub fn get_storage(&self, storage_id: u128) -> StorageLeaf {
        let slot = storage_id % capacity(&self.storage_tree);
        match self.storage.get(&slot) {
            Some(leaf) if leaf.storage_id == storage_id => *leaf,
            _ => StorageLeaf::default(),
        }
    }

    /// Overwrite the slot addressed by `storage_id`'s low bits with
    /// `(data, storage_id)`, regardless of what (if anything) previously
    /// occupied it.
    pub fn update_storage(&mut self, storage_id: u128, data: u128) -> StorageUpdateData {
        let slot = storage_id % capacity(&self.storage_tree);
        let leaf_before = self.storage.get(&slot).copied().unwrap_or_default();
        let root_before = self.storage_tree.root();
        let sibling_path = self
            .storage_tree
            .create_proof(slot)
            .expect("storage slot is derived modulo tree capacity");

        let leaf_after = StorageLeaf { data, storage_id };
        self.storage_tree
            .update(slot, leaf_after.hash())
            .expect("storage slot is derived modulo tree capacity");
        self.storage.insert(slot, leaf_after);
        let root_after = self.storage_tree.root();

        StorageUpdateData {
            storage_id,
            sibling_path,
            root_before,
            root_after,
            leaf_before,
            leaf_after,
        }
    }
}

/// Balance value snapshot as it appears in a `BalanceUpdateData`'s
/// before/after fields — the subtree root stands in for the whole storage
/// subtree, matching what the circuit actually consumes.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct BalanceLeafValue {
    pub balance: u128,
    pub weight_amm: u128,
    pub storage_root: Field,
}

impl From<&BalanceLeaf> for BalanceLeafValue {
    fn from(leaf: &BalanceLeaf) -> Self {
        Self {
            balance: leaf.balance,
            weight_amm: leaf.weight_amm,
            storage_root: leaf.storage_root(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BalanceUpdateData {
    pub token_id: u32,
    pub sibling_path: Vec<Field>,
    pub root_before: Field,
    pub root_after: Field,
    pub leaf_before: BalanceLeafValue,
    pub leaf_after: BalanceLeafValue,
}

pub struct AccountLeaf {
    pub owner: Field,
    pub pub_key_x: Field,
    pub pub_key_y: Field,
    pub nonce: u32,
    pub fee_bips_amm: u8,
    balances: HashMap<u32, BalanceLeaf>,
    balances_tree: SparseMerkleTree,
    store_levels: u32,
}

/// Saturating cap from the data model: `balance <= 2^96 - 1`.
pub const MAX_BALANCE: u128 = (1u128 << 96) - 1;

impl AccountLeaf {
    pub fn new(tok_levels: u32, store_levels: u32) -> Self {
        let default_balance_hash = BalanceLeaf::new(store_levels).hash();
        Self {
            owner: Field::zero(),
            pub_key_x: Field::zero(),
            pub_key_y: Field::zero(),
            nonce: 0,
            fee_bips_amm: 0,
            balances: HashMap::new(),
            balances_tree: SparseMerkleTree::new(tok_levels, 4, default_balance_hash, hash_node4),
            store_levels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_zero()
    }

    pub fn hash(&self) -> Field {
        dex_hash::hash_account(
            self.owner,
            self.pub_key_x,
            self.pub_key_y,
            Field::from_u64(self.nonce as u64),
            Field::from_u64(self.fee_bips_amm as u64),
            self.balances_tree.root(),
        )
    }

    pub fn balances_root(&self) -> Field {
        self.balances_tree.root()
    }

    pub fn materialized_balances(&self) -> &HashMap<u32, BalanceLeaf> {
        &self.balances
    }

    fn balance_or_default(&self, token_id: u32) -> BalanceLeaf {
        match self.balances.get(&token_id) {
            Some(leaf) => BalanceLeaf {
                balance: leaf.balance,
                weight_amm: leaf.weight_amm,
                storage: leaf.storage.clone(),
                storage_tree: SparseMerkleTree::from_parts(
                    leaf.storage_tree.depth(),
                    leaf.storage_tree.fanout(),
                    StorageLeaf::default().hash(),
                    hash_node4,
                    leaf.storage_tree.root(),
                    leaf.storage_tree.nodes().clone(),
                ),
            },
            None => BalanceLeaf::new(self.store_levels),
        }
    }

    pub fn balance(&self, token_id: u32) -> u128 {
        self.balances.get(&token_id).map(|l| l.balance).unwrap_or(0)
    }

    pub fn get_storage(&self, token_id: u32, storage_id: u128) -> StorageLeaf {
        self.balance_or_default(token_id).get_storage(storage_id)
    }

    /// Saturating delta on `balance`, optional `weightAMM` replacement.
    /// `delta` is signed: negative means debit and errors if it would
    /// underflow rather than saturate (you cannot spend balance you don't
    /// have), positive saturates at [`MAX_BALANCE`].
    pub fn update_balance(
        &mut self,
        token_id: u32,
        delta: i128,
        weight: Option<u128>,
    ) -> Result<BalanceUpdateData, (u128, u128)> {
        let mut leaf = self.balance_or_default(token_id);
        let leaf_before = BalanceLeafValue::from(&leaf);
        let root_before = self.balances_tree.root();
        let sibling_path = self
            .balances_tree
            .create_proof(token_id as u128)
            .expect("token id is within the balances tree's key range");

        if delta < 0 {
            let needed = (-delta) as u128;
            if needed > leaf.balance {
                return Err((leaf.balance, needed));
            }
            leaf.balance -= needed;
        } else {
            leaf.balance = leaf.balance.saturating_add(delta as u128).min(MAX_BALANCE);
        }
        if let Some(w) = weight {
            leaf.weight_amm = w;
        }

        let new_hash = leaf.hash();
        self.balances_tree
            .update(token_id as u128, new_hash)
            .expect("token id is within the balances tree's key range");
        let leaf_after = BalanceLeafValue::from(&leaf);
        self.balances.insert(token_id, leaf);
        let root_after = self.balances_tree.root();

        Ok(BalanceUpdateData {
            token_id,
            sibling_path,
            root_before,
            root_after,
            leaf_before,
            leaf_after,
        })
    }

    /// Install a fully reconstructed balance leaf directly, bypassing the
    /// delta-based update primitives. Used only by [`crate::store`] when
    /// loading a snapshot, where the final `(balance, weightAMM, storage)`
    /// values are already known rather than derived incrementally.
    pub fn set_balance(&mut self, token_id: u32, balance_leaf: BalanceLeaf) {
        let hash = balance_leaf.hash();
        self.balances_tree
            .update(token_id as u128, hash)
            .expect("token id is within the balances tree's key range");
        self.balances.insert(token_id, balance_leaf);
    }

    /// Same as [`Self::update_balance`] but also writes a storage slot
    /// first, so the balance leaf is re-hashed against the *updated*
    /// storage root.
    pub fn update_balance_and_storage(
        &mut self,
        token_id: u32,
        storage_id: u128,
        data: u128,
        delta: i128,
        weight: Option<u128>,
    ) -> Result<(BalanceUpdateData, StorageUpdateData), (u128, u128)> {
        let mut leaf = self.balance_or_default(token_id);
        let leaf_before = BalanceLeafValue::from(&leaf);
        let root_before = self.balances_tree.root();
        let sibling_path = self
            .balances_tree
            .create_proof(token_id as u128)
            .expect("token id is within the balances tree's key range");

        let storage_update = leaf.update_storage(storage_id, data);

        if delta < 0 {
            let needed = (-delta) as u128;
            if needed > leaf.balance {
                return Err((leaf.balance, needed));
            }
            leaf.balance -= needed;
        } else {
            leaf.balance = leaf.balance.saturating_add(delta as u128).min(MAX_BALANCE);
        }
        if let Some(w) = weight {
            leaf.weight_amm = w;
        }

        let new_hash = leaf.hash();
        self.balances_tree
            .update(token_id as u128, new_hash)
            .expect("token id is within the balances tree's key range");
        let leaf_after = BalanceLeafValue::from(&leaf);
        self.balances.insert(token_id, leaf);
        let root_after = self.balances_tree.root();

        Ok((
            BalanceUpdateData {
                token_id,
                sibling_path,
                root_before,
                root_after,
                leaf_before,
                leaf_after,
            },
            storage_update,
        ))
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct AccountLeafValue {
    pub owner: Field,
    pub pub_key_x: Field,
    pub pub_key_y: Field,
    pub nonce: u32,
    pub fee_bips_amm: u8,
    pub balances_root: Field,
}

impl From<&AccountLeaf> for AccountLeafValue {
    fn from(leaf: &AccountLeaf) -> Self {
        Self {
            owner: leaf.owner,
            pub_key_x: leaf.pub_key_x,
            pub_key_y: leaf.pub_key_y,
            nonce: leaf.nonce,
            fee_bips_amm: leaf.fee_bips_amm,
            balances_root: leaf.balances_root(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountUpdateData {
    pub account_id: u32,
    pub sibling_path: Vec<Field>,
    pub root_before: Field,
    pub root_after: Field,
    pub leaf_before: AccountLeafValue,
    pub leaf_after: AccountLeafValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_storage_leaf_hashes_deterministically() {
        let a = StorageLeaf::default().hash();
        let b = StorageLeaf::default().hash();
        assert_eq!(a, b);
    }

    #[test]
    fn storage_slot_trims_on_storage_id_mismatch() {
        let mut bal = BalanceLeaf::new(4);
        bal.update_storage(3, 77);
        // same slot index (3 mod 16 == 3), different storageID reads as empty
        assert_eq!(bal.get_storage(3).data, 77);
        assert_eq!(bal.get_storage(3 + 16).data, 0);
    }

    #[test]
    fn balance_update_saturates_at_max() {
        let mut account = AccountLeaf::new(4, 4);
        account.update_balance(0, MAX_BALANCE as i128, None).unwrap();
        account.update_balance(0, 10, None).unwrap();
        assert_eq!(account.balance(0), MAX_BALANCE);
    }

    #[test]
    fn spending_more_than_balance_is_rejected() {
        let mut account = AccountLeaf::new(4, 4);
        account.update_balance(0, 100, None).unwrap();
        assert!(account.update_balance(0, -150, None).is_err());
    }

    #[test]
    fn account_hash_changes_when_balances_root_changes() {
        let mut account = AccountLeaf::new(4, 4);
        let before = account.hash();
        account.update_balance(2, 50, None).unwrap();
        assert_ne!(account.hash(), before);
    }

    #[test]
    fn update_balance_and_storage_reflects_new_storage_root_in_balance_hash() {
        let mut account = AccountLeaf::new(4, 4);
        let (update, _) = account
            .update_balance_and_storage(1, 9, 42, 5, None)
            .unwrap();
        assert_ne!(update.root_before, update.root_after);
        assert_eq!(account.balance(1), 5);
        assert_eq!(account.get_storage(1, 9).data, 42);
    }
}
