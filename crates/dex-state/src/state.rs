//! The accounts tree and the whole-state root it implies.

use crate::leaf::{AccountLeaf, AccountLeafValue, AccountUpdateData, StorageLeaf};
use dex_field::Field;
use dex_hash::hash_node4;
use dex_merkle::SparseMerkleTree;
use std::collections::HashMap;

/// Tree depths, expressed in 4-ary levels (half the binary bit-depth, since
/// each level consumes a 2-bit digit). Defaults match the "current
/// recommended configuration": `D_store = 14`, `D_tok = 16`, `D_acc = 32`
/// binary bits.
#[derive(Copy, Clone, Debug)]
pub struct TreeConfig {
    pub store_levels: u32,
    pub tok_levels: u32,
    pub acc_levels: u32,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            store_levels: 7,
            tok_levels: 8,
            acc_levels: 16,
        }
    }
}

pub struct State {
    pub exchange_id: u32,
    accounts: HashMap<u32, AccountLeaf>,
    accounts_tree: SparseMerkleTree,
    config: TreeConfig,
}

impl State {
    pub fn new(exchange_id: u32, config: TreeConfig) -> Self {
        let default_account_hash = AccountLeaf::new(config.tok_levels, config.store_levels).hash();
        Self {
            exchange_id,
            accounts: HashMap::new(),
            accounts_tree: SparseMerkleTree::new(config.acc_levels, 4, default_account_hash, hash_node4),
            config,
        }
    }

    pub fn config(&self) -> TreeConfig {
        self.config
    }

    /// Rebuild a `State` from a snapshot: the accounts tree's raw
    /// content-addressed node table and root are restored directly (they
    /// were dumped verbatim by [`crate::store`]), while each account leaf
    /// is handed over already reconstructed (its own balances/storage
    /// subtrees are replayed from materialized values, not persisted as
    /// node tables — see `SPEC_FULL.md` §4.7).
    pub fn from_parts(
        exchange_id: u32,
        config: TreeConfig,
        accounts_root: Field,
        accounts_nodes: HashMap<Field, Vec<Field>>,
        accounts: HashMap<u32, AccountLeaf>,
    ) -> Self {
        let default_account_hash = AccountLeaf::new(config.tok_levels, config.store_levels).hash();
        let accounts_tree = SparseMerkleTree::from_parts(
            config.acc_levels,
            4,
            default_account_hash,
            hash_node4,
            accounts_root,
            accounts_nodes,
        );
        Self {
            exchange_id,
            accounts,
            accounts_tree,
            config,
        }
    }

    /// The accounts tree's raw content-addressed node table, for
    /// snapshotting.
    pub fn accounts_tree_nodes(&self) -> &HashMap<Field, Vec<Field>> {
        self.accounts_tree.nodes()
    }

    pub fn root(&self) -> Field {
        self.accounts_tree.root()
    }

    pub fn accounts(&self) -> &HashMap<u32, AccountLeaf> {
        &self.accounts
    }

    /// Auto-vivifying read: an account that has never been written reads as
    /// the default leaf, same as the tree itself does for its hash.
    fn account_or_default(&self, account_id: u32) -> AccountLeafValue {
        match self.accounts.get(&account_id) {
            Some(leaf) => AccountLeafValue::from(leaf),
            None => {
                let empty = AccountLeaf::new(self.config.tok_levels, self.config.store_levels);
                AccountLeafValue::from(&empty)
            }
        }
    }

    pub fn account_owner(&self, account_id: u32) -> Field {
        self.account_or_default(account_id).owner
    }

    pub fn account_nonce(&self, account_id: u32) -> u32 {
        self.account_or_default(account_id).nonce
    }

    pub fn account_fee_bips_amm(&self, account_id: u32) -> u8 {
        self.account_or_default(account_id).fee_bips_amm
    }

    pub fn balance(&self, account_id: u32, token_id: u32) -> u128 {
        self.accounts
            .get(&account_id)
            .map(|a| a.balance(token_id))
            .unwrap_or(0)
    }

    /// Storage-slot-trimmed read used by the order-book helpers for
    /// computing prior fill amounts without mutating state.
    pub fn get_data(&self, account_id: u32, token_id: u32, storage_id: u128) -> StorageLeaf {
        match self.accounts.get(&account_id) {
            Some(account) => account.get_storage(token_id, storage_id),
            None => StorageLeaf::default(),
        }
    }

    /// Mutate an account's balances/storage without touching the accounts
    /// tree. Used for the protocol-fee account (id 0): its balance changes
    /// accrue per transaction, but its accounts-tree path is only proved
    /// once, at block finalization (`BlockBuilder`'s "no-delta merkle
    /// update"), rather than once per transaction like every other account.
    pub fn with_account_balances_only_mut<T>(
        &mut self,
        account_id: u32,
        f: impl FnOnce(&mut AccountLeaf) -> T,
    ) -> T {
        let leaf = self
            .accounts
            .entry(account_id)
            .or_insert_with(|| AccountLeaf::new(self.config.tok_levels, self.config.store_levels));
        f(leaf)
    }

    /// Run `f` against the account's mutable leaf (auto-vivifying it first)
    /// and fold the result into an `AccountUpdateData` over the accounts
    /// tree. `f` returns whatever the caller needs out of the mutation.
    pub fn with_account_mut<T>(
        &mut self,
        account_id: u32,
        f: impl FnOnce(&mut AccountLeaf) -> T,
    ) -> (AccountUpdateData, T) {
        let leaf = self
            .accounts
            .entry(account_id)
            .or_insert_with(|| AccountLeaf::new(self.config.tok_levels, self.config.store_levels));

        let leaf_before = AccountLeafValue::from(&*leaf);
        let root_before = self.accounts_tree.root();
        let sibling_path = self
            .accounts_tree
            .create_proof(account_id as u128)
            .expect("account id is within the accounts tree's key range");

        let result = f(leaf);

        let new_hash = leaf.hash();
        let leaf_after = AccountLeafValue::from(&*leaf);
        self.accounts_tree
            .update(account_id as u128, new_hash)
            .expect("account id is within the accounts tree's key range");
        let root_after = self.accounts_tree.root();

        (
            AccountUpdateData {
                account_id,
                sibling_path,
                root_before,
                root_after,
                leaf_before,
                leaf_after,
            },
            result,
        )
    }
}
