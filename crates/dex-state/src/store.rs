//! Snapshot save/load of the full state to a canonical, deterministic file.
//!
//! Grounded in `original_source/.../state.py`'s `State.save`/`State.load`
//! (a JSON dump/load of `exchangeID`, every account, and the accounts
//! tree's raw node table) and `SPEC_FULL.md` §6.3/§4.7/§9: iteration order
//! over accounts is sorted by numeric ID so two independent runs of the
//! same block sequence save byte-identical snapshots, and writes go to a
//! `.tmp` file then an atomic rename so a crash mid-write can never leave a
//! half-written snapshot behind.

use crate::error::StateStoreError;
use crate::leaf::{AccountLeaf, BalanceLeaf, StorageLeaf};
use crate::state::{State, TreeConfig};
use dex_field::Field;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Where snapshots live. `SPEC_FULL.md` §6.5: no env vars; defaults to
/// `./states/`, overridable for tests.
#[derive(Clone, Debug)]
pub struct StateStoreConfig {
    pub directory: PathBuf,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./states"),
        }
    }
}

impl StateStoreConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// `state_<exchangeID>_<blockIdx>.json`.
    pub fn path_for(&self, exchange_id: u32, block_idx: u64) -> PathBuf {
        self.directory.join(format!("state_{exchange_id}_{block_idx}.json"))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StorageSnapshot {
    data: u128,
    storage_id: u128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct BalanceSnapshot {
    balance: u128,
    weight_amm: u128,
    /// Keyed by slot index (`storageID mod 2^D_store`), sorted for
    /// determinism.
    storage: BTreeMap<u128, StorageSnapshot>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct AccountSnapshot {
    owner: Field,
    pub_key_x: Field,
    pub_key_y: Field,
    nonce: u32,
    fee_bips_amm: u8,
    /// Keyed by token ID, sorted for determinism.
    balances: BTreeMap<u32, BalanceSnapshot>,
}

/// The canonical on-disk shape (`SPEC_FULL.md` §6.3): `{exchangeID,
/// accounts_values, accounts_root, accounts_tree}`. `accounts_tree` is the
/// accounts SMT's own node table only; each account's balances/storage
/// subtrees nest inside `accounts_values` and are rebuilt implicitly on
/// load from the materialized leaf values.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub exchange_id: u32,
    /// Keyed by account ID, sorted for determinism.
    accounts_values: BTreeMap<u32, AccountSnapshot>,
    accounts_root: Field,
    /// Keyed by the node's own hash (as its canonical decimal string, sorted
    /// lexicographically), value is the node's `fanout` children.
    accounts_tree: BTreeMap<String, Vec<Field>>,
}

impl StateSnapshot {
    /// Capture every materialized value out of a live `State`.
    pub fn capture(state: &State) -> Self {
        let mut accounts_values = BTreeMap::new();
        for (&account_id, account) in state.accounts() {
            accounts_values.insert(account_id, snapshot_account(account));
        }

        let mut accounts_tree = BTreeMap::new();
        for (hash, children) in state.accounts_tree_nodes() {
            accounts_tree.insert(hash.to_decimal_string(), children.clone());
        }

        Self {
            exchange_id: state.exchange_id,
            accounts_values,
            accounts_root: state.root(),
            accounts_tree,
        }
    }

    /// Rebuild a live `State` from the captured snapshot.
    pub fn restore(self, config: TreeConfig) -> Result<State, StateStoreError> {
        let mut accounts = HashMap::with_capacity(self.accounts_values.len());
        for (account_id, snapshot) in self.accounts_values {
            accounts.insert(account_id, rebuild_account(&snapshot, config));
        }

        let mut accounts_nodes = HashMap::with_capacity(self.accounts_tree.len());
        for (hash_str, children) in self.accounts_tree {
            let hash = Field::from_decimal_str(&hash_str).map_err(|source| StateStoreError::CorruptNodeHash {
                hash: hash_str,
                source,
            })?;
            accounts_nodes.insert(hash, children);
        }

        Ok(State::from_parts(
            self.exchange_id,
            config,
            self.accounts_root,
            accounts_nodes,
            accounts,
        ))
    }
}

fn snapshot_account(account: &AccountLeaf) -> AccountSnapshot {
    let mut balances = BTreeMap::new();
    for (&token_id, leaf) in account.materialized_balances() {
        let mut storage = BTreeMap::new();
        for (&slot, leaf) in leaf.materialized_storage() {
            storage.insert(
                slot,
                StorageSnapshot {
                    data: leaf.data,
                    storage_id: leaf.storage_id,
                },
            );
        }
        balances.insert(
            token_id,
            BalanceSnapshot {
                balance: leaf.balance,
                weight_amm: leaf.weight_amm,
                storage,
            },
        );
    }

    AccountSnapshot {
        owner: account.owner,
        pub_key_x: account.pub_key_x,
        pub_key_y: account.pub_key_y,
        nonce: account.nonce,
        fee_bips_amm: account.fee_bips_amm,
        balances,
    }
}

fn rebuild_account(snapshot: &AccountSnapshot, config: TreeConfig) -> AccountLeaf {
    let mut account = AccountLeaf::new(config.tok_levels, config.store_levels);
    account.owner = snapshot.owner;
    account.pub_key_x = snapshot.pub_key_x;
    account.pub_key_y = snapshot.pub_key_y;
    account.nonce = snapshot.nonce;
    account.fee_bips_amm = snapshot.fee_bips_amm;

    for (&token_id, balance_snapshot) in &snapshot.balances {
        let mut balance_leaf = BalanceLeaf::new(config.store_levels);
        balance_leaf.balance = balance_snapshot.balance;
        balance_leaf.weight_amm = balance_snapshot.weight_amm;
        for storage_snapshot in balance_snapshot.storage.values() {
            balance_leaf.update_storage(storage_snapshot.storage_id, storage_snapshot.data);
        }
        account.set_balance(token_id, balance_leaf);
    }

    account
}

/// Save `state` to `config.path_for(state.exchange_id, block_idx)`,
/// atomically: write to a sibling `.tmp` file then rename over the final
/// path, so a crash mid-write never leaves a half-written snapshot.
#[instrument(skip(state), fields(exchange_id = state.exchange_id, block_idx))]
pub fn save(state: &State, config: &StateStoreConfig, block_idx: u64) -> Result<PathBuf, StateStoreError> {
    std::fs::create_dir_all(&config.directory).map_err(|e| StateStoreError::Io {
        path: config.directory.display().to_string(),
        source: e,
    })?;

    let snapshot = StateSnapshot::capture(state);
    let path = config.path_for(state.exchange_id, block_idx);
    let tmp_path = path.with_extension("json.tmp");

    let json = serde_json::to_string_pretty(&snapshot).map_err(|e| StateStoreError::Json {
        path: path.display().to_string(),
        source: e,
    })?;
    std::fs::write(&tmp_path, json).map_err(|e| StateStoreError::Io {
        path: tmp_path.display().to_string(),
        source: e,
    })?;
    std::fs::rename(&tmp_path, &path).map_err(|e| StateStoreError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    info!(path = %path.display(), "state snapshot saved");
    Ok(path)
}

/// Load a previously saved snapshot back into a live `State`.
#[instrument(skip(config), fields(exchange_id, block_idx))]
pub fn load(
    config: &StateStoreConfig,
    exchange_id: u32,
    block_idx: u64,
    tree_config: TreeConfig,
) -> Result<State, StateStoreError> {
    let path = config.path_for(exchange_id, block_idx);
    load_from_path(&path, tree_config)
}

fn load_from_path(path: &Path, tree_config: TreeConfig) -> Result<State, StateStoreError> {
    let bytes = std::fs::read(path).map_err(|e| StateStoreError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let snapshot: StateSnapshot = serde_json::from_slice(&bytes).map_err(|e| StateStoreError::Json {
        path: path.display().to_string(),
        source: e,
    })?;
    snapshot.restore(tree_config)
}
