//! Transaction inputs, the slot model the executor normalizes them into,
//! and the witness the executor emits.
//!
//! `TxSlotState` replaces the source's dynamically-typed scratch object
//! (`newState.TXV_*` attributes set ad hoc per transaction type) with an
//! explicit, fully-defaulted struct every handler fills in before a single
//! uniform finalization pass runs.

use crate::leaf::{AccountUpdateData, BalanceUpdateData, StorageUpdateData};
use dex_field::Field;
use serde::{Deserialize, Serialize};

use crate::order::Order;

/// A recorded, unverified EdDSA signature — the core only carries it
/// through to the circuit.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct EddsaSignature {
    pub r_x: Field,
    pub r_y: Field,
    pub s: Field,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "txType", rename_all = "camelCase")]
pub enum TxInput {
    Noop,
    SpotTrade {
        order_a: Order,
        order_b: Order,
        signature_a: Option<EddsaSignature>,
        signature_b: Option<EddsaSignature>,
    },
    Transfer {
        from_account_id: u32,
        to_account_id: u32,
        token_id: u32,
        amount: u128,
        fee_token_id: u32,
        fee: u128,
        storage_id: u128,
        from: Field,
        to: Field,
        valid_until: u32,
        dual_author_x: Field,
        dual_author_y: Field,
        payer_to: Field,
        payer_to_account_id: u32,
        payee_to_account_id: u32,
        tx_type: u8,
        max_fee: u128,
        signature_a: Option<EddsaSignature>,
    },
    Withdraw {
        account_id: u32,
        token_id: u32,
        amount: u128,
        fee_token_id: u32,
        fee: u128,
        storage_id: u128,
        withdrawal_type: u8,
        onchain_data_hash: Field,
        valid_until: u32,
        max_fee: u128,
        signature_a: Option<EddsaSignature>,
    },
    Deposit {
        account_id: u32,
        owner: Field,
        token_id: u32,
        amount: u128,
    },
    AccountUpdate {
        account_id: u32,
        owner: Field,
        pub_key_x: Field,
        pub_key_y: Field,
        fee_token_id: u32,
        fee: u128,
        max_fee: u128,
        update_type: u8,
        valid_until: u32,
        signature_a: Option<EddsaSignature>,
    },
    AmmUpdate {
        account_id: u32,
        token_id: u32,
        fee_bips: u8,
        token_weight: u128,
        valid_until: u32,
    },
    SignatureVerification {
        account_id: u32,
        data: Field,
        signature_a: Option<EddsaSignature>,
    },
}

#[derive(Clone, Debug, Default)]
pub struct BalanceDelta {
    pub token_id: u32,
    pub delta: i128,
    pub weight: Option<u128>,
}

#[derive(Clone, Debug)]
pub struct StorageWrite {
    pub token_id: u32,
    pub storage_id: u128,
    pub data: u128,
}

#[derive(Clone, Debug)]
pub struct AccountSlot {
    pub address: u32,
    pub owner: Option<Field>,
    pub pub_key_x: Option<Field>,
    pub pub_key_y: Option<Field>,
    pub nonce_delta: u32,
    pub fee_bips_amm: Option<u8>,
    pub balance_s: BalanceDelta,
    pub balance_b: BalanceDelta,
    pub storage: Option<StorageWrite>,
}

impl Default for AccountSlot {
    /// Defaulting to account `1` (the reserved default account) makes an
    /// unused slot's account-tree update a no-op: `root_before ==
    /// root_after` and the proof it carries is trivial.
    fn default() -> Self {
        Self {
            address: 1,
            owner: None,
            pub_key_x: None,
            pub_key_y: None,
            nonce_delta: 0,
            fee_bips_amm: None,
            balance_s: BalanceDelta::default(),
            balance_b: BalanceDelta::default(),
            storage: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct OperatorSlot {
    pub balance_a: BalanceDelta,
    pub balance_b: BalanceDelta,
}

#[derive(Clone, Debug, Default)]
pub struct ProtocolSlot {
    pub balance_a: BalanceDelta,
    pub balance_b: BalanceDelta,
}

#[derive(Clone, Debug)]
pub struct TxSlotState {
    pub account_a: AccountSlot,
    pub account_b: AccountSlot,
    pub operator: OperatorSlot,
    pub protocol: ProtocolSlot,
    pub conditional: bool,
    pub signature_a: Option<EddsaSignature>,
    pub signature_b: Option<EddsaSignature>,
}

impl Default for TxSlotState {
    fn default() -> Self {
        Self {
            account_a: AccountSlot::default(),
            account_b: AccountSlot::default(),
            operator: OperatorSlot::default(),
            protocol: ProtocolSlot::default(),
            conditional: false,
            signature_a: None,
            signature_b: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxWitness {
    pub signature_a: Option<EddsaSignature>,
    pub signature_b: Option<EddsaSignature>,
    pub accounts_merkle_root: Field,
    pub storage_update_a: StorageUpdateData,
    pub storage_update_b: StorageUpdateData,
    pub balance_update_s_a: BalanceUpdateData,
    pub balance_update_b_a: BalanceUpdateData,
    pub account_update_a: AccountUpdateData,
    pub balance_update_s_b: BalanceUpdateData,
    pub balance_update_b_b: BalanceUpdateData,
    pub account_update_b: AccountUpdateData,
    pub balance_update_a_o: BalanceUpdateData,
    pub balance_update_b_o: BalanceUpdateData,
    pub account_update_o: AccountUpdateData,
    pub balance_update_a_p: BalanceUpdateData,
    pub balance_update_b_p: BalanceUpdateData,
    pub num_conditional_transactions_after: u32,
}
