//! Order-book helpers: max-fill computation and ring matching.
//!
//! `match_ring` is a direct transcription of `State.match` in
//! `operator/state.py`. It is deliberately not generic over "which side is
//! the taker" beyond the single `fillAmountBorS` flag the source uses —
//! that flag, plus which order declares it, fully determines the match.

use crate::state::State;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub account_id: u32,
    pub token_s: u32,
    pub token_b: u32,
    pub amount_s: u128,
    pub amount_b: u128,
    pub storage_id: u128,
    /// Buy-amount-fixed (`true`) or sell-amount-fixed (`false`).
    pub fill_amount_b_or_s: bool,
    pub taker: bool,
    pub max_fee_bips: u16,
    pub fee_bips: u16,
    pub valid_until: u32,
    pub amm: bool,
}

/// The max-fill pair `(fillS, fillB)` this order could execute right now,
/// bounded by its own remaining (unfilled) amount and the account's actual
/// balance of `tokenS`. `balanceS` is always a direct candidate for
/// `fillAmountS` — it is never converted into a buy-side equivalent first —
/// and `fillAmountB` is derived from it with a single floor-division,
/// regardless of `fillAmountBorS`.
pub fn get_max_fill(state: &State, order: &Order) -> (u128, u128) {
    let filled = state
        .get_data(order.account_id, order.token_s, order.storage_id)
        .data;
    let balance_s = state.balance(order.account_id, order.token_s);

    let limit = if order.fill_amount_b_or_s {
        order.amount_b
    } else {
        order.amount_s
    };
    let remaining = limit - limit.min(filled);

    let remaining_s = if order.fill_amount_b_or_s {
        mul_div(remaining, order.amount_s, order.amount_b)
    } else {
        remaining
    };

    let fill_s = balance_s.min(remaining_s);
    let fill_b = mul_div(fill_s, order.amount_b, order.amount_s);
    (fill_s, fill_b)
}

/// `a * b / c`, rounded down, without intermediate overflow.
fn mul_div(a: u128, b: u128, c: u128) -> u128 {
    if c == 0 {
        return 0;
    }
    let product = BigUint::from(a) * BigUint::from(b);
    biguint_to_u128(product / BigUint::from(c))
}

fn biguint_to_u128(v: BigUint) -> u128 {
    let bytes = v.to_bytes_le();
    let mut buf = [0u8; 16];
    let n = bytes.len().min(16);
    buf[..n].copy_from_slice(&bytes[..n]);
    u128::from_le_bytes(buf)
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RingFillResult {
    pub valid: bool,
    pub fill_s_a: u128,
    pub fill_b_a: u128,
    pub fee_a: u128,
    pub protocol_fee_a: u128,
    pub fill_s_b: u128,
    pub fill_b_b: u128,
    pub fee_b: u128,
    pub protocol_fee_b: u128,
}

/// `fillS * otherAmount * 1000 <= fillB * ownAmount * 1001`, i.e. at most
/// 0.1% worse than the order's declared price. Computed in arbitrary
/// precision since the cross products can exceed `u128`.
fn within_slippage(fill_s: u128, fill_b: u128, amount_s: u128, amount_b: u128) -> bool {
    let lhs = BigUint::from(fill_s) * BigUint::from(amount_b) * BigUint::from(1000u32);
    let rhs = BigUint::from(fill_b) * BigUint::from(amount_s) * BigUint::from(1001u32);
    lhs <= rhs
}

#[derive(Copy, Clone, Debug, Default)]
struct Fill {
    s: u128,
    b: u128,
}

/// Rescale the taker's or the maker's fill down to the other's fixed side.
/// If the taker's buy amount is the tighter constraint, the maker's fill
/// shrinks to match it; otherwise the taker's sell amount is derived from
/// the maker's (already binding) sell amount. Mirrors `State.match`'s
/// in-place mutation of whichever `Fill` isn't already the binding one.
/// Returns whether the matched fill still clears the maker's minimum.
fn match_fill(taker: &Order, taker_fill: &mut Fill, maker: &Order, maker_fill: &mut Fill) -> bool {
    if taker_fill.b < maker_fill.s {
        maker_fill.s = taker_fill.b;
        maker_fill.b = mul_div(taker_fill.b, maker.amount_b, maker.amount_s);
    } else {
        taker_fill.s = mul_div(maker_fill.s, taker.amount_s, taker.amount_b);
        taker_fill.b = maker_fill.s;
    }
    maker_fill.b <= taker_fill.s
}

/// Match two orders, A against B, at block `timestamp`, with the protocol
/// fee bips the header assigns to the taker and maker roles.
pub fn match_ring(
    state: &State,
    order_a: &Order,
    order_b: &Order,
    timestamp: u32,
    protocol_taker_fee_bips: u16,
    protocol_maker_fee_bips: u16,
) -> RingFillResult {
    let (max_fill_s_a, max_fill_b_a) = get_max_fill(state, order_a);
    let (max_fill_s_b, max_fill_b_b) = get_max_fill(state, order_b);

    let mut fill_a = Fill { s: max_fill_s_a, b: max_fill_b_a };
    let mut fill_b = Fill { s: max_fill_s_b, b: max_fill_b_b };

    // Whichever order declares `fillAmountBorS` is the taker for the
    // rescale; the other order's corresponding amount is overwritten from
    // it afterward, regardless of which side actually moved.
    let matchable = if order_a.fill_amount_b_or_s {
        let matchable = match_fill(order_a, &mut fill_a, order_b, &mut fill_b);
        fill_a.s = fill_b.b;
        matchable
    } else {
        let matchable = match_fill(order_b, &mut fill_b, order_a, &mut fill_a);
        fill_a.b = fill_b.s;
        matchable
    };

    let fill_s_a = dex_float::round_float24(fill_a.s).unwrap_or(0);
    let fill_s_b = dex_float::round_float24(fill_b.s).unwrap_or(0);

    let fill_b_a = fill_s_b;
    let fill_b_b = fill_s_a;

    let order_a_valid = timestamp <= order_a.valid_until
        && order_a.fee_bips <= order_a.max_fee_bips
        && within_slippage(fill_s_a, fill_b_a, order_a.amount_s, order_a.amount_b);
    let order_b_valid = timestamp <= order_b.valid_until
        && order_b.fee_bips <= order_b.max_fee_bips
        && within_slippage(fill_s_b, fill_b_b, order_b.amount_s, order_b.amount_b);

    if !(matchable && order_a_valid && order_b_valid) {
        return RingFillResult {
            valid: false,
            ..Default::default()
        };
    }

    let protocol_fee_a = mul_div(fill_b_a, protocol_taker_fee_bips as u128, 100_000);
    let fee_a = mul_div(fill_b_a, order_a.fee_bips as u128, 10_000);
    let protocol_fee_b = mul_div(fill_b_b, protocol_maker_fee_bips as u128, 100_000);
    let fee_b = mul_div(fill_b_b, order_b.fee_bips as u128, 10_000);

    RingFillResult {
        valid: true,
        fill_s_a,
        fill_b_a,
        fee_a,
        protocol_fee_a,
        fill_s_b,
        fill_b_b,
        fee_b,
        protocol_fee_b,
    }
}
