//! Fixed-point math
//!
//! WAD (1e18) arithmetic on `U256` and the implied-rate price curve used for
//! limit-order pricing: a PT is worth `exp(-ln_rate * t / year)` of asset.

use alloy::primitives::U256;
use yieldkit_core::constants::{ONE_YEAR_SECS, WAD};

/// e in WAD
const E_WAD: U256 = U256::from_limbs([2_718_281_828_459_045_235, 0, 0, 0]);

/// exp() beyond this integer part overflows U256 in WAD
const MAX_EXP_INT: u64 = 130;

/// `a * b / d`, rounded down. Saturates to `U256::MAX` when the quotient
/// does not fit; `d == 0` yields zero.
pub fn mul_div_down(a: U256, b: U256, d: U256) -> U256 {
    if d.is_zero() {
        return U256::ZERO;
    }
    match a.checked_mul(b) {
        Some(p) => p / d,
        None => (a / d).saturating_mul(b),
    }
}

/// `a * b / d`, rounded up
pub fn mul_div_up(a: U256, b: U256, d: U256) -> U256 {
    if d.is_zero() {
        return U256::ZERO;
    }
    match a.checked_mul(b) {
        Some(p) => {
            let q = p / d;
            if (p % d).is_zero() {
                q
            } else {
                q + U256::from(1u8)
            }
        }
        None => (a / d).saturating_mul(b),
    }
}

pub fn mul_wad_down(a: U256, b: U256) -> U256 {
    mul_div_down(a, b, WAD)
}

pub fn mul_wad_up(a: U256, b: U256) -> U256 {
    mul_div_up(a, b, WAD)
}

pub fn div_wad_down(a: U256, b: U256) -> U256 {
    mul_div_down(a, WAD, b)
}

/// `e^x` for a non-negative WAD exponent. `None` when the result overflows.
pub fn exp_wad(x: U256) -> Option<U256> {
    let int_part = x / WAD;
    let frac = x % WAD;

    if int_part > U256::from(MAX_EXP_INT) {
        return None;
    }

    let mut int_exp = WAD;
    for _ in 0..int_part.to::<u64>() {
        int_exp = int_exp.checked_mul(E_WAD)? / WAD;
    }

    // Taylor series converges quickly for frac < 1
    let mut term = WAD;
    let mut sum = WAD;
    for k in 1u64..=40 {
        term = mul_wad_down(term, frac) / U256::from(k);
        if term.is_zero() {
            break;
        }
        sum += term;
    }

    int_exp.checked_mul(sum).map(|p| p / WAD)
}

/// Asset value of one PT at `ln_rate` with `time_to_expiry` seconds left
pub fn pt_asset_price(ln_rate: U256, time_to_expiry: u64) -> U256 {
    let exponent = mul_div_down(
        ln_rate,
        U256::from(time_to_expiry),
        U256::from(ONE_YEAR_SECS),
    );
    match exp_wad(exponent) {
        Some(growth) if !growth.is_zero() => mul_div_down(WAD, WAD, growth),
        _ => U256::ZERO,
    }
}

/// SY value of one PT
pub fn pt_price_in_sy(ln_rate: U256, time_to_expiry: u64, py_index: U256) -> U256 {
    mul_div_down(pt_asset_price(ln_rate, time_to_expiry), WAD, py_index)
}

/// SY value of one YT: the asset unit minus the PT share
pub fn yt_price_in_sy(ln_rate: U256, time_to_expiry: u64, py_index: U256) -> U256 {
    let pt_asset = pt_asset_price(ln_rate, time_to_expiry);
    mul_div_down(WAD.saturating_sub(pt_asset), WAD, py_index)
}

/// SY needed to mint one PT + YT pair
pub fn py_cost_in_sy(py_index: U256) -> U256 {
    mul_div_up(WAD, WAD, py_index)
}
