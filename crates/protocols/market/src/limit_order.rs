//! Limit-Order Matching
//!
//! Fills a taker swap against resting maker orders before the AMM sees the
//! remainder. Normal fills trade the taker's asset with the maker directly;
//! flash fills pair the taker with a maker on the opposite token (e.g. a
//! PT buyer with a YT buyer) through a PY mint or redeem.
//!
//! Orders are priced on the implied-rate curve at the order's own rate, so a
//! fill is only taken when it beats the market's current rate.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolValue;
use evm_client::{BlockRef, CallBatcher};
use parking_lot::RwLock;
use thiserror::Error;
use yieldkit_core::constants::WAD;
use yieldkit_core::{Result, SdkError};
use yieldkit_tx::abi::{FillOrderParams, ILimitRouter, LimitOrderData, Order};
use yieldkit_tx::classify;

use crate::math::{mul_div_down, mul_div_up, pt_price_in_sy, yt_price_in_sy};
use crate::route::SwapKind;

/// Maker side of a resting order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderType {
    /// Maker pays SY for PT
    SyForPt,
    /// Maker pays PT for SY
    PtForSy,
    /// Maker pays SY for YT
    SyForYt,
    /// Maker pays YT for SY
    YtForSy,
}

impl OrderType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::SyForPt),
            1 => Some(Self::PtForSy),
            2 => Some(Self::SyForYt),
            3 => Some(Self::YtForSy),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::SyForPt => 0,
            Self::PtForSy => 1,
            Self::SyForYt => 2,
            Self::YtForSy => 3,
        }
    }

    /// Maker's making amount is denominated in SY
    pub fn maker_gives_sy(&self) -> bool {
        matches!(self, Self::SyForPt | Self::SyForYt)
    }

    fn is_pt(&self) -> bool {
        matches!(self, Self::SyForPt | Self::PtForSy)
    }
}

/// Normal fills trade with the maker; flash fills go through a PY mint/redeem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    Normal,
    Flash,
}

/// Order types that can fill a single-leg taker trade, as (normal, flash)
pub fn fill_sources(kind: SwapKind) -> Option<(OrderType, OrderType)> {
    match kind {
        SwapKind::TokenForPt => Some((OrderType::PtForSy, OrderType::SyForYt)),
        SwapKind::PtForToken => Some((OrderType::SyForPt, OrderType::YtForSy)),
        SwapKind::TokenForYt => Some((OrderType::YtForSy, OrderType::SyForPt)),
        SwapKind::YtForToken => Some((OrderType::SyForYt, OrderType::PtForSy)),
        SwapKind::PtForYt | SwapKind::YtForPt => None,
    }
}

/// Orders above the market rate make PT cheap; below it, YT.
fn wants_higher_rate(kind: SwapKind) -> bool {
    matches!(kind, SwapKind::TokenForPt | SwapKind::YtForToken)
}

/// A signed order together with its hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    pub order: Order,
    pub signature: Bytes,
    pub hash: B256,
}

impl OrderRecord {
    pub fn new(order: Order, signature: Bytes) -> Self {
        let hash = order_hash(&order);
        Self {
            order,
            signature,
            hash,
        }
    }

    pub fn order_type(&self) -> Option<OrderType> {
        OrderType::from_u8(self.order.orderType)
    }

    pub fn expiry(&self) -> u64 {
        self.order.expiry.saturating_to()
    }
}

pub fn order_hash(order: &Order) -> B256 {
    keccak256(order.abi_encode())
}

/// Market pricing inputs for one matching pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketContext {
    pub sy: Address,
    pub yt: Address,
    pub ln_implied_rate: U256,
    pub py_index: U256,
    pub time_to_expiry: u64,
    /// Unix seconds, used for order expiry
    pub now: u64,
    /// Taker fee on the SY side of every fill (1e18 = 100%)
    pub fee_wad: U256,
}

impl MarketContext {
    fn price_at(&self, rate: U256, pt: bool) -> U256 {
        if pt {
            pt_price_in_sy(rate, self.time_to_expiry, self.py_index)
        } else {
            yt_price_in_sy(rate, self.time_to_expiry, self.py_index)
        }
    }
}

/// Amounts a fill moves, derived from the maker's making amount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    /// PT or YT units traded
    pub units: U256,
    pub taker_in: U256,
    pub taker_out: U256,
    pub fee: U256,
}

fn taker_trades_pt(kind: SwapKind) -> bool {
    matches!(kind, SwapKind::TokenForPt | SwapKind::PtForToken)
}

/// Settle a fill of `making` against `order` for a single-leg taker trade.
///
/// Shared by the matcher and by anything that replays fills, so both sides
/// agree to the wei.
pub fn settle_fill(
    order: &Order,
    making: U256,
    kind: SwapKind,
    ctx: &MarketContext,
) -> Option<Settlement> {
    let order_type = OrderType::from_u8(order.orderType)?;
    let rate = order.lnImpliedRate;
    let units = if order_type.maker_gives_sy() {
        let maker_price = ctx.price_at(rate, order_type.is_pt());
        if maker_price.is_zero() {
            return None;
        }
        mul_div_down(making, WAD, maker_price)
    } else {
        making
    };
    if units.is_zero() {
        return None;
    }

    let taker_price = ctx.price_at(rate, taker_trades_pt(kind));
    if taker_price.is_zero() {
        return None;
    }

    if kind.takes_token() {
        let base = mul_div_up(units, taker_price, WAD);
        let fee = mul_div_up(base, ctx.fee_wad, WAD);
        Some(Settlement {
            units,
            taker_in: base.saturating_add(fee),
            taker_out: units,
            fee,
        })
    } else {
        let gross = mul_div_down(units, taker_price, WAD);
        let fee = mul_div_down(gross, ctx.fee_wad, WAD);
        Some(Settlement {
            units,
            taker_in: units,
            taker_out: gross.saturating_sub(fee),
            fee,
        })
    }
}

/// Making amount that delivers at most `units`
fn making_for_units(order_type: OrderType, units: U256, rate: U256, ctx: &MarketContext) -> U256 {
    if order_type.maker_gives_sy() {
        mul_div_down(units, ctx.price_at(rate, order_type.is_pt()), WAD)
    } else {
        units
    }
}

/// Units the maker can still absorb or deliver
fn capacity_units(order_type: OrderType, remaining: U256, rate: U256, ctx: &MarketContext) -> U256 {
    if order_type.maker_gives_sy() {
        let price = ctx.price_at(rate, order_type.is_pt());
        if price.is_zero() {
            return U256::ZERO;
        }
        mul_div_down(remaining, WAD, price)
    } else {
        remaining
    }
}

/// Size and settle one order against what the taker has left.
///
/// Buys spend at most `limit` SY; sells deliver at most `limit` units.
pub fn quote_fill(
    record: &OrderRecord,
    remaining: U256,
    kind: SwapKind,
    limit: U256,
    ctx: &MarketContext,
) -> Option<(U256, Settlement)> {
    let order_type = record.order_type()?;
    let rate = record.order.lnImpliedRate;
    let capacity = capacity_units(order_type, remaining, rate, ctx);

    let mut units = if kind.takes_token() {
        let price = ctx.price_at(rate, taker_trades_pt(kind));
        if price.is_zero() {
            return None;
        }
        let price_with_fee = mul_div_up(price, WAD + ctx.fee_wad, WAD);
        mul_div_down(limit, WAD, price_with_fee)
    } else {
        limit
    }
    .min(capacity);

    // Rounding can push a buy over budget by a wei or two.
    for _ in 0..3 {
        if units.is_zero() {
            return None;
        }
        let making = making_for_units(order_type, units, rate, ctx).min(remaining);
        let settlement = settle_fill(&record.order, making, kind, ctx)?;
        if settlement.taker_in <= limit {
            return Some((making, settlement));
        }
        units -= U256::from(1u8);
    }
    None
}

/// One order fill chosen by the matcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub order: Arc<OrderRecord>,
    pub order_hash: B256,
    /// Single-leg taker trade this fill serves
    pub kind: SwapKind,
    pub mode: FillMode,
    pub making_amount: U256,
    pub taker_in: U256,
    pub taker_out: U256,
    pub fee: U256,
}

impl Fill {
    pub fn to_params(&self) -> FillOrderParams {
        FillOrderParams {
            order: self.order.order.clone(),
            signature: self.order.signature.clone(),
            makingAmount: self.making_amount,
        }
    }
}

/// Outcome of matching one taker trade against the book
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    pub normal_fills: Vec<Fill>,
    pub flash_fills: Vec<Fill>,
    /// PT, YT or SY delivered to the taker by fills
    pub net_output_to_taker: U256,
    /// Part of the taker's input consumed by fills
    pub net_input_from_taker: U256,
    pub total_fee: U256,
    /// SY left over between the legs of a PT<->YT trade
    pub residual_sy: U256,
}

impl MatchResult {
    pub fn is_empty(&self) -> bool {
        self.normal_fills.is_empty() && self.flash_fills.is_empty()
    }

    pub fn fill_count(&self) -> usize {
        self.normal_fills.len() + self.flash_fills.len()
    }

    pub fn fills(&self) -> impl Iterator<Item = &Fill> {
        self.normal_fills.iter().chain(self.flash_fills.iter())
    }

    /// Router payload for the fills serving `kind`
    pub fn limit_data(&self, limit_router: Address, kind: SwapKind) -> LimitOrderData {
        let pick = |fills: &[Fill]| {
            fills
                .iter()
                .filter(|f| f.kind == kind)
                .map(Fill::to_params)
                .collect::<Vec<_>>()
        };
        let normal = pick(&self.normal_fills);
        let flash = pick(&self.flash_fills);
        LimitOrderData {
            limitRouter: if normal.is_empty() && flash.is_empty() {
                Address::ZERO
            } else {
                limit_router
            },
            normalFills: normal,
            flashFills: flash,
        }
    }
}

/// Empty router payload
pub fn no_limit_data() -> LimitOrderData {
    LimitOrderData {
        limitRouter: Address::ZERO,
        normalFills: Vec::new(),
        flashFills: Vec::new(),
    }
}

/// Matching capability consulted by the quote simulator
pub trait LimitOrderMatcher: Send + Sync {
    /// Match `amount_in` of the taker's input. PT<->YT kinds match the sell
    /// leg first and spend its SY on the buy leg.
    fn match_orders(&self, kind: SwapKind, amount_in: U256, ctx: &MarketContext) -> MatchResult;
}

/// Matcher that never fills
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMatcher;

impl LimitOrderMatcher for NoopMatcher {
    fn match_orders(&self, _kind: SwapKind, _amount_in: U256, _ctx: &MarketContext) -> MatchResult {
        MatchResult::default()
    }
}

/// Lifecycle of a book entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open { remaining: U256 },
    PartiallyFilled { remaining: U256 },
    Filled,
    Expired,
    Cancelled,
}

impl OrderStatus {
    pub fn remaining(&self) -> U256 {
        match self {
            Self::Open { remaining } | Self::PartiallyFilled { remaining } => *remaining,
            _ => U256::ZERO,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::PartiallyFilled { .. })
    }
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Unknown order {0}")]
    UnknownOrder(B256),

    #[error("Order {0} is no longer open")]
    OrderClosed(B256),

    #[error("Fill of {requested} exceeds remaining {remaining}")]
    Overfill { remaining: U256, requested: U256 },
}

struct BookEntry {
    record: Arc<OrderRecord>,
    status: OrderStatus,
}

/// In-memory order book owned by the caller's session
#[derive(Default)]
pub struct BookMatcher {
    orders: RwLock<HashMap<B256, BookEntry>>,
}

impl BookMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signed order; returns its hash. Re-adding keeps the existing status.
    pub fn add_order(&self, order: Order, signature: Bytes) -> B256 {
        let record = OrderRecord::new(order, signature);
        let hash = record.hash;
        let remaining = record.order.makingAmount;
        self.orders.write().entry(hash).or_insert_with(|| BookEntry {
            record: Arc::new(record),
            status: OrderStatus::Open { remaining },
        });
        hash
    }

    pub fn status(&self, hash: &B256) -> Option<OrderStatus> {
        self.orders.read().get(hash).map(|e| e.status)
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }

    pub fn cancel(&self, hash: &B256) -> std::result::Result<(), MatchError> {
        let mut orders = self.orders.write();
        let entry = orders.get_mut(hash).ok_or(MatchError::UnknownOrder(*hash))?;
        if !entry.status.is_live() {
            return Err(MatchError::OrderClosed(*hash));
        }
        entry.status = OrderStatus::Cancelled;
        Ok(())
    }

    /// Record an executed fill of `making` against an order.
    pub fn apply_fill(
        &self,
        hash: &B256,
        making: U256,
    ) -> std::result::Result<OrderStatus, MatchError> {
        let mut orders = self.orders.write();
        let entry = orders.get_mut(hash).ok_or(MatchError::UnknownOrder(*hash))?;
        if !entry.status.is_live() {
            return Err(MatchError::OrderClosed(*hash));
        }
        let remaining = entry.status.remaining();
        if making > remaining {
            return Err(MatchError::Overfill {
                remaining,
                requested: making,
            });
        }
        entry.status = status_for(remaining - making);
        Ok(entry.status)
    }

    /// Apply every fill of an executed match.
    pub fn apply_match(&self, result: &MatchResult) -> std::result::Result<(), MatchError> {
        for fill in result.fills() {
            self.apply_fill(&fill.order_hash, fill.making_amount)?;
        }
        Ok(())
    }

    /// Overwrite an order's remaining amount from an external source.
    pub fn sync_remaining(
        &self,
        hash: &B256,
        remaining: U256,
    ) -> std::result::Result<(), MatchError> {
        let mut orders = self.orders.write();
        let entry = orders.get_mut(hash).ok_or(MatchError::UnknownOrder(*hash))?;
        if matches!(entry.status, OrderStatus::Cancelled | OrderStatus::Expired) {
            return Ok(());
        }
        let making = entry.record.order.makingAmount;
        entry.status = if remaining >= making {
            OrderStatus::Open { remaining: making }
        } else {
            status_for(remaining)
        };
        Ok(())
    }

    /// Mark orders expired at `now`; returns how many changed.
    pub fn expire_stale(&self, now: u64) -> usize {
        let mut expired = 0;
        for entry in self.orders.write().values_mut() {
            if entry.status.is_live() && entry.record.expiry() <= now {
                entry.status = OrderStatus::Expired;
                expired += 1;
            }
        }
        expired
    }

    /// Refresh remaining amounts of live orders from the limit router.
    pub async fn sync_from_chain(
        &self,
        batcher: &CallBatcher,
        limit_router: Address,
        block: BlockRef,
    ) -> Result<usize> {
        let hashes: Vec<B256> = self
            .orders
            .read()
            .iter()
            .filter(|(_, e)| e.status.is_live())
            .map(|(h, _)| *h)
            .collect();
        if hashes.is_empty() {
            return Ok(0);
        }

        let statuses = batcher
            .read_typed(
                limit_router,
                &ILimitRouter::orderStatusesCall {
                    orderHashes: hashes.clone(),
                },
                block,
            )
            .await
            .map_err(classify)?;

        if statuses.remainingAmounts.len() != hashes.len() {
            return Err(SdkError::Serialization(format!(
                "orderStatuses returned {} entries for {} orders",
                statuses.remainingAmounts.len(),
                hashes.len()
            )));
        }

        for (hash, remaining) in hashes.iter().zip(statuses.remainingAmounts) {
            // Orders cannot disappear between the read and the write lock.
            let _ = self.sync_remaining(hash, remaining);
        }
        tracing::debug!(orders = hashes.len(), "synced limit orders from chain");
        Ok(hashes.len())
    }

    fn candidates(
        &self,
        kind: SwapKind,
        ctx: &MarketContext,
    ) -> Vec<(Arc<OrderRecord>, U256, FillMode)> {
        let Some((normal, flash)) = fill_sources(kind) else {
            return Vec::new();
        };
        let higher = wants_higher_rate(kind);

        let mut out: Vec<_> = self
            .orders
            .read()
            .values()
            .filter(|e| e.status.is_live())
            .filter(|e| e.record.order.yt == ctx.yt && e.record.order.token == ctx.sy)
            .filter(|e| e.record.expiry() > ctx.now)
            .filter(|e| {
                let rate = e.record.order.lnImpliedRate;
                if higher {
                    rate > ctx.ln_implied_rate
                } else {
                    rate < ctx.ln_implied_rate
                }
            })
            .filter_map(|e| {
                let order_type = e.record.order_type()?;
                let mode = if order_type == normal {
                    FillMode::Normal
                } else if order_type == flash {
                    FillMode::Flash
                } else {
                    return None;
                };
                Some((e.record.clone(), e.status.remaining(), mode))
            })
            .collect();

        out.sort_by(|(a, _, _), (b, _, _)| {
            let by_rate = a.order.lnImpliedRate.cmp(&b.order.lnImpliedRate);
            let by_rate = if higher { by_rate.reverse() } else { by_rate };
            by_rate.then_with(|| a.hash.cmp(&b.hash))
        });
        out
    }

    /// `used` carries making amounts already taken by an earlier leg.
    fn match_leg(
        &self,
        kind: SwapKind,
        amount_in: U256,
        ctx: &MarketContext,
        used: &mut HashMap<B256, U256>,
        result: &mut MatchResult,
    ) -> (U256, U256) {
        let mut left = amount_in;
        let mut consumed = U256::ZERO;
        let mut produced = U256::ZERO;

        for (record, remaining, mode) in self.candidates(kind, ctx) {
            if left.is_zero() {
                break;
            }
            let taken = used.get(&record.hash).copied().unwrap_or_default();
            let remaining = remaining.saturating_sub(taken);
            let Some((making, settlement)) = quote_fill(&record, remaining, kind, left, ctx) else {
                continue;
            };
            *used.entry(record.hash).or_default() += making;
            left -= settlement.taker_in;
            consumed += settlement.taker_in;
            produced += settlement.taker_out;
            result.total_fee += settlement.fee;

            let fill = Fill {
                order_hash: record.hash,
                order: record,
                kind,
                mode,
                making_amount: making,
                taker_in: settlement.taker_in,
                taker_out: settlement.taker_out,
                fee: settlement.fee,
            };
            match mode {
                FillMode::Normal => result.normal_fills.push(fill),
                FillMode::Flash => result.flash_fills.push(fill),
            }
        }
        (consumed, produced)
    }
}

fn status_for(remaining: U256) -> OrderStatus {
    if remaining.is_zero() {
        OrderStatus::Filled
    } else {
        OrderStatus::PartiallyFilled { remaining }
    }
}

impl LimitOrderMatcher for BookMatcher {
    fn match_orders(&self, kind: SwapKind, amount_in: U256, ctx: &MarketContext) -> MatchResult {
        let mut result = MatchResult::default();
        if amount_in.is_zero() {
            return result;
        }
        let mut used = HashMap::new();

        match kind.legs() {
            Some((sell, buy)) => {
                let (sold, sy) = self.match_leg(sell, amount_in, ctx, &mut used, &mut result);
                let (spent, bought) = self.match_leg(buy, sy, ctx, &mut used, &mut result);
                result.net_input_from_taker = sold;
                result.net_output_to_taker = bought;
                result.residual_sy = sy - spent;
            }
            None => {
                let (consumed, produced) = self.match_leg(kind, amount_in, ctx, &mut used, &mut result);
                result.net_input_from_taker = consumed;
                result.net_output_to_taker = produced;
            }
        }

        if !result.is_empty() {
            tracing::debug!(
                %kind,
                fills = result.fill_count(),
                input = %result.net_input_from_taker,
                output = %result.net_output_to_taker,
                "matched limit orders"
            );
        }
        result
    }
}
