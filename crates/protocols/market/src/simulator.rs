//! Quote Simulator
//!
//! Simulates one route against a chain snapshot using the router-static
//! contract. Every read is pinned to the snapshot block and goes through the
//! shared batcher, so routes simulated concurrently share round trips.
//! Nothing here sends a transaction.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use evm_client::{BlockRef, CallBatcher, ClientError};
use yieldkit_core::{Slippage, TokenAmount};
use yieldkit_tx::abi::IRouterStatic;
use yieldkit_tx::decode_revert;

use crate::aggregator::{Aggregator, AggregatorQuote};
use crate::gas::GasModel;
use crate::limit_order::{LimitOrderMatcher, MarketContext, MatchResult};
use crate::route::{
    LegPath, MintTarget, Route, RouteSimulationResult, SimStep, SimulatedOutput,
    SimulationFailure, SwapKind, TokenLeg,
};
use crate::state::{ChainSnapshot, MarketState};

/// Node messages meaning the pinned block is no longer served
const STALE_MARKERS: [&str; 3] = ["missing trie node", "header not found", "unknown block"];

/// Map a read failure to a route-local failure
pub fn failure_from_client(err: ClientError) -> SimulationFailure {
    match err {
        ClientError::Reverted { data, message } => {
            let mut reason = decode_revert(&data);
            if data.is_empty() && !message.is_empty() {
                reason.message = message;
            }
            match reason.name.as_deref() {
                Some("MarketInsufficientPtForTrade") | Some("MarketInsufficientSyForTrade") => {
                    SimulationFailure::InsufficientLiquidity(reason.to_string())
                }
                _ => SimulationFailure::Reverted(reason),
            }
        }
        ClientError::Timeout { after_ms, .. } => SimulationFailure::Timeout { after_ms },
        ClientError::Rpc { message, .. } if is_stale(&message) => {
            SimulationFailure::StaleState(message)
        }
        other => SimulationFailure::Network(other.to_string()),
    }
}

fn is_stale(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    STALE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Accumulates what a route did while it is simulated
#[derive(Default)]
struct Trace {
    steps: Vec<SimStep>,
    gas: u64,
    limit_match: Option<MatchResult>,
    aggregator_quote: Option<AggregatorQuote>,
    net_sy_fee: U256,
}

impl Trace {
    fn step(&mut self, action: &'static str, amount_in: U256, amount_out: U256) {
        self.steps.push(SimStep {
            action,
            amount_in,
            amount_out,
        });
    }

    fn finish(
        self,
        net_output: U256,
        output_token: Address,
        intermediate_sy: U256,
    ) -> SimulatedOutput {
        SimulatedOutput {
            net_output,
            output_token,
            gas_estimate: self.gas,
            steps: self.steps,
            limit_match: self.limit_match,
            aggregator_quote: self.aggregator_quote,
            net_sy_fee: self.net_sy_fee,
            intermediate_sy,
        }
    }
}

pub struct QuoteSimulator {
    batcher: Arc<CallBatcher>,
    router_static: Address,
    aggregator: Arc<dyn Aggregator>,
    matcher: Arc<dyn LimitOrderMatcher>,
    gas: GasModel,
    limit_fee_wad: U256,
    aggregator_slippage: Slippage,
}

impl QuoteSimulator {
    pub fn new(
        batcher: Arc<CallBatcher>,
        router_static: Address,
        aggregator: Arc<dyn Aggregator>,
        matcher: Arc<dyn LimitOrderMatcher>,
        gas: GasModel,
    ) -> Self {
        Self {
            batcher,
            router_static,
            aggregator,
            matcher,
            gas,
            limit_fee_wad: U256::ZERO,
            aggregator_slippage: Slippage::default(),
        }
    }

    pub fn with_limit_fee(mut self, fee_wad: U256) -> Self {
        self.limit_fee_wad = fee_wad;
        self
    }

    pub fn with_aggregator_slippage(mut self, slippage: Slippage) -> Self {
        self.aggregator_slippage = slippage;
        self
    }

    /// Pricing inputs the matcher sees for `state` at the snapshot time
    pub fn market_context(&self, state: &MarketState, snapshot: &ChainSnapshot) -> MarketContext {
        MarketContext {
            sy: state.sy,
            yt: state.yt,
            ln_implied_rate: state.ln_implied_rate,
            py_index: state.py_index,
            time_to_expiry: state.time_to_expiry(snapshot.timestamp),
            now: snapshot.timestamp,
            fee_wad: self.limit_fee_wad,
        }
    }

    /// Simulate `route` against `snapshot`. Read-only.
    pub async fn simulate(&self, route: &Route, snapshot: &ChainSnapshot) -> RouteSimulationResult {
        let result = self.run(route, snapshot).await;
        match &result {
            Ok(out) => tracing::debug!(
                route = %route,
                block = snapshot.block,
                output = %out.net_output,
                gas = out.gas_estimate,
                "route simulated"
            ),
            Err(cause) => tracing::debug!(
                route = %route,
                block = snapshot.block,
                cause = %cause,
                "route simulation failed"
            ),
        }
        result
    }

    async fn run(&self, route: &Route, snapshot: &ChainSnapshot) -> RouteSimulationResult {
        let amount = match route {
            Route::DualSideAdd {
                amount_in, pt_in, ..
            } => amount_in.saturating_add(*pt_in),
            other => other.amount_in(),
        };
        if amount.is_zero() {
            return Err(SimulationFailure::InvalidRoute("zero amount".to_string()));
        }

        let state = live_market(snapshot, route.market())?;
        let block = snapshot.block;
        let mut trace = Trace {
            gas: self.gas.base(),
            ..Trace::default()
        };

        match route {
            Route::DirectSwap {
                kind,
                leg,
                amount_in,
                ..
            } => {
                self.direct_swap(state, snapshot, *kind, leg.as_ref(), *amount_in, trace)
                    .await
            }

            Route::SwapThenMint {
                target,
                leg,
                amount_in,
                ..
            } => {
                let sy = self.leg_in(leg, state.sy, *amount_in, block, &mut trace).await?;
                match target {
                    MintTarget::Pt => {
                        self.buy(state, snapshot, SwapKind::TokenForPt, sy, trace)
                            .await
                    }
                    MintTarget::Yt => {
                        self.buy(state, snapshot, SwapKind::TokenForYt, sy, trace)
                            .await
                    }
                    MintTarget::Py => {
                        let py = self
                            .read(
                                IRouterStatic::mintPyFromSyStaticCall {
                                    yt: state.yt,
                                    netSyIn: sy,
                                },
                                block,
                            )
                            .await?;
                        trace.step("mint_py", sy, py);
                        trace.gas += self.gas.mint_py();
                        Ok(trace.finish(py, state.yt, sy))
                    }
                }
            }

            Route::MintThenAdd { leg, amount_in, .. } => {
                let sy = self.leg_in(leg, state.sy, *amount_in, block, &mut trace).await?;
                let added = self
                    .read(
                        IRouterStatic::addLiquiditySingleSyStaticCall {
                            market: state.market,
                            netSyIn: sy,
                        },
                        block,
                    )
                    .await?;
                trace.step("add_liquidity", sy, added.netLpOut);
                trace.net_sy_fee += added.netSyFee;
                trace.gas += self.gas.add_liquidity();
                Ok(trace.finish(added.netLpOut, state.market, sy))
            }

            Route::DualSideAdd {
                leg,
                amount_in,
                pt_in,
                ..
            } => {
                let sy = if amount_in.is_zero() {
                    U256::ZERO
                } else {
                    self.leg_in(leg, state.sy, *amount_in, block, &mut trace).await?
                };
                let added = self
                    .read(
                        IRouterStatic::addLiquidityDualSyAndPtStaticCall {
                            market: state.market,
                            netSyDesired: sy,
                            netPtDesired: *pt_in,
                        },
                        block,
                    )
                    .await?;
                trace.step("add_liquidity_dual", sy.saturating_add(*pt_in), added.netLpOut);
                trace.gas += self.gas.add_liquidity();
                Ok(trace.finish(added.netLpOut, state.market, added.netSyUsed))
            }

            Route::RemoveThenSwap { lp_in, leg, .. } => {
                let sy = self.remove_to_sy(state, *lp_in, block, &mut trace).await?;
                let out = self.leg_out(leg, state.sy, sy, block, &mut trace).await?;
                Ok(trace.finish(out, leg.token, sy))
            }

            Route::CrossMarketMigrate {
                to_market, lp_in, ..
            } => {
                let target = live_market(snapshot, *to_market)?;
                if target.sy != state.sy {
                    return Err(SimulationFailure::InvalidRoute(
                        "markets do not share an SY".to_string(),
                    ));
                }
                let sy = self.remove_to_sy(state, *lp_in, block, &mut trace).await?;
                let added = self
                    .read(
                        IRouterStatic::addLiquiditySingleSyStaticCall {
                            market: target.market,
                            netSyIn: sy,
                        },
                        block,
                    )
                    .await?;
                trace.step("add_liquidity", sy, added.netLpOut);
                trace.net_sy_fee += added.netSyFee;
                trace.gas += self.gas.add_liquidity();
                Ok(trace.finish(added.netLpOut, target.market, sy))
            }
        }
    }

    async fn direct_swap(
        &self,
        state: &MarketState,
        snapshot: &ChainSnapshot,
        kind: SwapKind,
        leg: Option<&TokenLeg>,
        amount_in: U256,
        mut trace: Trace,
    ) -> RouteSimulationResult {
        let block = snapshot.block;
        match (kind, leg) {
            (SwapKind::TokenForPt | SwapKind::TokenForYt, Some(leg)) => {
                let sy = self.leg_in(leg, state.sy, amount_in, block, &mut trace).await?;
                self.buy(state, snapshot, kind, sy, trace).await
            }
            (SwapKind::PtForToken | SwapKind::YtForToken, Some(leg)) => {
                let sy = self.sell(state, snapshot, kind, amount_in, &mut trace).await?;
                let out = self.leg_out(leg, state.sy, sy, block, &mut trace).await?;
                Ok(trace.finish(out, leg.token, sy))
            }
            (SwapKind::PtForYt | SwapKind::YtForPt, None) => {
                self.cross_swap(state, snapshot, kind, amount_in, trace).await
            }
            _ => Err(SimulationFailure::InvalidRoute(format!(
                "{} swap with mismatched token leg",
                kind
            ))),
        }
    }

    /// SY into PT or YT: limit fills first, the AMM takes the remainder.
    async fn buy(
        &self,
        state: &MarketState,
        snapshot: &ChainSnapshot,
        kind: SwapKind,
        sy: U256,
        mut trace: Trace,
    ) -> RouteSimulationResult {
        let ctx = self.market_context(state, snapshot);
        let matched = self.matcher.match_orders(kind, sy, &ctx);
        let rest = sy.saturating_sub(matched.net_input_from_taker);

        let block = snapshot.block;
        let (amm_out, output_token) = match kind {
            SwapKind::TokenForPt => (
                self.amm_sy_for_pt(state, rest, block, &mut trace).await?,
                state.pt,
            ),
            _ => (
                self.amm_sy_for_yt(state, rest, block, &mut trace).await?,
                state.yt,
            ),
        };

        let out = matched.net_output_to_taker + amm_out;
        self.record_match(&mut trace, matched);
        Ok(trace.finish(out, output_token, sy))
    }

    /// PT or YT into SY: limit fills first, the AMM takes the remainder.
    async fn sell(
        &self,
        state: &MarketState,
        snapshot: &ChainSnapshot,
        kind: SwapKind,
        amount: U256,
        trace: &mut Trace,
    ) -> Result<U256, SimulationFailure> {
        let ctx = self.market_context(state, snapshot);
        let matched = self.matcher.match_orders(kind, amount, &ctx);
        let rest = amount.saturating_sub(matched.net_input_from_taker);

        let amm_out = match kind {
            SwapKind::PtForToken => self.amm_pt_for_sy(state, rest, snapshot.block, trace).await?,
            _ => self.amm_yt_for_sy(state, rest, snapshot.block, trace).await?,
        };

        let sy = matched.net_output_to_taker + amm_out;
        self.record_match(trace, matched);
        Ok(sy)
    }

    /// PT<->YT: sell leg into SY, buy leg out of it, both through fills then AMM.
    async fn cross_swap(
        &self,
        state: &MarketState,
        snapshot: &ChainSnapshot,
        kind: SwapKind,
        amount: U256,
        mut trace: Trace,
    ) -> RouteSimulationResult {
        let block = snapshot.block;
        let ctx = self.market_context(state, snapshot);
        let matched = self.matcher.match_orders(kind, amount, &ctx);
        let rest = amount.saturating_sub(matched.net_input_from_taker);

        let (sold_sy, bought, output_token) = match kind {
            SwapKind::PtForYt => {
                let sy = self.amm_pt_for_sy(state, rest, block, &mut trace).await?;
                let total = sy + matched.residual_sy;
                let yt = self.amm_sy_for_yt(state, total, block, &mut trace).await?;
                (total, yt, state.yt)
            }
            _ => {
                let sy = self.amm_yt_for_sy(state, rest, block, &mut trace).await?;
                let total = sy + matched.residual_sy;
                let pt = self.amm_sy_for_pt(state, total, block, &mut trace).await?;
                (total, pt, state.pt)
            }
        };

        let out = matched.net_output_to_taker + bought;
        self.record_match(&mut trace, matched);
        Ok(trace.finish(out, output_token, sold_sy))
    }

    fn record_match(&self, trace: &mut Trace, matched: MatchResult) {
        if matched.is_empty() {
            return;
        }
        trace.step("limit_orders", matched.net_input_from_taker, matched.net_output_to_taker);
        trace.gas += self.gas.limit_fills(matched.fill_count());
        trace.limit_match = Some(matched);
    }

    async fn amm_sy_for_pt(
        &self,
        state: &MarketState,
        sy: U256,
        block: u64,
        trace: &mut Trace,
    ) -> Result<U256, SimulationFailure> {
        if sy.is_zero() {
            return Ok(U256::ZERO);
        }
        let r = self
            .read(
                IRouterStatic::swapExactSyForPtStaticCall {
                    market: state.market,
                    exactSyIn: sy,
                },
                block,
            )
            .await?;
        self.amm_step(trace, "swap_sy_for_pt", sy, r.netPtOut, r.netSyFee);
        Ok(r.netPtOut)
    }

    async fn amm_sy_for_yt(
        &self,
        state: &MarketState,
        sy: U256,
        block: u64,
        trace: &mut Trace,
    ) -> Result<U256, SimulationFailure> {
        if sy.is_zero() {
            return Ok(U256::ZERO);
        }
        let r = self
            .read(
                IRouterStatic::swapExactSyForYtStaticCall {
                    market: state.market,
                    exactSyIn: sy,
                },
                block,
            )
            .await?;
        self.amm_step(trace, "swap_sy_for_yt", sy, r.netYtOut, r.netSyFee);
        Ok(r.netYtOut)
    }

    async fn amm_pt_for_sy(
        &self,
        state: &MarketState,
        pt: U256,
        block: u64,
        trace: &mut Trace,
    ) -> Result<U256, SimulationFailure> {
        if pt.is_zero() {
            return Ok(U256::ZERO);
        }
        let r = self
            .read(
                IRouterStatic::swapExactPtForSyStaticCall {
                    market: state.market,
                    exactPtIn: pt,
                },
                block,
            )
            .await?;
        self.amm_step(trace, "swap_pt_for_sy", pt, r.netSyOut, r.netSyFee);
        Ok(r.netSyOut)
    }

    async fn amm_yt_for_sy(
        &self,
        state: &MarketState,
        yt: U256,
        block: u64,
        trace: &mut Trace,
    ) -> Result<U256, SimulationFailure> {
        if yt.is_zero() {
            return Ok(U256::ZERO);
        }
        let r = self
            .read(
                IRouterStatic::swapExactYtForSyStaticCall {
                    market: state.market,
                    exactYtIn: yt,
                },
                block,
            )
            .await?;
        self.amm_step(trace, "swap_yt_for_sy", yt, r.netSyOut, r.netSyFee);
        Ok(r.netSyOut)
    }

    fn amm_step(
        &self,
        trace: &mut Trace,
        action: &'static str,
        amount_in: U256,
        amount_out: U256,
        fee: U256,
    ) {
        trace.step(action, amount_in, amount_out);
        trace.net_sy_fee += fee;
        trace.gas += self.gas.market_swaps(1);
    }

    /// Remove liquidity and sell the PT share back to SY
    async fn remove_to_sy(
        &self,
        state: &MarketState,
        lp_in: U256,
        block: u64,
        trace: &mut Trace,
    ) -> Result<U256, SimulationFailure> {
        let removed = self
            .read(
                IRouterStatic::removeLiquidityDualSyAndPtStaticCall {
                    market: state.market,
                    netLpToRemove: lp_in,
                },
                block,
            )
            .await?;
        trace.step("remove_liquidity", lp_in, removed.netSyOut);
        trace.gas += self.gas.remove_liquidity();

        let swapped = self.amm_pt_for_sy(state, removed.netPtOut, block, trace).await?;
        Ok(removed.netSyOut + swapped)
    }

    async fn leg_in(
        &self,
        leg: &TokenLeg,
        sy: Address,
        amount: U256,
        block: u64,
        trace: &mut Trace,
    ) -> Result<U256, SimulationFailure> {
        trace.gas += self.gas.leg_in(leg);
        let (mint_token, mint_amount) = match leg.path {
            LegPath::Identity => return Ok(amount),
            LegPath::Native | LegPath::Bulk(_) => (leg.token, amount),
            LegPath::Aggregator => {
                let quote = self.aggregator_quote(leg.token, amount, leg.sy_token).await?;
                let out = quote.amount_out.amount;
                trace.step("aggregator_swap", amount, out);
                trace.aggregator_quote = Some(quote);
                (leg.sy_token, out)
            }
        };

        let sy_out = self
            .read(
                IRouterStatic::mintSyFromTokenStaticCall {
                    sy,
                    tokenIn: mint_token,
                    netTokenIn: mint_amount,
                    bulk: leg.bulk_address(),
                },
                block,
            )
            .await?;
        trace.step("mint_sy", mint_amount, sy_out);
        Ok(sy_out)
    }

    async fn leg_out(
        &self,
        leg: &TokenLeg,
        sy: Address,
        amount: U256,
        block: u64,
        trace: &mut Trace,
    ) -> Result<U256, SimulationFailure> {
        trace.gas += self.gas.leg_out(leg);
        if leg.path == LegPath::Identity {
            return Ok(amount);
        }

        let redeemed = self
            .read(
                IRouterStatic::redeemSyToTokenStaticCall {
                    sy,
                    tokenOut: leg.sy_token,
                    netSyIn: amount,
                    bulk: leg.bulk_address(),
                },
                block,
            )
            .await?;
        trace.step("redeem_sy", amount, redeemed);

        if !leg.uses_aggregator() {
            return Ok(redeemed);
        }
        let quote = self.aggregator_quote(leg.sy_token, redeemed, leg.token).await?;
        let out = quote.amount_out.amount;
        trace.step("aggregator_swap", redeemed, out);
        trace.aggregator_quote = Some(quote);
        Ok(out)
    }

    async fn aggregator_quote(
        &self,
        token_in: Address,
        amount: U256,
        token_out: Address,
    ) -> Result<AggregatorQuote, SimulationFailure> {
        match self
            .aggregator
            .quote(TokenAmount::new(token_in, amount), token_out, self.aggregator_slippage)
            .await
        {
            Ok(Some(quote)) => Ok(quote),
            Ok(None) => Err(SimulationFailure::NoAggregatorRoute {
                token_in,
                token_out,
            }),
            Err(e) => Err(SimulationFailure::Network(format!("aggregator: {}", e))),
        }
    }

    async fn read<C: SolCall>(&self, call: C, block: u64) -> Result<C::Return, SimulationFailure> {
        self.batcher
            .read_typed(self.router_static, &call, BlockRef::Number(block))
            .await
            .map_err(failure_from_client)
    }
}

fn live_market(
    snapshot: &ChainSnapshot,
    market: Address,
) -> Result<&MarketState, SimulationFailure> {
    let state = snapshot.market(&market).ok_or_else(|| {
        SimulationFailure::StaleState(format!("market {} missing from snapshot", market))
    })?;
    if snapshot.timestamp >= state.expiry {
        return Err(SimulationFailure::InvalidRoute(format!(
            "market {} expired",
            market
        )));
    }
    Ok(state)
}
