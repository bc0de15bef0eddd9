//! In-memory chain and fixtures for tests
//!
//! `MockChain` answers the router, static router, limit router, SY, ERC-20
//! and Multicall3 calls the crate makes. Market pricing follows the implied
//! rate curve in `crate::math`, and the static router and the router share
//! one execution path, so a simulated route and its executed transaction
//! agree to the wei on unchanged state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alloy::primitives::{keccak256, Address, Bytes, TxHash, B256, I256, U256};
use alloy::sol_types::abi::TokenSeq;
use alloy::sol_types::{Revert, SolCall, SolError, SolInterface, SolType, SolValue};
use async_trait::async_trait;
use evm_client::abi::{IMulticall3, IERC20};
use evm_client::{
    BatchConfig, BlockRef, CallBatcher, CallRequest, ChainClient, ClientError, ReceiptInfo,
    RetryPolicy, TransactionSender, TxOverrides,
};
use parking_lot::Mutex;
use yieldkit_core::constants::WAD;
use yieldkit_core::{
    ContractAddresses, Result, RoutingConfig, SdkConfig, SdkError, Slippage, TokenAmount,
    NATIVE_TOKEN,
};
use yieldkit_tx::abi::{
    ILimitRouter, IProtocolErrors, IRouter, IRouterStatic, IStandardizedYield, LimitOrderData,
    MarketStateView, Order, SwapData, TokenInput, TokenOutput,
};

use crate::aggregator::{Aggregator, AggregatorQuote, NoAggregator};
use crate::fetch::fetch_snapshot;
use crate::gas::{GasFeeEstimator, GasModel};
use crate::limit_order::{
    order_hash, settle_fill, BookMatcher, LimitOrderMatcher, MarketContext, NoopMatcher,
    OrderType,
};
use crate::math::{mul_div_down, pt_price_in_sy, yt_price_in_sy};
use crate::route::SwapKind;
use crate::simulator::QuoteSimulator;
use crate::state::{ChainSnapshot, MarketBook, MarketInfo};

pub const E18: u128 = 1_000_000_000_000_000_000;

/// Gas reported by `estimate_gas` for any call that does not revert
pub const MOCK_GAS: u64 = 250_000;

type RevertData = Bytes;
type Exec<T> = std::result::Result<T, RevertData>;

fn revert(message: &str) -> RevertData {
    Revert {
        reason: message.to_string(),
    }
    .abi_encode()
    .into()
}

fn error<E: SolError>(err: E) -> RevertData {
    err.abi_encode().into()
}

fn encode<T: SolValue>(values: T) -> Bytes
where
    for<'a> <T::SolType as SolType>::Token<'a>: TokenSeq<'a>,
{
    values.abi_encode_params().into()
}

fn signed(value: U256) -> I256 {
    I256::from_raw(value)
}

/// One market's reserves and pricing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockMarket {
    pub sy: Address,
    pub pt: Address,
    pub yt: Address,
    pub expiry: u64,
    pub total_pt: U256,
    pub total_sy: U256,
    pub total_lp: U256,
    pub ln_implied_rate: U256,
    pub py_index: U256,
    /// Swap fee on the SY side (1e18 = 100%)
    pub fee_wad: U256,
}

impl MockMarket {
    fn tte(&self, now: u64) -> u64 {
        self.expiry.saturating_sub(now)
    }

    fn pt_price(&self, now: u64) -> U256 {
        pt_price_in_sy(self.ln_implied_rate, self.tte(now), self.py_index)
    }

    fn yt_price(&self, now: u64) -> U256 {
        yt_price_in_sy(self.ln_implied_rate, self.tte(now), self.py_index)
    }

    fn fee(&self, sy: U256) -> U256 {
        mul_div_down(sy, self.fee_wad, WAD)
    }

    fn pool_value(&self, now: u64) -> U256 {
        self.total_sy + mul_div_down(self.total_pt, self.pt_price(now), WAD)
    }

    fn live(&self, now: u64) -> Exec<()> {
        if now >= self.expiry {
            return Err(error(IProtocolErrors::MarketExpired {}));
        }
        Ok(())
    }

    fn swap_sy_for_pt(&mut self, sy: U256, now: u64) -> Exec<(U256, U256)> {
        self.live(now)?;
        if sy.is_zero() {
            return Err(error(IProtocolErrors::MarketZeroAmountsInput {}));
        }
        let fee = self.fee(sy);
        let pt = mul_div_down(sy - fee, WAD, self.pt_price(now));
        if pt > self.total_pt {
            return Err(error(IProtocolErrors::MarketInsufficientPtForTrade {
                currentAmount: signed(self.total_pt),
                requiredAmount: signed(pt),
            }));
        }
        self.total_pt -= pt;
        self.total_sy += sy;
        Ok((pt, fee))
    }

    fn swap_pt_for_sy(&mut self, pt: U256, now: u64) -> Exec<(U256, U256)> {
        self.live(now)?;
        if pt.is_zero() {
            return Err(error(IProtocolErrors::MarketZeroAmountsInput {}));
        }
        let gross = mul_div_down(pt, self.pt_price(now), WAD);
        let fee = self.fee(gross);
        let out = gross - fee;
        if out > self.total_sy {
            return Err(error(IProtocolErrors::MarketInsufficientSyForTrade {
                currentAmount: signed(self.total_sy),
                requiredAmount: signed(out),
            }));
        }
        self.total_pt += pt;
        self.total_sy -= out;
        Ok((out, fee))
    }

    fn swap_sy_for_yt(&mut self, sy: U256, now: u64) -> Exec<(U256, U256)> {
        self.live(now)?;
        if sy.is_zero() {
            return Err(error(IProtocolErrors::MarketZeroAmountsInput {}));
        }
        let fee = self.fee(sy);
        let yt = mul_div_down(sy - fee, WAD, self.yt_price(now));
        if yt > self.total_pt {
            return Err(error(IProtocolErrors::MarketInsufficientPtForTrade {
                currentAmount: signed(self.total_pt),
                requiredAmount: signed(yt),
            }));
        }
        self.total_sy += fee;
        Ok((yt, fee))
    }

    fn swap_yt_for_sy(&mut self, yt: U256, now: u64) -> Exec<(U256, U256)> {
        self.live(now)?;
        if yt.is_zero() {
            return Err(error(IProtocolErrors::MarketZeroAmountsInput {}));
        }
        let gross = mul_div_down(yt, self.yt_price(now), WAD);
        let fee = self.fee(gross);
        let out = gross - fee;
        if out > self.total_sy {
            return Err(error(IProtocolErrors::MarketInsufficientSyForTrade {
                currentAmount: signed(self.total_sy),
                requiredAmount: signed(out),
            }));
        }
        self.total_sy += fee;
        Ok((out, fee))
    }

    fn add_single_sy(&mut self, sy: U256, now: u64) -> Exec<(U256, U256)> {
        self.live(now)?;
        if sy.is_zero() {
            return Err(error(IProtocolErrors::MarketZeroAmountsInput {}));
        }
        let fee = self.fee(sy) / U256::from(2u8);
        let lp = mul_div_down(sy - fee, self.total_lp, self.pool_value(now));
        self.total_sy += sy;
        self.total_lp += lp;
        Ok((lp, fee))
    }

    fn add_dual(&mut self, sy: U256, pt: U256, now: u64) -> Exec<U256> {
        self.live(now)?;
        if sy.is_zero() && pt.is_zero() {
            return Err(error(IProtocolErrors::MarketZeroAmountsInput {}));
        }
        let value = sy + mul_div_down(pt, self.pt_price(now), WAD);
        let lp = mul_div_down(value, self.total_lp, self.pool_value(now));
        self.total_sy += sy;
        self.total_pt += pt;
        self.total_lp += lp;
        Ok(lp)
    }

    fn remove_dual(&mut self, lp: U256) -> Exec<(U256, U256)> {
        if lp.is_zero() {
            return Err(error(IProtocolErrors::MarketZeroAmountsInput {}));
        }
        if lp > self.total_lp {
            return Err(revert("market: lp exceeds supply"));
        }
        let sy = mul_div_down(lp, self.total_sy, self.total_lp);
        let pt = mul_div_down(lp, self.total_pt, self.total_lp);
        self.total_sy -= sy;
        self.total_pt -= pt;
        self.total_lp -= lp;
        Ok((sy, pt))
    }

    fn view(&self) -> MarketStateView {
        MarketStateView {
            sy: self.sy,
            pt: self.pt,
            yt: self.yt,
            totalPt: self.total_pt,
            totalSy: self.total_sy,
            totalLp: self.total_lp,
            lnImpliedRate: self.ln_implied_rate,
            pyIndex: self.py_index,
            expiry: U256::from(self.expiry),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MockSy {
    tokens_in: Vec<Address>,
    tokens_out: Vec<Address>,
}

#[derive(Debug, Clone)]
struct MockState {
    markets: HashMap<Address, MockMarket>,
    sys: HashMap<Address, MockSy>,
    /// SY minted per token unit; WAD when absent
    token_rates: HashMap<Address, U256>,
    /// (owner, token)
    balances: HashMap<(Address, Address), U256>,
    /// (owner, token, spender)
    allowances: HashMap<(Address, Address, Address), U256>,
    order_filled: HashMap<B256, U256>,
    order_making: HashMap<B256, U256>,
    reverts: HashMap<[u8; 4], Bytes>,
    rpc_failure: Option<String>,
    limit_fee_wad: U256,
    block: u64,
    timestamp: u64,
    gas_price: U256,
    receipts: HashMap<TxHash, ReceiptInfo>,
    nonce: u64,
}

/// Caller and value of the call being executed
#[derive(Debug, Clone, Copy)]
struct Ctx {
    from: Option<Address>,
    value: U256,
}

pub struct MockChain {
    pub router: Address,
    pub router_static: Address,
    pub limit_router: Address,
    pub multicall: Address,
    aggregator_router: Address,
    state: Mutex<MockState>,
    sent: Mutex<Vec<CallRequest>>,
    round_trips: AtomicUsize,
}

impl MockChain {
    pub fn new(
        router: Address,
        router_static: Address,
        limit_router: Address,
        multicall: Address,
    ) -> Self {
        Self {
            router,
            router_static,
            limit_router,
            multicall,
            aggregator_router: Address::new([0xa9; 20]),
            state: Mutex::new(MockState {
                markets: HashMap::new(),
                sys: HashMap::new(),
                token_rates: HashMap::new(),
                balances: HashMap::new(),
                allowances: HashMap::new(),
                order_filled: HashMap::new(),
                order_making: HashMap::new(),
                reverts: HashMap::new(),
                rpc_failure: None,
                limit_fee_wad: U256::ZERO,
                block: 100,
                timestamp: 1_700_000_000,
                gas_price: U256::from(1_000_000_000u64),
                receipts: HashMap::new(),
                nonce: 0,
            }),
            sent: Mutex::new(Vec::new()),
            round_trips: AtomicUsize::new(0),
        }
    }

    pub fn aggregator_router(&self) -> Address {
        self.aggregator_router
    }

    pub fn add_sy(&self, sy: Address, tokens_in: Vec<Address>, tokens_out: Vec<Address>) {
        self.state.lock().sys.insert(
            sy,
            MockSy {
                tokens_in,
                tokens_out,
            },
        );
    }

    pub fn add_market(&self, market: Address, state: MockMarket) {
        self.state.lock().markets.insert(market, state);
    }

    pub fn market_state(&self, market: Address) -> Option<MockMarket> {
        self.state.lock().markets.get(&market).cloned()
    }

    pub fn set_rate(&self, market: Address, ln_implied_rate: U256) {
        if let Some(m) = self.state.lock().markets.get_mut(&market) {
            m.ln_implied_rate = ln_implied_rate;
        }
    }

    pub fn set_token_rate(&self, token: Address, rate: U256) {
        self.state.lock().token_rates.insert(token, rate);
    }

    pub fn set_limit_fee(&self, fee_wad: U256) {
        self.state.lock().limit_fee_wad = fee_wad;
    }

    pub fn set_gas_price(&self, gas_price: U256) {
        self.state.lock().gas_price = gas_price;
    }

    pub fn set_timestamp(&self, timestamp: u64) {
        self.state.lock().timestamp = timestamp;
    }

    /// Every call whose selector matches reverts with `data`
    pub fn fail_selector(&self, selector: [u8; 4], data: Bytes) {
        self.state.lock().reverts.insert(selector, data);
    }

    /// Every read fails with an RPC error carrying `message`
    pub fn fail_reads(&self, message: Option<&str>) {
        self.state.lock().rpc_failure = message.map(str::to_string);
    }

    pub fn fund(&self, owner: Address, token: Address, amount: U256) {
        *self.state.lock().balances.entry((owner, token)).or_default() += amount;
    }

    pub fn balance(&self, owner: Address, token: Address) -> U256 {
        self.state
            .lock()
            .balances
            .get(&(owner, token))
            .copied()
            .unwrap_or_default()
    }

    pub fn allowance(&self, owner: Address, token: Address, spender: Address) -> U256 {
        self.state
            .lock()
            .allowances
            .get(&(owner, token, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn order_filled(&self, hash: &B256) -> U256 {
        self.state
            .lock()
            .order_filled
            .get(hash)
            .copied()
            .unwrap_or_default()
    }

    pub fn block(&self) -> u64 {
        self.state.lock().block
    }

    pub fn sent(&self) -> Vec<CallRequest> {
        self.sent.lock().clone()
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    fn execute(&self, state: &mut MockState, request: &CallRequest) -> Exec<Bytes> {
        let ctx = Ctx {
            from: request.from,
            value: request.value,
        };
        self.dispatch(state, ctx, request.to, &request.data)
    }

    fn dispatch(&self, state: &mut MockState, ctx: Ctx, to: Address, data: &Bytes) -> Exec<Bytes> {
        if let Some(selector) = data.get(..4) {
            if let Some(reason) = state.reverts.get(selector) {
                return Err(reason.clone());
            }
        }

        if to == self.multicall {
            self.multicall3(state, data)
        } else if to == self.router_static {
            self.router_static(state, data)
        } else if to == self.router {
            self.router_call(state, ctx, data)
        } else if to == self.limit_router {
            self.limit_router_call(state, data)
        } else if state.sys.contains_key(&to) {
            self.sy_call(state, ctx, to, data)
        } else {
            self.erc20(state, ctx, to, data)
        }
    }

    fn multicall3(&self, state: &mut MockState, data: &Bytes) -> Exec<Bytes> {
        let call = IMulticall3::IMulticall3Calls::abi_decode(data)
            .map_err(|_| revert("multicall: bad calldata"))?;
        match call {
            IMulticall3::IMulticall3Calls::aggregate3(c) => {
                let mut results = Vec::with_capacity(c.calls.len());
                for sub in c.calls {
                    let ctx = Ctx {
                        from: None,
                        value: U256::ZERO,
                    };
                    let mut scratch = state.clone();
                    match self.dispatch(&mut scratch, ctx, sub.target, &sub.callData) {
                        Ok(output) => results.push(IMulticall3::CallResult {
                            success: true,
                            returnData: output,
                        }),
                        Err(data) if sub.allowFailure => results.push(IMulticall3::CallResult {
                            success: false,
                            returnData: data,
                        }),
                        Err(data) => return Err(data),
                    }
                }
                Ok(IMulticall3::aggregate3Call::abi_encode_returns(&results).into())
            }
            IMulticall3::IMulticall3Calls::getEthBalance(c) => {
                let balance = state
                    .balances
                    .get(&(c.addr, NATIVE_TOKEN))
                    .copied()
                    .unwrap_or_default();
                Ok(encode((balance,)))
            }
        }
    }

    fn market<'a>(&self, state: &'a mut MockState, market: Address) -> Exec<&'a mut MockMarket> {
        state
            .markets
            .get_mut(&market)
            .ok_or_else(|| revert("unknown market"))
    }

    fn market_by_yt(&self, state: &MockState, yt: Address) -> Exec<Address> {
        state
            .markets
            .iter()
            .find(|(_, m)| m.yt == yt)
            .map(|(a, _)| *a)
            .ok_or_else(|| revert("unknown yt"))
    }

    fn mint_sy(state: &MockState, sy: Address, token: Address, amount: U256) -> Exec<U256> {
        let wrapper = state.sys.get(&sy).ok_or_else(|| revert("unknown sy"))?;
        if !wrapper.tokens_in.contains(&token) {
            return Err(error(IProtocolErrors::SYInvalidTokenIn { token }));
        }
        if amount.is_zero() {
            return Err(error(IProtocolErrors::SYZeroDeposit {}));
        }
        let rate = state.token_rates.get(&token).copied().unwrap_or(WAD);
        Ok(mul_div_down(amount, rate, WAD))
    }

    fn redeem_sy(state: &MockState, sy: Address, token: Address, amount: U256) -> Exec<U256> {
        let wrapper = state.sys.get(&sy).ok_or_else(|| revert("unknown sy"))?;
        if !wrapper.tokens_out.contains(&token) {
            return Err(error(IProtocolErrors::SYInvalidTokenOut { token }));
        }
        if amount.is_zero() {
            return Err(error(IProtocolErrors::SYZeroRedeem {}));
        }
        let rate = state.token_rates.get(&token).copied().unwrap_or(WAD);
        Ok(mul_div_down(amount, WAD, rate))
    }

    fn mint_py(state: &MockState, yt: Address, market: Address, sy: U256) -> Exec<U256> {
        let m = state.markets.get(&market).ok_or_else(|| revert("unknown market"))?;
        if state.timestamp >= m.expiry {
            return Err(error(IProtocolErrors::YCExpired {}));
        }
        if m.yt != yt || sy.is_zero() {
            return Err(revert("yield contract: bad mint"));
        }
        Ok(mul_div_down(sy, m.py_index, WAD))
    }

    fn router_static(&self, state: &mut MockState, data: &Bytes) -> Exec<Bytes> {
        use IRouterStatic::IRouterStaticCalls as C;

        let call = C::abi_decode(data).map_err(|_| revert("router static: bad calldata"))?;
        let now = state.timestamp;
        match call {
            C::getMarketState(c) => {
                let m = self.market(state, c.market)?;
                Ok(encode((m.view(),)))
            }
            C::mintSyFromTokenStatic(c) => {
                Ok(encode((Self::mint_sy(state, c.sy, c.tokenIn, c.netTokenIn)?,)))
            }
            C::redeemSyToTokenStatic(c) => {
                Ok(encode((Self::redeem_sy(state, c.sy, c.tokenOut, c.netSyIn)?,)))
            }
            C::swapExactSyForPtStatic(c) => {
                Ok(encode(self.market(state, c.market)?.swap_sy_for_pt(c.exactSyIn, now)?))
            }
            C::swapExactPtForSyStatic(c) => {
                Ok(encode(self.market(state, c.market)?.swap_pt_for_sy(c.exactPtIn, now)?))
            }
            C::swapExactSyForYtStatic(c) => {
                Ok(encode(self.market(state, c.market)?.swap_sy_for_yt(c.exactSyIn, now)?))
            }
            C::swapExactYtForSyStatic(c) => {
                Ok(encode(self.market(state, c.market)?.swap_yt_for_sy(c.exactYtIn, now)?))
            }
            C::addLiquiditySingleSyStatic(c) => {
                Ok(encode(self.market(state, c.market)?.add_single_sy(c.netSyIn, now)?))
            }
            C::addLiquidityDualSyAndPtStatic(c) => {
                let lp = self
                    .market(state, c.market)?
                    .add_dual(c.netSyDesired, c.netPtDesired, now)?;
                Ok(encode((lp, c.netSyDesired, c.netPtDesired)))
            }
            C::removeLiquidityDualSyAndPtStatic(c) => {
                Ok(encode(self.market(state, c.market)?.remove_dual(c.netLpToRemove)?))
            }
            C::mintPyFromSyStatic(c) => {
                let market = self.market_by_yt(state, c.yt)?;
                Ok(encode((Self::mint_py(state, c.yt, market, c.netSyIn)?,)))
            }
        }
    }

    fn pull(&self, state: &mut MockState, ctx: Ctx, token: Address, amount: U256) -> Exec<()> {
        if token == NATIVE_TOKEN {
            if ctx.value < amount {
                return Err(revert("router: insufficient msg.value"));
            }
            return Ok(());
        }
        let Some(from) = ctx.from else {
            return Ok(());
        };
        let allowance = state
            .allowances
            .entry((from, token, self.router))
            .or_default();
        if *allowance < amount {
            return Err(revert("ERC20: insufficient allowance"));
        }
        *allowance -= amount;
        let balance = state.balances.entry((from, token)).or_default();
        if *balance < amount {
            return Err(revert("ERC20: transfer amount exceeds balance"));
        }
        *balance -= amount;
        Ok(())
    }

    fn credit(state: &mut MockState, receiver: Address, token: Address, amount: U256) {
        *state.balances.entry((receiver, token)).or_default() += amount;
    }

    fn aggregator_swap(&self, swap: &SwapData, token_in: Address, amount: U256) -> Exec<U256> {
        if swap.extRouter != self.aggregator_router {
            return Err(revert("router: unknown aggregator"));
        }
        let (quoted_in, amount_in, _token_out, amount_out) =
            <(Address, U256, Address, U256)>::abi_decode_params(&swap.extCalldata)
                .map_err(|_| revert("aggregator: bad calldata"))?;
        if quoted_in != token_in {
            return Err(revert("aggregator: token mismatch"));
        }
        Ok(mul_div_down(amount, amount_out, amount_in))
    }

    fn take_input(
        &self,
        state: &mut MockState,
        ctx: Ctx,
        input: &TokenInput,
        sy: Address,
    ) -> Exec<U256> {
        if input.netTokenIn.is_zero() {
            return Ok(U256::ZERO);
        }
        self.pull(state, ctx, input.tokenIn, input.netTokenIn)?;
        let (mint_token, mint_amount) = if input.swapData.extRouter.is_zero() {
            (input.tokenIn, input.netTokenIn)
        } else {
            let out = self.aggregator_swap(&input.swapData, input.tokenIn, input.netTokenIn)?;
            (input.tokenMintSy, out)
        };
        if mint_token == sy {
            return Ok(mint_amount);
        }
        Self::mint_sy(state, sy, mint_token, mint_amount)
    }

    fn give_output(
        &self,
        state: &mut MockState,
        receiver: Address,
        output: &TokenOutput,
        sy: Address,
        sy_amount: U256,
    ) -> Exec<U256> {
        let redeemed = if output.tokenRedeemSy == sy {
            sy_amount
        } else {
            Self::redeem_sy(state, sy, output.tokenRedeemSy, sy_amount)?
        };
        let out = if output.swapData.extRouter.is_zero() {
            redeemed
        } else {
            self.aggregator_swap(&output.swapData, output.tokenRedeemSy, redeemed)?
        };
        if out < output.minTokenOut {
            return Err(error(IProtocolErrors::RouterInsufficientTokenOut {
                actualTokenOut: out,
                requiredTokenOut: output.minTokenOut,
            }));
        }
        Self::credit(state, receiver, output.tokenOut, out);
        Ok(out)
    }

    /// Replay limit fills; returns (taker input consumed, taker output)
    fn fill_limit(
        &self,
        state: &mut MockState,
        market: Address,
        data: &LimitOrderData,
        kind: SwapKind,
        budget: U256,
    ) -> Exec<(U256, U256)> {
        if data.normalFills.is_empty() && data.flashFills.is_empty() {
            return Ok((U256::ZERO, U256::ZERO));
        }
        if data.limitRouter != self.limit_router {
            return Err(revert("router: unknown limit router"));
        }
        let m = state.markets.get(&market).ok_or_else(|| revert("unknown market"))?;
        let ctx = MarketContext {
            sy: m.sy,
            yt: m.yt,
            ln_implied_rate: m.ln_implied_rate,
            py_index: m.py_index,
            time_to_expiry: m.tte(state.timestamp),
            now: state.timestamp,
            fee_wad: state.limit_fee_wad,
        };

        let (mut taker_in, mut taker_out) = (U256::ZERO, U256::ZERO);
        for params in data.normalFills.iter().chain(data.flashFills.iter()) {
            let hash = order_hash(&params.order);
            if params.order.expiry <= U256::from(ctx.now) {
                return Err(error(IProtocolErrors::LOOrderExpired { orderHash: hash }));
            }
            let filled = state.order_filled.get(&hash).copied().unwrap_or_default();
            let remaining = params.order.makingAmount.saturating_sub(filled);
            if params.makingAmount > remaining {
                return Err(error(IProtocolErrors::LOInsufficientMakingAmount {
                    orderHash: hash,
                    remaining,
                    requested: params.makingAmount,
                }));
            }
            let settlement = settle_fill(&params.order, params.makingAmount, kind, &ctx)
                .ok_or_else(|| revert("limit router: unfillable order"))?;
            state.order_filled.insert(hash, filled + params.makingAmount);
            state.order_making.insert(hash, params.order.makingAmount);
            taker_in += settlement.taker_in;
            taker_out += settlement.taker_out;
        }
        if taker_in > budget {
            return Err(revert("limit router: fills exceed input"));
        }
        Ok((taker_in, taker_out))
    }

    fn router_call(&self, state: &mut MockState, ctx: Ctx, data: &Bytes) -> Exec<Bytes> {
        use IRouter::IRouterCalls as C;

        let call = C::abi_decode(data).map_err(|_| revert("router: bad calldata"))?;
        let now = state.timestamp;
        match call {
            C::swapExactTokenForPt(c) => {
                let m = self.market(state, c.market)?.clone();
                m.live(now)?;
                let sy = self.take_input(state, ctx, &c.input, m.sy)?;
                let (fill_in, fill_out) =
                    self.fill_limit(state, c.market, &c.limit, SwapKind::TokenForPt, sy)?;
                let rest = sy - fill_in;
                let (amm, fee) = if rest.is_zero() {
                    (U256::ZERO, U256::ZERO)
                } else {
                    self.market(state, c.market)?.swap_sy_for_pt(rest, now)?
                };
                let out = fill_out + amm;
                if out < c.minPtOut {
                    return Err(error(IProtocolErrors::RouterInsufficientPtOut {
                        actualPtOut: out,
                        requiredPtOut: c.minPtOut,
                    }));
                }
                Self::credit(state, c.receiver, m.pt, out);
                Ok(encode((out, fee)))
            }
            C::swapExactTokenForYt(c) => {
                let m = self.market(state, c.market)?.clone();
                m.live(now)?;
                let sy = self.take_input(state, ctx, &c.input, m.sy)?;
                let (fill_in, fill_out) =
                    self.fill_limit(state, c.market, &c.limit, SwapKind::TokenForYt, sy)?;
                let rest = sy - fill_in;
                let (amm, fee) = if rest.is_zero() {
                    (U256::ZERO, U256::ZERO)
                } else {
                    self.market(state, c.market)?.swap_sy_for_yt(rest, now)?
                };
                let out = fill_out + amm;
                if out < c.minYtOut {
                    return Err(error(IProtocolErrors::RouterInsufficientYtOut {
                        actualYtOut: out,
                        requiredYtOut: c.minYtOut,
                    }));
                }
                Self::credit(state, c.receiver, m.yt, out);
                Ok(encode((out, fee)))
            }
            C::swapExactPtForToken(c) => {
                let m = self.market(state, c.market)?.clone();
                m.live(now)?;
                self.pull(state, ctx, m.pt, c.exactPtIn)?;
                let (fill_in, fill_out) =
                    self.fill_limit(state, c.market, &c.limit, SwapKind::PtForToken, c.exactPtIn)?;
                let rest = c.exactPtIn - fill_in;
                let (amm, fee) = if rest.is_zero() {
                    (U256::ZERO, U256::ZERO)
                } else {
                    self.market(state, c.market)?.swap_pt_for_sy(rest, now)?
                };
                let out = self.give_output(state, c.receiver, &c.output, m.sy, fill_out + amm)?;
                Ok(encode((out, fee)))
            }
            C::swapExactYtForToken(c) => {
                let m = self.market(state, c.market)?.clone();
                m.live(now)?;
                self.pull(state, ctx, m.yt, c.exactYtIn)?;
                let (fill_in, fill_out) =
                    self.fill_limit(state, c.market, &c.limit, SwapKind::YtForToken, c.exactYtIn)?;
                let rest = c.exactYtIn - fill_in;
                let (amm, fee) = if rest.is_zero() {
                    (U256::ZERO, U256::ZERO)
                } else {
                    self.market(state, c.market)?.swap_yt_for_sy(rest, now)?
                };
                let out = self.give_output(state, c.receiver, &c.output, m.sy, fill_out + amm)?;
                Ok(encode((out, fee)))
            }
            C::swapExactPtForYt(c) => {
                let m = self.market(state, c.market)?.clone();
                m.live(now)?;
                self.pull(state, ctx, m.pt, c.exactPtIn)?;
                let (sold, sy_from_fills) = self.fill_limit(
                    state,
                    c.market,
                    &c.sellLimit,
                    SwapKind::PtForToken,
                    c.exactPtIn,
                )?;
                let (sy_amm, sell_fee) = match c.exactPtIn - sold {
                    rest if rest.is_zero() => (U256::ZERO, U256::ZERO),
                    rest => self.market(state, c.market)?.swap_pt_for_sy(rest, now)?,
                };
                let (spent, bought) = self.fill_limit(
                    state,
                    c.market,
                    &c.buyLimit,
                    SwapKind::TokenForYt,
                    sy_from_fills,
                )?;
                let (yt_amm, buy_fee) = match sy_amm + sy_from_fills - spent {
                    total if total.is_zero() => (U256::ZERO, U256::ZERO),
                    total => self.market(state, c.market)?.swap_sy_for_yt(total, now)?,
                };
                let out = bought + yt_amm;
                if out < c.minYtOut {
                    return Err(error(IProtocolErrors::RouterInsufficientYtOut {
                        actualYtOut: out,
                        requiredYtOut: c.minYtOut,
                    }));
                }
                Self::credit(state, c.receiver, m.yt, out);
                Ok(encode((out, sell_fee + buy_fee)))
            }
            C::swapExactYtForPt(c) => {
                let m = self.market(state, c.market)?.clone();
                m.live(now)?;
                self.pull(state, ctx, m.yt, c.exactYtIn)?;
                let (sold, sy_from_fills) = self.fill_limit(
                    state,
                    c.market,
                    &c.sellLimit,
                    SwapKind::YtForToken,
                    c.exactYtIn,
                )?;
                let (sy_amm, sell_fee) = match c.exactYtIn - sold {
                    rest if rest.is_zero() => (U256::ZERO, U256::ZERO),
                    rest => self.market(state, c.market)?.swap_yt_for_sy(rest, now)?,
                };
                let (spent, bought) = self.fill_limit(
                    state,
                    c.market,
                    &c.buyLimit,
                    SwapKind::TokenForPt,
                    sy_from_fills,
                )?;
                let (pt_amm, buy_fee) = match sy_amm + sy_from_fills - spent {
                    total if total.is_zero() => (U256::ZERO, U256::ZERO),
                    total => self.market(state, c.market)?.swap_sy_for_pt(total, now)?,
                };
                let out = bought + pt_amm;
                if out < c.minPtOut {
                    return Err(error(IProtocolErrors::RouterInsufficientPtOut {
                        actualPtOut: out,
                        requiredPtOut: c.minPtOut,
                    }));
                }
                Self::credit(state, c.receiver, m.pt, out);
                Ok(encode((out, sell_fee + buy_fee)))
            }
            C::mintPyFromToken(c) => {
                let market = self.market_by_yt(state, c.yt)?;
                let m = self.market(state, market)?.clone();
                let sy = self.take_input(state, ctx, &c.input, m.sy)?;
                let py = Self::mint_py(state, c.yt, market, sy)?;
                if py < c.minPyOut {
                    return Err(error(IProtocolErrors::RouterInsufficientPyOut {
                        actualPyOut: py,
                        requiredPyOut: c.minPyOut,
                    }));
                }
                Self::credit(state, c.receiver, m.pt, py);
                Self::credit(state, c.receiver, m.yt, py);
                Ok(encode((py,)))
            }
            C::addLiquiditySingleToken(c) => {
                let m = self.market(state, c.market)?.clone();
                m.live(now)?;
                let sy = self.take_input(state, ctx, &c.input, m.sy)?;
                let (lp, fee) = self.market(state, c.market)?.add_single_sy(sy, now)?;
                self.check_lp(lp, c.minLpOut)?;
                Self::credit(state, c.receiver, c.market, lp);
                Ok(encode((lp, fee)))
            }
            C::addLiquidityDualTokenAndPt(c) => {
                let m = self.market(state, c.market)?.clone();
                m.live(now)?;
                let sy = self.take_input(state, ctx, &c.input, m.sy)?;
                if !c.netPtDesired.is_zero() {
                    self.pull(state, ctx, m.pt, c.netPtDesired)?;
                }
                let lp = self
                    .market(state, c.market)?
                    .add_dual(sy, c.netPtDesired, now)?;
                self.check_lp(lp, c.minLpOut)?;
                Self::credit(state, c.receiver, c.market, lp);
                Ok(encode((lp, c.netPtDesired, sy)))
            }
            C::addLiquiditySingleSy(c) => {
                let m = self.market(state, c.market)?.clone();
                self.pull(state, ctx, m.sy, c.netSyIn)?;
                let (lp, fee) = self.market(state, c.market)?.add_single_sy(c.netSyIn, now)?;
                self.check_lp(lp, c.minLpOut)?;
                Self::credit(state, c.receiver, c.market, lp);
                Ok(encode((lp, fee)))
            }
            C::removeLiquiditySingleToken(c) => {
                let m = self.market(state, c.market)?.clone();
                self.pull(state, ctx, c.market, c.netLpToRemove)?;
                let (sy, fee) = self.remove_to_sy(state, c.market, c.netLpToRemove, now)?;
                let out = self.give_output(state, c.receiver, &c.output, m.sy, sy)?;
                Ok(encode((out, fee)))
            }
            C::removeLiquiditySingleSy(c) => {
                let m = self.market(state, c.market)?.clone();
                self.pull(state, ctx, c.market, c.netLpToRemove)?;
                let (sy, fee) = self.remove_to_sy(state, c.market, c.netLpToRemove, now)?;
                if sy < c.minSyOut {
                    return Err(error(IProtocolErrors::RouterInsufficientSyOut {
                        actualSyOut: sy,
                        requiredSyOut: c.minSyOut,
                    }));
                }
                Self::credit(state, c.receiver, m.sy, sy);
                Ok(encode((sy, fee)))
            }
            C::multicall(c) => {
                let mut results = Vec::with_capacity(c.calls.len());
                for sub in c.calls {
                    let checkpoint = state.clone();
                    match self.router_call(state, ctx, &sub.callData) {
                        Ok(output) => results.push(IRouter::RouterCallResult {
                            success: true,
                            returnData: output,
                        }),
                        Err(data) if sub.allowFailure => {
                            *state = checkpoint;
                            results.push(IRouter::RouterCallResult {
                                success: false,
                                returnData: data,
                            });
                        }
                        Err(data) => return Err(data),
                    }
                }
                Ok(IRouter::multicallCall::abi_encode_returns(&results).into())
            }
        }
    }

    fn check_lp(&self, lp: U256, min: U256) -> Exec<()> {
        if lp < min {
            return Err(error(IProtocolErrors::RouterInsufficientLpOut {
                actualLpOut: lp,
                requiredLpOut: min,
            }));
        }
        Ok(())
    }

    fn remove_to_sy(
        &self,
        state: &mut MockState,
        market: Address,
        lp: U256,
        now: u64,
    ) -> Exec<(U256, U256)> {
        let m = self.market(state, market)?;
        let (sy, pt) = m.remove_dual(lp)?;
        if pt.is_zero() {
            return Ok((sy, U256::ZERO));
        }
        let (swapped, fee) = m.swap_pt_for_sy(pt, now)?;
        Ok((sy + swapped, fee))
    }

    fn limit_router_call(&self, state: &mut MockState, data: &Bytes) -> Exec<Bytes> {
        let call = ILimitRouter::ILimitRouterCalls::abi_decode(data)
            .map_err(|_| revert("limit router: bad calldata"))?;
        let ILimitRouter::ILimitRouterCalls::orderStatuses(c) = call;
        let (filled, remaining): (Vec<U256>, Vec<U256>) = c
            .orderHashes
            .iter()
            .map(|h| {
                let filled = state.order_filled.get(h).copied().unwrap_or_default();
                let making = state.order_making.get(h).copied().unwrap_or_default();
                (filled, making.saturating_sub(filled))
            })
            .unzip();
        Ok(encode((filled, remaining)))
    }

    fn sy_call(&self, state: &mut MockState, ctx: Ctx, sy: Address, data: &Bytes) -> Exec<Bytes> {
        use IStandardizedYield::IStandardizedYieldCalls as C;

        match C::abi_decode(data) {
            Ok(C::getTokensIn(_)) => {
                let tokens = state.sys[&sy].tokens_in.clone();
                Ok(IStandardizedYield::getTokensInCall::abi_encode_returns(&tokens).into())
            }
            Ok(C::getTokensOut(_)) => {
                let tokens = state.sys[&sy].tokens_out.clone();
                Ok(IStandardizedYield::getTokensOutCall::abi_encode_returns(&tokens).into())
            }
            // SY is also an ERC-20
            Err(_) => self.erc20(state, ctx, sy, data),
        }
    }

    fn erc20(&self, state: &mut MockState, ctx: Ctx, token: Address, data: &Bytes) -> Exec<Bytes> {
        use IERC20::IERC20Calls as C;

        let call = C::abi_decode(data).map_err(|_| revert("erc20: bad calldata"))?;
        match call {
            C::decimals(_) => Ok(encode((U256::from(18u8),))),
            C::symbol(_) => Ok(encode((format!("T{}", hex::encode(&token[..2])),))),
            C::balanceOf(c) => Ok(encode((state
                .balances
                .get(&(c.account, token))
                .copied()
                .unwrap_or_default(),))),
            C::allowance(c) => Ok(encode((state
                .allowances
                .get(&(c.owner, token, c.spender))
                .copied()
                .unwrap_or_default(),))),
            C::approve(c) => {
                let owner = ctx.from.ok_or_else(|| revert("erc20: approve without sender"))?;
                state.allowances.insert((owner, token, c.spender), c.amount);
                Ok(encode((true,)))
            }
        }
    }

    fn check_read(&self, state: &MockState, block: BlockRef) -> evm_client::Result<()> {
        if let Some(message) = &state.rpc_failure {
            return Err(ClientError::Rpc {
                code: -32000,
                message: message.clone(),
            });
        }
        if let BlockRef::Number(n) = block {
            if n > state.block {
                return Err(ClientError::Rpc {
                    code: -32000,
                    message: format!("header not found: block {}", n),
                });
            }
        }
        Ok(())
    }

    fn commit(&self, request: &CallRequest) -> evm_client::Result<TxHash> {
        self.sent.lock().push(request.clone());
        let mut state = self.state.lock();
        state.nonce += 1;
        let hash = keccak256(state.nonce.to_be_bytes());

        let mut working = state.clone();
        match self.execute(&mut working, request) {
            Ok(_) => {
                *state = working;
                state.block += 1;
                let receipt = ReceiptInfo {
                    tx_hash: hash,
                    block_number: state.block,
                    success: true,
                    gas_used: MOCK_GAS,
                };
                state.receipts.insert(hash, receipt);
                Ok(hash)
            }
            Err(data) => Err(ClientError::Reverted {
                data,
                message: "execution reverted".to_string(),
            }),
        }
    }
}

fn reverted(data: Bytes) -> ClientError {
    ClientError::Reverted {
        data,
        message: "execution reverted".to_string(),
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn call(&self, request: &CallRequest, block: BlockRef) -> evm_client::Result<Bytes> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().clone();
        self.check_read(&state, block)?;
        self.execute(&mut state, request).map_err(reverted)
    }

    async fn estimate_gas(&self, request: &CallRequest) -> evm_client::Result<u64> {
        let mut state = self.state.lock().clone();
        self.execute(&mut state, request)
            .map(|_| MOCK_GAS)
            .map_err(reverted)
    }

    async fn block_number(&self) -> evm_client::Result<u64> {
        Ok(self.state.lock().block)
    }

    async fn block_timestamp(&self, block: BlockRef) -> evm_client::Result<u64> {
        let state = self.state.lock();
        self.check_read(&state, block)?;
        Ok(state.timestamp)
    }

    async fn gas_price(&self) -> evm_client::Result<U256> {
        Ok(self.state.lock().gas_price)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> evm_client::Result<Option<ReceiptInfo>> {
        Ok(self.state.lock().receipts.get(&hash).cloned())
    }
}

/// Signs for one account on a [`MockChain`]
pub struct MockWallet {
    pub chain: Arc<MockChain>,
    pub address: Address,
}

#[async_trait]
impl TransactionSender for MockWallet {
    fn address(&self) -> Address {
        self.address
    }

    async fn send_transaction(
        &self,
        request: &CallRequest,
        _overrides: &TxOverrides,
    ) -> evm_client::Result<TxHash> {
        let mut request = request.clone();
        request.from = Some(self.address);
        self.chain.commit(&request)
    }
}

/// Aggregator quoting fixed rates; its calldata is understood by [`MockChain`]
pub struct StaticAggregator {
    router: Address,
    rates: Mutex<HashMap<(Address, Address), U256>>,
    sources: Vec<String>,
}

impl StaticAggregator {
    pub fn new(router: Address) -> Self {
        Self {
            router,
            rates: Mutex::new(HashMap::new()),
            sources: vec!["uniswap-v3".to_string(), "curve".to_string()],
        }
    }

    /// `rate_wad` units of `token_out` per unit of `token_in`
    pub fn set_rate(&self, token_in: Address, token_out: Address, rate_wad: U256) {
        self.rates.lock().insert((token_in, token_out), rate_wad);
    }
}

#[async_trait]
impl Aggregator for StaticAggregator {
    async fn quote(
        &self,
        token_in: TokenAmount,
        token_out: Address,
        _slippage: Slippage,
    ) -> Result<Option<AggregatorQuote>> {
        let Some(rate) = self.rates.lock().get(&(token_in.token, token_out)).copied() else {
            return Ok(None);
        };
        let out = mul_div_down(token_in.amount, rate, WAD);
        Ok(Some(AggregatorQuote {
            amount_in: token_in,
            amount_out: TokenAmount::new(token_out, out),
            router: self.router,
            calldata: encode((token_in.token, token_in.amount, token_out, out)),
        }))
    }

    async fn liquidity_sources(&self) -> Result<Vec<String>> {
        Ok(self.sources.clone())
    }
}

/// Gas-price source that is always down
pub struct FailingGasEstimator;

#[async_trait]
impl GasFeeEstimator for FailingGasEstimator {
    async fn estimate_gas_price(&self) -> Result<U256> {
        Err(SdkError::NetworkTransient {
            message: "gas oracle unavailable".to_string(),
        })
    }
}

/// Two markets on one SY, a funded user and the addresses wiring them up
pub struct Fixture {
    pub chain: Arc<MockChain>,
    pub batcher: Arc<CallBatcher>,
    pub config: SdkConfig,
    pub router: Address,
    pub router_static: Address,
    pub limit_router: Address,
    pub market: Address,
    pub market2: Address,
    pub sy: Address,
    pub pt: Address,
    pub yt: Address,
    pub pt2: Address,
    pub yt2: Address,
    pub usdc: Address,
    pub weth: Address,
    pub user: Address,
    pub maker: Address,
}

/// ln(1 + 5%) is close enough to 5% for tests
pub const MARKET_RATE: u128 = 50_000_000_000_000_000;

pub fn fixture() -> Fixture {
    let router = Address::new([0x10; 20]);
    let router_static = Address::new([0x11; 20]);
    let limit_router = Address::new([0x12; 20]);
    let multicall = Address::new([0x13; 20]);
    let market = Address::new([0x01; 20]);
    let market2 = Address::new([0x02; 20]);
    let sy = Address::new([0x51; 20]);
    let usdc = Address::new([0xc0; 20]);
    let weth = Address::new([0xee; 20]);

    let chain = Arc::new(MockChain::new(router, router_static, limit_router, multicall));
    chain.add_sy(sy, vec![usdc, NATIVE_TOKEN], vec![usdc]);
    chain.set_token_rate(NATIVE_TOKEN, U256::from(2_000u64) * WAD);

    let now = 1_700_000_000u64;
    let reserve = U256::from(1_000_000u64) * WAD;
    let base = MockMarket {
        sy,
        pt: Address::new([0x21; 20]),
        yt: Address::new([0x31; 20]),
        expiry: now + 180 * 86_400,
        total_pt: reserve,
        total_sy: reserve,
        total_lp: reserve,
        ln_implied_rate: U256::from(MARKET_RATE),
        py_index: U256::from(1_050_000_000_000_000_000u128),
        fee_wad: U256::from(1_000_000_000_000_000u128),
    };
    let second = MockMarket {
        pt: Address::new([0x22; 20]),
        yt: Address::new([0x32; 20]),
        expiry: now + 365 * 86_400,
        ln_implied_rate: U256::from(60_000_000_000_000_000u128),
        ..base.clone()
    };
    chain.add_market(market, base.clone());
    chain.add_market(market2, second.clone());

    let config = SdkConfig {
        rpc: Default::default(),
        contracts: ContractAddresses {
            router,
            router_static,
            multicall,
            limit_router: Some(limit_router),
            bulk_buffers: Vec::new(),
        },
        routing: RoutingConfig::default(),
    };
    chain.set_limit_fee(U256::from(config.routing.limit_order_fee_wad));

    let batcher = Arc::new(CallBatcher::new(
        chain.clone(),
        BatchConfig {
            multicall,
            max_batch_size: 200,
            retry: RetryPolicy::none(),
        },
    ));

    Fixture {
        chain,
        batcher,
        config,
        router,
        router_static,
        limit_router,
        market,
        market2,
        sy,
        pt: base.pt,
        yt: base.yt,
        pt2: second.pt,
        yt2: second.yt,
        usdc,
        weth,
        user: Address::new([0xaa; 20]),
        maker: Address::new([0xbb; 20]),
    }
}

impl Fixture {
    pub async fn snapshot(&self) -> ChainSnapshot {
        fetch_snapshot(
            &self.batcher,
            self.router_static,
            &[self.market, self.market2],
            None,
        )
        .await
        .expect("snapshot")
    }

    pub fn book(&self) -> MarketBook {
        let info = |market: Address, pt: Address, yt: Address| MarketInfo {
            market,
            sy: self.sy,
            pt,
            yt,
            expiry: self
                .chain
                .market_state(market)
                .map(|m| m.expiry)
                .unwrap_or_default(),
            tokens_in: vec![self.usdc, NATIVE_TOKEN],
            tokens_out: vec![self.usdc],
            bulk_buffers: Vec::new(),
        };
        MarketBook::from([
            (self.market, info(self.market, self.pt, self.yt)),
            (self.market2, info(self.market2, self.pt2, self.yt2)),
        ])
    }

    pub fn no_aggregator(&self) -> Arc<dyn Aggregator> {
        Arc::new(NoAggregator)
    }

    pub fn noop_matcher(&self) -> Arc<dyn LimitOrderMatcher> {
        Arc::new(NoopMatcher)
    }

    pub fn simulator(&self) -> QuoteSimulator {
        self.simulator_with(self.no_aggregator(), self.noop_matcher())
    }

    pub fn simulator_with(
        &self,
        aggregator: Arc<dyn Aggregator>,
        matcher: Arc<dyn LimitOrderMatcher>,
    ) -> QuoteSimulator {
        QuoteSimulator::new(
            self.batcher.clone(),
            self.router_static,
            aggregator,
            matcher,
            GasModel::new(self.config.routing.gas.clone()),
        )
        .with_limit_fee(U256::from(self.config.routing.limit_order_fee_wad))
    }

    /// A maker order on the first market at `ln_rate`
    pub fn order(&self, order_type: OrderType, ln_rate: U256, making: U256, salt: u64) -> Order {
        Order {
            salt: U256::from(salt),
            expiry: U256::from(1_700_000_000u64 + 30 * 86_400),
            nonce: U256::ZERO,
            orderType: order_type.as_u8(),
            token: self.sy,
            yt: self.yt,
            maker: self.maker,
            receiver: self.maker,
            makingAmount: making,
            lnImpliedRate: ln_rate,
            failSafeRate: U256::ZERO,
        }
    }

    /// Book holding one PT sell order priced above the market rate
    pub fn book_with_cheap_pt(&self, making: U256) -> Arc<BookMatcher> {
        let book = Arc::new(BookMatcher::new());
        let rate = U256::from(MARKET_RATE + 20_000_000_000_000_000);
        book.add_order(self.order(OrderType::PtForSy, rate, making, 1), Bytes::new());
        book
    }

    pub fn wallet(&self) -> MockWallet {
        MockWallet {
            chain: self.chain.clone(),
            address: self.user,
        }
    }

    /// Give the user `amount` of `token` and approve the router for it
    pub fn fund_and_approve(&self, token: Address, amount: U256) {
        self.chain.fund(self.user, token, amount);
        let mut state = self.chain.state.lock();
        *state
            .allowances
            .entry((self.user, token, self.router))
            .or_default() += amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_and_router_agree() {
        let fx = fixture();
        let static_out = fx
            .chain
            .call(
                &CallRequest::new(
                    fx.router_static,
                    IRouterStatic::swapExactSyForPtStaticCall {
                        market: fx.market,
                        exactSyIn: U256::from(10 * E18),
                    }
                    .abi_encode(),
                ),
                BlockRef::Latest,
            )
            .await
            .unwrap();
        let sim = IRouterStatic::swapExactSyForPtStaticCall::abi_decode_returns(&static_out).unwrap();

        fx.fund_and_approve(fx.sy, U256::from(10 * E18));
        let input = TokenInput {
            tokenIn: fx.sy,
            netTokenIn: U256::from(10 * E18),
            tokenMintSy: fx.sy,
            bulk: Address::ZERO,
            swapData: SwapData {
                extRouter: Address::ZERO,
                extCalldata: Bytes::new(),
            },
        };
        let call = IRouter::swapExactTokenForPtCall {
            receiver: fx.user,
            market: fx.market,
            minPtOut: sim.netPtOut,
            input,
            limit: LimitOrderData {
                limitRouter: Address::ZERO,
                normalFills: Vec::new(),
                flashFills: Vec::new(),
            },
        };
        fx.wallet()
            .send_transaction(
                &CallRequest::new(fx.router, call.abi_encode()),
                &TxOverrides::default(),
            )
            .await
            .unwrap();
        assert_eq!(fx.chain.balance(fx.user, fx.pt), sim.netPtOut);
        assert_eq!(fx.chain.balance(fx.user, fx.sy), U256::ZERO);
    }

    #[tokio::test]
    async fn test_failed_send_leaves_state_untouched() {
        let fx = fixture();
        let before = fx.chain.market_state(fx.market);
        let call = IRouter::removeLiquiditySingleSyCall {
            receiver: fx.user,
            market: fx.market,
            netLpToRemove: U256::from(E18),
            minSyOut: U256::ZERO,
        };
        // No LP approved
        let err = fx
            .wallet()
            .send_transaction(
                &CallRequest::new(fx.router, call.abi_encode()),
                &TxOverrides::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Reverted { .. }));
        assert_eq!(fx.chain.market_state(fx.market), before);
        assert_eq!(fx.chain.sent().len(), 1);
    }
}
