//! Transaction Builder
//!
//! Renders a selected route into a router call with its minimum-output guard
//! embedded.
//!
//! # Important Notes
//!
//! - The guard is `floor(net_output * (1 - slippage))` of the simulated output
//! - Native-token input sets the call's `value`
//! - `from` is the receiver, so `static_call` checks the receiver's balances
//!   and allowances
//! - Migration is one router multicall: remove to SY, then add exactly the
//!   removal's guaranteed minimum

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use evm_client::abi::IERC20;
use evm_client::{CallRequest, ChainClient, RetryPolicy};
use serde::{Deserialize, Serialize};
use yieldkit_core::{ContractAddresses, Result, SdkError, Slippage, TokenAmount, NATIVE_TOKEN};
use yieldkit_tx::abi::{IRouter, LimitOrderData, TokenInput, TokenOutput};
use yieldkit_tx::{CallMeta, PendingCall, QuotedOutput};

use crate::aggregator::empty_swap_data;
use crate::limit_order::no_limit_data;
use crate::math::mul_div_down;
use crate::route::{LegPath, MintTarget, Route, SimulatedOutput, SwapKind, TokenLeg};
use crate::state::MarketInfo;

/// Decoded router return: the guarded output and the SY fee paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterReturn {
    pub output: U256,
    pub sy_fee: U256,
}

impl QuotedOutput for RouterReturn {
    fn output(&self) -> U256 {
        self.output
    }
}

fn decode_error(e: alloy::sol_types::Error) -> SdkError {
    SdkError::Serialization(format!("router return: {}", e))
}

pub struct TransactionBuilder {
    client: Arc<dyn ChainClient>,
    router: Address,
    limit_router: Option<Address>,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl TransactionBuilder {
    pub fn new(client: Arc<dyn ChainClient>, contracts: &ContractAddresses) -> Self {
        Self {
            client,
            router: contracts.router,
            limit_router: contracts.limit_router,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn router(&self) -> Address {
        self.router
    }

    /// Render `route` with the guard derived from its simulated output.
    pub fn build(
        &self,
        route: &Route,
        result: &SimulatedOutput,
        slippage: Slippage,
        receiver: Address,
    ) -> Result<PendingCall<RouterReturn>> {
        if receiver.is_zero() {
            return Err(SdkError::invalid("receiver", "zero address"));
        }
        let min_out = slippage.min_output(result.net_output);

        let call = match route {
            Route::DirectSwap {
                market,
                kind,
                leg,
                amount_in,
            } => match (kind, leg) {
                (SwapKind::TokenForPt | SwapKind::TokenForYt, Some(leg)) => {
                    self.buy(*kind, *market, leg, *amount_in, min_out, result, receiver)?
                }
                (SwapKind::PtForToken | SwapKind::YtForToken, Some(leg)) => {
                    self.sell(*kind, *market, leg, *amount_in, min_out, result, receiver)?
                }
                (SwapKind::PtForYt | SwapKind::YtForPt, None) => {
                    self.cross(*kind, *market, *amount_in, min_out, result, receiver)?
                }
                _ => {
                    return Err(SdkError::invalid(
                        "route",
                        format!("{} swap with mismatched token leg", kind),
                    ))
                }
            },

            Route::SwapThenMint {
                market,
                target,
                leg,
                amount_in,
            } => match target {
                MintTarget::Pt => self.buy(
                    SwapKind::TokenForPt,
                    *market,
                    leg,
                    *amount_in,
                    min_out,
                    result,
                    receiver,
                )?,
                MintTarget::Yt => self.buy(
                    SwapKind::TokenForYt,
                    *market,
                    leg,
                    *amount_in,
                    min_out,
                    result,
                    receiver,
                )?,
                MintTarget::Py => {
                    let call = IRouter::mintPyFromTokenCall {
                        receiver,
                        yt: result.output_token,
                        minPyOut: min_out,
                        input: token_input(leg, *amount_in, result)?,
                    };
                    self.pending(call, "mintPyFromToken", input_value(leg, *amount_in), |py| {
                        RouterReturn {
                            output: py,
                            sy_fee: U256::ZERO,
                        }
                    })
                }
            },

            Route::MintThenAdd {
                market,
                leg,
                amount_in,
            } => {
                let call = IRouter::addLiquiditySingleTokenCall {
                    receiver,
                    market: *market,
                    minLpOut: min_out,
                    input: token_input(leg, *amount_in, result)?,
                };
                self.pending(
                    call,
                    "addLiquiditySingleToken",
                    input_value(leg, *amount_in),
                    |r| RouterReturn {
                        output: r.netLpOut,
                        sy_fee: r.netSyFee,
                    },
                )
            }

            Route::DualSideAdd {
                market,
                leg,
                amount_in,
                pt_in,
            } => {
                let call = IRouter::addLiquidityDualTokenAndPtCall {
                    receiver,
                    market: *market,
                    input: token_input(leg, *amount_in, result)?,
                    netPtDesired: *pt_in,
                    minLpOut: min_out,
                };
                self.pending(
                    call,
                    "addLiquidityDualTokenAndPt",
                    input_value(leg, *amount_in),
                    |r| RouterReturn {
                        output: r.netLpOut,
                        sy_fee: U256::ZERO,
                    },
                )
            }

            Route::RemoveThenSwap { market, lp_in, leg } => {
                let call = IRouter::removeLiquiditySingleTokenCall {
                    receiver,
                    market: *market,
                    netLpToRemove: *lp_in,
                    output: token_output(leg, min_out, result)?,
                };
                self.pending(call, "removeLiquiditySingleToken", U256::ZERO, |r| {
                    RouterReturn {
                        output: r.netTokenOut,
                        sy_fee: r.netSyFee,
                    }
                })
            }

            Route::CrossMarketMigrate {
                from_market,
                to_market,
                lp_in,
            } => {
                return self.migrate(*from_market, *to_market, *lp_in, slippage, result, receiver)
            }
        };

        let label = call.meta().label.clone();
        Ok(call
            .with_meta(CallMeta {
                label,
                expected_output: Some(result.net_output),
                min_output: Some(min_out),
            })
            .with_from(receiver))
    }

    #[allow(clippy::too_many_arguments)]
    fn buy(
        &self,
        kind: SwapKind,
        market: Address,
        leg: &TokenLeg,
        amount_in: U256,
        min_out: U256,
        result: &SimulatedOutput,
        receiver: Address,
    ) -> Result<PendingCall<RouterReturn>> {
        let input = token_input(leg, amount_in, result)?;
        let limit = self.limit_data(result, kind)?;
        let value = input_value(leg, amount_in);
        Ok(match kind {
            SwapKind::TokenForPt => {
                let call = IRouter::swapExactTokenForPtCall {
                    receiver,
                    market,
                    minPtOut: min_out,
                    input,
                    limit,
                };
                self.pending(call, "swapExactTokenForPt", value, |r| RouterReturn {
                    output: r.netPtOut,
                    sy_fee: r.netSyFee,
                })
            }
            _ => {
                let call = IRouter::swapExactTokenForYtCall {
                    receiver,
                    market,
                    minYtOut: min_out,
                    input,
                    limit,
                };
                self.pending(call, "swapExactTokenForYt", value, |r| RouterReturn {
                    output: r.netYtOut,
                    sy_fee: r.netSyFee,
                })
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn sell(
        &self,
        kind: SwapKind,
        market: Address,
        leg: &TokenLeg,
        amount_in: U256,
        min_out: U256,
        result: &SimulatedOutput,
        receiver: Address,
    ) -> Result<PendingCall<RouterReturn>> {
        let output = token_output(leg, min_out, result)?;
        let limit = self.limit_data(result, kind)?;
        Ok(match kind {
            SwapKind::PtForToken => {
                let call = IRouter::swapExactPtForTokenCall {
                    receiver,
                    market,
                    exactPtIn: amount_in,
                    output,
                    limit,
                };
                self.pending(call, "swapExactPtForToken", U256::ZERO, |r| RouterReturn {
                    output: r.netTokenOut,
                    sy_fee: r.netSyFee,
                })
            }
            _ => {
                let call = IRouter::swapExactYtForTokenCall {
                    receiver,
                    market,
                    exactYtIn: amount_in,
                    output,
                    limit,
                };
                self.pending(call, "swapExactYtForToken", U256::ZERO, |r| RouterReturn {
                    output: r.netTokenOut,
                    sy_fee: r.netSyFee,
                })
            }
        })
    }

    fn cross(
        &self,
        kind: SwapKind,
        market: Address,
        amount_in: U256,
        min_out: U256,
        result: &SimulatedOutput,
        receiver: Address,
    ) -> Result<PendingCall<RouterReturn>> {
        let Some((sell, buy)) = kind.legs() else {
            return Err(SdkError::invalid("route", format!("{} is not a PT/YT swap", kind)));
        };
        let sell_limit = self.limit_data(result, sell)?;
        let buy_limit = self.limit_data(result, buy)?;
        Ok(match kind {
            SwapKind::PtForYt => {
                let call = IRouter::swapExactPtForYtCall {
                    receiver,
                    market,
                    exactPtIn: amount_in,
                    minYtOut: min_out,
                    sellLimit: sell_limit,
                    buyLimit: buy_limit,
                };
                self.pending(call, "swapExactPtForYt", U256::ZERO, |r| RouterReturn {
                    output: r.netYtOut,
                    sy_fee: r.netSyFee,
                })
            }
            _ => {
                let call = IRouter::swapExactYtForPtCall {
                    receiver,
                    market,
                    exactYtIn: amount_in,
                    minPtOut: min_out,
                    sellLimit: sell_limit,
                    buyLimit: buy_limit,
                };
                self.pending(call, "swapExactYtForPt", U256::ZERO, |r| RouterReturn {
                    output: r.netPtOut,
                    sy_fee: r.netSyFee,
                })
            }
        })
    }

    /// Remove to SY from one market and add the guaranteed SY to another.
    ///
    /// The expected LP is scaled down to the SY actually added, so the
    /// guard and the quote agree with what the bundle can deliver.
    fn migrate(
        &self,
        from_market: Address,
        to_market: Address,
        lp_in: U256,
        slippage: Slippage,
        result: &SimulatedOutput,
        receiver: Address,
    ) -> Result<PendingCall<RouterReturn>> {
        if result.intermediate_sy.is_zero() {
            return Err(SdkError::invalid("route", "migration removed no SY"));
        }
        let min_sy = slippage.min_output(result.intermediate_sy);
        let expected_lp = mul_div_down(result.net_output, min_sy, result.intermediate_sy);
        let min_lp = slippage.min_output(expected_lp);

        let remove = IRouter::removeLiquiditySingleSyCall {
            receiver,
            market: from_market,
            netLpToRemove: lp_in,
            minSyOut: min_sy,
        };
        let add = IRouter::addLiquiditySingleSyCall {
            receiver,
            market: to_market,
            netSyIn: min_sy,
            minLpOut: min_lp,
        };
        let call = IRouter::multicallCall {
            calls: vec![
                IRouter::RouterCall {
                    allowFailure: false,
                    callData: remove.abi_encode().into(),
                },
                IRouter::RouterCall {
                    allowFailure: false,
                    callData: add.abi_encode().into(),
                },
            ],
        };

        let request = CallRequest::new(self.router, call.abi_encode()).with_from(receiver);
        Ok(
            PendingCall::new(self.client.clone(), request, decode_migration)
                .with_meta(CallMeta {
                    label: "migrateLiquidity".to_string(),
                    expected_output: Some(expected_lp),
                    min_output: Some(min_lp),
                })
                .with_retry(self.retry)
                .with_poll_interval(self.poll_interval),
        )
    }

    fn limit_data(&self, result: &SimulatedOutput, kind: SwapKind) -> Result<LimitOrderData> {
        let Some(matched) = result.limit_match.as_ref().filter(|m| !m.is_empty()) else {
            return Ok(no_limit_data());
        };
        let limit_router = self.limit_router.ok_or_else(|| {
            SdkError::invalid("limit_router", "fills matched but no limit router configured")
        })?;
        Ok(matched.limit_data(limit_router, kind))
    }

    fn pending<C>(
        &self,
        call: C,
        label: &str,
        value: U256,
        map: fn(C::Return) -> RouterReturn,
    ) -> PendingCall<RouterReturn>
    where
        C: SolCall + 'static,
        C::Return: 'static,
    {
        let request = CallRequest::new(self.router, call.abi_encode()).with_value(value);
        PendingCall::new(self.client.clone(), request, move |raw: &Bytes| {
            C::abi_decode_returns(raw).map(map).map_err(decode_error)
        })
        .with_meta(CallMeta {
            label: label.to_string(),
            ..CallMeta::default()
        })
        .with_retry(self.retry)
        .with_poll_interval(self.poll_interval)
    }

    /// Tokens the router pulls from the receiver for `route`.
    ///
    /// `info` describes the market the route starts on. Native input needs no
    /// approval and is left out.
    pub fn required_approvals(
        &self,
        route: &Route,
        info: &MarketInfo,
        slippage: Slippage,
        result: &SimulatedOutput,
    ) -> Vec<TokenAmount> {
        let mut out = Vec::new();
        let mut push = |token: Address, amount: U256| {
            if token != NATIVE_TOKEN && !amount.is_zero() {
                out.push(TokenAmount::new(token, amount));
            }
        };

        match route {
            Route::DirectSwap {
                kind, leg, amount_in, ..
            } => match kind {
                SwapKind::TokenForPt | SwapKind::TokenForYt => {
                    if let Some(leg) = leg {
                        push(leg.token, *amount_in);
                    }
                }
                SwapKind::PtForToken | SwapKind::PtForYt => push(info.pt, *amount_in),
                SwapKind::YtForToken | SwapKind::YtForPt => push(info.yt, *amount_in),
            },
            Route::SwapThenMint { leg, amount_in, .. }
            | Route::MintThenAdd { leg, amount_in, .. } => push(leg.token, *amount_in),
            Route::DualSideAdd {
                leg,
                amount_in,
                pt_in,
                ..
            } => {
                push(leg.token, *amount_in);
                push(info.pt, *pt_in);
            }
            Route::RemoveThenSwap { market, lp_in, .. } => push(*market, *lp_in),
            Route::CrossMarketMigrate {
                from_market, lp_in, ..
            } => {
                push(*from_market, *lp_in);
                push(info.sy, slippage.min_output(result.intermediate_sy));
            }
        }
        out
    }

    /// `approve(router, amount)` on `token`, sent by `owner`
    pub fn approve(&self, token: Address, amount: U256, owner: Address) -> PendingCall<bool> {
        let call = IERC20::approveCall {
            spender: self.router,
            amount,
        };
        let request = CallRequest::new(token, call.abi_encode()).with_from(owner);
        PendingCall::new(self.client.clone(), request, |raw: &Bytes| {
            IERC20::approveCall::abi_decode_returns(raw).map_err(decode_error)
        })
        .with_meta(CallMeta {
            label: format!("approve({})", token),
            ..CallMeta::default()
        })
        .with_retry(self.retry)
        .with_poll_interval(self.poll_interval)
    }
}

fn decode_migration(raw: &Bytes) -> Result<RouterReturn> {
    let results = IRouter::multicallCall::abi_decode_returns(raw).map_err(decode_error)?;
    let last = results
        .last()
        .ok_or_else(|| SdkError::Serialization("empty multicall return".to_string()))?;
    let added = IRouter::addLiquiditySingleSyCall::abi_decode_returns(&last.returnData)
        .map_err(decode_error)?;
    Ok(RouterReturn {
        output: added.netLpOut,
        sy_fee: added.netSyFee,
    })
}

fn input_value(leg: &TokenLeg, amount: U256) -> U256 {
    if leg.token == NATIVE_TOKEN {
        amount
    } else {
        U256::ZERO
    }
}

fn token_input(leg: &TokenLeg, amount: U256, result: &SimulatedOutput) -> Result<TokenInput> {
    Ok(TokenInput {
        tokenIn: leg.token,
        netTokenIn: amount,
        tokenMintSy: leg.sy_token,
        bulk: leg.bulk_address(),
        swapData: swap_data(leg, result)?,
    })
}

fn token_output(leg: &TokenLeg, min_out: U256, result: &SimulatedOutput) -> Result<TokenOutput> {
    Ok(TokenOutput {
        tokenOut: leg.token,
        minTokenOut: min_out,
        tokenRedeemSy: leg.sy_token,
        bulk: leg.bulk_address(),
        swapData: swap_data(leg, result)?,
    })
}

fn swap_data(leg: &TokenLeg, result: &SimulatedOutput) -> Result<yieldkit_tx::abi::SwapData> {
    if leg.path != LegPath::Aggregator {
        return Ok(empty_swap_data());
    }
    result
        .aggregator_quote
        .as_ref()
        .map(|q| q.swap_data())
        .ok_or_else(|| SdkError::invalid("route", "aggregator leg without a recorded quote"))
}
