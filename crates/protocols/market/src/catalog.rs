//! Route Catalog
//!
//! Enumerates every structurally valid route for an operation from static
//! market metadata. Pure: no I/O, no pricing.

use alloy::primitives::{Address, U256};

use crate::route::{MintTarget, Operation, Route, SwapKind, TokenLeg};
use crate::state::{MarketBook, MarketInfo};

#[derive(Debug, Clone, Copy)]
pub struct RouteCatalog {
    use_aggregator: bool,
}

impl RouteCatalog {
    pub fn new(use_aggregator: bool) -> Self {
        Self { use_aggregator }
    }

    /// Ways `token` can enter the market's SY
    pub fn input_legs(&self, info: &MarketInfo, token: Address) -> Vec<TokenLeg> {
        if token == info.sy {
            return vec![TokenLeg::identity(info.sy)];
        }

        let mut legs = Vec::new();
        if info.accepts_in(token) {
            legs.push(TokenLeg::native(token));
        }
        if let Some(bulk) = info.bulk_for(token) {
            legs.push(TokenLeg::bulk(token, bulk));
        }
        if self.use_aggregator {
            legs.extend(
                info.tokens_in
                    .iter()
                    .filter(|t| **t != token)
                    .map(|t| TokenLeg::aggregator(token, *t)),
            );
        }
        legs
    }

    /// Ways the market's SY can leave as `token`
    pub fn output_legs(&self, info: &MarketInfo, token: Address) -> Vec<TokenLeg> {
        if token == info.sy {
            return vec![TokenLeg::identity(info.sy)];
        }

        let mut legs = Vec::new();
        if info.offers_out(token) {
            legs.push(TokenLeg::native(token));
        }
        if let Some(bulk) = info.bulk_for(token) {
            legs.push(TokenLeg::bulk(token, bulk));
        }
        if self.use_aggregator {
            legs.extend(
                info.tokens_out
                    .iter()
                    .filter(|t| **t != token)
                    .map(|t| TokenLeg::aggregator(token, *t)),
            );
        }
        legs
    }

    /// Candidate routes in preference order. Unknown markets yield none.
    pub fn enumerate(&self, operation: &Operation, book: &MarketBook) -> Vec<Route> {
        match operation {
            Operation::Swap {
                market,
                kind,
                token,
                amount_in,
            } => {
                let Some(info) = book.get(market) else {
                    return Vec::new();
                };
                self.swap_routes(info, *kind, *token, *amount_in)
            }

            Operation::MintPy {
                market,
                token_in,
                amount_in,
            } => {
                let Some(info) = book.get(market) else {
                    return Vec::new();
                };
                self.input_legs(info, *token_in)
                    .into_iter()
                    .map(|leg| Route::SwapThenMint {
                        market: *market,
                        target: MintTarget::Py,
                        leg,
                        amount_in: *amount_in,
                    })
                    .collect()
            }

            Operation::AddLiquidity {
                market,
                token_in,
                amount_in,
            } => {
                let Some(info) = book.get(market) else {
                    return Vec::new();
                };
                self.input_legs(info, *token_in)
                    .into_iter()
                    .map(|leg| Route::MintThenAdd {
                        market: *market,
                        leg,
                        amount_in: *amount_in,
                    })
                    .collect()
            }

            Operation::AddLiquidityDual {
                market,
                token_in,
                amount_in,
                pt_in,
            } => {
                let Some(info) = book.get(market) else {
                    return Vec::new();
                };
                self.input_legs(info, *token_in)
                    .into_iter()
                    .map(|leg| Route::DualSideAdd {
                        market: *market,
                        leg,
                        amount_in: *amount_in,
                        pt_in: *pt_in,
                    })
                    .collect()
            }

            Operation::RemoveLiquidity {
                market,
                token_out,
                lp_in,
            } => {
                let Some(info) = book.get(market) else {
                    return Vec::new();
                };
                self.output_legs(info, *token_out)
                    .into_iter()
                    .map(|leg| Route::RemoveThenSwap {
                        market: *market,
                        lp_in: *lp_in,
                        leg,
                    })
                    .collect()
            }

            Operation::Migrate {
                from_market,
                to_market,
                lp_in,
            } => {
                let (Some(from), Some(to)) = (book.get(from_market), book.get(to_market)) else {
                    return Vec::new();
                };
                if from_market == to_market || from.sy != to.sy {
                    return Vec::new();
                }
                vec![Route::CrossMarketMigrate {
                    from_market: *from_market,
                    to_market: *to_market,
                    lp_in: *lp_in,
                }]
            }
        }
    }

    fn swap_routes(
        &self,
        info: &MarketInfo,
        kind: SwapKind,
        token: Address,
        amount_in: U256,
    ) -> Vec<Route> {
        let market = info.market;
        match kind {
            SwapKind::TokenForPt | SwapKind::TokenForYt => {
                let target = if kind == SwapKind::TokenForPt {
                    MintTarget::Pt
                } else {
                    MintTarget::Yt
                };
                self.input_legs(info, token)
                    .into_iter()
                    .map(|leg| {
                        if leg.uses_aggregator() {
                            Route::SwapThenMint {
                                market,
                                target,
                                leg,
                                amount_in,
                            }
                        } else {
                            Route::DirectSwap {
                                market,
                                kind,
                                leg: Some(leg),
                                amount_in,
                            }
                        }
                    })
                    .collect()
            }
            SwapKind::PtForToken | SwapKind::YtForToken => self
                .output_legs(info, token)
                .into_iter()
                .map(|leg| Route::DirectSwap {
                    market,
                    kind,
                    leg: Some(leg),
                    amount_in,
                })
                .collect(),
            SwapKind::PtForYt | SwapKind::YtForPt => vec![Route::DirectSwap {
                market,
                kind,
                leg: None,
                amount_in,
            }],
        }
    }
}
