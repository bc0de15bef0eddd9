//! Operations, routes and simulation results

use std::fmt;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use yieldkit_core::RevertReason;

use crate::aggregator::AggregatorQuote;
use crate::limit_order::MatchResult;

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Direction of a PT/YT trade. The token side is always SY-denominated on
/// the market; raw tokens enter or leave through a [`TokenLeg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapKind {
    TokenForPt,
    PtForToken,
    TokenForYt,
    YtForToken,
    PtForYt,
    YtForPt,
}

impl SwapKind {
    pub const ALL: [SwapKind; 6] = [
        SwapKind::TokenForPt,
        SwapKind::PtForToken,
        SwapKind::TokenForYt,
        SwapKind::YtForToken,
        SwapKind::PtForYt,
        SwapKind::YtForPt,
    ];

    pub fn takes_token(&self) -> bool {
        matches!(self, Self::TokenForPt | Self::TokenForYt)
    }

    pub fn gives_token(&self) -> bool {
        matches!(self, Self::PtForToken | Self::YtForToken)
    }

    /// PT<->YT trades run as a sell leg into SY and a buy leg out of it.
    pub fn legs(&self) -> Option<(SwapKind, SwapKind)> {
        match self {
            Self::PtForYt => Some((Self::PtForToken, Self::TokenForYt)),
            Self::YtForPt => Some((Self::YtForToken, Self::TokenForPt)),
            _ => None,
        }
    }
}

impl fmt::Display for SwapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TokenForPt => "TokenForPt",
            Self::PtForToken => "PtForToken",
            Self::TokenForYt => "TokenForYt",
            Self::YtForToken => "YtForToken",
            Self::PtForYt => "PtForYt",
            Self::YtForPt => "YtForPt",
        };
        write!(f, "{}", name)
    }
}

/// A high-level request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Operation {
    /// `token` is the raw token paid or received; ignored for PT<->YT
    Swap {
        market: Address,
        kind: SwapKind,
        token: Address,
        amount_in: U256,
    },
    /// Mint PT + YT from a raw token
    MintPy {
        market: Address,
        token_in: Address,
        amount_in: U256,
    },
    AddLiquidity {
        market: Address,
        token_in: Address,
        amount_in: U256,
    },
    AddLiquidityDual {
        market: Address,
        token_in: Address,
        amount_in: U256,
        pt_in: U256,
    },
    RemoveLiquidity {
        market: Address,
        token_out: Address,
        lp_in: U256,
    },
    /// Move LP from one market to another sharing the same SY
    Migrate {
        from_market: Address,
        to_market: Address,
        lp_in: U256,
    },
}

impl Operation {
    /// The amount that must be non-zero for the operation to do anything
    pub fn primary_amount(&self) -> U256 {
        match self {
            Self::Swap { amount_in, .. }
            | Self::MintPy { amount_in, .. }
            | Self::AddLiquidity { amount_in, .. } => *amount_in,
            Self::AddLiquidityDual {
                amount_in, pt_in, ..
            } => amount_in.saturating_add(*pt_in),
            Self::RemoveLiquidity { lp_in, .. } | Self::Migrate { lp_in, .. } => *lp_in,
        }
    }

    pub fn markets(&self) -> Vec<Address> {
        match self {
            Self::Swap { market, .. }
            | Self::MintPy { market, .. }
            | Self::AddLiquidity { market, .. }
            | Self::AddLiquidityDual { market, .. }
            | Self::RemoveLiquidity { market, .. } => vec![*market],
            Self::Migrate {
                from_market,
                to_market,
                ..
            } => vec![*from_market, *to_market],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Swap { .. } => "swap",
            Self::MintPy { .. } => "mint_py",
            Self::AddLiquidity { .. } => "add_liquidity",
            Self::AddLiquidityDual { .. } => "add_liquidity_dual",
            Self::RemoveLiquidity { .. } => "remove_liquidity",
            Self::Migrate { .. } => "migrate",
        }
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// How a raw token enters or leaves the SY wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegPath {
    /// The token is the SY itself
    Identity,
    /// The SY mints from / redeems to the token directly
    Native,
    /// A bulk buffer holds the token for this SY
    Bulk(Address),
    /// An external aggregator converts between `token` and `sy_token`
    Aggregator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenLeg {
    /// Raw token the caller pays or receives
    pub token: Address,
    /// Token that is deposited into / redeemed from the SY
    pub sy_token: Address,
    pub path: LegPath,
}

impl TokenLeg {
    pub fn identity(sy: Address) -> Self {
        Self {
            token: sy,
            sy_token: sy,
            path: LegPath::Identity,
        }
    }

    pub fn native(token: Address) -> Self {
        Self {
            token,
            sy_token: token,
            path: LegPath::Native,
        }
    }

    pub fn bulk(token: Address, bulk: Address) -> Self {
        Self {
            token,
            sy_token: token,
            path: LegPath::Bulk(bulk),
        }
    }

    pub fn aggregator(token: Address, sy_token: Address) -> Self {
        Self {
            token,
            sy_token,
            path: LegPath::Aggregator,
        }
    }

    pub fn uses_aggregator(&self) -> bool {
        self.path == LegPath::Aggregator
    }

    pub fn bulk_address(&self) -> Address {
        match self.path {
            LegPath::Bulk(addr) => addr,
            _ => Address::ZERO,
        }
    }
}

impl fmt::Display for TokenLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path {
            LegPath::Identity => write!(f, "sy"),
            LegPath::Native => write!(f, "native {}", self.token),
            LegPath::Bulk(bulk) => write!(f, "bulk {} via {}", self.token, bulk),
            LegPath::Aggregator => write!(f, "aggregator {} <> {}", self.token, self.sy_token),
        }
    }
}

/// What a mint-style route produces after the token leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MintTarget {
    /// Swap the minted SY for PT
    Pt,
    /// Swap the minted SY for YT
    Yt,
    /// Split the minted SY into PT + YT
    Py,
}

/// One candidate execution path. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Route {
    /// Market swap with the token side entering/leaving SY through `leg`.
    /// `leg` is `None` only for PT<->YT. Token-out kinds may end with an
    /// aggregator leg; token-in kinds with an aggregator leg are
    /// [`Route::SwapThenMint`].
    DirectSwap {
        market: Address,
        kind: SwapKind,
        leg: Option<TokenLeg>,
        amount_in: U256,
    },
    /// Token leg (typically an aggregator swap into an SY-accepted token),
    /// mint SY, then produce `target`
    SwapThenMint {
        market: Address,
        target: MintTarget,
        leg: TokenLeg,
        amount_in: U256,
    },
    /// Token leg into SY, then single-sided SY liquidity
    MintThenAdd {
        market: Address,
        leg: TokenLeg,
        amount_in: U256,
    },
    /// Token leg into SY, then add SY and PT together
    DualSideAdd {
        market: Address,
        leg: TokenLeg,
        amount_in: U256,
        pt_in: U256,
    },
    /// Remove liquidity, swap the PT share to SY, redeem through `leg`
    RemoveThenSwap {
        market: Address,
        lp_in: U256,
        leg: TokenLeg,
    },
    /// Remove liquidity to SY from one market and add it to another
    CrossMarketMigrate {
        from_market: Address,
        to_market: Address,
        lp_in: U256,
    },
}

impl Route {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirectSwap { .. } => "DirectSwap",
            Self::SwapThenMint { .. } => "SwapThenMint",
            Self::MintThenAdd { .. } => "MintThenAdd",
            Self::DualSideAdd { .. } => "DualSideAdd",
            Self::RemoveThenSwap { .. } => "RemoveThenSwap",
            Self::CrossMarketMigrate { .. } => "CrossMarketMigrate",
        }
    }

    pub fn amount_in(&self) -> U256 {
        match self {
            Self::DirectSwap { amount_in, .. }
            | Self::SwapThenMint { amount_in, .. }
            | Self::MintThenAdd { amount_in, .. }
            | Self::DualSideAdd { amount_in, .. } => *amount_in,
            Self::RemoveThenSwap { lp_in, .. } | Self::CrossMarketMigrate { lp_in, .. } => *lp_in,
        }
    }

    /// Market whose state the route reads first
    pub fn market(&self) -> Address {
        match self {
            Self::DirectSwap { market, .. }
            | Self::SwapThenMint { market, .. }
            | Self::MintThenAdd { market, .. }
            | Self::DualSideAdd { market, .. }
            | Self::RemoveThenSwap { market, .. } => *market,
            Self::CrossMarketMigrate { from_market, .. } => *from_market,
        }
    }

    pub fn leg(&self) -> Option<&TokenLeg> {
        match self {
            Self::DirectSwap { leg, .. } => leg.as_ref(),
            Self::SwapThenMint { leg, .. }
            | Self::MintThenAdd { leg, .. }
            | Self::DualSideAdd { leg, .. }
            | Self::RemoveThenSwap { leg, .. } => Some(leg),
            Self::CrossMarketMigrate { .. } => None,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectSwap { kind, leg, .. } => match leg {
                Some(leg) => write!(f, "DirectSwap[{} / {}]", kind, leg),
                None => write!(f, "DirectSwap[{}]", kind),
            },
            Self::SwapThenMint { target, leg, .. } => {
                write!(f, "SwapThenMint[{:?} / {}]", target, leg)
            }
            Self::MintThenAdd { leg, .. } => write!(f, "MintThenAdd[{}]", leg),
            Self::DualSideAdd { leg, .. } => write!(f, "DualSideAdd[{}]", leg),
            Self::RemoveThenSwap { leg, .. } => write!(f, "RemoveThenSwap[{}]", leg),
            Self::CrossMarketMigrate {
                from_market,
                to_market,
                ..
            } => write!(f, "CrossMarketMigrate[{} -> {}]", from_market, to_market),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulation results
// ---------------------------------------------------------------------------

/// One simulated step, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimStep {
    pub action: &'static str,
    pub amount_in: U256,
    pub amount_out: U256,
}

/// Successful simulation of one route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedOutput {
    /// Amount of `output_token` delivered, net of protocol fees, before gas
    pub net_output: U256,
    pub output_token: Address,
    /// Gas units from the per-step gas model
    pub gas_estimate: u64,
    pub steps: Vec<SimStep>,
    pub limit_match: Option<MatchResult>,
    pub aggregator_quote: Option<AggregatorQuote>,
    pub net_sy_fee: U256,
    /// SY amount at the route's pivot (after the input leg or removal)
    pub intermediate_sy: U256,
}

/// Why a route could not be simulated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationFailure {
    #[error("insufficient liquidity: {0}")]
    InsufficientLiquidity(String),

    #[error("reverted: {0}")]
    Reverted(RevertReason),

    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("network: {0}")]
    Network(String),

    #[error("stale state: {0}")]
    StaleState(String),

    #[error("aggregator has no route from {token_in} to {token_out}")]
    NoAggregatorRoute { token_in: Address, token_out: Address },

    #[error("invalid route: {0}")]
    InvalidRoute(String),
}

/// Per-route simulation outcome: exactly one of output or failure
pub type RouteSimulationResult = Result<SimulatedOutput, SimulationFailure>;

/// Why an operation was skipped without touching the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    ZeroAmount,
}

/// Result of a public operation: a value, or an explicit no-op
#[derive(Debug, Clone)]
pub enum RouteOutcome<T> {
    Ready(T),
    Skipped(SkipReason),
}

impl<T> RouteOutcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(v) => Some(v),
            Self::Skipped(_) => None,
        }
    }
}
