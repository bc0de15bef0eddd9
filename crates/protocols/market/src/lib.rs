//! Yield Market Routing
//!
//! Quotes and executes PT/YT/LP operations against yield-tokenization
//! markets. Candidate routes are enumerated from market metadata, simulated
//! against a single block, ranked net of gas, and rendered into router calls.

pub mod aggregator;
pub mod builder;
pub mod catalog;
pub mod fetch;
pub mod gas;
pub mod limit_order;
pub mod math;
pub mod route;
pub mod router;
pub mod selector;
pub mod simulator;
pub mod state;

#[cfg(test)]
pub mod testing;

// Re-exports
pub use aggregator::{cached_liquidity_sources, Aggregator, AggregatorQuote, NoAggregator};
pub use builder::{RouterReturn, TransactionBuilder};
pub use catalog::RouteCatalog;
pub use fetch::{fetch_market_info, fetch_snapshot};
pub use gas::{ConstantGasFeeEstimator, GasFeeEstimator, GasModel, RpcGasFeeEstimator};
pub use limit_order::{
    BookMatcher, Fill, FillMode, LimitOrderMatcher, MatchError, MatchResult, NoopMatcher,
    OrderRecord, OrderStatus, OrderType,
};
pub use route::{
    LegPath, MintTarget, Operation, Route, RouteOutcome, RouteSimulationResult, SimStep,
    SimulatedOutput, SimulationFailure, SkipReason, SwapKind, TokenLeg,
};
pub use router::{MarketRouter, PreparedTx, Quote, QuoteOptions};
pub use selector::{
    Candidate, FallbackReason, RankingMode, RouteSelector, Selection, SelectionObserver,
};
pub use simulator::QuoteSimulator;
pub use state::{
    ChainSnapshot, MarketBook, MarketError, MarketInfo, MarketState, NoRouteFound, RouteFailure,
};
