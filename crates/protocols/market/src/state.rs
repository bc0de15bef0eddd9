//! Market State Types
//!
//! Static market metadata, point-in-time snapshots, and the market error type.

use std::collections::HashMap;
use std::fmt;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use yieldkit_core::{BulkBufferConfig, SdkError};

use crate::limit_order::MatchError;
use crate::route::{Route, SimulationFailure};

/// Static market metadata; enough for the catalog to enumerate routes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketInfo {
    pub market: Address,
    pub sy: Address,
    pub pt: Address,
    pub yt: Address,
    /// Unix seconds
    pub expiry: u64,
    /// Tokens the SY wrapper accepts when minting
    pub tokens_in: Vec<Address>,
    /// Tokens the SY wrapper pays out when redeeming
    pub tokens_out: Vec<Address>,
    /// Bulk buffers configured for this SY
    #[serde(default)]
    pub bulk_buffers: Vec<BulkBufferConfig>,
}

impl MarketInfo {
    pub fn accepts_in(&self, token: Address) -> bool {
        self.tokens_in.contains(&token)
    }

    pub fn offers_out(&self, token: Address) -> bool {
        self.tokens_out.contains(&token)
    }

    pub fn bulk_for(&self, token: Address) -> Option<Address> {
        self.bulk_buffers
            .iter()
            .find(|b| b.token == token && b.sy == self.sy)
            .map(|b| b.address)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiry
    }
}

/// Markets known to the caller's session, keyed by market address
pub type MarketBook = HashMap<Address, MarketInfo>;

/// Market reserves and pricing at one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketState {
    pub market: Address,
    pub sy: Address,
    pub pt: Address,
    pub yt: Address,
    pub total_pt: U256,
    pub total_sy: U256,
    pub total_lp: U256,
    /// ln(1 + implied rate), 1e18 fixed point
    pub ln_implied_rate: U256,
    /// Asset value of one SY, 1e18 fixed point
    pub py_index: U256,
    pub expiry: u64,
}

impl MarketState {
    pub fn time_to_expiry(&self, now: u64) -> u64 {
        self.expiry.saturating_sub(now)
    }
}

/// Read-only view of chain state used for one selection pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub block: u64,
    pub timestamp: u64,
    pub markets: HashMap<Address, MarketState>,
}

impl ChainSnapshot {
    pub fn market(&self, market: &Address) -> Option<&MarketState> {
        self.markets.get(market)
    }
}

/// A route that failed simulation and why
#[derive(Debug, Clone)]
pub struct RouteFailure {
    pub route: Route,
    pub cause: SimulationFailure,
}

/// Every candidate failed, or none existed
#[derive(Debug, Clone, Default)]
pub struct NoRouteFound {
    pub failures: Vec<RouteFailure>,
}

impl fmt::Display for NoRouteFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "no route found: no candidate routes");
        }
        write!(f, "no route found: {} candidates failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {} ({})", failure.route, failure.cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for NoRouteFound {}

/// Errors from market operations
#[derive(Debug, Error)]
pub enum MarketError {
    #[error(transparent)]
    NoRouteFound(NoRouteFound),

    #[error(transparent)]
    Sdk(#[from] SdkError),

    #[error(transparent)]
    Match(#[from] MatchError),
}

impl MarketError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoRouteFound(_) => "no_route_found",
            Self::Sdk(e) => e.error_code(),
            Self::Match(_) => "limit_order",
        }
    }
}

impl From<NoRouteFound> for MarketError {
    fn from(err: NoRouteFound) -> Self {
        Self::NoRouteFound(err)
    }
}
