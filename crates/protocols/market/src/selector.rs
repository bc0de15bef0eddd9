//! Route Selector
//!
//! Simulates every candidate concurrently, ranks the successes by output net
//! of gas, and reports every failure when nothing succeeds.

use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use yieldkit_core::constants::WAD;

use crate::gas::GasFeeEstimator;
use crate::math::mul_div_down;
use crate::route::{Route, RouteSimulationResult, SimulatedOutput, SimulationFailure};
use crate::state::{NoRouteFound, RouteFailure};

/// Why gas was left out of the ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackReason {
    GasPriceUnavailable,
    NoPriceConversion,
}

/// How candidates were compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankingMode {
    /// `net_output - gas * gas_price * output_per_native / 1e18`
    GasAdjusted {
        gas_price: U256,
        output_per_native: U256,
    },
    /// Raw `net_output`, lower gas breaking ties
    RawOutput { reason: FallbackReason },
}

impl RankingMode {
    /// Gas expressed in output-token units; zero when not gas-adjusted
    pub fn gas_cost(&self, gas: u64) -> U256 {
        match self {
            Self::GasAdjusted {
                gas_price,
                output_per_native,
            } => mul_div_down(
                U256::from(gas).saturating_mul(*gas_price),
                *output_per_native,
                WAD,
            ),
            Self::RawOutput { .. } => U256::ZERO,
        }
    }
}

/// One simulated candidate
#[derive(Debug, Clone)]
pub struct Candidate {
    pub route: Route,
    pub result: RouteSimulationResult,
    pub gas_cost_in_output: U256,
}

/// The winning route and everything considered alongside it
#[derive(Debug, Clone)]
pub struct Selection {
    pub route: Route,
    pub result: SimulatedOutput,
    /// `net_output` minus gas cost, floored at zero
    pub net_after_gas: U256,
    pub gas_cost_in_output: U256,
    pub ranking: RankingMode,
    /// Every candidate in catalog order, the winner included
    pub candidates: Vec<Candidate>,
}

/// Hooks into a selection pass
pub trait SelectionObserver: Send + Sync {
    fn on_route_simulated(&self, _route: &Route, _result: &RouteSimulationResult) {}

    fn on_selected(&self, _selection: &Selection) {}

    fn on_no_route(&self, _failure: &NoRouteFound) {}
}

pub struct RouteSelector {
    estimator: Arc<dyn GasFeeEstimator>,
    timeout: Duration,
    observer: Option<Arc<dyn SelectionObserver>>,
}

impl RouteSelector {
    pub fn new(estimator: Arc<dyn GasFeeEstimator>, timeout: Duration) -> Self {
        Self {
            estimator,
            timeout,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SelectionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Simulate `routes` with `simulate` and pick the best.
    ///
    /// `output_per_native` converts one native unit (WAD) into output-token
    /// units; without it, or without a gas price, ranking falls back to raw
    /// output and the selection records why.
    pub async fn select<F, Fut>(
        &self,
        routes: Vec<Route>,
        simulate: F,
        output_per_native: Option<U256>,
    ) -> Result<Selection, NoRouteFound>
    where
        F: Fn(Route) -> Fut,
        Fut: Future<Output = RouteSimulationResult>,
    {
        let after_ms = self.timeout.as_millis() as u64;
        let simulations = join_all(routes.iter().cloned().map(|route| {
            let fut = simulate(route);
            async move {
                match tokio::time::timeout(self.timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(SimulationFailure::Timeout { after_ms }),
                }
            }
        }));

        let (results, gas_price) =
            futures::join!(simulations, self.estimator.estimate_gas_price());

        let ranking = match (gas_price, output_per_native) {
            (Ok(gas_price), Some(output_per_native)) => RankingMode::GasAdjusted {
                gas_price,
                output_per_native,
            },
            (Err(e), _) => {
                tracing::warn!(error = %e, "gas price unavailable, ranking by raw output");
                RankingMode::RawOutput {
                    reason: FallbackReason::GasPriceUnavailable,
                }
            }
            (Ok(_), None) => {
                tracing::warn!("no output/native rate, ranking by raw output");
                RankingMode::RawOutput {
                    reason: FallbackReason::NoPriceConversion,
                }
            }
        };

        let candidates: Vec<Candidate> = routes
            .into_iter()
            .zip(results)
            .map(|(route, result)| {
                if let Some(observer) = &self.observer {
                    observer.on_route_simulated(&route, &result);
                }
                let gas_cost_in_output = match &result {
                    Ok(out) => ranking.gas_cost(out.gas_estimate),
                    Err(_) => U256::ZERO,
                };
                Candidate {
                    route,
                    result,
                    gas_cost_in_output,
                }
            })
            .collect();

        let mut best: Option<(usize, &SimulatedOutput, U256)> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            let Ok(out) = &candidate.result else {
                continue;
            };
            let cost = candidate.gas_cost_in_output;
            let better = match best {
                None => true,
                Some((_, best_out, best_cost)) => {
                    compare(out, cost, best_out, best_cost) == Ordering::Greater
                }
            };
            if better {
                best = Some((i, out, cost));
            }
        }

        let Some((index, out, gas_cost_in_output)) = best else {
            let failure = NoRouteFound {
                failures: candidates
                    .into_iter()
                    .filter_map(|c| match c.result {
                        Err(cause) => Some(RouteFailure {
                            route: c.route,
                            cause,
                        }),
                        Ok(_) => None,
                    })
                    .collect(),
            };
            tracing::warn!(failed = failure.failures.len(), "no route found");
            if let Some(observer) = &self.observer {
                observer.on_no_route(&failure);
            }
            return Err(failure);
        };

        let result = out.clone();
        let route = candidates[index].route.clone();
        let selection = Selection {
            net_after_gas: result.net_output.saturating_sub(gas_cost_in_output),
            route,
            result,
            gas_cost_in_output,
            ranking,
            candidates,
        };

        tracing::info!(
            route = %selection.route,
            output = %selection.result.net_output,
            net_after_gas = %selection.net_after_gas,
            gas = selection.result.gas_estimate,
            candidates = selection.candidates.len(),
            "route selected"
        );
        if let Some(observer) = &self.observer {
            observer.on_selected(&selection);
        }
        Ok(selection)
    }
}

/// Order by `out - cost` without signed arithmetic, then by lower gas.
fn compare(a: &SimulatedOutput, a_cost: U256, b: &SimulatedOutput, b_cost: U256) -> Ordering {
    let lhs = a.net_output.saturating_add(b_cost);
    let rhs = b.net_output.saturating_add(a_cost);
    lhs.cmp(&rhs)
        .then_with(|| b.gas_estimate.cmp(&a.gas_estimate))
}
