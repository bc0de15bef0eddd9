//! Market Router
//!
//! High-level entry point. Owns the chain client, batcher, aggregator,
//! limit-order matcher, gas estimator and metadata caches, and runs
//! catalog -> simulator -> selector -> builder for one operation at a time.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use evm_client::{
    fetch_allowances, fetch_token_info, BatchConfig, CallBatcher, ChainClient, RetryPolicy,
    TokenInfo, TtlCache,
};
use yieldkit_core::constants::WAD;
use yieldkit_core::{require_non_zero, Result, SdkConfig, Slippage, TokenAmount, NATIVE_TOKEN};
use yieldkit_tx::{classify, PendingCall};

use crate::aggregator::{cached_liquidity_sources, Aggregator, NoAggregator};
use crate::builder::{RouterReturn, TransactionBuilder};
use crate::catalog::RouteCatalog;
use crate::fetch::{fetch_market_info, fetch_snapshot};
use crate::gas::{GasFeeEstimator, GasModel, RpcGasFeeEstimator};
use crate::limit_order::{LimitOrderMatcher, NoopMatcher};
use crate::route::{Operation, RouteOutcome, SkipReason, SwapKind};
use crate::selector::{RouteSelector, Selection, SelectionObserver};
use crate::simulator::QuoteSimulator;
use crate::state::{ChainSnapshot, MarketBook, MarketError, MarketInfo, NoRouteFound};

/// Per-call overrides for [`MarketRouter::quote`]
#[derive(Debug, Clone, Copy, Default)]
pub struct QuoteOptions {
    /// Falls back to `routing.default_slippage`
    pub slippage: Option<Slippage>,
    /// Output-token units per native unit (1e18 fixed point), for gas ranking
    pub output_per_native: Option<U256>,
}

/// Selected route for an operation, pinned to the block it was simulated at
#[derive(Debug, Clone)]
pub struct Quote {
    pub operation: Operation,
    pub selection: Selection,
    pub block: u64,
    pub slippage: Slippage,
    pub min_output: U256,
}

impl Quote {
    pub fn net_output(&self) -> U256 {
        self.selection.result.net_output
    }

    pub fn output_token(&self) -> Address {
        self.selection.result.output_token
    }
}

/// A quote rendered into calls. Approvals must be confirmed before `call` is sent.
#[derive(Debug, Clone)]
pub struct PreparedTx {
    pub quote: Quote,
    pub call: PendingCall<RouterReturn>,
    pub approvals: Vec<PendingCall<bool>>,
}

pub struct MarketRouter {
    config: SdkConfig,
    client: Arc<dyn ChainClient>,
    batcher: Arc<CallBatcher>,
    aggregator: Arc<dyn Aggregator>,
    matcher: Arc<dyn LimitOrderMatcher>,
    estimator: Arc<dyn GasFeeEstimator>,
    observer: Option<Arc<dyn SelectionObserver>>,
    catalog: RouteCatalog,
    markets: TtlCache<Address, MarketInfo>,
    tokens: TtlCache<Address, TokenInfo>,
    sources: TtlCache<(), Vec<String>>,
}

impl MarketRouter {
    pub fn new(config: SdkConfig, client: Arc<dyn ChainClient>) -> Result<Self> {
        config.validate()?;

        let batcher = Arc::new(CallBatcher::new(
            client.clone(),
            BatchConfig {
                multicall: config.contracts.multicall,
                retry: RetryPolicy::from_config(&config.rpc),
                ..BatchConfig::default()
            },
        ));
        let ttl = Duration::from_secs(config.routing.metadata_ttl_secs);

        tracing::info!(
            router = %config.contracts.router,
            router_static = %config.contracts.router_static,
            limit_orders = config.routing.use_limit_orders,
            aggregator = config.routing.use_aggregator,
            "market router ready"
        );

        Ok(Self {
            catalog: RouteCatalog::new(config.routing.use_aggregator),
            estimator: Arc::new(RpcGasFeeEstimator::new(client.clone())),
            aggregator: Arc::new(NoAggregator),
            matcher: Arc::new(NoopMatcher),
            observer: None,
            markets: TtlCache::new(ttl),
            tokens: TtlCache::new(ttl),
            sources: TtlCache::new(ttl),
            config,
            client,
            batcher,
        })
    }

    pub fn with_aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn LimitOrderMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn GasFeeEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SelectionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn batcher(&self) -> &Arc<CallBatcher> {
        &self.batcher
    }

    pub fn builder(&self) -> TransactionBuilder {
        TransactionBuilder::new(self.client.clone(), &self.config.contracts)
            .with_retry(RetryPolicy::from_config(&self.config.rpc))
            .with_poll_interval(Duration::from_millis(self.config.rpc.confirmation_poll_ms))
    }

    pub fn simulator(&self) -> QuoteSimulator {
        let matcher: Arc<dyn LimitOrderMatcher> = if self.config.routing.use_limit_orders {
            self.matcher.clone()
        } else {
            Arc::new(NoopMatcher)
        };
        QuoteSimulator::new(
            self.batcher.clone(),
            self.config.contracts.router_static,
            self.aggregator.clone(),
            matcher,
            GasModel::new(self.config.routing.gas.clone()),
        )
        .with_limit_fee(U256::from(self.config.routing.limit_order_fee_wad))
    }

    /// Static market metadata, cached for `routing.metadata_ttl_secs`
    pub async fn market_info(&self, market: Address) -> Result<MarketInfo> {
        if let Some(info) = self.markets.get(&market) {
            return Ok(info);
        }
        let info = fetch_market_info(
            &self.batcher,
            self.config.contracts.router_static,
            market,
            &self.config.contracts.bulk_buffers,
        )
        .await?;
        self.markets.insert(market, info.clone());
        Ok(info)
    }

    /// Seed the cache with metadata known out of band
    pub fn register_market(&self, info: MarketInfo) {
        self.markets.insert(info.market, info);
    }

    pub fn invalidate_market(&self, market: &Address) -> bool {
        self.markets.invalidate(market)
    }

    pub async fn book(&self, markets: &[Address]) -> Result<MarketBook> {
        let infos =
            futures::future::try_join_all(markets.iter().map(|m| self.market_info(*m))).await?;
        Ok(infos.into_iter().map(|info| (info.market, info)).collect())
    }

    pub async fn snapshot(&self, markets: &[Address]) -> Result<ChainSnapshot> {
        fetch_snapshot(
            &self.batcher,
            self.config.contracts.router_static,
            markets,
            None,
        )
        .await
    }

    /// Symbol and decimals per token, in input order
    pub async fn token_info(&self, tokens: &[Address]) -> Vec<Result<TokenInfo>> {
        fetch_token_info(&self.batcher, &self.tokens, tokens)
            .await
            .into_iter()
            .map(|r| r.map_err(classify))
            .collect()
    }

    pub async fn liquidity_sources(&self) -> Result<Vec<String>> {
        cached_liquidity_sources(self.aggregator.as_ref(), &self.sources).await
    }

    /// Select the best route for `operation`.
    ///
    /// A zero amount is skipped before any chain access.
    pub async fn quote(
        &self,
        operation: &Operation,
        options: &QuoteOptions,
    ) -> std::result::Result<RouteOutcome<Quote>, MarketError> {
        let markets = operation.markets();
        for market in &markets {
            require_non_zero("market", *market)?;
        }
        if operation.primary_amount().is_zero() {
            tracing::debug!(operation = operation.name(), "zero amount, skipping");
            return Ok(RouteOutcome::Skipped(SkipReason::ZeroAmount));
        }

        let book = self.book(&markets).await?;
        let routes = self.catalog.enumerate(operation, &book);
        if routes.is_empty() {
            tracing::warn!(operation = operation.name(), "no candidate routes");
            let failure = NoRouteFound::default();
            if let Some(observer) = &self.observer {
                observer.on_no_route(&failure);
            }
            return Err(failure.into());
        }

        let snapshot = self.snapshot(&markets).await?;
        let output_per_native = match options.output_per_native {
            Some(rate) => Some(rate),
            None => self.output_per_native(operation, &book).await,
        };

        let simulator = self.simulator();
        let mut selector = RouteSelector::new(
            self.estimator.clone(),
            Duration::from_millis(self.config.routing.simulation_timeout_ms),
        );
        if let Some(observer) = &self.observer {
            selector = selector.with_observer(observer.clone());
        }

        let candidates = routes.len();
        let selection = selector
            .select(
                routes,
                |route| {
                    let simulator = &simulator;
                    let snapshot = &snapshot;
                    async move { simulator.simulate(&route, snapshot).await }
                },
                output_per_native,
            )
            .await?;

        let slippage = options
            .slippage
            .unwrap_or(self.config.routing.default_slippage);
        let min_output = slippage.min_output(selection.result.net_output);

        tracing::info!(
            operation = operation.name(),
            route = %selection.route,
            block = snapshot.block,
            candidates,
            output = %selection.result.net_output,
            min_output = %min_output,
            "quote ready"
        );

        Ok(RouteOutcome::Ready(Quote {
            operation: operation.clone(),
            selection,
            block: snapshot.block,
            slippage,
            min_output,
        }))
    }

    /// Quote, build the router call, and collect the approvals it still needs.
    pub async fn prepare(
        &self,
        operation: &Operation,
        options: &QuoteOptions,
        receiver: Address,
    ) -> std::result::Result<RouteOutcome<PreparedTx>, MarketError> {
        require_non_zero("receiver", receiver)?;
        let quote = match self.quote(operation, options).await? {
            RouteOutcome::Ready(quote) => quote,
            RouteOutcome::Skipped(reason) => return Ok(RouteOutcome::Skipped(reason)),
        };

        let builder = self.builder();
        let selection = &quote.selection;
        let call = builder.build(&selection.route, &selection.result, quote.slippage, receiver)?;

        let info = self.market_info(selection.route.market()).await?;
        let needed =
            builder.required_approvals(&selection.route, &info, quote.slippage, &selection.result);
        let approvals = self
            .missing_approvals(&needed, receiver)
            .await?
            .into_iter()
            .map(|t| builder.approve(t.token, t.amount, receiver))
            .collect();

        Ok(RouteOutcome::Ready(PreparedTx {
            quote,
            call,
            approvals,
        }))
    }

    pub async fn swap(
        &self,
        market: Address,
        kind: SwapKind,
        token: Address,
        amount_in: U256,
        receiver: Address,
        options: &QuoteOptions,
    ) -> std::result::Result<RouteOutcome<PreparedTx>, MarketError> {
        let operation = Operation::Swap {
            market,
            kind,
            token,
            amount_in,
        };
        self.prepare(&operation, options, receiver).await
    }

    pub async fn mint_py(
        &self,
        market: Address,
        token_in: Address,
        amount_in: U256,
        receiver: Address,
        options: &QuoteOptions,
    ) -> std::result::Result<RouteOutcome<PreparedTx>, MarketError> {
        let operation = Operation::MintPy {
            market,
            token_in,
            amount_in,
        };
        self.prepare(&operation, options, receiver).await
    }

    pub async fn add_liquidity(
        &self,
        market: Address,
        token_in: Address,
        amount_in: U256,
        receiver: Address,
        options: &QuoteOptions,
    ) -> std::result::Result<RouteOutcome<PreparedTx>, MarketError> {
        let operation = Operation::AddLiquidity {
            market,
            token_in,
            amount_in,
        };
        self.prepare(&operation, options, receiver).await
    }

    pub async fn add_liquidity_dual(
        &self,
        market: Address,
        token_in: Address,
        amount_in: U256,
        pt_in: U256,
        receiver: Address,
        options: &QuoteOptions,
    ) -> std::result::Result<RouteOutcome<PreparedTx>, MarketError> {
        let operation = Operation::AddLiquidityDual {
            market,
            token_in,
            amount_in,
            pt_in,
        };
        self.prepare(&operation, options, receiver).await
    }

    pub async fn remove_liquidity(
        &self,
        market: Address,
        token_out: Address,
        lp_in: U256,
        receiver: Address,
        options: &QuoteOptions,
    ) -> std::result::Result<RouteOutcome<PreparedTx>, MarketError> {
        let operation = Operation::RemoveLiquidity {
            market,
            token_out,
            lp_in,
        };
        self.prepare(&operation, options, receiver).await
    }

    /// Move LP between two markets that share an SY
    pub async fn migrate_liquidity(
        &self,
        from_market: Address,
        to_market: Address,
        lp_in: U256,
        receiver: Address,
        options: &QuoteOptions,
    ) -> std::result::Result<RouteOutcome<PreparedTx>, MarketError> {
        let operation = Operation::Migrate {
            from_market,
            to_market,
            lp_in,
        };
        self.prepare(&operation, options, receiver).await
    }

    async fn missing_approvals(
        &self,
        needed: &[TokenAmount],
        owner: Address,
    ) -> Result<Vec<TokenAmount>> {
        let tokens: Vec<Address> = needed.iter().map(|t| t.token).collect();
        let allowances = fetch_allowances(
            &self.batcher,
            owner,
            self.config.contracts.router,
            &tokens,
        )
        .await;

        let mut missing = Vec::new();
        for (need, allowance) in needed.iter().zip(allowances) {
            if allowance.map_err(classify)? < need.amount {
                missing.push(*need);
            }
        }
        Ok(missing)
    }

    /// Price of one native unit in the operation's output token, if known
    async fn output_per_native(&self, operation: &Operation, book: &MarketBook) -> Option<U256> {
        let token = output_token(operation, book)?;
        if token == NATIVE_TOKEN {
            return Some(WAD);
        }
        match self
            .aggregator
            .quote(
                TokenAmount::new(NATIVE_TOKEN, WAD),
                token,
                self.config.routing.default_slippage,
            )
            .await
        {
            Ok(quote) => quote.map(|q| q.amount_out.amount),
            Err(e) => {
                tracing::warn!(token = %token, error = %e, "native price unavailable");
                None
            }
        }
    }
}

fn output_token(operation: &Operation, book: &MarketBook) -> Option<Address> {
    match operation {
        Operation::Swap {
            market,
            kind,
            token,
            ..
        } => {
            let info = book.get(market)?;
            Some(match kind {
                SwapKind::TokenForPt | SwapKind::YtForPt => info.pt,
                SwapKind::TokenForYt | SwapKind::PtForYt => info.yt,
                SwapKind::PtForToken | SwapKind::YtForToken => *token,
            })
        }
        Operation::MintPy { market, .. } => book.get(market).map(|i| i.yt),
        Operation::AddLiquidity { market, .. } | Operation::AddLiquidityDual { market, .. } => {
            Some(*market)
        }
        Operation::RemoveLiquidity { token_out, .. } => Some(*token_out),
        Operation::Migrate { to_market, .. } => Some(*to_market),
    }
}
