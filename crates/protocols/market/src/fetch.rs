//! Market metadata and snapshot reads

use std::collections::HashMap;

use alloy::primitives::Address;
use alloy::sol_types::SolCall;
use evm_client::{BlockRef, CallBatcher, ClientError, ReadCall};
use yieldkit_core::{BulkBufferConfig, Result, SdkError};
use yieldkit_tx::abi::{IRouterStatic, IStandardizedYield, MarketStateView};
use yieldkit_tx::classify;

use crate::state::{ChainSnapshot, MarketInfo, MarketState};

fn decode<C: SolCall>(raw: std::result::Result<alloy::primitives::Bytes, ClientError>) -> Result<C::Return> {
    let raw = raw.map_err(classify)?;
    C::abi_decode_returns(&raw).map_err(|e| SdkError::Serialization(e.to_string()))
}

fn state_from_view(market: Address, view: MarketStateView) -> MarketState {
    MarketState {
        market,
        sy: view.sy,
        pt: view.pt,
        yt: view.yt,
        total_pt: view.totalPt,
        total_sy: view.totalSy,
        total_lp: view.totalLp,
        ln_implied_rate: view.lnImpliedRate,
        py_index: view.pyIndex,
        expiry: view.expiry.saturating_to(),
    }
}

/// Static metadata for one market: its tokens, expiry and SY token lists.
pub async fn fetch_market_info(
    batcher: &CallBatcher,
    router_static: Address,
    market: Address,
    bulk_buffers: &[BulkBufferConfig],
) -> Result<MarketInfo> {
    let view = batcher
        .read_typed(
            router_static,
            &IRouterStatic::getMarketStateCall { market },
            BlockRef::Latest,
        )
        .await
        .map_err(classify)?;

    let mut lists = batcher
        .batch(
            vec![
                ReadCall::typed(view.sy, &IStandardizedYield::getTokensInCall {}),
                ReadCall::typed(view.sy, &IStandardizedYield::getTokensOutCall {}),
            ],
            BlockRef::Latest,
        )
        .await
        .into_iter();

    let tokens_in = match lists.next() {
        Some(raw) => decode::<IStandardizedYield::getTokensInCall>(raw)?,
        None => Vec::new(),
    };
    let tokens_out = match lists.next() {
        Some(raw) => decode::<IStandardizedYield::getTokensOutCall>(raw)?,
        None => Vec::new(),
    };

    let info = MarketInfo {
        market,
        sy: view.sy,
        pt: view.pt,
        yt: view.yt,
        expiry: view.expiry.saturating_to(),
        tokens_in,
        tokens_out,
        bulk_buffers: bulk_buffers
            .iter()
            .filter(|b| b.sy == view.sy)
            .copied()
            .collect(),
    };
    tracing::debug!(
        market = %market,
        sy = %info.sy,
        tokens_in = info.tokens_in.len(),
        tokens_out = info.tokens_out.len(),
        "fetched market metadata"
    );
    Ok(info)
}

/// Read every market's state at one block.
///
/// `block` defaults to the current head. Markets whose read fails are left
/// out of the snapshot; routes through them then fail as stale.
pub async fn fetch_snapshot(
    batcher: &CallBatcher,
    router_static: Address,
    markets: &[Address],
    block: Option<u64>,
) -> Result<ChainSnapshot> {
    let client = batcher.client();
    let block = match block {
        Some(block) => block,
        None => client.block_number().await.map_err(classify)?,
    };
    let timestamp = client
        .block_timestamp(BlockRef::Number(block))
        .await
        .map_err(classify)?;

    let calls = markets
        .iter()
        .map(|m| ReadCall::typed(router_static, &IRouterStatic::getMarketStateCall { market: *m }))
        .collect();
    let results = batcher.batch(calls, BlockRef::Number(block)).await;

    let mut states = HashMap::with_capacity(markets.len());
    for (market, raw) in markets.iter().zip(results) {
        match decode::<IRouterStatic::getMarketStateCall>(raw) {
            Ok(view) => {
                states.insert(*market, state_from_view(*market, view));
            }
            Err(e) => {
                tracing::warn!(market = %market, block, error = %e, "market state unavailable");
            }
        }
    }

    Ok(ChainSnapshot {
        block,
        timestamp,
        markets: states,
    })
}
