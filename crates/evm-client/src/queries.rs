//! Token metadata, balance and allowance queries, all batched

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};
use yieldkit_core::{ClientError, NATIVE_TOKEN};

use crate::abi::{IMulticall3, IERC20};
use crate::batch::{CallBatcher, ReadCall};
use crate::cache::TtlCache;
use crate::{BlockRef, Result};

/// ERC-20 metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

impl TokenInfo {
    pub fn native() -> Self {
        Self {
            address: NATIVE_TOKEN,
            symbol: "ETH".to_string(),
            decimals: 18,
        }
    }
}

fn decode<C: SolCall>(raw: Result<alloy::primitives::Bytes>) -> Result<C::Return> {
    let raw = raw?;
    C::abi_decode_returns(&raw).map_err(|e| ClientError::Decode(e.to_string()))
}

/// Fetch symbol and decimals for a set of tokens, consulting the cache first.
///
/// Results are returned in input order. The native sentinel resolves locally.
pub async fn fetch_token_info(
    batcher: &CallBatcher,
    cache: &TtlCache<Address, TokenInfo>,
    tokens: &[Address],
) -> Vec<Result<TokenInfo>> {
    let missing: Vec<Address> = tokens
        .iter()
        .copied()
        .filter(|t| *t != NATIVE_TOKEN && cache.get(t).is_none())
        .collect();

    if !missing.is_empty() {
        let calls: Vec<ReadCall> = missing
            .iter()
            .flat_map(|t| {
                [
                    ReadCall::typed(*t, &IERC20::symbolCall {}),
                    ReadCall::typed(*t, &IERC20::decimalsCall {}),
                ]
            })
            .collect();
        let mut results = batcher.batch(calls, BlockRef::Latest).await.into_iter();

        for token in &missing {
            let (Some(symbol), Some(decimals)) = (results.next(), results.next()) else {
                break;
            };
            match (
                decode::<IERC20::symbolCall>(symbol),
                decode::<IERC20::decimalsCall>(decimals),
            ) {
                (Ok(symbol), Ok(decimals)) => cache.insert(
                    *token,
                    TokenInfo {
                        address: *token,
                        symbol,
                        decimals,
                    },
                ),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(token = %token, error = %e, "token metadata unavailable");
                }
            }
        }
    }

    tokens
        .iter()
        .map(|t| {
            if *t == NATIVE_TOKEN {
                return Ok(TokenInfo::native());
            }
            cache
                .get(t)
                .ok_or_else(|| ClientError::Decode(format!("no token metadata for {}", t)))
        })
        .collect()
}

/// Balances of `owner` for each token (native via Multicall3 `getEthBalance`).
pub async fn fetch_balances(
    batcher: &CallBatcher,
    owner: Address,
    tokens: &[Address],
    block: BlockRef,
) -> Vec<Result<U256>> {
    let multicall = batcher.config().multicall;
    let calls = tokens
        .iter()
        .map(|t| {
            if *t == NATIVE_TOKEN {
                ReadCall::typed(multicall, &IMulticall3::getEthBalanceCall { addr: owner })
            } else {
                ReadCall::typed(*t, &IERC20::balanceOfCall { account: owner })
            }
        })
        .collect();

    batcher
        .batch(calls, block)
        .await
        .into_iter()
        .zip(tokens)
        .map(|(raw, token)| {
            if *token == NATIVE_TOKEN {
                decode::<IMulticall3::getEthBalanceCall>(raw)
            } else {
                decode::<IERC20::balanceOfCall>(raw)
            }
        })
        .collect()
}

/// Allowances granted by `owner` to `spender`. Native always reports `U256::MAX`.
pub async fn fetch_allowances(
    batcher: &CallBatcher,
    owner: Address,
    spender: Address,
    tokens: &[Address],
) -> Vec<Result<U256>> {
    let erc20: Vec<Address> = tokens.iter().copied().filter(|t| *t != NATIVE_TOKEN).collect();
    let calls = erc20
        .iter()
        .map(|t| ReadCall::typed(*t, &IERC20::allowanceCall { owner, spender }))
        .collect();
    let mut fetched = batcher.batch(calls, BlockRef::Latest).await.into_iter();

    tokens
        .iter()
        .map(|t| {
            if *t == NATIVE_TOKEN {
                return Ok(U256::MAX);
            }
            match fetched.next() {
                Some(raw) => decode::<IERC20::allowanceCall>(raw),
                None => Err(ClientError::Decode("missing allowance result".to_string())),
            }
        })
        .collect()
}
