//! Revert decoding and client-error classification

use alloy::primitives::Bytes;
use alloy::sol_types::{Panic, Revert, SolError, SolInterface};
use yieldkit_core::{ClientError, RevertReason, SdkError};

use crate::abi::IProtocolErrors::{self, IProtocolErrorsErrors as E};

fn protocol_reason(err: &E) -> (&'static str, String) {
    match err {
        E::RouterInsufficientPtOut(e) => (
            "RouterInsufficientPtOut",
            format!("PT out {} below minimum {}", e.actualPtOut, e.requiredPtOut),
        ),
        E::RouterInsufficientYtOut(e) => (
            "RouterInsufficientYtOut",
            format!("YT out {} below minimum {}", e.actualYtOut, e.requiredYtOut),
        ),
        E::RouterInsufficientSyOut(e) => (
            "RouterInsufficientSyOut",
            format!("SY out {} below minimum {}", e.actualSyOut, e.requiredSyOut),
        ),
        E::RouterInsufficientLpOut(e) => (
            "RouterInsufficientLpOut",
            format!("LP out {} below minimum {}", e.actualLpOut, e.requiredLpOut),
        ),
        E::RouterInsufficientPyOut(e) => (
            "RouterInsufficientPyOut",
            format!("PY out {} below minimum {}", e.actualPyOut, e.requiredPyOut),
        ),
        E::RouterInsufficientTokenOut(e) => (
            "RouterInsufficientTokenOut",
            format!(
                "token out {} below minimum {}",
                e.actualTokenOut, e.requiredTokenOut
            ),
        ),
        E::RouterCallbackNotMarket(e) => (
            "RouterCallbackNotMarket",
            format!("callback from non-market {}", e.caller),
        ),
        E::MarketExpired(_) => ("MarketExpired", "market has expired".to_string()),
        E::MarketZeroAmountsInput(_) => (
            "MarketZeroAmountsInput",
            "zero amount supplied to market".to_string(),
        ),
        E::MarketInsufficientPtForTrade(e) => (
            "MarketInsufficientPtForTrade",
            format!(
                "market holds {} PT, trade needs {}",
                e.currentAmount, e.requiredAmount
            ),
        ),
        E::MarketInsufficientSyForTrade(e) => (
            "MarketInsufficientSyForTrade",
            format!(
                "market holds {} SY, trade needs {}",
                e.currentAmount, e.requiredAmount
            ),
        ),
        E::MarketExchangeRateBelowOne(e) => (
            "MarketExchangeRateBelowOne",
            format!("exchange rate {} below one", e.exchangeRate),
        ),
        E::SYInvalidTokenIn(e) => (
            "SYInvalidTokenIn",
            format!("{} is not accepted for minting", e.token),
        ),
        E::SYInvalidTokenOut(e) => (
            "SYInvalidTokenOut",
            format!("{} is not offered on redemption", e.token),
        ),
        E::SYZeroDeposit(_) => ("SYZeroDeposit", "zero deposit".to_string()),
        E::SYZeroRedeem(_) => ("SYZeroRedeem", "zero redemption".to_string()),
        E::SYInsufficientSharesOut(e) => (
            "SYInsufficientSharesOut",
            format!(
                "shares out {} below minimum {}",
                e.actualSharesOut, e.requiredSharesOut
            ),
        ),
        E::YCExpired(_) => ("YCExpired", "yield contract has expired".to_string()),
        E::LOOrderExpired(e) => ("LOOrderExpired", format!("order {} expired", e.orderHash)),
        E::LOOrderCancelled(e) => (
            "LOOrderCancelled",
            format!("order {} cancelled", e.orderHash),
        ),
        E::LOInsufficientMakingAmount(e) => (
            "LOInsufficientMakingAmount",
            format!(
                "order {} has {} remaining, {} requested",
                e.orderHash, e.remaining, e.requested
            ),
        ),
        E::LOInvalidSignature(e) => (
            "LOInvalidSignature",
            format!("bad signature on order {}", e.orderHash),
        ),
    }
}

/// Decode revert data through the reason-code table.
///
/// Order: protocol custom errors, `Error(string)`, `Panic(uint256)`, then opaque.
pub fn decode_revert(data: &Bytes) -> RevertReason {
    if let Ok(err) = IProtocolErrors::IProtocolErrorsErrors::abi_decode(data) {
        let (name, message) = protocol_reason(&err);
        return RevertReason {
            name: Some(name.to_string()),
            message,
            data: data.clone(),
        };
    }
    if let Ok(revert) = Revert::abi_decode(data) {
        return RevertReason {
            name: Some("Error".to_string()),
            message: revert.reason.clone(),
            data: data.clone(),
        };
    }
    if let Ok(panic) = Panic::abi_decode(data) {
        let message = match panic.kind() {
            Some(kind) => kind.to_string(),
            None => format!("panic code {}", panic.code),
        };
        return RevertReason {
            name: Some("Panic".to_string()),
            message,
            data: data.clone(),
        };
    }
    RevertReason::opaque(data.clone())
}

/// Turn a chain-client failure into the public error taxonomy.
pub fn classify(err: ClientError) -> SdkError {
    match err {
        ClientError::Reverted { data, message } => {
            let mut reason = decode_revert(&data);
            if data.is_empty() && !message.is_empty() {
                reason.message = message;
            }
            SdkError::ContractRevert(reason)
        }
        ClientError::Transient { message } => SdkError::NetworkTransient { message },
        ClientError::Unreachable { url } => SdkError::NetworkTransient {
            message: format!("RPC endpoint unreachable at {}", url),
        },
        ClientError::Timeout {
            operation,
            after_ms,
        } => SdkError::NetworkTimeout {
            operation,
            after_ms,
        },
        ClientError::Rpc { code, message } => SdkError::Rpc { code, message },
        ClientError::Decode(message) => SdkError::Serialization(message),
    }
}
