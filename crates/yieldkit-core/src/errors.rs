//! Error types for yieldkit

use std::fmt;

use alloy::primitives::{Bytes, U256};
use thiserror::Error;

/// Errors surfaced by public SDK operations
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("Invalid parameter `{field}`: {message}")]
    InvalidParameter {
        field: &'static str,
        message: String,
    },

    #[error("Contract reverted: {0}")]
    ContractRevert(RevertReason),

    #[error("Network error: {message}")]
    NetworkTransient { message: String },

    #[error("{operation} timed out after {after_ms}ms")]
    NetworkTimeout { operation: String, after_ms: u64 },

    /// Node rejected the request for a reason other than a revert
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Stale quote: quoted {quoted_output}, requires at least {min_output}, now {current_output}")]
    StaleQuote {
        quoted_output: U256,
        min_output: U256,
        current_output: U256,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for SDK operations
pub type Result<T> = std::result::Result<T, SdkError>;

impl SdkError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field,
            message: message.into(),
        }
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::ContractRevert(_) => "contract_revert",
            Self::NetworkTransient { .. } => "network_transient",
            Self::NetworkTimeout { .. } => "network_timeout",
            Self::Rpc { .. } => "rpc_error",
            Self::StaleQuote { .. } => "stale_quote",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Whether a read may be retried locally. Sends are never retried regardless.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkTransient { .. } | Self::NetworkTimeout { .. }
        )
    }
}

/// A decoded (or opaque) on-chain revert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertReason {
    /// Error name from the reason-code table, `None` when undecodable
    pub name: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Raw revert payload
    pub data: Bytes,
}

impl RevertReason {
    pub fn opaque(data: Bytes) -> Self {
        let message = if data.is_empty() {
            "reverted without data".to_string()
        } else {
            format!("unknown revert 0x{}", hex::encode(&data))
        };
        Self {
            name: None,
            message,
            data,
        }
    }

    pub fn is_known(&self) -> bool {
        self.name.is_some()
    }
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Chain RPC errors, before protocol-level classification
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("RPC endpoint unreachable at {url}")]
    Unreachable { url: String },

    #[error("Transient RPC failure: {message}")]
    Transient { message: String },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Execution reverted: {message}")]
    Reverted { data: Bytes, message: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. } | Self::Unreachable { .. })
    }

    pub fn revert_data(&self) -> Option<&Bytes> {
        match self {
            Self::Reverted { data, .. } => Some(data),
            _ => None,
        }
    }
}
