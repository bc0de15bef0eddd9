//! Core type definitions for yieldkit

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::errors::SdkError;

/// EVM chain identifier
pub type ChainId = u64;

/// Block number
pub type BlockNumber = u64;

/// Sentinel address used for the chain's native asset in token positions
pub const NATIVE_TOKEN: Address = Address::ZERO;

/// Parse an address from user input.
///
/// All-lowercase or all-uppercase hex is accepted as-is; mixed case must be a
/// valid EIP-55 checksum.
pub fn parse_address(input: &str) -> Result<Address, SdkError> {
    let trimmed = input.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);

    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());

    let parsed = if has_lower && has_upper {
        let prefixed = format!("0x{}", hex_part);
        Address::parse_checksummed(&prefixed, None).map_err(|e| SdkError::InvalidParameter {
            field: "address",
            message: format!("{}: {}", trimmed, e),
        })?
    } else {
        Address::from_str(hex_part).map_err(|e| SdkError::InvalidParameter {
            field: "address",
            message: format!("{}: {}", trimmed, e),
        })?
    };

    Ok(parsed)
}

/// Reject the zero address for parameters where it has no meaning.
pub fn require_non_zero(field: &'static str, address: Address) -> Result<Address, SdkError> {
    if address.is_zero() {
        return Err(SdkError::InvalidParameter {
            field,
            message: "zero address".to_string(),
        });
    }
    Ok(address)
}

/// Amount of a specific token, in raw (smallest) units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenAmount {
    pub token: Address,
    pub amount: U256,
}

impl TokenAmount {
    pub fn new(token: Address, amount: U256) -> Self {
        Self { token, amount }
    }

    pub fn zero(token: Address) -> Self {
        Self {
            token,
            amount: U256::ZERO,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn is_native(&self) -> bool {
        self.token == NATIVE_TOKEN
    }

    /// Add an amount of the same token; `None` on overflow or token mismatch.
    pub fn checked_add(&self, other: &TokenAmount) -> Option<TokenAmount> {
        if self.token != other.token {
            return None;
        }
        self.amount
            .checked_add(other.amount)
            .map(|amount| TokenAmount::new(self.token, amount))
    }

    pub fn saturating_sub(&self, amount: U256) -> TokenAmount {
        TokenAmount::new(self.token, self.amount.saturating_sub(amount))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.amount, self.token)
    }
}

/// Slippage tolerance in parts per million
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Slippage(u32);

impl Slippage {
    pub const PPM: u32 = 1_000_000;

    pub const ZERO: Slippage = Slippage(0);

    pub fn from_ppm(ppm: u32) -> Result<Self, SdkError> {
        if ppm > Self::PPM {
            return Err(SdkError::InvalidParameter {
                field: "slippage",
                message: format!("{} ppm exceeds 100%", ppm),
            });
        }
        Ok(Self(ppm))
    }

    pub fn from_bps(bps: u32) -> Result<Self, SdkError> {
        let ppm = bps.checked_mul(100).ok_or(SdkError::InvalidParameter {
            field: "slippage",
            message: format!("{} bps overflows", bps),
        })?;
        Self::from_ppm(ppm)
    }

    pub fn ppm(&self) -> u32 {
        self.0
    }

    /// Minimum acceptable output: `floor(output * (1 - s))`.
    pub fn min_output(&self, output: U256) -> U256 {
        let keep = U256::from(Self::PPM - self.0);
        match output.checked_mul(keep) {
            Some(scaled) => scaled / U256::from(Self::PPM),
            // Dividing first rounds down by at most one unit of `output / PPM`,
            // which still never loosens the guard.
            None => (output / U256::from(Self::PPM)) * keep,
        }
    }

    /// Slippage as a float fraction, for aggregator APIs that take one.
    pub fn as_fraction(&self) -> f64 {
        self.0 as f64 / Self::PPM as f64
    }
}

impl TryFrom<u32> for Slippage {
    type Error = SdkError;

    fn try_from(ppm: u32) -> Result<Self, Self::Error> {
        Self::from_ppm(ppm)
    }
}

impl From<Slippage> for u32 {
    fn from(slippage: Slippage) -> Self {
        slippage.0
    }
}

impl Default for Slippage {
    /// 0.5%
    fn default() -> Self {
        Self(5_000)
    }
}

impl fmt::Display for Slippage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}%", self.as_fraction() * 100.0)
    }
}

/// Fixed-point constants
pub mod constants {
    use alloy::primitives::U256;

    /// 1e18
    pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

    /// Seconds in a 365-day year
    pub const ONE_YEAR_SECS: u64 = 365 * 86_400;
}
