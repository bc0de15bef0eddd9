//! yieldkit-tx: Transaction building utilities for the yield protocol
//!
//! Provides the protocol ABI, revert decoding, pending calls with
//! static/estimate/send modes, and atomic multicall bundles.

pub mod abi;
pub mod bundle;
pub mod pending;
pub mod revert;

pub use bundle::{BundleReturn, Bundler, SubCallResult};
pub use pending::{CallMeta, Decoder, PendingCall, QuotedOutput, TxHandle};
pub use revert::{classify, decode_revert};
