//! Chain layer for Bitcoin-derived UTXO coins.
//!
//! Holds the per-coin registry (version prefixes and primitive overrides),
//! address and script encoding for every supported script family, coin
//! selection with a byte-accurate fee model, and transaction assembly and
//! signing including fork-id and replay-protection inputs.

pub mod address;
pub mod base58;
pub mod cashaddr;
pub mod coins;
pub mod error;
pub mod fees;
pub mod hashing;
pub mod script;
pub mod sighash;
pub mod sort;
pub mod transaction;
pub mod utxo;

pub use coins::{lookup, CoinProfile};
pub use error::UtxoError;
