use chain_utxo::error::FallbackError;
use chain_utxo::UtxoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Invalid extended key: {0}")]
    InvalidExtendedKey(String),

    #[error("Invalid purpose number: {0}")]
    InvalidPurposeNumber(u32),

    /// Version bytes belong to another prefix index of the coin.
    #[error("Prefix mismatch: expected {expected}, found {found}")]
    PrefixMismatch { expected: String, found: String },

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid derivation path: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Chain(#[from] UtxoError),
}

impl FallbackError for WalletError {
    fn is_prefix_mismatch(&self) -> bool {
        match self {
            WalletError::PrefixMismatch { .. } => true,
            WalletError::Chain(inner) => inner.is_prefix_mismatch(),
            _ => false,
        }
    }
}
