use thiserror::Error;

/// Chain-layer errors for UTXO coins.
#[derive(Debug, Error)]
pub enum UtxoError {
    #[error("unknown coin: {0}")]
    UnknownCoin(String),

    /// The input was encoded for a different prefix table entry. Prefix
    /// fallback scans move on to the next index on this variant only.
    #[error("prefix mismatch: expected {expected}, found {found}")]
    PrefixMismatch { expected: String, found: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("undetermined address type: {0}")]
    UndeterminedAddressType(String),

    #[error("invalid script family: {0}")]
    InvalidScriptFamily(String),

    #[error("missing script template: {0}")]
    MissingScriptTemplate(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient funds: short by {shortfall} sat (fee {fee} sat)")]
    InsufficientFunds { shortfall: u64, fee: u64 },

    #[error("transaction build error: {0}")]
    TransactionBuildError(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// Error types that can take part in a prefix-index fallback scan.
pub trait FallbackError {
    /// `true` for the "wrong network/version" class that lets the scan continue.
    fn is_prefix_mismatch(&self) -> bool;
}

impl FallbackError for UtxoError {
    fn is_prefix_mismatch(&self) -> bool {
        matches!(self, UtxoError::PrefixMismatch { .. })
    }
}
