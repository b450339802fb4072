//! Key layer and spend facade for UTXO coins.
//!
//! [`UtxoCore`] owns the secp256k1 context and ties the key tree in
//! [`hd_derivation`] to the chain layer in `chain_utxo`: derive account
//! keys, derive and validate addresses, build spends and sign them.

pub mod address;
pub mod error;
pub mod hd_derivation;
pub mod mnemonic;
pub mod types;

use bitcoin::secp256k1::{All, Secp256k1, SecretKey};
use chain_utxo::lookup;
use chain_utxo::script::AddressFamily;
use chain_utxo::transaction::{
    build_transaction, sign_transaction, SignedTx, SpendRequest, UnsignedTx,
};
use tracing::debug;

pub use address::DerivedAddress;
pub use error::WalletError;
pub use hd_derivation::ExtendedKey;
pub use mnemonic::mnemonic_to_seed;
pub use types::{DerivationPath, Purpose};

/// Entry point for hosts. Coins are addressed by registry name.
pub struct UtxoCore {
    secp: Secp256k1<All>,
}

impl Default for UtxoCore {
    fn default() -> Self {
        Self::new()
    }
}

impl UtxoCore {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    /// Account-level extended private key from a mnemonic or base64 seed.
    pub fn seed_to_xpriv(
        &self,
        coin: &str,
        seed_or_mnemonic: &str,
        purpose: Purpose,
        coin_type: Option<u32>,
        account: Option<u32>,
    ) -> Result<ExtendedKey, WalletError> {
        let coin = lookup(coin)?;
        hd_derivation::seed_or_mnemonic_to_xpriv(
            &self.secp,
            coin,
            seed_or_mnemonic,
            purpose,
            coin_type,
            account,
        )
    }

    pub fn xpriv_to_xpub(
        &self,
        coin: &str,
        xpriv: &str,
        purpose: Purpose,
    ) -> Result<ExtendedKey, WalletError> {
        hd_derivation::xpriv_to_xpub(&self.secp, lookup(coin)?, xpriv, purpose)
    }

    pub fn derive_address(
        &self,
        coin: &str,
        xpub: &str,
        path: &DerivationPath,
    ) -> Result<DerivedAddress, WalletError> {
        address::derive_address(&self.secp, lookup(coin)?, xpub, path)
    }

    pub fn validate_address(
        &self,
        coin: &str,
        address: &str,
    ) -> Result<AddressFamily, WalletError> {
        address::validate_address(lookup(coin)?, address)
    }

    /// WIF of the private key at `change/index` below `xpriv`.
    pub fn export_wif(
        &self,
        coin: &str,
        xpriv: &str,
        purpose: Purpose,
        change: u32,
        index: u32,
    ) -> Result<String, WalletError> {
        let coin = lookup(coin)?;
        let key =
            hd_derivation::xpriv_to_private_key(&self.secp, coin, xpriv, purpose, change, index)?;
        hd_derivation::private_key_to_wif(coin, &key)
    }

    /// Select inputs and assemble an unsigned transaction.
    pub fn make_spend(
        &self,
        coin: &str,
        request: &SpendRequest<'_>,
    ) -> Result<UnsignedTx, WalletError> {
        Ok(build_transaction(lookup(coin)?, request)?)
    }

    /// Sign with keys derived from `xpriv`. `key_paths[i]` is the
    /// `(change, index)` of input `i`; when fewer paths than inputs are
    /// given the last one signs the rest.
    pub fn sign_spend(
        &self,
        coin: &str,
        unsigned: &UnsignedTx,
        xpriv: &str,
        purpose: Purpose,
        key_paths: &[(u32, u32)],
    ) -> Result<SignedTx, WalletError> {
        let coin = lookup(coin)?;
        let keys = key_paths
            .iter()
            .map(|&(change, index)| {
                hd_derivation::xpriv_to_private_key(&self.secp, coin, xpriv, purpose, change, index)
            })
            .collect::<Result<Vec<SecretKey>, _>>()?;
        debug!(
            coin = coin.name,
            ?purpose,
            inputs = unsigned.inputs.len(),
            keys = keys.len(),
            "signing spend"
        );
        Ok(sign_transaction(&self.secp, coin, unsigned, &keys)?)
    }

    /// Sign with WIF-encoded keys, one per input or one for all.
    pub fn sign_spend_with_wif(
        &self,
        coin: &str,
        unsigned: &UnsignedTx,
        wifs: &[&str],
    ) -> Result<SignedTx, WalletError> {
        let coin = lookup(coin)?;
        let keys = wifs
            .iter()
            .map(|wif| hd_derivation::wif_to_private_key(coin, wif))
            .collect::<Result<Vec<SecretKey>, _>>()?;
        Ok(sign_transaction(&self.secp, coin, unsigned, &keys)?)
    }
}
