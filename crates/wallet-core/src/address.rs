use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::ScriptBuf;
use chain_utxo::address::{guess_address_family, pubkey_to_script_pubkey, script_pubkey_to_address};
use chain_utxo::script::{electrum_script_hash, AddressFamily, ScriptFamily};
use chain_utxo::CoinProfile;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::WalletError;
use crate::hd_derivation::xpub_to_pubkey;
use crate::types::DerivationPath;

/// Derived address for a specific coin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedAddress {
    pub coin: String,
    pub address: String,
    /// Base58 form for cashaddr coins and coins with an alternate prefix.
    pub legacy_address: String,
    pub script_family: ScriptFamily,
    pub script_pubkey: ScriptBuf,
    pub redeem_script: Option<ScriptBuf>,
    /// Electrum-style script hash used to query indexers.
    pub script_hash: String,
    pub derivation_path: String,
}

/// Derive the address at `path` from an account-level extended public key.
pub fn derive_address<C: Verification>(
    secp: &Secp256k1<C>,
    coin: &CoinProfile,
    xpub: &str,
    path: &DerivationPath,
) -> Result<DerivedAddress, WalletError> {
    let pubkey = xpub_to_pubkey(secp, coin, xpub, path.purpose, path.change, path.index)?;

    let family = path.purpose.script_family();
    let template = match family {
        ScriptFamily::ReplayProtection => coin.replay_protection_template(),
        _ => None,
    };
    let locking = pubkey_to_script_pubkey(secp, coin, &pubkey, family, template)?;
    let encoded =
        script_pubkey_to_address(coin, &locking.script_pubkey, family.address_family())?;

    trace!(coin = coin.name, path = %path, address = %encoded.address, "derived address");
    Ok(DerivedAddress {
        coin: coin.name.to_string(),
        address: encoded.address,
        legacy_address: encoded.legacy_address,
        script_family: family,
        script_hash: electrum_script_hash(locking.script_pubkey.as_bytes()),
        script_pubkey: locking.script_pubkey,
        redeem_script: locking.redeem_script,
        derivation_path: path.to_string(),
    })
}

/// Derive `count` consecutive addresses starting at `path`.
pub fn derive_addresses<C: Verification>(
    secp: &Secp256k1<C>,
    coin: &CoinProfile,
    xpub: &str,
    path: &DerivationPath,
    count: u32,
) -> Result<Vec<DerivedAddress>, WalletError> {
    let mut cursor = *path;
    let mut addresses = Vec::with_capacity(count as usize);
    for n in 0..count {
        if n > 0 {
            cursor.advance_index()?;
        }
        addresses.push(derive_address(secp, coin, xpub, &cursor)?);
    }
    Ok(addresses)
}

/// Validate an address for `coin` and report its family.
pub fn validate_address(coin: &CoinProfile, address: &str) -> Result<AddressFamily, WalletError> {
    Ok(guess_address_family(coin, address.trim())?)
}
