//! BIP32 key trees for UTXO coins.
//!
//! Keys are derived with `bitcoin::bip32` and serialized with the coin's own
//! version bytes and Base58Check codec. Decoding tries every prefix index of
//! the coin, so a key written under a legacy or alternate prefix is still
//! accepted; the result is always re-encoded at the index it matched.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, Signing, Verification};
use bitcoin::NetworkKind;
use chain_utxo::coins::NetworkParams;
use chain_utxo::CoinProfile;
use tracing::debug;
use zeroize::Zeroize;

use crate::error::WalletError;
use crate::mnemonic::{looks_like_mnemonic, mnemonic_to_seed};
use crate::types::Purpose;

const PAYLOAD_LEN: usize = 78;
/// Version bytes `bitcoin::bip32` expects when decoding.
const BIP32_PRIVATE: [u8; 4] = [0x04, 0x88, 0xad, 0xe4];
const BIP32_PUBLIC: [u8; 4] = [0x04, 0x88, 0xb2, 0x1e];

const MIN_SEED_LEN: usize = 16;
const MAX_SEED_LEN: usize = 64;

/// A serialized extended key plus its decoded fields.
pub struct ExtendedKey {
    encoded: String,
    /// Registry name of the coin whose prefixes encode this key.
    pub coin: &'static str,
    pub purpose: Purpose,
    pub version: [u8; 4],
    pub depth: u8,
    pub chain_code: [u8; 32],
    /// `0x00 || secret` for private keys, the compressed point otherwise.
    key_data: [u8; 33],
}

impl ExtendedKey {
    fn from_payload(
        coin: &CoinProfile,
        purpose: Purpose,
        version: [u8; 4],
        mut payload: [u8; PAYLOAD_LEN],
    ) -> Self {
        payload[..4].copy_from_slice(&version);
        let encoded = coin.strategy.base58_encode(&payload);

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[13..45]);
        let mut key_data = [0u8; 33];
        key_data.copy_from_slice(&payload[45..]);
        let depth = payload[4];
        payload.zeroize();

        Self {
            encoded,
            coin: coin.name,
            purpose,
            version,
            depth,
            chain_code,
            key_data,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn is_private(&self) -> bool {
        self.key_data[0] == 0x00
    }

    pub fn key_data(&self) -> &[u8; 33] {
        &self.key_data
    }
}

impl fmt::Debug for ExtendedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ExtendedKey");
        s.field("coin", &self.coin)
            .field("purpose", &self.purpose)
            .field("version", &hex::encode(self.version))
            .field("depth", &self.depth);
        if !self.is_private() {
            s.field("encoded", &self.encoded);
        }
        s.finish_non_exhaustive()
    }
}

impl Drop for ExtendedKey {
    fn drop(&mut self) {
        self.encoded.zeroize();
        self.chain_code.zeroize();
        self.key_data.zeroize();
    }
}

fn hardened(index: u32) -> Result<ChildNumber, WalletError> {
    ChildNumber::from_hardened_idx(index).map_err(|e| WalletError::DerivationFailed(e.to_string()))
}

fn normal(index: u32) -> Result<ChildNumber, WalletError> {
    ChildNumber::from_normal_idx(index).map_err(|e| WalletError::DerivationFailed(e.to_string()))
}

fn decode_seed(seed_or_mnemonic: &str) -> Result<Vec<u8>, WalletError> {
    if looks_like_mnemonic(seed_or_mnemonic) {
        return mnemonic_to_seed(seed_or_mnemonic, "");
    }
    let mut seed = STANDARD
        .decode(seed_or_mnemonic.trim())
        .map_err(|e| WalletError::InvalidSeed(format!("not a mnemonic or base64 seed: {e}")))?;
    if !(MIN_SEED_LEN..=MAX_SEED_LEN).contains(&seed.len()) {
        let len = seed.len();
        seed.zeroize();
        return Err(WalletError::InvalidSeed(format!(
            "seed must be {MIN_SEED_LEN} to {MAX_SEED_LEN} bytes, got {len}"
        )));
    }
    Ok(seed)
}

/// Derive the account-level extended private key.
///
/// Mnemonics derive `m/purpose'/coin_type'/account'`. Raw base64 seeds and
/// the Airbitz purpose derive the single child `m/0`. `coin_type` defaults to
/// the coin's own and `account` to 0.
pub fn seed_or_mnemonic_to_xpriv<C: Signing>(
    secp: &Secp256k1<C>,
    coin: &CoinProfile,
    seed_or_mnemonic: &str,
    purpose: Purpose,
    coin_type: Option<u32>,
    account: Option<u32>,
) -> Result<ExtendedKey, WalletError> {
    let from_mnemonic = looks_like_mnemonic(seed_or_mnemonic);
    let mut seed = decode_seed(seed_or_mnemonic)?;
    let master = Xpriv::new_master(NetworkKind::Main, &seed);
    seed.zeroize();
    let master = master.map_err(|e| WalletError::InvalidSeed(e.to_string()))?;

    let path = if purpose == Purpose::Airbitz || !from_mnemonic {
        vec![normal(0)?]
    } else {
        vec![
            hardened(purpose.number())?,
            hardened(coin_type.unwrap_or(coin.coin_type))?,
            hardened(account.unwrap_or(0))?,
        ]
    };
    let xpriv = master
        .derive_priv(secp, &path)
        .map_err(|e| WalletError::DerivationFailed(e.to_string()))?;

    let params = coin.standard_params()?;
    debug!(coin = coin.name, ?purpose, depth = path.len(), "derived account key");
    Ok(ExtendedKey::from_payload(
        coin,
        purpose,
        purpose.xkey_version(&params).private,
        xpriv.encode(),
    ))
}

fn decode_payload(
    coin: &CoinProfile,
    encoded: &str,
    expected: [u8; 4],
) -> Result<[u8; PAYLOAD_LEN], WalletError> {
    let mut data = coin
        .strategy
        .base58_decode(encoded.trim())
        .map_err(|e| WalletError::InvalidExtendedKey(e.to_string()))?;
    let payload: Result<[u8; PAYLOAD_LEN], _> = data.as_slice().try_into();
    let len = data.len();
    data.zeroize();
    let payload = payload.map_err(|_| {
        WalletError::InvalidExtendedKey(format!("expected {PAYLOAD_LEN} bytes, got {len}"))
    })?;

    if payload[..4] != expected {
        return Err(WalletError::PrefixMismatch {
            expected: hex::encode(expected),
            found: hex::encode(&payload[..4]),
        });
    }
    Ok(payload)
}

fn decode_xpriv(
    coin: &CoinProfile,
    params: &NetworkParams,
    purpose: Purpose,
    encoded: &str,
) -> Result<Xpriv, WalletError> {
    let mut payload = decode_payload(coin, encoded, purpose.xkey_version(params).private)?;
    payload[..4].copy_from_slice(&BIP32_PRIVATE);
    let xpriv = Xpriv::decode(&payload).map_err(|e| WalletError::InvalidExtendedKey(e.to_string()));
    payload.zeroize();
    xpriv
}

fn decode_xpub(
    coin: &CoinProfile,
    params: &NetworkParams,
    purpose: Purpose,
    encoded: &str,
) -> Result<Xpub, WalletError> {
    let mut payload = decode_payload(coin, encoded, purpose.xkey_version(params).public)?;
    payload[..4].copy_from_slice(&BIP32_PUBLIC);
    Xpub::decode(&payload).map_err(|e| WalletError::InvalidExtendedKey(e.to_string()))
}

/// Run `attempt` at every prefix index of `coin` until one accepts the key.
fn scan_prefixes<T, F>(coin: &CoinProfile, kind: &str, attempt: F) -> Result<T, WalletError>
where
    F: FnMut(&NetworkParams) -> Result<T, WalletError>,
{
    coin.try_each_prefix(attempt)?.ok_or_else(|| {
        WalletError::InvalidExtendedKey(format!("not a {} {kind} for this purpose", coin.name))
    })
}

/// Neuter an extended private key, keeping the prefix index it was
/// serialized under.
pub fn xpriv_to_xpub<C: Signing>(
    secp: &Secp256k1<C>,
    coin: &CoinProfile,
    xpriv: &str,
    purpose: Purpose,
) -> Result<ExtendedKey, WalletError> {
    scan_prefixes(coin, "extended private key", |params| {
        let key = decode_xpriv(coin, params, purpose, xpriv)?;
        let xpub = Xpub::from_priv(secp, &key);
        Ok(ExtendedKey::from_payload(
            coin,
            purpose,
            purpose.xkey_version(params).public,
            xpub.encode(),
        ))
    })
}

/// Public key at `change/index` below an account-level extended public key.
pub fn xpub_to_pubkey<C: Verification>(
    secp: &Secp256k1<C>,
    coin: &CoinProfile,
    xpub: &str,
    purpose: Purpose,
    change: u32,
    index: u32,
) -> Result<PublicKey, WalletError> {
    let account = scan_prefixes(coin, "extended public key", |params| {
        decode_xpub(coin, params, purpose, xpub)
    })?;
    let leaf = [normal(change)?, normal(index)?];
    let child = account
        .derive_pub(secp, &leaf)
        .map_err(|e| WalletError::DerivationFailed(e.to_string()))?;
    Ok(child.public_key)
}

/// Private key at `change/index` below an account-level extended private key.
pub fn xpriv_to_private_key<C: Signing>(
    secp: &Secp256k1<C>,
    coin: &CoinProfile,
    xpriv: &str,
    purpose: Purpose,
    change: u32,
    index: u32,
) -> Result<SecretKey, WalletError> {
    let account = scan_prefixes(coin, "extended private key", |params| {
        decode_xpriv(coin, params, purpose, xpriv)
    })?;
    let leaf = [normal(change)?, normal(index)?];
    let child = account
        .derive_priv(secp, &leaf)
        .map_err(|e| WalletError::DerivationFailed(e.to_string()))?;
    Ok(child.private_key)
}

/// WIF encoding under the coin's current prefix and codec.
pub fn private_key_to_wif(coin: &CoinProfile, key: &SecretKey) -> Result<String, WalletError> {
    let params = coin.standard_params()?;
    let mut bytes = key.secret_bytes();
    let wif = coin.strategy.wif_encode(params.wif, &bytes);
    bytes.zeroize();
    Ok(wif)
}

/// Decode a WIF string written under any of the coin's prefix indices.
pub fn wif_to_private_key(coin: &CoinProfile, wif: &str) -> Result<SecretKey, WalletError> {
    let mut bytes = coin
        .try_each_prefix(|params| coin.strategy.wif_decode(params.wif, wif.trim()))?
        .ok_or_else(|| {
            WalletError::InvalidPrivateKey(format!("WIF version is not a {} prefix", coin.name))
        })?;
    let key =
        SecretKey::from_slice(&bytes).map_err(|e| WalletError::InvalidPrivateKey(e.to_string()));
    bytes.zeroize();
    key
}
