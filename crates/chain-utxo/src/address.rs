use bech32::{Fe32, Hrp};
use bitcoin::hashes::Hash;
use bitcoin::key::TweakedPublicKey;
use bitcoin::secp256k1::{PublicKey, Secp256k1, Verification, XOnlyPublicKey};
use bitcoin::{PubkeyHash, Script, ScriptBuf, ScriptHash, WPubkeyHash, WScriptHash};
use tracing::trace;

use crate::cashaddr::{self, CashAddrType};
use crate::coins::{CoinProfile, NetworkParams};
use crate::error::UtxoError;
use crate::hashing::hash160;
use crate::script::{wrap_p2sh, AddressFamily, ScriptFamily, ScriptTemplate};

/// Order in which address families are tried when none is given.
const DETECTION_ORDER: [AddressFamily; 5] = [
    AddressFamily::P2pkh,
    AddressFamily::P2sh,
    AddressFamily::P2wsh,
    AddressFamily::P2wpkh,
    AddressFamily::P2tr,
];

/// An address in the coin's preferred form plus its legacy base58 form.
///
/// For cashaddr coins `address` is the cashaddr string. For coins with more
/// than one prefix index `legacy_address` uses the last index. Segwit
/// addresses have no legacy form, so both fields are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAddress {
    pub address: String,
    pub legacy_address: String,
}

/// Output script plus the redeem script it commits to, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockingScript {
    pub script_pubkey: ScriptBuf,
    pub redeem_script: Option<ScriptBuf>,
}

fn base58_hash_address(coin: &CoinProfile, version: u8, hash: &[u8]) -> String {
    let mut payload = Vec::with_capacity(1 + hash.len());
    payload.push(version);
    payload.extend_from_slice(hash);
    coin.strategy.base58_encode(&payload)
}

fn segwit_hrp(coin: &CoinProfile) -> Result<Hrp, UtxoError> {
    let hrp = coin.prefixes.bech32.ok_or_else(|| {
        UtxoError::InvalidScriptFamily(format!("{} has no segwit addresses", coin.name))
    })?;
    Hrp::parse(hrp).map_err(|e| UtxoError::Encoding(format!("invalid bech32 prefix: {e}")))
}

fn wrong_script(family: AddressFamily) -> UtxoError {
    UtxoError::InvalidScriptFamily(format!("script is not {family:?}"))
}

/// Render an output script as an address of the given family.
pub fn script_pubkey_to_address(
    coin: &CoinProfile,
    script: &Script,
    family: AddressFamily,
) -> Result<EncodedAddress, UtxoError> {
    let bytes = script.as_bytes();
    match family {
        AddressFamily::P2pkh | AddressFamily::P2sh => {
            let (hash, kind) = match family {
                AddressFamily::P2pkh if script.is_p2pkh() => {
                    (&bytes[3..23], CashAddrType::PubkeyHash)
                }
                AddressFamily::P2sh if script.is_p2sh() => {
                    (&bytes[2..22], CashAddrType::ScriptHash)
                }
                _ => return Err(wrong_script(family)),
            };
            let version = |params: &NetworkParams| match kind {
                CashAddrType::PubkeyHash => params.pubkey_hash,
                CashAddrType::ScriptHash => params.script_hash,
            };

            let legacy_address =
                base58_hash_address(coin, version(&coin.legacy_params()?), hash);
            let address = match coin.prefixes.cashaddr {
                Some(prefix) => cashaddr::encode(prefix, kind, hash)?,
                None => base58_hash_address(coin, version(&coin.standard_params()?), hash),
            };
            Ok(EncodedAddress {
                address,
                legacy_address,
            })
        }
        AddressFamily::P2wpkh | AddressFamily::P2wsh | AddressFamily::P2tr => {
            let matches = match family {
                AddressFamily::P2wpkh => script.is_p2wpkh(),
                AddressFamily::P2wsh => script.is_p2wsh(),
                _ => script.is_p2tr(),
            };
            if !matches {
                return Err(wrong_script(family));
            }
            let version = if family == AddressFamily::P2tr {
                Fe32::P
            } else {
                Fe32::Q
            };
            let address = bech32::segwit::encode(segwit_hrp(coin)?, version, &bytes[2..])
                .map_err(|e| UtxoError::Encoding(format!("bech32 encode failed: {e}")))?;
            Ok(EncodedAddress {
                legacy_address: address.clone(),
                address,
            })
        }
    }
}

fn decode_base58_hash(
    coin: &CoinProfile,
    address: &str,
    family: AddressFamily,
) -> Result<[u8; 20], UtxoError> {
    let payload = coin.strategy.base58_decode(address)?;
    if payload.len() != 21 {
        return Err(UtxoError::InvalidAddress(format!(
            "expected 21-byte payload, got {}",
            payload.len()
        )));
    }

    let found = coin.try_each_prefix(|params| {
        let expected = match family {
            AddressFamily::P2pkh => params.pubkey_hash,
            _ => params.script_hash,
        };
        if payload[0] == expected {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&payload[1..]);
            Ok(hash)
        } else {
            Err(UtxoError::PrefixMismatch {
                expected: format!("0x{expected:02x}"),
                found: format!("0x{:02x}", payload[0]),
            })
        }
    })?;

    found.ok_or_else(|| {
        UtxoError::InvalidAddress(format!(
            "version byte 0x{:02x} is not a {family:?} prefix for {}",
            payload[0], coin.name
        ))
    })
}

fn decode_cashaddr_hash(
    coin: &CoinProfile,
    address: &str,
    family: AddressFamily,
) -> Option<[u8; 20]> {
    let prefix = coin.prefixes.cashaddr?;
    let (kind, hash) = cashaddr::decode(address, prefix).ok()?;
    let wanted = match family {
        AddressFamily::P2pkh => CashAddrType::PubkeyHash,
        _ => CashAddrType::ScriptHash,
    };
    if kind != wanted {
        return None;
    }
    hash.try_into().ok()
}

fn decode_segwit_program(
    coin: &CoinProfile,
    address: &str,
    family: AddressFamily,
) -> Result<ScriptBuf, UtxoError> {
    let expected_hrp = segwit_hrp(coin)?;
    let (hrp, version, program) = bech32::segwit::decode(address)
        .map_err(|e| UtxoError::InvalidAddress(format!("invalid segwit address: {e}")))?;
    if hrp != expected_hrp {
        return Err(UtxoError::InvalidAddress(format!(
            "segwit prefix {hrp} does not belong to {}",
            coin.name
        )));
    }

    let bad_program = || {
        UtxoError::InvalidAddress(format!(
            "witness v{} program of {} bytes is not {family:?}",
            version.to_u8(),
            program.len()
        ))
    };
    match (family, version.to_u8()) {
        (AddressFamily::P2wpkh, 0) => {
            let hash: [u8; 20] = program.as_slice().try_into().map_err(|_| bad_program())?;
            Ok(ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(hash)))
        }
        (AddressFamily::P2wsh, 0) => {
            let hash: [u8; 32] = program.as_slice().try_into().map_err(|_| bad_program())?;
            Ok(ScriptBuf::new_p2wsh(&WScriptHash::from_byte_array(hash)))
        }
        (AddressFamily::P2tr, 1) => {
            if program.len() != 32 {
                return Err(bad_program());
            }
            let key = XOnlyPublicKey::from_slice(&program)
                .map_err(|e| UtxoError::InvalidAddress(format!("invalid taproot key: {e}")))?;
            Ok(ScriptBuf::new_p2tr_tweaked(
                TweakedPublicKey::dangerous_assume_tweaked(key),
            ))
        }
        _ => Err(bad_program()),
    }
}

fn decode_as(
    coin: &CoinProfile,
    address: &str,
    family: AddressFamily,
) -> Result<ScriptBuf, UtxoError> {
    match family {
        AddressFamily::P2pkh | AddressFamily::P2sh => {
            let hash = match decode_cashaddr_hash(coin, address, family) {
                Some(hash) => hash,
                None => decode_base58_hash(coin, address, family)?,
            };
            Ok(match family {
                AddressFamily::P2pkh => ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash)),
                _ => ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(hash)),
            })
        }
        AddressFamily::P2wpkh | AddressFamily::P2wsh | AddressFamily::P2tr => {
            decode_segwit_program(coin, address, family)
        }
    }
}

fn detect_family(
    coin: &CoinProfile,
    address: &str,
) -> Result<(AddressFamily, ScriptBuf), UtxoError> {
    if let Some(prefix) = coin.prefixes.cashaddr {
        if let Ok((kind, hash)) = cashaddr::decode(address, prefix) {
            let family = match kind {
                CashAddrType::PubkeyHash => AddressFamily::P2pkh,
                CashAddrType::ScriptHash => AddressFamily::P2sh,
            };
            if let Ok(script) = decode_as(coin, address, family) {
                return Ok((family, script));
            }
            trace!(coin = coin.name, len = hash.len(), "cashaddr payload is not a 20-byte hash");
        }
    }

    for family in DETECTION_ORDER {
        match decode_as(coin, address, family) {
            Ok(script) => return Ok((family, script)),
            Err(e) => trace!(coin = coin.name, ?family, error = %e, "address family did not match"),
        }
    }

    Err(UtxoError::UndeterminedAddressType(address.to_string()))
}

/// Decode an address into its output script. An explicit `family` skips
/// guessing and decodes the address as exactly that family.
pub fn address_to_script_pubkey(
    coin: &CoinProfile,
    address: &str,
    family: Option<AddressFamily>,
) -> Result<ScriptBuf, UtxoError> {
    match family {
        Some(family) => decode_as(coin, address, family),
        None => detect_family(coin, address).map(|(_, script)| script),
    }
}

/// Classify an address by probing each family in turn.
pub fn guess_address_family(coin: &CoinProfile, address: &str) -> Result<AddressFamily, UtxoError> {
    detect_family(coin, address).map(|(family, _)| family)
}

/// Build the output script (and redeem script) that locks funds to `pubkey`.
///
/// `template` is required for [`ScriptFamily::ReplayProtection`]. P2SH and
/// P2WSH need an arbitrary redeem script and cannot be built from a key.
pub fn pubkey_to_script_pubkey<C: Verification>(
    secp: &Secp256k1<C>,
    coin: &CoinProfile,
    pubkey: &PublicKey,
    family: ScriptFamily,
    template: Option<ScriptTemplate>,
) -> Result<LockingScript, UtxoError> {
    if family.is_witness() && !coin.segwit {
        return Err(UtxoError::InvalidScriptFamily(format!(
            "{} does not support {family:?}",
            coin.name
        )));
    }

    let key_hash = hash160(&pubkey.serialize());
    let locking = match family {
        ScriptFamily::P2pkh => LockingScript {
            script_pubkey: ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(key_hash)),
            redeem_script: None,
        },
        ScriptFamily::P2wpkh => LockingScript {
            script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(key_hash)),
            redeem_script: None,
        },
        ScriptFamily::P2wpkhP2sh => {
            let redeem = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(key_hash));
            LockingScript {
                script_pubkey: wrap_p2sh(&redeem)?,
                redeem_script: Some(redeem),
            }
        }
        ScriptFamily::P2tr => {
            let (internal_key, _) = pubkey.x_only_public_key();
            LockingScript {
                script_pubkey: ScriptBuf::new_p2tr(secp, internal_key, None),
                redeem_script: None,
            }
        }
        ScriptFamily::ReplayProtection => {
            let template = template.ok_or_else(|| {
                UtxoError::MissingScriptTemplate(format!(
                    "{} has no replay-protection template",
                    coin.name
                ))
            })?;
            let redeem = template(pubkey)?;
            LockingScript {
                script_pubkey: wrap_p2sh(&redeem)?,
                redeem_script: Some(redeem),
            }
        }
        ScriptFamily::P2sh | ScriptFamily::P2wsh => {
            return Err(UtxoError::InvalidScriptFamily(format!(
                "{family:?} needs a redeem script, not a public key"
            )))
        }
    };
    Ok(locking)
}
