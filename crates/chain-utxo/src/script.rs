use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_DUP, OP_EQUALVERIFY, OP_HASH160};
use bitcoin::opcodes::Opcode;
use bitcoin::script::{Builder, PushBytes};
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Script, ScriptBuf, ScriptHash, WScriptHash};
use serde::{Deserialize, Serialize};

use crate::error::UtxoError;
use crate::hashing::{hash160, sha256};

/// How an output is locked and, for inputs, how it is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptFamily {
    #[serde(rename = "p2pkh")]
    P2pkh,
    #[serde(rename = "p2sh")]
    P2sh,
    /// P2WPKH nested in P2SH.
    #[serde(rename = "p2wpkh-p2sh")]
    P2wpkhP2sh,
    #[serde(rename = "p2wpkh")]
    P2wpkh,
    #[serde(rename = "p2wsh")]
    P2wsh,
    #[serde(rename = "p2tr")]
    P2tr,
    /// P2SH over the replay-protection redeem script.
    #[serde(rename = "replay-protection")]
    ReplayProtection,
}

impl ScriptFamily {
    /// The address family of the output this script family produces.
    pub fn address_family(self) -> AddressFamily {
        match self {
            ScriptFamily::P2pkh => AddressFamily::P2pkh,
            ScriptFamily::P2sh | ScriptFamily::P2wpkhP2sh | ScriptFamily::ReplayProtection => {
                AddressFamily::P2sh
            }
            ScriptFamily::P2wpkh => AddressFamily::P2wpkh,
            ScriptFamily::P2wsh => AddressFamily::P2wsh,
            ScriptFamily::P2tr => AddressFamily::P2tr,
        }
    }

    /// Whether spending this family needs witness data.
    pub fn is_witness(self) -> bool {
        matches!(
            self,
            ScriptFamily::P2wpkhP2sh
                | ScriptFamily::P2wpkh
                | ScriptFamily::P2wsh
                | ScriptFamily::P2tr
        )
    }
}

/// Families distinguishable from an address or output script alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
}

impl AddressFamily {
    /// Classify a standard output script.
    pub fn classify(script: &Script) -> Option<Self> {
        if script.is_p2pkh() {
            Some(AddressFamily::P2pkh)
        } else if script.is_p2sh() {
            Some(AddressFamily::P2sh)
        } else if script.is_p2wpkh() {
            Some(AddressFamily::P2wpkh)
        } else if script.is_p2wsh() {
            Some(AddressFamily::P2wsh)
        } else if script.is_p2tr() {
            Some(AddressFamily::P2tr)
        } else {
            None
        }
    }
}

/// Builds a redeem script from a public key.
pub type ScriptTemplate = fn(&PublicKey) -> Result<ScriptBuf, UtxoError>;

/// Coin-specific redeem-script builders.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptTemplates {
    pub replay_protection: Option<ScriptTemplate>,
}

/// `OP_CHECKDATASIGVERIFY`, which the `bitcoin` crate only knows as a
/// reserved opcode.
pub const OP_CHECKDATASIGVERIFY: u8 = 0xbb;

const REPLAY_SIGNATURE: &str = "3045022100cc67f12c1a383295d4fa30f2a8761de2b8b7d87b397f92867fb3442394f4a5f6022060a13c1c6a00e3b46d26462288832996dff55f7ec6eea001a39dc53764568244";
const REPLAY_MESSAGE: &[u8] = b"Split BCH from BSV";
const REPLAY_PUBKEY: &str = "03ba36c5ad4a2f4ddaeeb2086168e932ff5a2759eeac3c2222dda03b3a33eb3328";

/// Serialized length of [`replay_protection`] output.
pub const REPLAY_PROTECTION_SCRIPT_LEN: usize = 151;

pub(crate) fn push_bytes(data: &[u8]) -> Result<&PushBytes, UtxoError> {
    <&PushBytes>::try_from(data)
        .map_err(|e| UtxoError::Encoding(format!("push too large: {e}")))
}

/// Replay-protection redeem script:
///
/// `<sig> <msg> <pubkey> OP_CHECKDATASIGVERIFY OP_DUP OP_HASH160 <hash160(key)> OP_EQUALVERIFY OP_CHECKSIG`
///
/// Only chains that enable `OP_CHECKDATASIG` can spend outputs locked this way.
pub fn replay_protection(pubkey: &PublicKey) -> Result<ScriptBuf, UtxoError> {
    let signature = hex::decode(REPLAY_SIGNATURE)
        .map_err(|e| UtxoError::Encoding(format!("replay signature: {e}")))?;
    let data_pubkey = hex::decode(REPLAY_PUBKEY)
        .map_err(|e| UtxoError::Encoding(format!("replay pubkey: {e}")))?;
    let key_hash = hash160(&pubkey.serialize());

    let script = Builder::new()
        .push_slice(push_bytes(&signature)?)
        .push_slice(push_bytes(REPLAY_MESSAGE)?)
        .push_slice(push_bytes(&data_pubkey)?)
        .push_opcode(Opcode::from(OP_CHECKDATASIGVERIFY))
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(push_bytes(&key_hash)?)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .into_script();
    Ok(script)
}

/// Hash a redeem script into the form committed to by `family`'s output:
/// HASH160 for P2SH, SHA-256 for P2WSH.
pub fn script_pubkey_to_script_hash(
    redeem_script: &[u8],
    family: AddressFamily,
) -> Result<Vec<u8>, UtxoError> {
    match family {
        AddressFamily::P2sh => Ok(hash160(redeem_script).to_vec()),
        AddressFamily::P2wsh => Ok(sha256(redeem_script).to_vec()),
        other => Err(UtxoError::InvalidScriptFamily(format!(
            "{other:?} does not commit to a script hash"
        ))),
    }
}

/// Build the output script that pays to a script hash.
pub fn script_hash_to_script_pubkey(
    hash: &[u8],
    family: AddressFamily,
) -> Result<ScriptBuf, UtxoError> {
    match family {
        AddressFamily::P2sh => {
            let bytes: [u8; 20] = hash.try_into().map_err(|_| {
                UtxoError::InvalidAddress(format!("P2SH hash must be 20 bytes, got {}", hash.len()))
            })?;
            Ok(ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(bytes)))
        }
        AddressFamily::P2wsh => {
            let bytes: [u8; 32] = hash.try_into().map_err(|_| {
                UtxoError::InvalidAddress(format!(
                    "P2WSH hash must be 32 bytes, got {}",
                    hash.len()
                ))
            })?;
            Ok(ScriptBuf::new_p2wsh(&WScriptHash::from_byte_array(bytes)))
        }
        other => Err(UtxoError::InvalidScriptFamily(format!(
            "{other:?} does not commit to a script hash"
        ))),
    }
}

/// P2SH output paying to `redeem_script`.
pub fn wrap_p2sh(redeem_script: &Script) -> Result<ScriptBuf, UtxoError> {
    let hash = script_pubkey_to_script_hash(redeem_script.as_bytes(), AddressFamily::P2sh)?;
    script_hash_to_script_pubkey(&hash, AddressFamily::P2sh)
}

/// Electrum-protocol script hash: SHA-256 of the output script, byte-reversed,
/// as hex.
pub fn electrum_script_hash(script_pubkey: &[u8]) -> String {
    let mut hash = sha256(script_pubkey);
    hash.reverse();
    hex::encode(hash)
}
