//! Signature digests for ECDSA inputs.
//!
//! Legacy and BIP143 preimages come from `bitcoin`'s sighash cache and are
//! then hashed with the coin's own digest function. Fork-id hash types are
//! not standard `EcdsaSighashType` values, so their BIP143 preimage is
//! assembled here.

use bitcoin::consensus::encode::serialize;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, Script, Transaction};

use crate::coins::CoinProfile;
use crate::error::UtxoError;
use crate::hashing::sha256d;

const SIGHASH_ALL: u32 = 0x01;
const SIGHASH_FORKID: u32 = 0x40;

/// Hash type committed to in the preimage and the byte appended to the
/// DER signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SighashType {
    pub preimage_value: u32,
    pub signature_byte: u8,
}

impl SighashType {
    pub const ALL: SighashType = SighashType {
        preimage_value: SIGHASH_ALL,
        signature_byte: SIGHASH_ALL as u8,
    };
}

/// `SIGHASH_ALL`, or `SIGHASH_ALL | SIGHASH_FORKID | fork_id << 8` for
/// replay-protected forks.
pub fn sighash_type(coin: &CoinProfile) -> SighashType {
    match coin.fork_id {
        Some(fork_id) => {
            let base = SIGHASH_ALL | SIGHASH_FORKID;
            SighashType {
                preimage_value: base | (fork_id << 8),
                signature_byte: base as u8,
            }
        }
        None => SighashType::ALL,
    }
}

/// Whether inputs of this coin are signed with the BIP143 digest even when
/// they carry no witness.
pub fn uses_bip143(coin: &CoinProfile, witness_input: bool) -> bool {
    witness_input || coin.fork_id.is_some()
}

fn check_index(tx: &Transaction, input_index: usize) -> Result<(), UtxoError> {
    if input_index >= tx.input.len() {
        return Err(UtxoError::SigningFailed(format!(
            "input index {input_index} out of bounds ({} inputs)",
            tx.input.len()
        )));
    }
    Ok(())
}

/// Original (pre-segwit) preimage, hash type included.
pub fn legacy_preimage(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    hash_type: u32,
) -> Result<Vec<u8>, UtxoError> {
    check_index(tx, input_index)?;

    let mut data = Vec::new();
    let single_bug = SighashCache::new(tx)
        .legacy_encode_signing_data_to(&mut data, input_index, script_code, hash_type)
        .is_sighash_single_bug()
        .map_err(|e| UtxoError::SigningFailed(e.to_string()))?;
    if single_bug {
        return Err(UtxoError::SigningFailed(
            "SIGHASH_SINGLE input has no matching output".into(),
        ));
    }
    Ok(data)
}

/// BIP143 preimage. Fork-id hash types take the hand-built path.
pub fn bip143_preimage(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: u64,
    hash_type: u32,
) -> Result<Vec<u8>, UtxoError> {
    check_index(tx, input_index)?;
    if hash_type & SIGHASH_FORKID != 0 {
        return Ok(fork_id_preimage(tx, input_index, script_code, value, hash_type));
    }

    let standard = EcdsaSighashType::from_standard(hash_type)
        .map_err(|e| UtxoError::SigningFailed(e.to_string()))?;
    let mut data = Vec::new();
    SighashCache::new(tx)
        .segwit_v0_encode_signing_data_to(
            &mut data,
            input_index,
            script_code,
            Amount::from_sat(value),
            standard,
        )
        .map_err(|e| UtxoError::SigningFailed(e.to_string()))?;
    Ok(data)
}

/// BIP143 SIGHASH_ALL layout with an arbitrary 32-bit hash type.
fn fork_id_preimage(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: u64,
    hash_type: u32,
) -> Vec<u8> {
    let hash_prevouts = {
        let mut data = Vec::with_capacity(tx.input.len() * 36);
        for input in &tx.input {
            data.extend_from_slice(&serialize(&input.previous_output));
        }
        sha256d(&data)
    };

    let hash_sequence = {
        let mut data = Vec::with_capacity(tx.input.len() * 4);
        for input in &tx.input {
            data.extend_from_slice(&input.sequence.to_consensus_u32().to_le_bytes());
        }
        sha256d(&data)
    };

    let hash_outputs = {
        let mut data = Vec::new();
        for output in &tx.output {
            data.extend_from_slice(&serialize(output));
        }
        sha256d(&data)
    };

    let input = &tx.input[input_index];
    let mut data = Vec::with_capacity(156 + script_code.len());
    data.extend_from_slice(&tx.version.0.to_le_bytes());
    data.extend_from_slice(&hash_prevouts);
    data.extend_from_slice(&hash_sequence);
    data.extend_from_slice(&serialize(&input.previous_output));
    data.extend_from_slice(&serialize(&script_code.to_owned()));
    data.extend_from_slice(&value.to_le_bytes());
    data.extend_from_slice(&input.sequence.to_consensus_u32().to_le_bytes());
    data.extend_from_slice(&hash_outputs);
    data.extend_from_slice(&tx.lock_time.to_consensus_u32().to_le_bytes());
    data.extend_from_slice(&hash_type.to_le_bytes());
    data
}

/// Digest an ECDSA signature for `input_index` commits to, using the coin's
/// hash type and signature hash function.
pub fn signature_hash(
    coin: &CoinProfile,
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: u64,
    witness_input: bool,
) -> Result<[u8; 32], UtxoError> {
    let hash_type = sighash_type(coin).preimage_value;
    let preimage = if uses_bip143(coin, witness_input) {
        bip143_preimage(tx, input_index, script_code, value, hash_type)?
    } else {
        legacy_preimage(tx, input_index, script_code, hash_type)?
    };
    Ok(coin.strategy.sig_hash(&preimage))
}
