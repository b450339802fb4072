//! Byte-size model used for every fee computation.
//!
//! Sizes are accumulated in weight units: non-witness bytes count four
//! times, witness bytes once. A transaction's size in bytes is the weight
//! divided by four, rounded up. Fees are `fee_rate * bytes`.

use bitcoin::TxOut;

use crate::script::{ScriptFamily, REPLAY_PROTECTION_SCRIPT_LEN};
use crate::utxo::Utxo;

const OUTPOINT: usize = 32 + 4;
const SEQUENCE: usize = 4;
/// DER signature plus sighash byte, worst case.
const SIGNATURE_PUSH: usize = 73;
/// Compressed public key with its push opcode.
const PUBKEY_PUSH: usize = 34;
/// Witness item count, signature and public key of a P2WPKH spend.
const P2WPKH_WITNESS: usize = 1 + SIGNATURE_PUSH + PUBKEY_PUSH;
/// Witness item count and 64-byte Schnorr signature with its length byte.
const P2TR_WITNESS: usize = 1 + 65;
const DEFAULT_WITNESS_SCRIPT_LEN: usize = 35;

/// Length of a Bitcoin variable-length integer.
pub fn var_int_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Length of a data push of `len` bytes, including its opcode prefix.
pub fn push_len(len: usize) -> usize {
    let prefix = match len {
        0..=0x4b => 1,
        0x4c..=0xff => 2,
        0x100..=0xffff => 3,
        _ => 5,
    };
    prefix + len
}

/// Weight of one input of `family`. `redeem_len` is the redeem or witness
/// script length for script-hash families.
pub fn input_weight(family: ScriptFamily, redeem_len: Option<usize>) -> usize {
    let p2pkh = OUTPOINT + 1 + 107 + SEQUENCE;
    let segwit_base = OUTPOINT + 1 + SEQUENCE;

    match family {
        ScriptFamily::P2pkh => p2pkh * 4,
        ScriptFamily::P2sh | ScriptFamily::ReplayProtection => {
            let redeem_len = match (family, redeem_len) {
                (_, Some(len)) => len,
                (ScriptFamily::ReplayProtection, None) => REPLAY_PROTECTION_SCRIPT_LEN,
                (_, None) => return p2pkh * 4,
            };
            let script_sig = SIGNATURE_PUSH + PUBKEY_PUSH + push_len(redeem_len);
            (OUTPOINT + var_int_len(script_sig as u64) + script_sig + SEQUENCE) * 4
        }
        ScriptFamily::P2wpkhP2sh => (OUTPOINT + 1 + 23 + SEQUENCE) * 4 + P2WPKH_WITNESS,
        ScriptFamily::P2wpkh => segwit_base * 4 + P2WPKH_WITNESS,
        ScriptFamily::P2wsh => {
            let script_len = redeem_len.unwrap_or(DEFAULT_WITNESS_SCRIPT_LEN);
            segwit_base * 4 + 1 + SIGNATURE_PUSH + push_len(script_len)
        }
        ScriptFamily::P2tr => segwit_base * 4 + P2TR_WITNESS,
    }
}

/// Weight of spending `utxo`.
pub fn utxo_weight(utxo: &Utxo) -> usize {
    input_weight(
        utxo.script_family,
        utxo.redeem_script.as_ref().map(|script| script.len()),
    )
}

/// Serialized size of an output whose script is `script_len` bytes.
pub fn output_bytes(script_len: usize) -> usize {
    8 + var_int_len(script_len as u64) + script_len
}

/// Total weight of a transaction spending `inputs` into `outputs`.
pub fn transaction_weight(inputs: &[Utxo], outputs: &[TxOut]) -> usize {
    let header = 4 + 4 + var_int_len(inputs.len() as u64) + var_int_len(outputs.len() as u64);
    let has_witness = inputs.iter().any(|utxo| utxo.script_family.is_witness());

    let mut weight = header * 4;
    if has_witness {
        weight += 2;
    }
    weight += inputs.iter().map(utxo_weight).sum::<usize>();
    weight += outputs
        .iter()
        .map(|out| output_bytes(out.script_pubkey.len()) * 4)
        .sum::<usize>();
    weight
}

pub fn weight_to_bytes(weight: usize) -> u64 {
    weight.div_ceil(4) as u64
}

/// Size of the transaction in (virtual) bytes, rounded up.
pub fn transaction_bytes(inputs: &[Utxo], outputs: &[TxOut]) -> u64 {
    weight_to_bytes(transaction_weight(inputs, outputs))
}

/// Fee for spending `inputs` into `outputs` at `fee_rate` sat/byte.
pub fn transaction_fee(inputs: &[Utxo], outputs: &[TxOut], fee_rate: u64) -> u64 {
    fee_rate.saturating_mul(transaction_bytes(inputs, outputs))
}

/// Fee added by one more input of `utxo`'s family.
pub fn input_fee(utxo: &Utxo, fee_rate: u64) -> u64 {
    fee_rate.saturating_mul(weight_to_bytes(utxo_weight(utxo)))
}

/// Smallest change value worth creating: the fee to spend it later.
pub fn dust_threshold(family: ScriptFamily, fee_rate: u64) -> u64 {
    fee_rate.saturating_mul(weight_to_bytes(input_weight(family, None)))
}
