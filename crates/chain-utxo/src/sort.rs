//! BIP69 canonical ordering of inputs and outputs.

use std::cmp::Ordering;

use bitcoin::hashes::Hash;
use bitcoin::TxOut;

use crate::utxo::Utxo;

/// Compare inputs by previous txid in display (byte-reversed) order, then
/// by output index.
pub fn input_order(a: &Utxo, b: &Utxo) -> Ordering {
    let a_txid = a.txid.to_byte_array();
    let b_txid = b.txid.to_byte_array();
    a_txid
        .iter()
        .rev()
        .cmp(b_txid.iter().rev())
        .then(a.vout.cmp(&b.vout))
}

/// Compare outputs by value, then by script bytes.
pub fn output_order(a: &TxOut, b: &TxOut) -> Ordering {
    a.value
        .cmp(&b.value)
        .then_with(|| a.script_pubkey.as_bytes().cmp(b.script_pubkey.as_bytes()))
}

pub fn sort_inputs(inputs: &mut [Utxo]) {
    inputs.sort_by(input_order);
}

pub fn sort_outputs(outputs: &mut [TxOut]) {
    outputs.sort_by(output_order);
}
