use std::collections::HashSet;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize, serialize, serialize_hex};
use bitcoin::hashes::Hash;
use bitcoin::key::{Keypair, TapTweak};
use bitcoin::script::Builder;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey, Signing, Verification};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, PubkeyHash, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    WPubkeyHash, Witness,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::address_to_script_pubkey;
use crate::coins::CoinProfile;
use crate::error::UtxoError;
use crate::fees::transaction_fee;
use crate::hashing::{hash160, sha256};
use crate::script::{
    push_bytes, script_hash_to_script_pubkey, wrap_p2sh, AddressFamily, ScriptFamily,
};
use crate::sighash::{sighash_type, signature_hash};
use crate::sort::{sort_inputs, sort_outputs};
use crate::utxo::{
    accumulative, checked_total, force_use_utxo, subtract_fee, ChangeOutput, SelectionResult,
    SelectionStrategy, Utxo,
};

/// Largest memo payload carried by one `OP_RETURN` output.
pub const MAX_MEMO_BYTES: usize = 80;

/// Where a payment goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Destination {
    Address(String),
    ScriptPubkey(ScriptBuf),
}

/// A payment. `value: None` takes whatever is left and is only accepted in
/// subtract-fee mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub destination: Destination,
    #[serde(default)]
    pub value: Option<u64>,
}

/// Data attached to the transaction as a zero-value `OP_RETURN` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Memo {
    Text(String),
    Hex(String),
}

impl Memo {
    fn to_bytes(&self) -> Result<Vec<u8>, UtxoError> {
        let bytes = match self {
            Memo::Text(text) => text.as_bytes().to_vec(),
            Memo::Hex(data) => hex::decode(data)
                .map_err(|e| UtxoError::TransactionBuildError(format!("invalid hex memo: {e}")))?,
        };
        if bytes.len() > MAX_MEMO_BYTES {
            return Err(UtxoError::TransactionBuildError(format!(
                "memo is {} bytes, limit is {MAX_MEMO_BYTES}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

/// Per-spend switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpendOptions {
    /// Pay the fee out of the first target and spend every UTXO.
    pub subtract_fee: bool,
    /// Signal replace-by-fee on every input.
    pub rbf: bool,
    /// Consensus lock time; 0 disables it.
    pub lock_time: u32,
    /// BIP69-sort inputs and outputs.
    pub canonical_ordering: bool,
}

/// Everything needed to assemble an unsigned transaction.
#[derive(Debug, Clone)]
pub struct SpendRequest<'a> {
    pub utxos: &'a [Utxo],
    /// Spent unconditionally, ahead of `utxos`.
    pub force_utxos: &'a [Utxo],
    pub targets: &'a [Target],
    pub memos: &'a [Memo],
    pub change_address: &'a str,
    pub change_family: ScriptFamily,
    /// Satoshis per byte.
    pub fee_rate: u64,
    pub options: SpendOptions,
}

/// What a signer needs to know about the output an input spends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrevOut {
    /// Full funding transaction, verified against the outpoint.
    FullTransaction(Transaction),
    /// Only the spent output's value and script.
    Output(TxOut),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedInput {
    pub utxo_id: String,
    pub family: ScriptFamily,
    pub vout: u32,
    pub value: u64,
    pub script_pubkey: ScriptBuf,
    pub redeem_script: Option<ScriptBuf>,
    pub prevout: PrevOut,
}

impl PreparedInput {
    /// The output being spent.
    pub fn prev_output(&self) -> TxOut {
        TxOut {
            value: Amount::from_sat(self.value),
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// An assembled transaction with empty script sigs and witnesses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
    pub tx: Transaction,
    /// Parallel to `tx.input`.
    pub inputs: Vec<PreparedInput>,
    pub fee: u64,
    pub change_index: Option<usize>,
    pub strategy: SelectionStrategy,
}

impl UnsignedTx {
    /// Consensus serialization without signatures.
    pub fn to_hex(&self) -> String {
        serialize_hex(&self.tx)
    }
}

/// A fully signed transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    pub txid: String,
    pub hex: String,
    #[serde(skip)]
    pub raw: Vec<u8>,
}

fn without_witness(tx: &Transaction) -> Transaction {
    let mut copy = tx.clone();
    for input in &mut copy.input {
        input.witness.clear();
    }
    copy
}

/// Transaction id computed with the coin's txid hash over the non-witness
/// serialization.
pub fn transaction_id(coin: &CoinProfile, tx: &Transaction) -> Txid {
    let raw = serialize(&without_witness(tx));
    Txid::from_byte_array(coin.strategy.tx_hash(&raw))
}

fn dedupe<'a>(
    utxos: impl Iterator<Item = &'a Utxo>,
    seen: &mut HashSet<&'a str>,
) -> Vec<Utxo> {
    utxos
        .filter(|utxo| !utxo.spent)
        .filter(|utxo| seen.insert(utxo.id.as_str()))
        .cloned()
        .collect()
}

fn resolve_destination(
    coin: &CoinProfile,
    destination: &Destination,
) -> Result<ScriptBuf, UtxoError> {
    match destination {
        Destination::Address(address) => address_to_script_pubkey(coin, address, None),
        Destination::ScriptPubkey(script) => Ok(script.clone()),
    }
}

fn verify_previous_tx(coin: &CoinProfile, utxo: &Utxo) -> Result<Option<Transaction>, UtxoError> {
    let Some(raw_hex) = &utxo.previous_tx else {
        return Ok(None);
    };
    let bad = |reason: String| {
        UtxoError::TransactionBuildError(format!("previous transaction of {}: {reason}", utxo.id))
    };

    let raw = hex::decode(raw_hex).map_err(|e| bad(format!("invalid hex: {e}")))?;
    let tx: Transaction = deserialize(&raw).map_err(|e| bad(format!("cannot decode: {e}")))?;

    let txid = transaction_id(coin, &tx);
    if txid != utxo.txid {
        return Err(bad(format!("hashes to {txid}, expected {}", utxo.txid)));
    }
    let output = tx
        .output
        .get(utxo.vout as usize)
        .ok_or_else(|| bad(format!("has no output {}", utxo.vout)))?;
    if output.value.to_sat() != utxo.value || output.script_pubkey != utxo.script_pubkey {
        return Err(bad(format!("output {} does not match the UTXO", utxo.vout)));
    }
    Ok(Some(tx))
}

fn prepare_input(coin: &CoinProfile, utxo: &Utxo) -> Result<PreparedInput, UtxoError> {
    let full_tx = verify_previous_tx(coin, utxo)?;
    let prevout = match full_tx {
        Some(tx) if !utxo.script_family.is_witness() => PrevOut::FullTransaction(tx),
        _ if utxo.script_family.is_witness() || coin.fork_id.is_some() => PrevOut::Output(TxOut {
            value: Amount::from_sat(utxo.value),
            script_pubkey: utxo.script_pubkey.clone(),
        }),
        _ => {
            return Err(UtxoError::TransactionBuildError(format!(
                "{} spends a non-witness output and needs its previous transaction",
                utxo.id
            )))
        }
    };

    Ok(PreparedInput {
        utxo_id: utxo.id.clone(),
        family: utxo.script_family,
        vout: utxo.vout,
        value: utxo.value,
        script_pubkey: utxo.script_pubkey.clone(),
        redeem_script: utxo.redeem_script.clone(),
        prevout,
    })
}

fn memo_output(memo: &Memo) -> Result<TxOut, UtxoError> {
    let data = memo.to_bytes()?;
    Ok(TxOut {
        value: Amount::ZERO,
        script_pubkey: ScriptBuf::new_op_return(push_bytes(&data)?),
    })
}

/// Fill the single unset target with everything the UTXOs hold beyond the
/// other outputs.
fn fill_unset_target(
    utxos: &[Utxo],
    outputs: &mut [TxOut],
    unset: &[usize],
    fee_rate: u64,
) -> Result<(), UtxoError> {
    let index = match unset {
        [] => return Ok(()),
        [index] => *index,
        _ => {
            return Err(UtxoError::TransactionBuildError(
                "only one target may leave its value unset".into(),
            ))
        }
    };

    let available = checked_total(utxos.iter().map(|utxo| utxo.value))?;
    let assigned = checked_total(outputs.iter().map(|out| out.value.to_sat()))?;
    if available < assigned {
        return Err(UtxoError::InsufficientFunds {
            shortfall: assigned - available,
            fee: transaction_fee(utxos, outputs, fee_rate),
        });
    }
    outputs[index].value = Amount::from_sat(available - assigned);
    Ok(())
}

fn select(
    request: &SpendRequest<'_>,
    forced: &[Utxo],
    free: &[Utxo],
    mut outputs: Vec<TxOut>,
    unset: &[usize],
    change: &ChangeOutput,
) -> Result<(SelectionStrategy, SelectionResult), UtxoError> {
    if !forced.is_empty() {
        if !unset.is_empty() {
            return Err(UtxoError::TransactionBuildError(
                "targets without a value need subtract-fee mode".into(),
            ));
        }
        let result = force_use_utxo(forced, free, &outputs, request.fee_rate, change)?;
        return Ok((SelectionStrategy::ForceUseUtxo, result));
    }

    if request.options.subtract_fee {
        fill_unset_target(free, &mut outputs, unset, request.fee_rate)?;
        let result = subtract_fee(free, &outputs, request.fee_rate, change)?;
        return Ok((SelectionStrategy::SubtractFee, result));
    }

    if !unset.is_empty() {
        return Err(UtxoError::TransactionBuildError(
            "targets without a value need subtract-fee mode".into(),
        ));
    }
    let result = accumulative(free, &outputs, request.fee_rate, change)?;
    Ok((SelectionStrategy::Accumulative, result))
}

fn input_sequence(options: &SpendOptions) -> Sequence {
    if options.rbf {
        Sequence::ENABLE_RBF_NO_LOCKTIME
    } else if options.lock_time != 0 {
        Sequence::ENABLE_LOCKTIME_NO_RBF
    } else {
        Sequence::MAX
    }
}

/// Select inputs for `request` and assemble the unsigned transaction.
///
/// UTXOs are deduplicated by id and spent ones dropped. Free UTXOs are
/// offered to the selector largest first. Strategy priority is forced-use,
/// then subtract-fee, then accumulative.
pub fn build_transaction(
    coin: &CoinProfile,
    request: &SpendRequest<'_>,
) -> Result<UnsignedTx, UtxoError> {
    let mut seen = HashSet::new();
    let forced = dedupe(request.force_utxos.iter(), &mut seen);
    let mut free = dedupe(request.utxos.iter(), &mut seen);
    free.sort_by(|a, b| b.value.cmp(&a.value));

    let mut outputs = Vec::with_capacity(request.targets.len() + request.memos.len() + 1);
    let mut unset = Vec::new();
    for (i, target) in request.targets.iter().enumerate() {
        if target.value.is_none() {
            unset.push(i);
        }
        outputs.push(TxOut {
            value: Amount::from_sat(target.value.unwrap_or(0)),
            script_pubkey: resolve_destination(coin, &target.destination)?,
        });
    }
    for memo in request.memos {
        outputs.push(memo_output(memo)?);
    }

    let change = ChangeOutput {
        script_pubkey: address_to_script_pubkey(
            coin,
            request.change_address,
            Some(request.change_family.address_family()),
        )?,
        family: request.change_family,
    };

    let (strategy, mut selection) = select(request, &forced, &free, outputs, &unset, &change)?;

    if request.options.canonical_ordering {
        let change_output = selection
            .change_index
            .map(|index| selection.outputs[index].clone());
        sort_inputs(&mut selection.inputs);
        sort_outputs(&mut selection.outputs);
        selection.change_index =
            change_output.and_then(|out| selection.outputs.iter().position(|o| *o == out));
    }

    let inputs = selection
        .inputs
        .iter()
        .map(|utxo| prepare_input(coin, utxo))
        .collect::<Result<Vec<_>, _>>()?;

    let sequence = input_sequence(&request.options);
    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(request.options.lock_time),
        input: selection
            .inputs
            .iter()
            .map(|utxo| TxIn {
                previous_output: OutPoint {
                    txid: utxo.txid,
                    vout: utxo.vout,
                },
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::new(),
            })
            .collect(),
        output: selection.outputs,
    };

    debug!(
        coin = coin.name,
        ?strategy,
        inputs = tx.input.len(),
        outputs = tx.output.len(),
        fee = selection.fee,
        change_index = ?selection.change_index,
        "assembled unsigned transaction"
    );

    Ok(UnsignedTx {
        tx,
        inputs,
        fee: selection.fee,
        change_index: selection.change_index,
        strategy,
    })
}

fn key_mismatch(index: usize, family: ScriptFamily) -> UtxoError {
    UtxoError::SigningFailed(format!(
        "input {index}: key does not control this {family:?} output"
    ))
}

fn p2pkh_script(pubkey: &PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash160(&pubkey.serialize())))
}

fn p2wpkh_script(pubkey: &PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(hash160(&pubkey.serialize())))
}

struct EcdsaSigner<'a, C: Signing + Verification> {
    secp: &'a Secp256k1<C>,
    coin: &'a CoinProfile,
    tx: &'a Transaction,
}

impl<C: Signing + Verification> EcdsaSigner<'_, C> {
    /// DER signature with the coin's hash type byte, verified before return.
    fn sign(
        &self,
        index: usize,
        key: &SecretKey,
        pubkey: &PublicKey,
        script_code: &Script,
        value: u64,
        witness_input: bool,
    ) -> Result<Vec<u8>, UtxoError> {
        let digest = signature_hash(self.coin, self.tx, index, script_code, value, witness_input)?;
        let message = Message::from_digest(digest);
        let signature = self.secp.sign_ecdsa(&message, key);
        self.secp
            .verify_ecdsa(&message, &signature, pubkey)
            .map_err(|e| UtxoError::SigningFailed(format!("input {index}: {e}")))?;

        let mut bytes = signature.serialize_der().to_vec();
        bytes.push(sighash_type(self.coin).signature_byte);
        Ok(bytes)
    }
}

fn redeem_script_for(
    coin: &CoinProfile,
    input: &PreparedInput,
    pubkey: &PublicKey,
    index: usize,
) -> Result<ScriptBuf, UtxoError> {
    if let Some(redeem) = &input.redeem_script {
        return Ok(redeem.clone());
    }
    match (input.family, coin.replay_protection_template()) {
        (ScriptFamily::ReplayProtection, Some(template)) => template(pubkey),
        (ScriptFamily::ReplayProtection, None) => Err(UtxoError::MissingScriptTemplate(format!(
            "{} has no replay-protection template",
            coin.name
        ))),
        _ => Err(UtxoError::SigningFailed(format!(
            "input {index}: script-hash input has no redeem script"
        ))),
    }
}

fn script_sig(items: &[&[u8]]) -> Result<ScriptBuf, UtxoError> {
    let mut builder = Builder::new();
    for item in items {
        builder = builder.push_slice(push_bytes(item)?);
    }
    Ok(builder.into_script())
}

/// Sign every input of `unsigned`.
///
/// Input `i` is signed with `keys[i]`, or with the last key when fewer keys
/// than inputs are given. Each signature is verified against the key before
/// the input is finalized.
pub fn sign_transaction<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    coin: &CoinProfile,
    unsigned: &UnsignedTx,
    keys: &[SecretKey],
) -> Result<SignedTx, UtxoError> {
    let Some(last_key) = keys.last() else {
        return Err(UtxoError::SigningFailed("no signing keys supplied".into()));
    };
    if unsigned.inputs.len() != unsigned.tx.input.len() {
        return Err(UtxoError::SigningFailed(
            "prepared inputs do not match the transaction".into(),
        ));
    }

    let signer = EcdsaSigner {
        secp,
        coin,
        tx: &unsigned.tx,
    };
    let prevouts: Vec<TxOut> = unsigned.inputs.iter().map(PreparedInput::prev_output).collect();
    let mut signed = unsigned.tx.clone();

    for (index, input) in unsigned.inputs.iter().enumerate() {
        let key = keys.get(index).unwrap_or(last_key);
        let pubkey = PublicKey::from_secret_key(secp, key);
        let pubkey_bytes = pubkey.serialize();
        let family = input.family;

        match family {
            ScriptFamily::P2pkh => {
                if input.script_pubkey != p2pkh_script(&pubkey) {
                    return Err(key_mismatch(index, family));
                }
                let sig =
                    signer.sign(index, key, &pubkey, &input.script_pubkey, input.value, false)?;
                signed.input[index].script_sig = script_sig(&[&sig, &pubkey_bytes])?;
            }
            ScriptFamily::P2sh | ScriptFamily::ReplayProtection => {
                let redeem = redeem_script_for(coin, input, &pubkey, index)?;
                if input.script_pubkey != wrap_p2sh(&redeem)? {
                    return Err(key_mismatch(index, family));
                }
                let sig = signer.sign(index, key, &pubkey, &redeem, input.value, false)?;
                signed.input[index].script_sig =
                    script_sig(&[&sig, &pubkey_bytes, redeem.as_bytes()])?;
            }
            ScriptFamily::P2wpkhP2sh => {
                let redeem = p2wpkh_script(&pubkey);
                if input.script_pubkey != wrap_p2sh(&redeem)? {
                    return Err(key_mismatch(index, family));
                }
                let script_code = p2pkh_script(&pubkey);
                let sig = signer.sign(index, key, &pubkey, &script_code, input.value, true)?;
                signed.input[index].script_sig = script_sig(&[redeem.as_bytes()])?;
                signed.input[index].witness = Witness::from_slice(&[sig, pubkey_bytes.to_vec()]);
            }
            ScriptFamily::P2wpkh => {
                if input.script_pubkey != p2wpkh_script(&pubkey) {
                    return Err(key_mismatch(index, family));
                }
                let script_code = p2pkh_script(&pubkey);
                let sig = signer.sign(index, key, &pubkey, &script_code, input.value, true)?;
                signed.input[index].witness = Witness::from_slice(&[sig, pubkey_bytes.to_vec()]);
            }
            ScriptFamily::P2wsh => {
                let witness_script = redeem_script_for(coin, input, &pubkey, index)?;
                let expected = script_hash_to_script_pubkey(
                    &sha256(witness_script.as_bytes()),
                    AddressFamily::P2wsh,
                )?;
                if input.script_pubkey != expected {
                    return Err(key_mismatch(index, family));
                }
                let sig = signer.sign(index, key, &pubkey, &witness_script, input.value, true)?;
                signed.input[index].witness =
                    Witness::from_slice(&[sig, witness_script.into_bytes()]);
            }
            ScriptFamily::P2tr => {
                let (internal_key, _) = pubkey.x_only_public_key();
                if input.script_pubkey != ScriptBuf::new_p2tr(secp, internal_key, None) {
                    return Err(key_mismatch(index, family));
                }
                let sighash = SighashCache::new(&unsigned.tx)
                    .taproot_key_spend_signature_hash(
                        index,
                        &Prevouts::All(&prevouts),
                        TapSighashType::Default,
                    )
                    .map_err(|e| UtxoError::SigningFailed(format!("input {index}: {e}")))?;
                let message = Message::from_digest(sighash.to_byte_array());
                let tweaked = Keypair::from_secret_key(secp, key)
                    .tap_tweak(secp, None)
                    .to_inner();
                let signature = secp.sign_schnorr_no_aux_rand(&message, &tweaked);
                secp.verify_schnorr(&signature, &message, &tweaked.x_only_public_key().0)
                    .map_err(|e| UtxoError::SigningFailed(format!("input {index}: {e}")))?;
                signed.input[index].witness = Witness::from_slice(&[signature.serialize()]);
            }
        }
        debug!(coin = coin.name, index, ?family, "signed input");
    }

    let raw = serialize(&signed);
    Ok(SignedTx {
        txid: transaction_id(coin, &signed).to_string(),
        hex: hex::encode(&raw),
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{pubkey_to_script_pubkey, script_pubkey_to_address};
    use crate::coins::lookup;
    use crate::fees::transaction_bytes;
    use bitcoin::secp256k1::ecdsa::Signature;
    use bitcoin::sighash::EcdsaSighashType;

    fn secp() -> Secp256k1<bitcoin::secp256k1::All> {
        Secp256k1::new()
    }

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    fn locking(coin: &CoinProfile, key: &SecretKey, family: ScriptFamily) -> ScriptBuf {
        let pubkey = PublicKey::from_secret_key(&secp(), key);
        pubkey_to_script_pubkey(&secp(), coin, &pubkey, family, coin.replay_protection_template())
            .unwrap()
            .script_pubkey
    }

    fn address(coin: &CoinProfile, key: &SecretKey, family: ScriptFamily) -> String {
        let script = locking(coin, key, family);
        script_pubkey_to_address(coin, &script, family.address_family())
            .unwrap()
            .address
    }

    /// A funding transaction paying `value` to `script` at output 0.
    fn funding(
        coin: &CoinProfile,
        seed: u8,
        value: u64,
        script: &ScriptBuf,
    ) -> (Transaction, Txid) {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array([seed; 32]),
                    vout: 0,
                },
                script_sig: ScriptBuf::from_bytes(vec![0x51]),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(value),
                script_pubkey: script.clone(),
            }],
        };
        let txid = transaction_id(coin, &tx);
        (tx, txid)
    }

    fn utxo(
        coin: &CoinProfile,
        id: &str,
        seed: u8,
        value: u64,
        key: &SecretKey,
        family: ScriptFamily,
    ) -> Utxo {
        let script = locking(coin, key, family);
        let (tx, txid) = funding(coin, seed, value, &script);
        Utxo {
            id: id.into(),
            txid,
            vout: 0,
            value,
            script_pubkey: script,
            script_family: family,
            redeem_script: None,
            previous_tx: (!family.is_witness()).then(|| serialize_hex(&tx)),
            spent: false,
        }
    }

    fn pay(address: &str, value: u64) -> Target {
        Target {
            destination: Destination::Address(address.into()),
            value: Some(value),
        }
    }

    fn request<'a>(
        utxos: &'a [Utxo],
        targets: &'a [Target],
        change_address: &'a str,
        change_family: ScriptFamily,
    ) -> SpendRequest<'a> {
        SpendRequest {
            utxos,
            force_utxos: &[],
            targets,
            memos: &[],
            change_address,
            change_family,
            fee_rate: 5,
            options: SpendOptions::default(),
        }
    }

    #[test]
    fn p2wpkh_spend_matches_bitcoin_sighash() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(1);
        let utxos = vec![utxo(btc, "a", 1, 100_000, &k, ScriptFamily::P2wpkh)];
        let dest = address(btc, &key(2), ScriptFamily::P2wpkh);
        let change = address(btc, &k, ScriptFamily::P2wpkh);
        let targets = vec![pay(&dest, 40_000)];
        let req = request(&utxos, &targets, &change, ScriptFamily::P2wpkh);

        let unsigned = build_transaction(btc, &req).unwrap();
        assert_eq!(unsigned.strategy, SelectionStrategy::Accumulative);
        assert_eq!(unsigned.change_index, Some(1));
        assert_eq!(unsigned.fee, 5 * transaction_bytes(&utxos, &unsigned.tx.output));

        let signed = sign_transaction(&secp(), btc, &unsigned, &[k]).unwrap();
        let tx: Transaction = deserialize(&signed.raw).unwrap();
        assert_eq!(signed.txid, tx.compute_txid().to_string());

        let witness: Vec<&[u8]> = tx.input[0].witness.iter().collect();
        assert_eq!(witness.len(), 2);
        let (sig_bytes, hash_type) = witness[0].split_at(witness[0].len() - 1);
        assert_eq!(hash_type, &[0x01]);

        let sighash = SighashCache::new(&unsigned.tx)
            .p2wpkh_signature_hash(
                0,
                &utxos[0].script_pubkey,
                Amount::from_sat(100_000),
                EcdsaSighashType::All,
            )
            .unwrap();
        let pubkey = PublicKey::from_slice(witness[1]).unwrap();
        let sig = Signature::from_der(sig_bytes).unwrap();
        secp()
            .verify_ecdsa(&Message::from_digest(sighash.to_byte_array()), &sig, &pubkey)
            .unwrap();
    }

    #[test]
    fn p2pkh_spend_matches_bitcoin_sighash() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(3);
        let utxos = vec![utxo(btc, "a", 1, 100_000, &k, ScriptFamily::P2pkh)];
        let dest = address(btc, &key(4), ScriptFamily::P2pkh);
        let targets = vec![pay(&dest, 40_000)];
        let change = address(btc, &k, ScriptFamily::P2pkh);
        let unsigned =
            build_transaction(btc, &request(&utxos, &targets, &change, ScriptFamily::P2pkh))
                .unwrap();
        assert!(matches!(unsigned.inputs[0].prevout, PrevOut::FullTransaction(_)));

        let signed = sign_transaction(&secp(), btc, &unsigned, &[k]).unwrap();
        let tx: Transaction = deserialize(&signed.raw).unwrap();
        let pushes: Vec<Vec<u8>> = tx.input[0]
            .script_sig
            .instructions()
            .map(|i| i.unwrap().push_bytes().unwrap().as_bytes().to_vec())
            .collect();
        assert_eq!(pushes.len(), 2);

        let (sig_bytes, _) = pushes[0].split_at(pushes[0].len() - 1);
        let sighash = SighashCache::new(&unsigned.tx)
            .legacy_signature_hash(0, &utxos[0].script_pubkey, 1)
            .unwrap();
        secp()
            .verify_ecdsa(
                &Message::from_digest(sighash.to_byte_array()),
                &Signature::from_der(sig_bytes).unwrap(),
                &PublicKey::from_slice(&pushes[1]).unwrap(),
            )
            .unwrap();
    }

    #[test]
    fn taproot_spend_verifies_against_output_key() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(5);
        let utxos = vec![utxo(btc, "a", 1, 100_000, &k, ScriptFamily::P2tr)];
        let dest = address(btc, &key(6), ScriptFamily::P2tr);
        let targets = vec![pay(&dest, 40_000)];
        let unsigned =
            build_transaction(btc, &request(&utxos, &targets, &dest, ScriptFamily::P2tr))
                .unwrap();
        let signed = sign_transaction(&secp(), btc, &unsigned, &[k]).unwrap();

        let tx: Transaction = deserialize(&signed.raw).unwrap();
        let witness: Vec<&[u8]> = tx.input[0].witness.iter().collect();
        assert_eq!(witness.len(), 1);
        assert_eq!(witness[0].len(), 64);

        let prevouts = vec![unsigned.inputs[0].prev_output()];
        let sighash = SighashCache::new(&unsigned.tx)
            .taproot_key_spend_signature_hash(0, &Prevouts::All(&prevouts), TapSighashType::Default)
            .unwrap();
        let output_key =
            bitcoin::secp256k1::XOnlyPublicKey::from_slice(&utxos[0].script_pubkey.as_bytes()[2..])
                .unwrap();
        let sig = bitcoin::secp256k1::schnorr::Signature::from_slice(witness[0]).unwrap();
        secp()
            .verify_schnorr(&sig, &Message::from_digest(sighash.to_byte_array()), &output_key)
            .unwrap();
    }

    #[test]
    fn wrapped_segwit_spend_pushes_redeem_script() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(7);
        let utxos = vec![utxo(btc, "a", 1, 100_000, &k, ScriptFamily::P2wpkhP2sh)];
        let dest = address(btc, &key(8), ScriptFamily::P2wpkh);
        let change = address(btc, &k, ScriptFamily::P2wpkhP2sh);
        let targets = vec![pay(&dest, 40_000)];
        let unsigned =
            build_transaction(btc, &request(&utxos, &targets, &change, ScriptFamily::P2wpkhP2sh))
                .unwrap();
        let signed = sign_transaction(&secp(), btc, &unsigned, &[k]).unwrap();
        let tx: Transaction = deserialize(&signed.raw).unwrap();
        assert_eq!(tx.input[0].script_sig.len(), 23);
        assert_eq!(tx.input[0].witness.len(), 2);
    }

    #[test]
    fn bitcoin_cash_replay_protected_spend() {
        let bch = lookup("bitcoincash").unwrap();
        let k = key(9);
        let mut replay = utxo(bch, "rp", 1, 60_000, &k, ScriptFamily::ReplayProtection);
        replay.previous_tx = None;
        let plain = utxo(bch, "pk", 2, 60_000, &k, ScriptFamily::P2pkh);
        let utxos = vec![replay, plain];

        let dest = address(bch, &key(10), ScriptFamily::P2pkh);
        assert!(dest.starts_with("bitcoincash:"));
        let change = address(bch, &k, ScriptFamily::P2pkh);
        let targets = vec![pay(&dest, 100_000)];
        let unsigned =
            build_transaction(bch, &request(&utxos, &targets, &change, ScriptFamily::P2pkh))
                .unwrap();
        assert_eq!(unsigned.inputs.len(), 2);

        let signed = sign_transaction(&secp(), bch, &unsigned, &[k]).unwrap();
        let tx: Transaction = deserialize(&signed.raw).unwrap();
        for input in &tx.input {
            let pushes: Vec<Vec<u8>> = input
                .script_sig
                .instructions()
                .map(|i| i.unwrap().push_bytes().unwrap().as_bytes().to_vec())
                .collect();
            assert_eq!(*pushes[0].last().unwrap(), 0x41);
        }
        let replay_index = unsigned.inputs.iter().position(|i| i.utxo_id == "rp").unwrap();
        let replay_sig = &tx.input[replay_index].script_sig;
        assert!(replay_sig.len() > 151);
    }

    #[test]
    fn one_key_signs_all_inputs() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(11);
        let utxos = vec![
            utxo(btc, "a", 1, 30_000, &k, ScriptFamily::P2wpkh),
            utxo(btc, "b", 2, 30_000, &k, ScriptFamily::P2wpkh),
        ];
        let dest = address(btc, &key(12), ScriptFamily::P2wpkh);
        let targets = vec![pay(&dest, 50_000)];
        let unsigned =
            build_transaction(btc, &request(&utxos, &targets, &dest, ScriptFamily::P2wpkh))
                .unwrap();
        assert_eq!(unsigned.inputs.len(), 2);
        assert!(sign_transaction(&secp(), btc, &unsigned, &[k]).is_ok());
        assert!(sign_transaction(&secp(), btc, &unsigned, &[k, k]).is_ok());
    }

    #[test]
    fn wrong_or_missing_key_fails() {
        let btc = lookup("bitcoin").unwrap();
        let utxos = vec![utxo(btc, "a", 1, 100_000, &key(13), ScriptFamily::P2wpkh)];
        let dest = address(btc, &key(14), ScriptFamily::P2wpkh);
        let targets = vec![pay(&dest, 40_000)];
        let unsigned =
            build_transaction(btc, &request(&utxos, &targets, &dest, ScriptFamily::P2wpkh))
                .unwrap();
        assert!(matches!(
            sign_transaction(&secp(), btc, &unsigned, &[key(14)]),
            Err(UtxoError::SigningFailed(_))
        ));
        assert!(matches!(
            sign_transaction(&secp(), btc, &unsigned, &[]),
            Err(UtxoError::SigningFailed(_))
        ));
    }

    #[test]
    fn insufficient_funds_surface_from_build() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(15);
        let utxos = vec![utxo(btc, "a", 1, 1_000, &k, ScriptFamily::P2wpkh)];
        let dest = address(btc, &key(16), ScriptFamily::P2wpkh);
        let targets = vec![pay(&dest, 2_000)];
        let err =
            build_transaction(btc, &request(&utxos, &targets, &dest, ScriptFamily::P2wpkh))
                .unwrap_err();
        match err {
            UtxoError::InsufficientFunds { shortfall, fee } => assert_eq!(shortfall, 1_000 + fee),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn spent_and_duplicate_utxos_are_ignored() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(17);
        let good = utxo(btc, "a", 1, 50_000, &k, ScriptFamily::P2wpkh);
        let mut spent = utxo(btc, "b", 2, 500_000, &k, ScriptFamily::P2wpkh);
        spent.spent = true;
        let utxos = vec![good.clone(), good, spent];
        let dest = address(btc, &key(18), ScriptFamily::P2wpkh);
        let targets = vec![pay(&dest, 80_000)];
        assert!(matches!(
            build_transaction(btc, &request(&utxos, &targets, &dest, ScriptFamily::P2wpkh)),
            Err(UtxoError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn forced_utxo_is_spent_first() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(19);
        let forced = vec![utxo(btc, "f", 1, 5_000, &k, ScriptFamily::P2wpkh)];
        let utxos = vec![utxo(btc, "a", 2, 500_000, &k, ScriptFamily::P2wpkh), forced[0].clone()];
        let dest = address(btc, &key(20), ScriptFamily::P2wpkh);
        let targets = vec![pay(&dest, 10_000)];
        let mut req = request(&utxos, &targets, &dest, ScriptFamily::P2wpkh);
        req.force_utxos = &forced;
        let unsigned = build_transaction(btc, &req).unwrap();
        assert_eq!(unsigned.strategy, SelectionStrategy::ForceUseUtxo);
        assert_eq!(unsigned.inputs[0].utxo_id, "f");
        assert_eq!(unsigned.inputs.len(), 2);
    }

    #[test]
    fn subtract_fee_with_unset_target_spends_everything() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(21);
        let utxos = vec![
            utxo(btc, "a", 1, 30_000, &k, ScriptFamily::P2wpkh),
            utxo(btc, "b", 2, 20_000, &k, ScriptFamily::P2wpkh),
        ];
        let dest = address(btc, &key(22), ScriptFamily::P2wpkh);
        let targets = vec![Target {
            destination: Destination::Address(dest.clone()),
            value: None,
        }];
        let mut req = request(&utxos, &targets, &dest, ScriptFamily::P2wpkh);
        req.options.subtract_fee = true;
        let unsigned = build_transaction(btc, &req).unwrap();
        assert_eq!(unsigned.strategy, SelectionStrategy::SubtractFee);
        assert_eq!(unsigned.tx.output.len(), 1);
        assert_eq!(unsigned.tx.output[0].value.to_sat() + unsigned.fee, 50_000);

        req.options.subtract_fee = false;
        assert!(matches!(
            build_transaction(btc, &req),
            Err(UtxoError::TransactionBuildError(_))
        ));
    }

    #[test]
    fn unset_target_rejects_overflowing_utxos() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(27);
        let utxos = vec![
            utxo(btc, "a", 1, u64::MAX, &k, ScriptFamily::P2wpkh),
            utxo(btc, "b", 2, 1, &k, ScriptFamily::P2wpkh),
        ];
        let dest = address(btc, &key(28), ScriptFamily::P2wpkh);
        let targets = vec![Target {
            destination: Destination::Address(dest.clone()),
            value: None,
        }];
        let mut req = request(&utxos, &targets, &dest, ScriptFamily::P2wpkh);
        req.options.subtract_fee = true;
        assert!(matches!(
            build_transaction(btc, &req),
            Err(UtxoError::InvalidAmount(_))
        ));
    }

    #[test]
    fn memos_become_op_return_outputs() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(23);
        let utxos = vec![utxo(btc, "a", 1, 100_000, &k, ScriptFamily::P2wpkh)];
        let dest = address(btc, &key(24), ScriptFamily::P2wpkh);
        let targets = vec![pay(&dest, 10_000)];
        let memos = vec![Memo::Text("hello".into()), Memo::Hex("deadbeef".into())];
        let mut req = request(&utxos, &targets, &dest, ScriptFamily::P2wpkh);
        req.memos = &memos;
        let unsigned = build_transaction(btc, &req).unwrap();
        assert!(unsigned.tx.output[1].script_pubkey.is_op_return());
        assert_eq!(unsigned.tx.output[1].value, Amount::ZERO);
        assert_eq!(&unsigned.tx.output[1].script_pubkey.as_bytes()[2..], b"hello");
        assert_eq!(
            &unsigned.tx.output[2].script_pubkey.as_bytes()[2..],
            &[0xde, 0xad, 0xbe, 0xef]
        );

        let long = vec![Memo::Text("x".repeat(MAX_MEMO_BYTES + 1))];
        req.memos = &long;
        assert!(matches!(
            build_transaction(btc, &req),
            Err(UtxoError::TransactionBuildError(_))
        ));
    }

    #[test]
    fn sequence_and_lock_time_follow_options() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(25);
        let utxos = vec![utxo(btc, "a", 1, 100_000, &k, ScriptFamily::P2wpkh)];
        let dest = address(btc, &key(26), ScriptFamily::P2wpkh);
        let targets = vec![pay(&dest, 10_000)];
        let mut req = request(&utxos, &targets, &dest, ScriptFamily::P2wpkh);

        let unsigned = build_transaction(btc, &req).unwrap();
        assert_eq!(unsigned.tx.input[0].sequence, Sequence::MAX);

        req.options.rbf = true;
        let unsigned = build_transaction(btc, &req).unwrap();
        assert_eq!(unsigned.tx.input[0].sequence, Sequence::ENABLE_RBF_NO_LOCKTIME);

        req.options.rbf = false;
        req.options.lock_time = 800_000;
        let unsigned = build_transaction(btc, &req).unwrap();
        assert_eq!(unsigned.tx.input[0].sequence, Sequence::ENABLE_LOCKTIME_NO_RBF);
        assert_eq!(unsigned.tx.lock_time.to_consensus_u32(), 800_000);
    }

    #[test]
    fn canonical_ordering_tracks_change() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(27);
        let utxos = vec![
            utxo(btc, "a", 1, 30_000, &k, ScriptFamily::P2wpkh),
            utxo(btc, "b", 2, 30_000, &k, ScriptFamily::P2wpkh),
        ];
        let dest = address(btc, &key(28), ScriptFamily::P2wpkh);
        let change = address(btc, &k, ScriptFamily::P2wpkh);
        let targets = vec![pay(&dest, 55_000)];
        let mut req = request(&utxos, &targets, &change, ScriptFamily::P2wpkh);
        req.options.canonical_ordering = true;
        let unsigned = build_transaction(btc, &req).unwrap();

        let change_index = unsigned.change_index.unwrap();
        assert_eq!(change_index, 0);
        assert!(unsigned.tx.output[0].value < unsigned.tx.output[1].value);
        assert_eq!(
            unsigned.tx.output[change_index].script_pubkey,
            locking(btc, &k, ScriptFamily::P2wpkh)
        );
        let ids: Vec<String> = unsigned.inputs.iter().map(|i| i.utxo_id.clone()).collect();
        let mut sorted = unsigned.inputs.iter().map(|i| i.utxo_id.clone()).collect::<Vec<_>>();
        sorted.sort_by_key(|id| {
            let u = utxos.iter().find(|u| &u.id == id).unwrap();
            u.txid.to_string()
        });
        assert_eq!(ids, sorted);
    }

    #[test]
    fn previous_transaction_is_checked() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(29);
        let dest = address(btc, &key(30), ScriptFamily::P2pkh);
        let targets = vec![pay(&dest, 10_000)];

        let mut missing = utxo(btc, "a", 1, 100_000, &k, ScriptFamily::P2pkh);
        missing.previous_tx = None;
        let utxos = vec![missing];
        assert!(matches!(
            build_transaction(btc, &request(&utxos, &targets, &dest, ScriptFamily::P2pkh)),
            Err(UtxoError::TransactionBuildError(_))
        ));

        let mut wrong_value = utxo(btc, "a", 1, 100_000, &k, ScriptFamily::P2pkh);
        wrong_value.value = 90_000;
        let utxos = vec![wrong_value];
        assert!(matches!(
            build_transaction(btc, &request(&utxos, &targets, &dest, ScriptFamily::P2pkh)),
            Err(UtxoError::TransactionBuildError(_))
        ));

        let mut wrong_txid = utxo(btc, "a", 1, 100_000, &k, ScriptFamily::P2pkh);
        wrong_txid.txid = Txid::all_zeros();
        let utxos = vec![wrong_txid];
        assert!(matches!(
            build_transaction(btc, &request(&utxos, &targets, &dest, ScriptFamily::P2pkh)),
            Err(UtxoError::TransactionBuildError(_))
        ));
    }

    #[test]
    fn smartcash_txid_uses_single_sha256() {
        let smart = lookup("smartcash").unwrap();
        let k = key(31);
        let utxos = vec![utxo(smart, "a", 1, 100_000, &k, ScriptFamily::P2pkh)];
        let dest = address(smart, &key(32), ScriptFamily::P2pkh);
        let targets = vec![pay(&dest, 10_000)];
        let unsigned =
            build_transaction(smart, &request(&utxos, &targets, &dest, ScriptFamily::P2pkh))
                .unwrap();
        let signed = sign_transaction(&secp(), smart, &unsigned, &[k]).unwrap();

        let mut expected = sha256(&signed.raw);
        expected.reverse();
        assert_eq!(signed.txid, hex::encode(expected));
    }

    #[test]
    fn unsigned_hex_round_trips() {
        let btc = lookup("bitcoin").unwrap();
        let k = key(33);
        let utxos = vec![utxo(btc, "a", 1, 100_000, &k, ScriptFamily::P2wpkh)];
        let dest = address(btc, &key(34), ScriptFamily::P2wpkh);
        let targets = vec![pay(&dest, 10_000)];
        let unsigned =
            build_transaction(btc, &request(&utxos, &targets, &dest, ScriptFamily::P2wpkh))
                .unwrap();
        let decoded: Transaction = deserialize(&hex::decode(unsigned.to_hex()).unwrap()).unwrap();
        assert_eq!(decoded, unsigned.tx);
    }

    #[test]
    fn spend_options_from_json() {
        let options: SpendOptions = serde_json::from_str(r#"{"rbf": true}"#).unwrap();
        assert!(options.rbf);
        assert!(!options.subtract_fee);
        assert_eq!(options.lock_time, 0);

        let memo: Memo = serde_json::from_str(r#"{"type": "text", "value": "hi"}"#).unwrap();
        assert_eq!(memo, Memo::Text("hi".into()));
    }
}
