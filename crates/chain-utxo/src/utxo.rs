use bitcoin::{Amount, ScriptBuf, TxOut, Txid};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::UtxoError;
use crate::fees::{dust_threshold, input_fee, transaction_fee};
use crate::script::ScriptFamily;

/// A spendable output as handed over by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    /// Unique identifier, usually `txid:vout`.
    pub id: String,
    pub txid: Txid,
    pub vout: u32,
    /// Value in satoshis.
    pub value: u64,
    pub script_pubkey: ScriptBuf,
    pub script_family: ScriptFamily,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeem_script: Option<ScriptBuf>,
    /// Raw hex of the funding transaction. Required to spend non-witness
    /// outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_tx: Option<String>,
    #[serde(default)]
    pub spent: bool,
}

/// Where change goes and how it will later be spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOutput {
    pub script_pubkey: ScriptBuf,
    pub family: ScriptFamily,
}

/// Which selection strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    Accumulative,
    ForceUseUtxo,
    SubtractFee,
}

/// Inputs, outputs and fee of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionResult {
    pub inputs: Vec<Utxo>,
    /// Payment outputs in target order, followed by change if any.
    pub outputs: Vec<TxOut>,
    pub fee: u64,
    /// Position of the change output in `outputs`.
    pub change_index: Option<usize>,
}

impl SelectionResult {
    pub fn input_value(&self) -> u64 {
        sum_inputs(&self.inputs)
    }

    pub fn output_value(&self) -> u64 {
        sum_outputs(&self.outputs)
    }

    pub fn has_change(&self) -> bool {
        self.change_index.is_some()
    }
}

fn sum_inputs(inputs: &[Utxo]) -> u64 {
    inputs.iter().fold(0, |acc, utxo| acc.saturating_add(utxo.value))
}

fn sum_outputs(outputs: &[TxOut]) -> u64 {
    outputs.iter().fold(0, |acc, out| acc.saturating_add(out.value.to_sat()))
}

/// Sum of satoshi amounts, rejecting any total above the money supply.
pub fn checked_total(values: impl IntoIterator<Item = u64>) -> Result<u64, UtxoError> {
    values
        .into_iter()
        .try_fold(Amount::ZERO, |acc, value| {
            acc.checked_add(Amount::from_sat(value))
                .filter(|total| *total <= Amount::MAX_MONEY)
        })
        .map(Amount::to_sat)
        .ok_or_else(|| UtxoError::InvalidAmount("total exceeds the money supply".into()))
}

fn input_total(inputs: &[Utxo]) -> Result<u64, UtxoError> {
    checked_total(inputs.iter().map(|utxo| utxo.value))
}

fn output_total(outputs: &[TxOut]) -> Result<u64, UtxoError> {
    checked_total(outputs.iter().map(|out| out.value.to_sat()))
}

fn insufficient(in_value: u64, out_value: u64, fee: u64) -> UtxoError {
    UtxoError::InsufficientFunds {
        shortfall: out_value.saturating_add(fee).saturating_sub(in_value),
        fee,
    }
}

/// Decide whether a change output is worth adding and fix the fee.
///
/// Change is added only when what remains after paying for the change
/// output itself exceeds the change family's dust threshold. Otherwise the
/// excess is left to the fee.
pub fn finalize(
    inputs: Vec<Utxo>,
    outputs: Vec<TxOut>,
    fee_rate: u64,
    change: &ChangeOutput,
) -> Result<SelectionResult, UtxoError> {
    let in_value = input_total(&inputs)?;
    let out_value = output_total(&outputs)?;
    let base_fee = transaction_fee(&inputs, &outputs, fee_rate);
    if in_value < out_value.saturating_add(base_fee) {
        return Err(insufficient(in_value, out_value, base_fee));
    }

    let mut with_change = outputs.clone();
    with_change.push(TxOut {
        value: Amount::ZERO,
        script_pubkey: change.script_pubkey.clone(),
    });
    let change_fee = transaction_fee(&inputs, &with_change, fee_rate);
    let remainder = in_value.saturating_sub(out_value.saturating_add(change_fee));
    let dust = dust_threshold(change.family, fee_rate);

    let result = if remainder > dust {
        let change_index = with_change.len() - 1;
        with_change[change_index].value = Amount::from_sat(remainder);
        SelectionResult {
            inputs,
            outputs: with_change,
            fee: change_fee,
            change_index: Some(change_index),
        }
    } else {
        SelectionResult {
            inputs,
            outputs,
            fee: in_value - out_value,
            change_index: None,
        }
    };

    debug!(
        inputs = result.inputs.len(),
        outputs = result.outputs.len(),
        fee = result.fee,
        change = result.has_change(),
        "selection finalized"
    );
    Ok(result)
}

fn accumulate(
    forced: &[Utxo],
    candidates: &[Utxo],
    targets: &[TxOut],
    fee_rate: u64,
    change: &ChangeOutput,
) -> Result<SelectionResult, UtxoError> {
    let out_value = output_total(targets)?;
    let mut inputs: Vec<Utxo> = forced.to_vec();
    let mut in_value = input_total(&inputs)?;
    let fee = transaction_fee(&inputs, targets, fee_rate);

    if !inputs.is_empty() && in_value >= out_value.saturating_add(fee) {
        return finalize(inputs, targets.to_vec(), fee_rate, change);
    }

    for utxo in candidates {
        let marginal = input_fee(utxo, fee_rate);
        if marginal > utxo.value {
            trace!(id = %utxo.id, value = utxo.value, marginal, "skipping dust input");
            continue;
        }

        inputs.push(utxo.clone());
        in_value = checked_total([in_value, utxo.value])?;
        let fee = transaction_fee(&inputs, targets, fee_rate);

        if in_value >= out_value.saturating_add(fee) {
            return finalize(inputs, targets.to_vec(), fee_rate, change);
        }
    }

    // Exhausted: measure the shortfall against every UTXO on offer, the
    // skipped uneconomic ones included.
    let everything: Vec<Utxo> = forced.iter().chain(candidates).cloned().collect();
    let available = input_total(&everything)?;
    let fee = transaction_fee(&everything, targets, fee_rate);
    debug!(available, out_value, fee, "not enough funds for targets");
    Err(insufficient(available, out_value, fee))
}

/// Add candidates in order until inputs cover the targets plus the fee of
/// the transaction built so far. Inputs worth less than their own fee are
/// skipped.
pub fn accumulative(
    candidates: &[Utxo],
    targets: &[TxOut],
    fee_rate: u64,
    change: &ChangeOutput,
) -> Result<SelectionResult, UtxoError> {
    accumulate(&[], candidates, targets, fee_rate, change)
}

/// Like [`accumulative`], but every `forced` UTXO is spent whether needed
/// or not, ahead of the candidates.
pub fn force_use_utxo(
    forced: &[Utxo],
    candidates: &[Utxo],
    targets: &[TxOut],
    fee_rate: u64,
    change: &ChangeOutput,
) -> Result<SelectionResult, UtxoError> {
    accumulate(forced, candidates, targets, fee_rate, change)
}

/// Spend exactly `utxos` and take the fee out of the first target.
///
/// Returns a new output list; the caller's targets are not modified. The
/// first target must be worth strictly more than the fee.
pub fn subtract_fee(
    utxos: &[Utxo],
    targets: &[TxOut],
    fee_rate: u64,
    change: &ChangeOutput,
) -> Result<SelectionResult, UtxoError> {
    let Some(first) = targets.first() else {
        return Err(UtxoError::TransactionBuildError(
            "subtract-fee needs at least one target".into(),
        ));
    };

    output_total(targets)?;
    let fee = transaction_fee(utxos, targets, fee_rate);
    let first_value = first.value.to_sat();
    if first_value <= fee {
        return Err(UtxoError::InsufficientFunds {
            shortfall: fee - first_value + 1,
            fee,
        });
    }

    let adjusted: Vec<TxOut> = targets
        .iter()
        .enumerate()
        .map(|(i, out)| match i {
            0 => TxOut {
                value: Amount::from_sat(first_value - fee),
                script_pubkey: out.script_pubkey.clone(),
            },
            _ => out.clone(),
        })
        .collect();

    finalize(utxos.to_vec(), adjusted, fee_rate, change)
}
