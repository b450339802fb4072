use crate::error::UtxoError;

/// Hash function used to compute a Base58Check checksum. Only the first four
/// bytes of the digest are kept.
pub type ChecksumHash = fn(&[u8]) -> [u8; 32];

/// Base58Check-encode `payload` with a 4-byte checksum taken from `hash`.
pub fn encode_check(payload: &[u8], hash: ChecksumHash) -> String {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    data.extend_from_slice(&hash(payload)[..4]);
    bs58::encode(data).into_string()
}

/// Decode a Base58Check string and verify its checksum, returning the payload.
pub fn decode_check(encoded: &str, hash: ChecksumHash) -> Result<Vec<u8>, UtxoError> {
    let mut data = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| UtxoError::Encoding(format!("invalid base58: {e}")))?;

    if data.len() < 5 {
        return Err(UtxoError::Encoding(format!(
            "base58check payload too short: {} bytes",
            data.len()
        )));
    }

    let split = data.len() - 4;
    let expected = hash(&data[..split]);
    if data[split..] != expected[..4] {
        return Err(UtxoError::Encoding("base58check checksum mismatch".into()));
    }

    data.truncate(split);
    Ok(data)
}
