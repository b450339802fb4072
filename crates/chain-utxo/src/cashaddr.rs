//! CashAddr encoding: a bech32-like base32 format with a 40-bit BCH checksum
//! over the human-readable prefix, a version byte and the hash payload.

use crate::error::UtxoError;

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const GENERATORS: [u64; 5] = [
    0x98f2bc8e61,
    0x79b76d99e2,
    0xf33e5fb3c4,
    0xae2eabe2a8,
    0x1e4f43e470,
];
const CHECKSUM_LEN: usize = 8;

/// Payload type carried in the version byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CashAddrType {
    PubkeyHash,
    ScriptHash,
}

impl CashAddrType {
    fn type_bits(self) -> u8 {
        match self {
            CashAddrType::PubkeyHash => 0,
            CashAddrType::ScriptHash => 1,
        }
    }
}

fn polymod(values: &[u8]) -> u64 {
    let mut c: u64 = 1;
    for &d in values {
        let c0 = (c >> 35) as u8;
        c = ((c & 0x07_ffff_ffff) << 5) ^ u64::from(d);
        for (i, generator) in GENERATORS.iter().enumerate() {
            if c0 & (1 << i) != 0 {
                c ^= generator;
            }
        }
    }
    c ^ 1
}

fn expand_prefix(prefix: &str) -> Vec<u8> {
    let mut out: Vec<u8> = prefix.bytes().map(|b| b & 0x1f).collect();
    out.push(0);
    out
}

fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Result<Vec<u8>, UtxoError> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let max_value: u32 = (1 << to) - 1;
    let max_acc: u32 = (1 << (from + to - 1)) - 1;
    let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);

    for &value in data {
        let value = u32::from(value);
        if value >> from != 0 {
            return Err(UtxoError::Encoding(format!("invalid {from}-bit value {value}")));
        }
        acc = ((acc << from) | value) & max_acc;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & max_value) as u8);
        }
    }

    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & max_value) as u8);
        }
    } else if bits >= from || ((acc << (to - bits)) & max_value) != 0 {
        return Err(UtxoError::Encoding("non-zero cashaddr padding".into()));
    }

    Ok(out)
}

fn size_bits(len: usize) -> Result<u8, UtxoError> {
    match len {
        20 => Ok(0),
        24 => Ok(1),
        28 => Ok(2),
        32 => Ok(3),
        40 => Ok(4),
        48 => Ok(5),
        56 => Ok(6),
        64 => Ok(7),
        other => Err(UtxoError::Encoding(format!(
            "unsupported cashaddr hash length {other}"
        ))),
    }
}

/// Encode `hash` as `prefix:payload`.
pub fn encode(prefix: &str, kind: CashAddrType, hash: &[u8]) -> Result<String, UtxoError> {
    let version = (kind.type_bits() << 3) | size_bits(hash.len())?;

    let mut payload = Vec::with_capacity(hash.len() + 1);
    payload.push(version);
    payload.extend_from_slice(hash);
    let data = convert_bits(&payload, 8, 5, true)?;

    let mut checksum_input = expand_prefix(prefix);
    checksum_input.extend_from_slice(&data);
    checksum_input.extend_from_slice(&[0u8; CHECKSUM_LEN]);
    let checksum = polymod(&checksum_input);

    let mut out = String::with_capacity(prefix.len() + 1 + data.len() + CHECKSUM_LEN);
    out.push_str(prefix);
    out.push(':');
    for d in data {
        out.push(CHARSET[d as usize] as char);
    }
    for i in 0..CHECKSUM_LEN {
        let d = (checksum >> (5 * (CHECKSUM_LEN - 1 - i))) & 0x1f;
        out.push(CHARSET[d as usize] as char);
    }
    Ok(out)
}

/// Decode a CashAddr string for `prefix`. The prefix may be omitted from the
/// input; when present it must match, otherwise `PrefixMismatch` is returned.
pub fn decode(address: &str, prefix: &str) -> Result<(CashAddrType, Vec<u8>), UtxoError> {
    let has_lower = address.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = address.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(UtxoError::Encoding("mixed-case cashaddr".into()));
    }
    let lowered = address.to_ascii_lowercase();

    let payload_str = match lowered.split_once(':') {
        Some((found, rest)) => {
            if found != prefix {
                return Err(UtxoError::PrefixMismatch {
                    expected: prefix.to_string(),
                    found: found.to_string(),
                });
            }
            rest
        }
        None => lowered.as_str(),
    };

    if payload_str.len() <= CHECKSUM_LEN {
        return Err(UtxoError::Encoding("cashaddr payload too short".into()));
    }

    let mut data = Vec::with_capacity(payload_str.len());
    for c in payload_str.bytes() {
        let d = CHARSET
            .iter()
            .position(|&x| x == c)
            .ok_or_else(|| {
                UtxoError::Encoding(format!("invalid cashaddr character '{}'", c as char))
            })?;
        data.push(d as u8);
    }

    let mut checksum_input = expand_prefix(prefix);
    checksum_input.extend_from_slice(&data);
    if polymod(&checksum_input) != 0 {
        return Err(UtxoError::Encoding("cashaddr checksum mismatch".into()));
    }

    let payload = convert_bits(&data[..data.len() - CHECKSUM_LEN], 5, 8, false)?;
    let (&version, hash) = payload
        .split_first()
        .ok_or_else(|| UtxoError::Encoding("empty cashaddr payload".into()))?;

    if version & 0x80 != 0 {
        return Err(UtxoError::Encoding("reserved cashaddr version bit set".into()));
    }
    if size_bits(hash.len())? != version & 0x07 {
        return Err(UtxoError::Encoding(
            "cashaddr size bits do not match payload".into(),
        ));
    }
    let kind = match version >> 3 {
        0 => CashAddrType::PubkeyHash,
        1 => CashAddrType::ScriptHash,
        other => {
            return Err(UtxoError::Encoding(format!(
                "unsupported cashaddr type {other}"
            )))
        }
    };

    Ok((kind, hash.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "76a04053bda0a88bda5177b86a15c3b29f559873";
    const P2PKH: &str = "bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a";
    const P2SH: &str = "bitcoincash:ppm2qsznhks23z7629mms6s4cwef74vcwvn0h829pq";

    #[test]
    fn encode_pubkey_hash() {
        let hash = hex::decode(HASH).unwrap();
        assert_eq!(
            encode("bitcoincash", CashAddrType::PubkeyHash, &hash).unwrap(),
            P2PKH
        );
    }

    #[test]
    fn encode_script_hash() {
        let hash = hex::decode(HASH).unwrap();
        assert_eq!(
            encode("bitcoincash", CashAddrType::ScriptHash, &hash).unwrap(),
            P2SH
        );
    }

    #[test]
    fn decode_with_and_without_prefix() {
        let (kind, hash) = decode(P2PKH, "bitcoincash").unwrap();
        assert_eq!(kind, CashAddrType::PubkeyHash);
        assert_eq!(hex::encode(hash), HASH);

        let bare = P2PKH.trim_start_matches("bitcoincash:");
        let (kind, hash) = decode(bare, "bitcoincash").unwrap();
        assert_eq!(kind, CashAddrType::PubkeyHash);
        assert_eq!(hex::encode(hash), HASH);
    }

    #[test]
    fn decode_uppercase() {
        let (kind, _) = decode(&P2SH.to_ascii_uppercase(), "bitcoincash").unwrap();
        assert_eq!(kind, CashAddrType::ScriptHash);
    }

    #[test]
    fn mixed_case_is_rejected() {
        let mixed = P2PKH.replacen('q', "Q", 1);
        assert!(decode(&mixed, "bitcoincash").is_err());
    }

    #[test]
    fn other_prefix_is_a_mismatch() {
        let err = decode(P2PKH, "bchtest").unwrap_err();
        assert!(matches!(err, UtxoError::PrefixMismatch { .. }));
    }

    #[test]
    fn bare_payload_under_wrong_prefix_fails_checksum() {
        let bare = P2PKH.trim_start_matches("bitcoincash:");
        assert!(matches!(
            decode(bare, "bchtest"),
            Err(UtxoError::Encoding(_))
        ));
    }

    #[test]
    fn corrupted_character_fails_checksum() {
        let corrupted = P2PKH.replace("qpm2", "qpm3");
        assert!(decode(&corrupted, "bitcoincash").is_err());
    }

    #[test]
    fn unsupported_hash_length() {
        assert!(encode("bitcoincash", CashAddrType::PubkeyHash, &[0u8; 21]).is_err());
    }
}
