//! Static per-coin registry.
//!
//! Every coin carries parallel prefix tables. Index 0 is the current
//! serialization; higher indices are historical or alternate serializations
//! that decoders fall back to. A field shorter than the tallest table reuses
//! its first entry at the missing indices.

use tracing::trace;

use crate::base58::{self, ChecksumHash};
use crate::error::{FallbackError, UtxoError};
use crate::hashing::{keccak256, sha256, sha256d};
use crate::script::{self, ScriptTemplate, ScriptTemplates};

/// A private/public pair of BIP32 serialization version bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XKeyVersion {
    pub private: [u8; 4],
    pub public: [u8; 4],
}

impl XKeyVersion {
    pub const fn new(private: u32, public: u32) -> Self {
        Self {
            private: private.to_be_bytes(),
            public: public.to_be_bytes(),
        }
    }
}

const XPRV: XKeyVersion = XKeyVersion::new(0x0488_ade4, 0x0488_b21e);
const YPRV: XKeyVersion = XKeyVersion::new(0x049d_7878, 0x049d_7cb2);
const ZPRV: XKeyVersion = XKeyVersion::new(0x04b2_430c, 0x04b2_4746);
const TPRV: XKeyVersion = XKeyVersion::new(0x0435_8394, 0x0435_87cf);
const UPRV: XKeyVersion = XKeyVersion::new(0x044a_4e28, 0x044a_5262);
const VPRV: XKeyVersion = XKeyVersion::new(0x045f_18bc, 0x045f_1cf6);

/// Parallel prefix tables for one coin.
#[derive(Debug, Clone, Copy)]
pub struct PrefixTables {
    pub wif: &'static [u8],
    pub pubkey_hash: &'static [u8],
    pub script_hash: &'static [u8],
    pub xkey_legacy: &'static [XKeyVersion],
    /// Empty for coins without segwit; lookups fall back to `xkey_legacy`.
    pub xkey_wrapped_segwit: &'static [XKeyVersion],
    /// Empty for coins without segwit; lookups fall back to `xkey_legacy`.
    pub xkey_segwit: &'static [XKeyVersion],
    pub bech32: Option<&'static str>,
    pub cashaddr: Option<&'static str>,
}

/// One mutually consistent set of network parameters, resolved from a
/// single index of a coin's [`PrefixTables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkParams {
    pub index: usize,
    pub wif: u8,
    pub pubkey_hash: u8,
    pub script_hash: u8,
    pub xkey_legacy: XKeyVersion,
    pub xkey_wrapped_segwit: XKeyVersion,
    pub xkey_segwit: XKeyVersion,
    pub bech32: Option<&'static str>,
    pub cashaddr: Option<&'static str>,
}

fn entry_at<T: Copy>(table: &[T], index: usize) -> Option<T> {
    table.get(index).or_else(|| table.first()).copied()
}

impl PrefixTables {
    /// Number of indices, i.e. the length of the tallest table.
    pub fn len(&self) -> usize {
        [
            self.wif.len(),
            self.pubkey_hash.len(),
            self.script_hash.len(),
            self.xkey_legacy.len(),
            self.xkey_wrapped_segwit.len(),
            self.xkey_segwit.len(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve the parameter set at `index`, or `None` past the tallest table.
    pub fn params(&self, index: usize) -> Option<NetworkParams> {
        if index >= self.len() {
            return None;
        }
        let xkey_legacy = entry_at(self.xkey_legacy, index)?;
        Some(NetworkParams {
            index,
            wif: entry_at(self.wif, index)?,
            pubkey_hash: entry_at(self.pubkey_hash, index)?,
            script_hash: entry_at(self.script_hash, index)?,
            xkey_legacy,
            xkey_wrapped_segwit: entry_at(self.xkey_wrapped_segwit, index).unwrap_or(xkey_legacy),
            xkey_segwit: entry_at(self.xkey_segwit, index).unwrap_or(xkey_legacy),
            bech32: self.bech32,
            cashaddr: self.cashaddr,
        })
    }
}

/// Per-coin overrides of the cryptographic primitives. Every method has the
/// Bitcoin default; a coin overrides only what it changes.
pub trait CoinStrategy: Sync + std::fmt::Debug {
    /// Digest signed by ECDSA inputs.
    fn sig_hash(&self, preimage: &[u8]) -> [u8; 32] {
        sha256d(preimage)
    }

    /// Transaction id hash, in internal byte order.
    fn tx_hash(&self, raw_tx: &[u8]) -> [u8; 32] {
        sha256d(raw_tx)
    }

    /// Hash used for Base58Check checksums.
    fn checksum_hash(&self) -> ChecksumHash {
        sha256d
    }

    fn base58_encode(&self, payload: &[u8]) -> String {
        base58::encode_check(payload, self.checksum_hash())
    }

    fn base58_decode(&self, encoded: &str) -> Result<Vec<u8>, UtxoError> {
        base58::decode_check(encoded, self.checksum_hash())
    }

    /// WIF for a compressed-key private key.
    fn wif_encode(&self, version: u8, key: &[u8; 32]) -> String {
        let mut payload = Vec::with_capacity(34);
        payload.push(version);
        payload.extend_from_slice(key);
        payload.push(0x01);
        self.base58_encode(&payload)
    }

    /// Decode a WIF string. A version byte other than `version` is a
    /// [`UtxoError::PrefixMismatch`].
    fn wif_decode(&self, version: u8, wif: &str) -> Result<[u8; 32], UtxoError> {
        let payload = self.base58_decode(wif)?;
        let key_bytes = match payload.len() {
            34 if payload[33] == 0x01 => &payload[1..33],
            33 => &payload[1..33],
            n => {
                return Err(UtxoError::InvalidPrivateKey(format!(
                    "WIF payload must be 33 or 34 bytes, got {n}"
                )))
            }
        };
        if payload[0] != version {
            return Err(UtxoError::PrefixMismatch {
                expected: format!("0x{version:02x}"),
                found: format!("0x{:02x}", payload[0]),
            });
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(key_bytes);
        Ok(key)
    }
}

/// Bitcoin primitives, unchanged.
#[derive(Debug)]
pub struct StandardStrategy;

impl CoinStrategy for StandardStrategy {}

/// SmartCash: Keccak-256 Base58Check checksums and single SHA-256 for
/// signature digests and transaction ids.
#[derive(Debug)]
pub struct SmartcashStrategy;

impl CoinStrategy for SmartcashStrategy {
    fn sig_hash(&self, preimage: &[u8]) -> [u8; 32] {
        sha256(preimage)
    }

    fn tx_hash(&self, raw_tx: &[u8]) -> [u8; 32] {
        sha256(raw_tx)
    }

    fn checksum_hash(&self) -> ChecksumHash {
        keccak256
    }
}

/// Immutable description of one coin.
#[derive(Debug)]
pub struct CoinProfile {
    pub name: &'static str,
    pub display_name: &'static str,
    pub currency_code: &'static str,
    /// SLIP-44 coin type.
    pub coin_type: u32,
    pub segwit: bool,
    /// Replay-protected forks sign with `SIGHASH_FORKID` and this fork id.
    pub fork_id: Option<u32>,
    pub prefixes: PrefixTables,
    pub templates: ScriptTemplates,
    pub strategy: &'static dyn CoinStrategy,
}

impl CoinProfile {
    /// Parameters at index 0.
    pub fn standard_params(&self) -> Result<NetworkParams, UtxoError> {
        self.prefixes
            .params(0)
            .ok_or_else(|| UtxoError::UnknownCoin(format!("{} has no prefix tables", self.name)))
    }

    /// Parameters at the last index, used for legacy base58 renderings.
    pub fn legacy_params(&self) -> Result<NetworkParams, UtxoError> {
        let last = self.prefixes.len().saturating_sub(1);
        self.prefixes
            .params(last)
            .ok_or_else(|| UtxoError::UnknownCoin(format!("{} has no prefix tables", self.name)))
    }

    /// Run `attempt` against each prefix index in order. A prefix mismatch
    /// moves on to the next index; any other error aborts the scan. Returns
    /// `Ok(None)` when every index mismatched.
    pub fn try_each_prefix<T, E, F>(&self, mut attempt: F) -> Result<Option<T>, E>
    where
        E: FallbackError,
        F: FnMut(&NetworkParams) -> Result<T, E>,
    {
        let mut index = 0;
        while let Some(params) = self.prefixes.params(index) {
            match attempt(&params) {
                Ok(value) => return Ok(Some(value)),
                Err(e) if e.is_prefix_mismatch() => {
                    trace!(coin = self.name, index, "prefix mismatch, trying next index");
                }
                Err(e) => return Err(e),
            }
            index += 1;
        }
        Ok(None)
    }

    pub fn replay_protection_template(&self) -> Option<ScriptTemplate> {
        self.templates.replay_protection
    }
}

const STANDARD: &StandardStrategy = &StandardStrategy;
const NO_TEMPLATES: ScriptTemplates = ScriptTemplates {
    replay_protection: None,
};
const REPLAY_TEMPLATES: ScriptTemplates = ScriptTemplates {
    replay_protection: Some(script::replay_protection as ScriptTemplate),
};

/// Every registered coin.
pub static COINS: &[CoinProfile] = &[
    CoinProfile {
        name: "bitcoin",
        display_name: "Bitcoin",
        currency_code: "BTC",
        coin_type: 0,
        segwit: true,
        fork_id: None,
        prefixes: PrefixTables {
            wif: &[0x80],
            pubkey_hash: &[0x00],
            script_hash: &[0x05],
            xkey_legacy: &[XPRV],
            xkey_wrapped_segwit: &[YPRV],
            xkey_segwit: &[ZPRV],
            bech32: Some("bc"),
            cashaddr: None,
        },
        templates: NO_TEMPLATES,
        strategy: STANDARD,
    },
    CoinProfile {
        name: "bitcointestnet",
        display_name: "Bitcoin Testnet",
        currency_code: "TESTBTC",
        coin_type: 1,
        segwit: true,
        fork_id: None,
        prefixes: PrefixTables {
            wif: &[0xef],
            pubkey_hash: &[0x6f],
            script_hash: &[0xc4],
            xkey_legacy: &[TPRV],
            xkey_wrapped_segwit: &[UPRV],
            xkey_segwit: &[VPRV],
            bech32: Some("tb"),
            cashaddr: None,
        },
        templates: NO_TEMPLATES,
        strategy: STANDARD,
    },
    CoinProfile {
        name: "litecoin",
        display_name: "Litecoin",
        currency_code: "LTC",
        coin_type: 2,
        segwit: true,
        fork_id: None,
        prefixes: PrefixTables {
            wif: &[0xb0],
            pubkey_hash: &[0x30],
            script_hash: &[0x32, 0x05],
            xkey_legacy: &[XKeyVersion::new(0x019d_9cfe, 0x019d_a462), XPRV],
            xkey_wrapped_segwit: &[XKeyVersion::new(0x01b2_6792, 0x01b2_6ef6), YPRV],
            xkey_segwit: &[ZPRV],
            bech32: Some("ltc"),
            cashaddr: None,
        },
        templates: NO_TEMPLATES,
        strategy: STANDARD,
    },
    CoinProfile {
        name: "bitcoincash",
        display_name: "Bitcoin Cash",
        currency_code: "BCH",
        coin_type: 145,
        segwit: false,
        fork_id: Some(0),
        prefixes: PrefixTables {
            wif: &[0x80],
            pubkey_hash: &[0x00],
            script_hash: &[0x05],
            xkey_legacy: &[XPRV],
            xkey_wrapped_segwit: &[],
            xkey_segwit: &[],
            bech32: None,
            cashaddr: Some("bitcoincash"),
        },
        templates: REPLAY_TEMPLATES,
        strategy: STANDARD,
    },
    CoinProfile {
        name: "bitcoincashtestnet",
        display_name: "Bitcoin Cash Testnet",
        currency_code: "TESTBCH",
        coin_type: 1,
        segwit: false,
        fork_id: Some(0),
        prefixes: PrefixTables {
            wif: &[0xef],
            pubkey_hash: &[0x6f],
            script_hash: &[0xc4],
            xkey_legacy: &[TPRV],
            xkey_wrapped_segwit: &[],
            xkey_segwit: &[],
            bech32: None,
            cashaddr: Some("bchtest"),
        },
        templates: REPLAY_TEMPLATES,
        strategy: STANDARD,
    },
    CoinProfile {
        name: "bitcoinsv",
        display_name: "Bitcoin SV",
        currency_code: "BSV",
        coin_type: 236,
        segwit: false,
        fork_id: Some(0),
        prefixes: PrefixTables {
            wif: &[0x80],
            pubkey_hash: &[0x00],
            script_hash: &[0x05],
            xkey_legacy: &[XPRV],
            xkey_wrapped_segwit: &[],
            xkey_segwit: &[],
            bech32: None,
            cashaddr: None,
        },
        templates: NO_TEMPLATES,
        strategy: STANDARD,
    },
    CoinProfile {
        name: "bitcoingold",
        display_name: "Bitcoin Gold",
        currency_code: "BTG",
        coin_type: 156,
        segwit: true,
        fork_id: Some(79),
        prefixes: PrefixTables {
            wif: &[0x80],
            pubkey_hash: &[0x26],
            script_hash: &[0x17],
            xkey_legacy: &[XPRV],
            xkey_wrapped_segwit: &[YPRV],
            xkey_segwit: &[ZPRV],
            bech32: Some("btg"),
            cashaddr: None,
        },
        templates: NO_TEMPLATES,
        strategy: STANDARD,
    },
    CoinProfile {
        name: "dogecoin",
        display_name: "Dogecoin",
        currency_code: "DOGE",
        coin_type: 3,
        segwit: false,
        fork_id: None,
        prefixes: PrefixTables {
            wif: &[0x9e],
            pubkey_hash: &[0x1e],
            script_hash: &[0x16],
            xkey_legacy: &[XKeyVersion::new(0x02fa_c398, 0x02fa_cafd), XPRV],
            xkey_wrapped_segwit: &[],
            xkey_segwit: &[],
            bech32: None,
            cashaddr: None,
        },
        templates: NO_TEMPLATES,
        strategy: STANDARD,
    },
    CoinProfile {
        name: "dash",
        display_name: "Dash",
        currency_code: "DASH",
        coin_type: 5,
        segwit: false,
        fork_id: None,
        prefixes: PrefixTables {
            wif: &[0xcc],
            pubkey_hash: &[0x4c],
            script_hash: &[0x10],
            xkey_legacy: &[XPRV],
            xkey_wrapped_segwit: &[],
            xkey_segwit: &[],
            bech32: None,
            cashaddr: None,
        },
        templates: NO_TEMPLATES,
        strategy: STANDARD,
    },
    CoinProfile {
        name: "smartcash",
        display_name: "SmartCash",
        currency_code: "SMART",
        coin_type: 224,
        segwit: false,
        fork_id: None,
        prefixes: PrefixTables {
            wif: &[0xbf],
            pubkey_hash: &[0x3f],
            script_hash: &[0x12],
            xkey_legacy: &[XPRV],
            xkey_wrapped_segwit: &[],
            xkey_segwit: &[],
            bech32: None,
            cashaddr: None,
        },
        templates: NO_TEMPLATES,
        strategy: &SmartcashStrategy,
    },
];

/// Look up a coin by its registry name.
pub fn lookup(name: &str) -> Result<&'static CoinProfile, UtxoError> {
    COINS
        .iter()
        .find(|coin| coin.name == name)
        .ok_or_else(|| UtxoError::UnknownCoin(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_and_unknown() {
        assert_eq!(lookup("bitcoin").unwrap().currency_code, "BTC");
        assert_eq!(lookup("litecoin").unwrap().coin_type, 2);
        assert!(matches!(
            lookup("feathercoin"),
            Err(UtxoError::UnknownCoin(name)) if name == "feathercoin"
        ));
    }

    #[test]
    fn coin_names_are_unique() {
        for (i, a) in COINS.iter().enumerate() {
            for b in &COINS[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn every_coin_resolves_standard_and_legacy_params() {
        for coin in COINS {
            assert!(coin.standard_params().is_ok(), "{}", coin.name);
            assert!(coin.legacy_params().is_ok(), "{}", coin.name);
            assert!(coin.prefixes.params(coin.prefixes.len()).is_none());
        }
    }

    #[test]
    fn segwit_coins_define_bech32() {
        for coin in COINS {
            assert_eq!(coin.segwit, coin.prefixes.bech32.is_some(), "{}", coin.name);
        }
    }

    #[test]
    fn litecoin_second_index_falls_back_per_field() {
        let ltc = lookup("litecoin").unwrap();
        assert_eq!(ltc.prefixes.len(), 2);

        let first = ltc.prefixes.params(0).unwrap();
        assert_eq!(first.script_hash, 0x32);
        assert_eq!(first.xkey_legacy.private, [0x01, 0x9d, 0x9c, 0xfe]);

        let second = ltc.prefixes.params(1).unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.wif, 0xb0);
        assert_eq!(second.pubkey_hash, 0x30);
        assert_eq!(second.script_hash, 0x05);
        assert_eq!(second.xkey_legacy, XPRV);
        assert_eq!(second.xkey_wrapped_segwit, YPRV);
        assert_eq!(second.xkey_segwit, ZPRV);
    }

    #[test]
    fn non_segwit_xkeys_fall_back_to_legacy() {
        let doge = lookup("dogecoin").unwrap().standard_params().unwrap();
        assert_eq!(doge.xkey_segwit, doge.xkey_legacy);
        assert_eq!(doge.xkey_wrapped_segwit, doge.xkey_legacy);
    }

    #[test]
    fn try_each_prefix_skips_mismatches_only() {
        let ltc = lookup("litecoin").unwrap();

        let found = ltc
            .try_each_prefix(|params| {
                if params.script_hash == 0x05 {
                    Ok(params.index)
                } else {
                    Err(UtxoError::PrefixMismatch {
                        expected: "0x05".into(),
                        found: format!("0x{:02x}", params.script_hash),
                    })
                }
            })
            .unwrap();
        assert_eq!(found, Some(1));

        let mut calls = 0;
        let aborted: Result<Option<()>, UtxoError> = ltc.try_each_prefix(|_| {
            calls += 1;
            Err(UtxoError::Encoding("bad checksum".into()))
        });
        assert!(matches!(aborted, Err(UtxoError::Encoding(_))));
        assert_eq!(calls, 1);

        let exhausted: Option<()> = ltc
            .try_each_prefix(|_| {
                Err(UtxoError::PrefixMismatch {
                    expected: "a".into(),
                    found: "b".into(),
                })
            })
            .unwrap();
        assert!(exhausted.is_none());
    }

    #[test]
    fn wif_round_trip_and_version_check() {
        let key = [0x11u8; 32];
        let wif = StandardStrategy.wif_encode(0x80, &key);
        assert_eq!(StandardStrategy.wif_decode(0x80, &wif).unwrap(), key);
        assert!(matches!(
            StandardStrategy.wif_decode(0xb0, &wif),
            Err(UtxoError::PrefixMismatch { .. })
        ));
    }

    #[test]
    fn smartcash_overrides_checksum_and_hashes() {
        let smart = lookup("smartcash").unwrap();
        let payload = [0x3fu8; 21];
        let encoded = smart.strategy.base58_encode(&payload);
        assert_ne!(encoded, StandardStrategy.base58_encode(&payload));
        assert_eq!(smart.strategy.base58_decode(&encoded).unwrap(), payload);
        assert_eq!(smart.strategy.tx_hash(b"abc"), sha256(b"abc"));
        assert_eq!(smart.strategy.sig_hash(b"abc"), sha256(b"abc"));
    }

    #[test]
    fn only_cash_forks_carry_replay_template() {
        assert!(lookup("bitcoincash").unwrap().replay_protection_template().is_some());
        assert!(lookup("bitcoin").unwrap().replay_protection_template().is_none());
    }
}
