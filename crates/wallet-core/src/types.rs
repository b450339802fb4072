use std::fmt;
use std::str::FromStr;

use chain_utxo::coins::{NetworkParams, XKeyVersion};
use chain_utxo::script::ScriptFamily;
use serde::{Deserialize, Serialize};

use crate::error::WalletError;

/// Largest non-hardened child index.
const MAX_NORMAL_INDEX: u32 = (1 << 31) - 1;

/// BIP43 purpose a key tree is derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Purpose {
    /// Single non-hardened `m/0` level, from early Airbitz wallets.
    Airbitz,
    Legacy,
    WrappedSegwit,
    Segwit,
    /// BIP44 tree whose addresses lock to the coin's replay-protection script.
    ReplayProtection,
}

impl Purpose {
    /// BIP43 purpose number. Replay protection shares the BIP44 tree.
    pub fn number(self) -> u32 {
        match self {
            Purpose::Airbitz => 32,
            Purpose::Legacy | Purpose::ReplayProtection => 44,
            Purpose::WrappedSegwit => 49,
            Purpose::Segwit => 84,
        }
    }

    pub fn from_number(number: u32) -> Result<Self, WalletError> {
        match number {
            32 => Ok(Purpose::Airbitz),
            44 => Ok(Purpose::Legacy),
            49 => Ok(Purpose::WrappedSegwit),
            84 => Ok(Purpose::Segwit),
            other => Err(WalletError::InvalidPurposeNumber(other)),
        }
    }

    /// Script family of the addresses in this tree.
    pub fn script_family(self) -> ScriptFamily {
        match self {
            Purpose::Airbitz | Purpose::Legacy => ScriptFamily::P2pkh,
            Purpose::WrappedSegwit => ScriptFamily::P2wpkhP2sh,
            Purpose::Segwit => ScriptFamily::P2wpkh,
            Purpose::ReplayProtection => ScriptFamily::ReplayProtection,
        }
    }

    /// Extended-key version bytes for this purpose at one prefix index.
    pub fn xkey_version(self, params: &NetworkParams) -> XKeyVersion {
        match self {
            Purpose::Airbitz | Purpose::Legacy | Purpose::ReplayProtection => params.xkey_legacy,
            Purpose::WrappedSegwit => params.xkey_wrapped_segwit,
            Purpose::Segwit => params.xkey_segwit,
        }
    }
}

/// Location of one address in a wallet's key tree.
///
/// Rendered as `m/purpose'/coin'/account'/change/index`, or `m/0/change/index`
/// for [`Purpose::Airbitz`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivationPath {
    pub purpose: Purpose,
    pub coin_type: u32,
    pub account: u32,
    /// 0 for receive addresses, 1 for change.
    pub change: u32,
    pub index: u32,
}

impl DerivationPath {
    /// First receive address of `account`.
    pub fn new(purpose: Purpose, coin_type: u32, account: u32) -> Self {
        Self {
            purpose,
            coin_type,
            account,
            change: 0,
            index: 0,
        }
    }

    pub fn with_change(mut self, change: u32, index: u32) -> Self {
        self.change = change;
        self.index = index;
        self
    }

    /// Move to the next address on the same branch.
    pub fn advance_index(&mut self) -> Result<(), WalletError> {
        if self.index >= MAX_NORMAL_INDEX {
            return Err(WalletError::InvalidPath(format!(
                "address index {} cannot be advanced",
                self.index
            )));
        }
        self.index += 1;
        Ok(())
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.purpose {
            Purpose::Airbitz => write!(f, "m/0/{}/{}", self.change, self.index),
            purpose => write!(
                f,
                "m/{}'/{}'/{}'/{}/{}",
                purpose.number(),
                self.coin_type,
                self.account,
                self.change,
                self.index
            ),
        }
    }
}

fn parse_level(component: &str, hardened: bool) -> Result<u32, WalletError> {
    let digits = if hardened {
        component
            .strip_suffix('\'')
            .or_else(|| component.strip_suffix('h'))
            .ok_or_else(|| WalletError::InvalidPath(format!("{component} must be hardened")))?
    } else {
        component
    };
    let value = digits
        .parse::<u32>()
        .map_err(|e| WalletError::InvalidPath(format!("invalid path component {component}: {e}")))?;
    if value > MAX_NORMAL_INDEX {
        return Err(WalletError::InvalidPath(format!("{component} is out of range")));
    }
    Ok(value)
}

impl FromStr for DerivationPath {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("m/")
            .ok_or_else(|| WalletError::InvalidPath("path must start with m/".into()))?;
        let components: Vec<&str> = rest.split('/').collect();

        match components.as_slice() {
            ["0", change, index] => Ok(DerivationPath {
                purpose: Purpose::Airbitz,
                coin_type: 0,
                account: 0,
                change: parse_level(change, false)?,
                index: parse_level(index, false)?,
            }),
            [purpose, coin_type, account, change, index] => Ok(DerivationPath {
                purpose: Purpose::from_number(parse_level(purpose, true)?)?,
                coin_type: parse_level(coin_type, true)?,
                account: parse_level(account, true)?,
                change: parse_level(change, false)?,
                index: parse_level(index, false)?,
            }),
            _ => Err(WalletError::InvalidPath(format!(
                "expected 3 or 5 levels, got {}",
                components.len()
            ))),
        }
    }
}
