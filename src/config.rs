//! Deployment file: token parameters plus the multisig wallets to create.
//!
//! ```toml
//! [token]
//! symbol = "PLX"
//! name = "PLXCoin"
//! owner = "0x0101010101010101010101010101010101010101"
//! admin = "0x0202020202020202020202020202020202020202"
//! vault = "0x0303030303030303030303030303030303030303"
//! initial_supply = "1000000000"
//! mint_cap = "2000000000"
//!
//! [[wallet]]
//! label = "vault multisig wallet"
//! owners = ["0x01...", "0x02...", "0x03..."]
//! threshold = 2
//! ```

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::address::Address;
use crate::ledger::{parse_units, Roles, TokenConfig, UnitsError, DEFAULT_DECIMALS, MAX_DECIMALS};
use crate::multisig::{WalletConfig, WalletKind, MAX_OWNERS};

const DEFAULT_INITIAL_SUPPLY: &str = "1000000000";
const DEFAULT_MINT_CAP: &str = "2000000000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed deployment file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid {field}: {source}")]
    Amount { field: String, source: UnitsError },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TokenSection {
    pub symbol: String,
    pub name: String,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    pub owner: Address,
    pub admin: Address,
    pub vault: Address,
    #[serde(default)]
    pub minter: Option<Address>,
    /// Display units, e.g. "1000000000" or "0.5".
    #[serde(default = "default_initial_supply")]
    pub initial_supply: String,
    #[serde(default = "default_mint_cap")]
    pub mint_cap: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WalletSection {
    pub label: String,
    pub owners: Vec<Address>,
    pub threshold: usize,
    #[serde(default)]
    pub minting: bool,
    #[serde(default)]
    pub address: Option<Address>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeploymentFile {
    pub token: TokenSection,
    #[serde(default, rename = "wallet")]
    pub wallets: Vec<WalletSection>,
}

/// Validated deployment parameters, ready to instantiate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deployment {
    pub token: TokenConfig,
    pub wallets: Vec<WalletConfig>,
}

fn default_decimals() -> u32 {
    DEFAULT_DECIMALS
}

fn default_initial_supply() -> String {
    DEFAULT_INITIAL_SUPPLY.to_string()
}

fn default_mint_cap() -> String {
    DEFAULT_MINT_CAP.to_string()
}

impl DeploymentFile {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn resolve(self) -> Result<Deployment, ConfigError> {
        let token = self.token;
        if token.decimals > MAX_DECIMALS {
            return Err(ConfigError::Invalid(format!(
                "decimals {} exceeds {MAX_DECIMALS}",
                token.decimals
            )));
        }
        let amount = |field: &str, value: &str| {
            parse_units(value, token.decimals).map_err(|source| ConfigError::Amount {
                field: field.to_string(),
                source,
            })
        };
        let initial_supply = amount("token.initial_supply", &token.initial_supply)?;
        let mint_cap = amount("token.mint_cap", &token.mint_cap)?;
        if initial_supply > mint_cap {
            return Err(ConfigError::Invalid(format!(
                "initial supply {} exceeds mint cap {}",
                token.initial_supply, token.mint_cap
            )));
        }

        let mut labels = BTreeSet::new();
        let mut wallets = Vec::with_capacity(self.wallets.len());
        for wallet in self.wallets {
            if !labels.insert(wallet.label.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate wallet label {:?}",
                    wallet.label
                )));
            }
            if wallet.owners.is_empty() || wallet.owners.len() > MAX_OWNERS {
                return Err(ConfigError::Invalid(format!(
                    "wallet {:?} needs 1..={MAX_OWNERS} owners",
                    wallet.label
                )));
            }
            if wallet.threshold == 0 || wallet.threshold > wallet.owners.len() {
                return Err(ConfigError::Invalid(format!(
                    "wallet {:?} threshold {} outside 1..={}",
                    wallet.label,
                    wallet.threshold,
                    wallet.owners.len()
                )));
            }
            wallets.push(WalletConfig {
                label: wallet.label,
                address: wallet.address,
                owners: wallet.owners,
                threshold: wallet.threshold,
                kind: if wallet.minting {
                    WalletKind::Minting
                } else {
                    WalletKind::Standard
                },
            });
        }

        Ok(Deployment {
            token: TokenConfig {
                symbol: token.symbol,
                name: token.name,
                decimals: token.decimals,
                roles: Roles {
                    owner: token.owner,
                    admin: token.admin,
                    vault: token.vault,
                    minter: token.minter.unwrap_or(token.owner),
                },
                initial_supply,
                mint_cap,
            },
            wallets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[token]
symbol = "PLX"
name = "PLXCoin"
owner = "0x0101010101010101010101010101010101010101"
admin = "0x0202020202020202020202020202020202020202"
vault = "0x0303030303030303030303030303030303030303"

[[wallet]]
label = "vault multisig wallet"
owners = [
    "0x0101010101010101010101010101010101010101",
    "0x0202020202020202020202020202020202020202",
    "0x0303030303030303030303030303030303030303",
]
threshold = 2

[[wallet]]
label = "vault multisig wallet with mint"
owners = [
    "0x0101010101010101010101010101010101010101",
    "0x0202020202020202020202020202020202020202",
    "0x0303030303030303030303030303030303030303",
]
threshold = 2
minting = true
"#;

    #[test]
    fn sample_resolves_with_defaults() {
        let deployment = DeploymentFile::parse(SAMPLE).unwrap().resolve().unwrap();
        let one = 10u128.pow(18);
        assert_eq!(deployment.token.decimals, 18);
        assert_eq!(deployment.token.initial_supply, 1_000_000_000 * one);
        assert_eq!(deployment.token.mint_cap, 2_000_000_000 * one);
        assert_eq!(deployment.token.roles.minter, deployment.token.roles.owner);
        assert_eq!(deployment.wallets.len(), 2);
        assert_eq!(deployment.wallets[0].kind, WalletKind::Standard);
        assert_eq!(deployment.wallets[1].kind, WalletKind::Minting);
        assert_eq!(deployment.wallets[1].address, None);
    }

    #[test]
    fn rejects_supply_above_cap() {
        let text = SAMPLE.replace(
            "vault = \"0x0303030303030303030303030303030303030303\"\n",
            "vault = \"0x0303030303030303030303030303030303030303\"\ninitial_supply = \"5\"\nmint_cap = \"4.5\"\n",
        );
        let err = DeploymentFile::parse(&text).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_threshold_and_duplicate_labels() {
        let err = DeploymentFile::parse(&SAMPLE.replace("threshold = 2\nminting", "threshold = 4\nminting"))
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(err.to_string().contains("threshold 4"));

        let err = DeploymentFile::parse(&SAMPLE.replace(" with mint", ""))
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate wallet label"));
    }

    #[test]
    fn rejects_unknown_keys_and_bad_addresses() {
        assert!(matches!(
            DeploymentFile::parse(&SAMPLE.replace("symbol", "ticker")),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            DeploymentFile::parse(&SAMPLE.replace("0x0202020202020202020202020202020202020202\"\nvault", "0x02\"\nvault")),
            Err(ConfigError::Parse(_))
        ));
    }
}
