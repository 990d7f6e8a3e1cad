//! JSON state file holding one ledger and its wallets.
//!
//! The CLI loads the file, applies exactly one operation and writes it back
//! when [`should_persist`] says the outcome changed state. Failed operations
//! leave the ledger untouched, so the file only ever holds complete transitions.

use std::{
    collections::BTreeMap,
    error::Error as StdError,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::{ConfigError, Deployment};
use crate::ledger::{Ledger, LedgerError};
use crate::multisig::{MultisigError, Wallet};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed state file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown wallet {0:?}")]
    UnknownWallet(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Multisig(#[from] MultisigError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct State {
    pub ledger: Ledger,
    pub wallets: BTreeMap<String, Wallet>,
}

impl State {
    pub fn from_deployment(deployment: Deployment) -> Result<Self, StoreError> {
        let ledger = Ledger::new(deployment.token)?;
        let mut wallets = BTreeMap::new();
        for config in deployment.wallets {
            let wallet = Wallet::new(config)?;
            wallets.insert(wallet.label().to_string(), wallet);
        }
        Ok(State { ledger, wallets })
    }

    /// The named wallet together with the ledger it forwards to.
    pub fn wallet_mut(&mut self, label: &str) -> Result<(&mut Wallet, &mut Ledger), StoreError> {
        let wallet = self
            .wallets
            .get_mut(label)
            .ok_or_else(|| StoreError::UnknownWallet(label.to_string()))?;
        Ok((wallet, &mut self.ledger))
    }

    pub fn wallet(&self, label: &str) -> Result<&Wallet, StoreError> {
        self.wallets
            .get(label)
            .ok_or_else(|| StoreError::UnknownWallet(label.to_string()))
    }
}

pub fn load(path: &Path) -> Result<State, StoreError> {
    let bytes = fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Writes to a uniquely named temp file beside `path` and renames it into place.
/// The temp file is removed if any step fails.
pub fn save(path: &Path, state: &State) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(io_err)?;
    let json = serde_json::to_vec_pretty(state)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(&json).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|err| io_err(err.error))?;
    debug!(path = %path.display(), bytes = json.len(), "state saved");
    Ok(())
}

/// Whether the outcome of one operation must be written back. `Ok` carries
/// whether the operation changed state. A forwarded action that failed still
/// consumed its proposal, so that error is persisted too.
pub fn should_persist(outcome: Result<bool, &(dyn StdError + 'static)>) -> bool {
    match outcome {
        Ok(changed) => changed,
        Err(err) => matches!(
            err.downcast_ref::<MultisigError>(),
            Some(MultisigError::ActionFailed { .. })
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::address::Address;
    use crate::config::DeploymentFile;
    use crate::ledger::LedgerError;
    use crate::multisig::{Action, ActionError, Execution};

    const DEPLOY: &str = r#"
[token]
symbol = "PLX"
name = "PLXCoin"
owner = "0x0101010101010101010101010101010101010101"
admin = "0x0202020202020202020202020202020202020202"
vault = "0x0303030303030303030303030303030303030303"
initial_supply = "100"
mint_cap = "200"

[[wallet]]
label = "vault"
owners = [
    "0x0101010101010101010101010101010101010101",
    "0x0202020202020202020202020202020202020202",
]
threshold = 2
"#;

    #[test]
    fn state_survives_a_save_load_cycle_mid_proposal() {
        let deployment = DeploymentFile::parse(DEPLOY).unwrap().resolve().unwrap();
        let mut state = State::from_deployment(deployment).unwrap();
        let owner = Address::from([1u8; 20]);
        let admin = Address::from([2u8; 20]);
        let vault = Address::from([3u8; 20]);
        let user = Address::from([9u8; 20]);

        let wallet_address = state.wallet("vault").unwrap().address();
        state.ledger.transfer(&vault, &wallet_address, 10).unwrap();
        let (wallet, ledger) = state.wallet_mut("vault").unwrap();
        let id = wallet
            .submit(&owner, user, 4, Action::Transfer, ledger)
            .unwrap()
            .id;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save(&path, &state).unwrap();
        let mut restored = load(&path).unwrap();
        assert_eq!(restored, state);

        let (wallet, ledger) = restored.wallet_mut("vault").unwrap();
        assert_eq!(wallet.confirm(&admin, id, ledger).unwrap(), Execution::Executed);
        assert_eq!(restored.ledger.balance_of(&user), 4);
        assert!(matches!(
            restored.wallet_mut("missing"),
            Err(StoreError::UnknownWallet(_))
        ));
    }

    #[test]
    fn failed_save_leaves_no_temp_file_behind() {
        let deployment = DeploymentFile::parse(DEPLOY).unwrap().resolve().unwrap();
        let state = State::from_deployment(deployment).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::create_dir(&path).unwrap();

        assert!(matches!(save(&path, &state), Err(StoreError::Io { .. })));
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("state.json")]);

        fs::remove_dir(&path).unwrap();
        save(&path, &state).unwrap();
        assert_eq!(load(&path).unwrap(), state);
    }

    #[test]
    fn consumed_proposal_stays_executed_across_reload() {
        let solo = DEPLOY.replace("threshold = 2", "threshold = 1");
        let deployment = DeploymentFile::parse(&solo).unwrap().resolve().unwrap();
        let mut state = State::from_deployment(deployment).unwrap();
        let owner = Address::from([1u8; 20]);
        let user = Address::from([9u8; 20]);

        // The wallet holds nothing, so the forwarded transfer fails.
        let (wallet, ledger) = state.wallet_mut("vault").unwrap();
        let err = wallet
            .submit(&owner, user, 5, Action::Transfer, ledger)
            .unwrap_err();
        let id = match &err {
            MultisigError::ActionFailed {
                id,
                source: ActionError::Ledger(LedgerError::InsufficientAvailable { .. }),
            } => *id,
            other => panic!("unexpected error: {other}"),
        };
        assert!(should_persist(Err(&err)));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save(&path, &state).unwrap();
        let mut restored = load(&path).unwrap();

        let (wallet, ledger) = restored.wallet_mut("vault").unwrap();
        assert!(wallet.proposal(id).unwrap().executed);
        assert_eq!(wallet.execute(&owner, id, ledger).unwrap(), Execution::Skipped);
        assert_eq!(restored.ledger.balance_of(&user), 0);
    }

    #[test]
    fn only_state_changes_and_consumed_proposals_persist() {
        assert!(should_persist(Ok(true)));
        assert!(!should_persist(Ok(false)));
        let unknown = StoreError::UnknownWallet("missing".into());
        assert!(!should_persist(Err(&unknown)));
        let refused = MultisigError::NotFound(7);
        assert!(!should_persist(Err(&refused)));
    }
}
