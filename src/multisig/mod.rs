use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::ledger::{Amount, Ledger, LedgerCall};

mod forward;

pub use forward::{ActionError, Forwarder};

pub type ProposalId = u64;

pub const MAX_OWNERS: usize = 50;

/// Domain tag for wallet addresses derived from a label.
pub const WALLET_ADDRESS_DOMAIN: &[u8] = b"plx-wallet";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultisigError {
    #[error("{0} is not a wallet owner")]
    Unauthorized(Address),
    #[error("proposal {0} does not exist")]
    NotFound(ProposalId),
    #[error("proposal {0} was already executed")]
    AlreadyExecuted(ProposalId),
    #[error("{owner} already confirmed proposal {id}")]
    AlreadyConfirmed { id: ProposalId, owner: Address },
    #[error("{owner} has not confirmed proposal {id}")]
    NotConfirmed { id: ProposalId, owner: Address },
    #[error("{kind:?} wallet cannot carry {action} actions")]
    UnsupportedAction { kind: WalletKind, action: &'static str },
    #[error("invalid wallet configuration: {0}")]
    InvalidConfig(String),
    #[error("proposal {id} was consumed but its action failed: {source}")]
    ActionFailed { id: ProposalId, source: ActionError },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    #[default]
    Standard,
    /// May also forward mint calls to the ledger.
    Minting,
}

impl WalletKind {
    pub fn permits(&self, action: &Action) -> bool {
        !matches!((self, action), (WalletKind::Standard, Action::Mint))
    }
}

/// What a proposal does once it reaches quorum.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Send `value` tokens from the wallet's ledger account to the destination.
    Transfer,
    /// Mint `value` tokens to the destination, with the wallet as minter.
    Mint,
    /// Opaque call to an external target.
    Call {
        #[serde(with = "crate::address::hex_bytes")]
        payload: Vec<u8>,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Transfer => "transfer",
            Action::Mint => "mint",
            Action::Call { .. } => "call",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proposal {
    pub id: ProposalId,
    pub destination: Address,
    pub value: Amount,
    pub action: Action,
    pub executed: bool,
    pub confirmations: BTreeSet<Address>,
}

impl Proposal {
    pub fn digest(&self) -> [u8; 32] {
        action_digest(&self.destination, self.value, &self.action)
    }

    pub fn is_pending(&self) -> bool {
        !self.executed
    }
}

fn action_digest(destination: &Address, value: Amount, action: &Action) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(destination.as_bytes());
    hasher.update(value.to_le_bytes());
    hasher.update(action.name().as_bytes());
    if let Action::Call { payload } = action {
        hasher.update((payload.len() as u64).to_le_bytes());
        hasher.update(payload);
    }
    hasher.finalize().into()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WalletEvent {
    Submission {
        id: ProposalId,
        #[serde(with = "crate::address::hex_digest")]
        digest: [u8; 32],
    },
    Confirmation {
        id: ProposalId,
        owner: Address,
    },
    Revocation {
        id: ProposalId,
        owner: Address,
    },
    Execution {
        id: ProposalId,
    },
    ExecutionFailure {
        id: ProposalId,
        reason: String,
    },
}

/// Where a proposal stands after a confirmation change or an execute attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Execution {
    Pending { confirmations: usize, threshold: usize },
    Executed,
    /// The proposal had already been executed; nothing was forwarded.
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Submission {
    pub id: ProposalId,
    pub execution: Execution,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletConfig {
    pub label: String,
    pub address: Option<Address>,
    pub owners: Vec<Address>,
    pub threshold: usize,
    pub kind: WalletKind,
}

/// M-of-N wallet. Proposals move from pending to executed exactly once, the
/// moment a confirmation brings them to the threshold.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    label: String,
    address: Address,
    kind: WalletKind,
    owners: Vec<Address>,
    threshold: usize,
    proposals: Vec<Proposal>,
    events: Vec<WalletEvent>,
}

impl Wallet {
    pub fn new(config: WalletConfig) -> Result<Self, MultisigError> {
        let WalletConfig {
            label,
            address,
            owners,
            threshold,
            kind,
        } = config;
        if owners.is_empty() {
            return Err(MultisigError::InvalidConfig("owner set is empty".into()));
        }
        if owners.len() > MAX_OWNERS {
            return Err(MultisigError::InvalidConfig(format!(
                "{} owners exceeds the maximum of {MAX_OWNERS}",
                owners.len()
            )));
        }
        let mut seen = BTreeSet::new();
        for owner in &owners {
            if !seen.insert(*owner) {
                return Err(MultisigError::InvalidConfig(format!(
                    "duplicate owner {owner}"
                )));
            }
        }
        if threshold == 0 || threshold > owners.len() {
            return Err(MultisigError::InvalidConfig(format!(
                "threshold {threshold} outside 1..={}",
                owners.len()
            )));
        }
        let address =
            address.unwrap_or_else(|| Address::derive(WALLET_ADDRESS_DOMAIN, label.as_bytes()));
        info!(%label, %address, owners = owners.len(), threshold, ?kind, "wallet created");
        Ok(Wallet {
            label,
            address,
            kind,
            owners,
            threshold,
            proposals: Vec::new(),
            events: Vec::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The wallet's own account on the ledger.
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn kind(&self) -> WalletKind {
        self.kind
    }

    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_owner(&self, who: &Address) -> bool {
        self.owners.contains(who)
    }

    pub fn events(&self) -> &[WalletEvent] {
        &self.events
    }

    pub fn proposal(&self, id: ProposalId) -> Option<&Proposal> {
        self.proposals.get(usize::try_from(id).ok()?)
    }

    pub fn confirmations(&self, id: ProposalId) -> Result<Vec<Address>, MultisigError> {
        let proposal = self.proposal(id).ok_or(MultisigError::NotFound(id))?;
        Ok(proposal.confirmations.iter().copied().collect())
    }

    pub fn confirmation_count(&self, id: ProposalId) -> Result<usize, MultisigError> {
        let proposal = self.proposal(id).ok_or(MultisigError::NotFound(id))?;
        Ok(proposal.confirmations.len())
    }

    pub fn is_confirmed(&self, id: ProposalId) -> Result<bool, MultisigError> {
        Ok(self.confirmation_count(id)? >= self.threshold)
    }

    pub fn proposal_ids(&self, pending: bool, executed: bool) -> Vec<ProposalId> {
        self.proposals
            .iter()
            .filter(|p| (pending && !p.executed) || (executed && p.executed))
            .map(|p| p.id)
            .collect()
    }

    pub fn proposal_count(&self, pending: bool, executed: bool) -> usize {
        self.proposal_ids(pending, executed).len()
    }

    /// Records a new proposal with the submitter's confirmation and executes it
    /// at once if that alone meets the threshold.
    ///
    /// An identical pending proposal is never duplicated: its confirmer gets
    /// `AlreadyConfirmed`, any other owner's submission confirms it instead.
    pub fn submit(
        &mut self,
        caller: &Address,
        destination: Address,
        value: Amount,
        action: Action,
        forwarder: &mut dyn Forwarder,
    ) -> Result<Submission, MultisigError> {
        self.require_owner(caller)?;
        if !self.kind.permits(&action) {
            return Err(MultisigError::UnsupportedAction {
                kind: self.kind,
                action: action.name(),
            });
        }

        let digest = action_digest(&destination, value, &action);
        if let Some(id) = self
            .proposals
            .iter()
            .find(|p| p.is_pending() && p.digest() == digest)
            .map(|p| p.id)
        {
            debug!(wallet = %self.label, id, "submission matches pending proposal");
            let execution = self.confirm(caller, id, forwarder)?;
            return Ok(Submission { id, execution });
        }

        let id = self.proposals.len() as ProposalId;
        self.proposals.push(Proposal {
            id,
            destination,
            value,
            action,
            executed: false,
            confirmations: BTreeSet::from([*caller]),
        });
        self.events.push(WalletEvent::Submission { id, digest });
        self.events.push(WalletEvent::Confirmation { id, owner: *caller });
        info!(wallet = %self.label, id, submitter = %caller, %destination, value, "proposal submitted");

        let execution = self.try_execute(id, forwarder)?;
        Ok(Submission { id, execution })
    }

    pub fn confirm(
        &mut self,
        caller: &Address,
        id: ProposalId,
        forwarder: &mut dyn Forwarder,
    ) -> Result<Execution, MultisigError> {
        self.require_owner(caller)?;
        let proposal = self.pending_mut(id)?;
        if !proposal.confirmations.insert(*caller) {
            return Err(MultisigError::AlreadyConfirmed { id, owner: *caller });
        }
        self.events.push(WalletEvent::Confirmation { id, owner: *caller });
        debug!(wallet = %self.label, id, owner = %caller, "confirmation added");
        self.try_execute(id, forwarder)
    }

    /// Withdraws the caller's confirmation from a pending proposal.
    pub fn revoke(&mut self, caller: &Address, id: ProposalId) -> Result<usize, MultisigError> {
        self.require_owner(caller)?;
        let proposal = self.pending_mut(id)?;
        if !proposal.confirmations.remove(caller) {
            return Err(MultisigError::NotConfirmed { id, owner: *caller });
        }
        let remaining = proposal.confirmations.len();
        self.events.push(WalletEvent::Revocation { id, owner: *caller });
        debug!(wallet = %self.label, id, owner = %caller, remaining, "confirmation revoked");
        Ok(remaining)
    }

    /// Re-triggers execution of a proposal that already holds enough confirmations.
    pub fn execute(
        &mut self,
        caller: &Address,
        id: ProposalId,
        forwarder: &mut dyn Forwarder,
    ) -> Result<Execution, MultisigError> {
        self.require_owner(caller)?;
        if self.proposal(id).is_none() {
            return Err(MultisigError::NotFound(id));
        }
        self.try_execute(id, forwarder)
    }

    // The executed flag is set before the forwarder runs and stays set if the
    // forwarded action fails: each proposal is attempted at most once.
    fn try_execute(
        &mut self,
        id: ProposalId,
        forwarder: &mut dyn Forwarder,
    ) -> Result<Execution, MultisigError> {
        let threshold = self.threshold;
        let origin = self.address;
        let index = usize::try_from(id).map_err(|_| MultisigError::NotFound(id))?;
        let proposal = self
            .proposals
            .get_mut(index)
            .ok_or(MultisigError::NotFound(id))?;
        if proposal.executed {
            return Ok(Execution::Skipped);
        }
        let confirmations = proposal.confirmations.len();
        if confirmations < threshold {
            return Ok(Execution::Pending {
                confirmations,
                threshold,
            });
        }

        proposal.executed = true;
        let destination = proposal.destination;
        let value = proposal.value;
        let action = proposal.action.clone();

        match forwarder.forward(&origin, &destination, value, &action) {
            Ok(()) => {
                self.events.push(WalletEvent::Execution { id });
                info!(wallet = %self.label, id, action = action.name(), %destination, value, "proposal executed");
                Ok(Execution::Executed)
            }
            Err(source) => {
                self.events.push(WalletEvent::ExecutionFailure {
                    id,
                    reason: source.to_string(),
                });
                warn!(wallet = %self.label, id, error = %source, "proposal consumed, action failed");
                Err(MultisigError::ActionFailed { id, source })
            }
        }
    }

    fn require_owner(&self, caller: &Address) -> Result<(), MultisigError> {
        if self.is_owner(caller) {
            return Ok(());
        }
        warn!(wallet = %self.label, %caller, "caller is not an owner");
        Err(MultisigError::Unauthorized(*caller))
    }

    fn pending_mut(&mut self, id: ProposalId) -> Result<&mut Proposal, MultisigError> {
        let proposal = usize::try_from(id)
            .ok()
            .and_then(|index| self.proposals.get_mut(index))
            .ok_or(MultisigError::NotFound(id))?;
        if proposal.executed {
            return Err(MultisigError::AlreadyExecuted(id));
        }
        Ok(proposal)
    }
}

impl Forwarder for Ledger {
    fn forward(
        &mut self,
        origin: &Address,
        destination: &Address,
        value: Amount,
        action: &Action,
    ) -> Result<(), ActionError> {
        let call = match action {
            Action::Transfer => LedgerCall::Transfer {
                to: *destination,
                amount: value,
            },
            Action::Mint => LedgerCall::Mint {
                to: *destination,
                amount: value,
            },
            Action::Call { .. } => {
                return Err(ActionError::Rejected(format!(
                    "ledger {} accepts no opaque calls",
                    self.symbol()
                )))
            }
        };
        Ok(self.apply(origin, &call)?)
    }
}
