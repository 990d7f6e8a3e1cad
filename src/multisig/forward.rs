use crate::address::Address;
use crate::ledger::{Amount, LedgerError};

use super::Action;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("call rejected: {0}")]
    Rejected(String),
}

/// Target of a proposal that reached quorum. `origin` is the wallet's own address,
/// acting as the caller of the forwarded operation.
pub trait Forwarder {
    fn forward(
        &mut self,
        origin: &Address,
        destination: &Address,
        value: Amount,
        action: &Action,
    ) -> Result<(), ActionError>;
}
