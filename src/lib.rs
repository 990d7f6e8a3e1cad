//! PLX token ledger with multisig custody.
//!
//! * [`ledger`]: balances, admin-set reserve floors, allowances and a capped
//!   mint, guarded by the owner/admin/vault/minter roles.
//! * [`multisig`]: M-of-N wallets whose proposals execute at most once, as
//!   soon as enough owners confirm them.
//! * [`config`]: TOML deployment parameters.
//! * [`store`]: the JSON state file the `plx` binary operates on.

pub mod address;
pub mod config;
pub mod ledger;
pub mod multisig;
pub mod store;

pub use address::Address;
pub use ledger::{Amount, Ledger, LedgerError};
pub use multisig::{Action, MultisigError, Wallet};
