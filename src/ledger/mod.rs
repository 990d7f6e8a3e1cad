use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::address::Address;

mod roles;
mod units;

pub use roles::{Role, Roles};
pub use units::{format_units, parse_units, unit_scale, UnitsError};

pub type Amount = u128;

pub const DEFAULT_DECIMALS: u32 = 18;
pub const MAX_DECIMALS: u32 = 38;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("{caller} is not the {role}")]
    Unauthorized { role: Role, caller: Address },
    #[error("{account} cannot spend {requested}: balance {balance}, reserve {reserve}")]
    InsufficientAvailable {
        account: Address,
        requested: Amount,
        balance: Amount,
        reserve: Amount,
    },
    #[error("{account} balance {balance} is below {requested}")]
    BalanceInsufficient {
        account: Address,
        requested: Amount,
        balance: Amount,
    },
    #[error("{spender} may spend {allowance} of {owner}'s funds, requested {requested}")]
    AllowanceExceeded {
        owner: Address,
        spender: Address,
        requested: Amount,
        allowance: Amount,
    },
    #[error("{account} reserve {reserve} is below {requested}")]
    ReserveInsufficient {
        account: Address,
        requested: Amount,
        reserve: Amount,
    },
    #[error("minting {requested} on supply {total_supply} breaches cap {mint_cap}")]
    MintCapExceeded {
        requested: Amount,
        total_supply: Amount,
        mint_cap: Amount,
    },
    #[error("invalid ledger configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountBalance {
    pub balance: Amount,
    pub reserve: Amount,
}

impl AccountBalance {
    /// What the holder may move: the part of the balance above the reserve floor.
    pub fn available(&self) -> Amount {
        self.balance.saturating_sub(self.reserve)
    }
}

/// Deployment-time parameters of a ledger instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenConfig {
    pub symbol: String,
    pub name: String,
    pub decimals: u32,
    pub roles: Roles,
    pub initial_supply: Amount,
    pub mint_cap: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    Transfer {
        from: Address,
        to: Address,
        amount: Amount,
        spender: Option<Address>,
    },
    Approval {
        owner: Address,
        spender: Address,
        amount: Amount,
    },
    ReserveSet {
        account: Address,
        amount: Amount,
    },
    Recall {
        account: Address,
        vault: Address,
        amount: Amount,
    },
    Mint {
        to: Address,
        amount: Amount,
    },
    RoleChanged {
        role: Role,
        previous: Address,
        holder: Address,
    },
}

/// A single ledger operation as submitted by `caller`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerCall {
    Transfer {
        to: Address,
        amount: Amount,
    },
    TransferFrom {
        from: Address,
        to: Address,
        amount: Amount,
    },
    Approve {
        spender: Address,
        amount: Amount,
    },
    SetReserve {
        account: Address,
        amount: Amount,
    },
    Recall {
        account: Address,
        amount: Amount,
    },
    Mint {
        to: Address,
        amount: Amount,
    },
    SetRole {
        role: Role,
        holder: Address,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub symbol: String,
    pub total_supply: Amount,
    pub mint_cap: Amount,
    pub roles: Roles,
    pub accounts: BTreeMap<Address, AccountBalance>,
    pub allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
    pub event_count: usize,
    #[serde(with = "crate::address::hex_digest")]
    pub state_root: [u8; 32],
}

/// Token ledger: balances, reserve floors, allowances and the capped supply.
///
/// Every operation validates completely before its first write, so an `Err`
/// always leaves the ledger exactly as it was.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ledger {
    symbol: String,
    name: String,
    decimals: u32,
    roles: Roles,
    total_supply: Amount,
    mint_cap: Amount,
    accounts: BTreeMap<Address, AccountBalance>,
    allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
    events: Vec<LedgerEvent>,
}

impl Ledger {
    /// Creates the ledger and credits the initial supply to the vault.
    pub fn new(config: TokenConfig) -> Result<Self, LedgerError> {
        if config.decimals > MAX_DECIMALS {
            return Err(LedgerError::InvalidConfig(format!(
                "decimals {} exceeds {MAX_DECIMALS}",
                config.decimals
            )));
        }
        if config.initial_supply > config.mint_cap {
            return Err(LedgerError::InvalidConfig(format!(
                "initial supply {} exceeds mint cap {}",
                config.initial_supply, config.mint_cap
            )));
        }
        let vault = config.roles.vault;
        let mut ledger = Ledger {
            symbol: config.symbol,
            name: config.name,
            decimals: config.decimals,
            roles: config.roles,
            total_supply: 0,
            mint_cap: config.mint_cap,
            accounts: BTreeMap::new(),
            allowances: BTreeMap::new(),
            events: Vec::new(),
        };
        if config.initial_supply > 0 {
            ledger.credit(&vault, config.initial_supply);
            ledger.total_supply = config.initial_supply;
            ledger.events.push(LedgerEvent::Mint {
                to: vault,
                amount: config.initial_supply,
            });
        }
        info!(
            symbol = %ledger.symbol,
            %vault,
            supply = ledger.total_supply,
            cap = ledger.mint_cap,
            "ledger created"
        );
        Ok(ledger)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Raw amount of one display unit.
    pub fn one_unit(&self) -> Amount {
        10u128.pow(self.decimals)
    }

    pub fn roles(&self) -> &Roles {
        &self.roles
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn mint_cap(&self) -> Amount {
        self.mint_cap
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.accounts.get(account).map_or(0, |a| a.balance)
    }

    pub fn reserve_of(&self, account: &Address) -> Amount {
        self.accounts.get(account).map_or(0, |a| a.reserve)
    }

    pub fn available_of(&self, account: &Address) -> Amount {
        self.accounts.get(account).map_or(0, AccountBalance::available)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|granted| granted.get(spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Sum of all balances; equals `total_supply` whenever the ledger is consistent.
    pub fn circulating(&self) -> Amount {
        self.accounts.values().map(|a| a.balance).sum()
    }

    pub fn apply(&mut self, caller: &Address, call: &LedgerCall) -> Result<(), LedgerError> {
        match call {
            LedgerCall::Transfer { to, amount } => self.transfer(caller, to, *amount),
            LedgerCall::TransferFrom { from, to, amount } => {
                self.transfer_from(caller, from, to, *amount)
            }
            LedgerCall::Approve { spender, amount } => {
                self.approve(caller, spender, *amount);
                Ok(())
            }
            LedgerCall::SetReserve { account, amount } => {
                self.set_reserve(caller, account, *amount)
            }
            LedgerCall::Recall { account, amount } => self.recall(caller, account, *amount),
            LedgerCall::Mint { to, amount } => self.mint(caller, to, *amount),
            LedgerCall::SetRole { role, holder } => self.set_role(caller, *role, *holder),
        }
    }

    /// Moves `amount` out of the caller's own account.
    pub fn transfer(
        &mut self,
        caller: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        self.ensure_spendable(caller, amount)?;
        self.move_funds(caller, to, amount);
        self.events.push(LedgerEvent::Transfer {
            from: *caller,
            to: *to,
            amount,
            spender: None,
        });
        info!(from = %caller, %to, amount, "transfer");
        Ok(())
    }

    /// Moves `amount` out of `from` on the authority of an allowance granted to `spender`.
    /// The reserve floor binds `from` exactly as in a direct transfer.
    pub fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let allowance = self.allowance(from, spender);
        if amount > allowance {
            warn!(owner = %from, %spender, amount, allowance, "allowance exceeded");
            return Err(LedgerError::AllowanceExceeded {
                owner: *from,
                spender: *spender,
                requested: amount,
                allowance,
            });
        }
        if amount == 0 {
            return Ok(());
        }
        self.ensure_spendable(from, amount)?;

        self.allowances
            .entry(*from)
            .or_default()
            .insert(*spender, allowance - amount);
        self.move_funds(from, to, amount);
        self.events.push(LedgerEvent::Transfer {
            from: *from,
            to: *to,
            amount,
            spender: Some(*spender),
        });
        info!(%from, %to, %spender, amount, "delegated transfer");
        Ok(())
    }

    /// Sets (never adds to) the allowance `owner` grants `spender`.
    pub fn approve(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        self.allowances
            .entry(*owner)
            .or_default()
            .insert(*spender, amount);
        self.events.push(LedgerEvent::Approval {
            owner: *owner,
            spender: *spender,
            amount,
        });
        debug!(%owner, %spender, amount, "approval");
    }

    /// Admin only. The floor may exceed the current balance; it then blocks every
    /// outgoing transfer until the balance rises above it.
    pub fn set_reserve(
        &mut self,
        caller: &Address,
        account: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.roles.require(Role::Admin, caller)?;
        self.accounts.entry(*account).or_default().reserve = amount;
        self.events.push(LedgerEvent::ReserveSet {
            account: *account,
            amount,
        });
        info!(%account, amount, "reserve set");
        Ok(())
    }

    /// Admin only. Claws reserved funds back to the vault, lowering balance and
    /// reserve of `account` together.
    pub fn recall(
        &mut self,
        caller: &Address,
        account: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.roles.require(Role::Admin, caller)?;
        let current = self.accounts.get(account).cloned().unwrap_or_default();
        if amount > current.reserve {
            return Err(LedgerError::ReserveInsufficient {
                account: *account,
                requested: amount,
                reserve: current.reserve,
            });
        }
        if amount > current.balance {
            return Err(LedgerError::BalanceInsufficient {
                account: *account,
                requested: amount,
                balance: current.balance,
            });
        }

        let vault = self.roles.vault;
        let entry = self.accounts.entry(*account).or_default();
        entry.balance -= amount;
        entry.reserve -= amount;
        self.credit(&vault, amount);
        self.events.push(LedgerEvent::Recall {
            account: *account,
            vault,
            amount,
        });
        info!(%account, %vault, amount, "recall");
        Ok(())
    }

    /// Minter only. Fails once the new supply would pass the cap.
    pub fn mint(
        &mut self,
        caller: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.roles.require(Role::Minter, caller)?;
        let new_supply = self
            .total_supply
            .checked_add(amount)
            .filter(|supply| *supply <= self.mint_cap)
            .ok_or(LedgerError::MintCapExceeded {
                requested: amount,
                total_supply: self.total_supply,
                mint_cap: self.mint_cap,
            })?;
        self.total_supply = new_supply;
        self.credit(to, amount);
        self.events.push(LedgerEvent::Mint { to: *to, amount });
        info!(%to, amount, supply = new_supply, "mint");
        Ok(())
    }

    /// Owner only. Repoints the vault, e.g. to a multisig wallet.
    pub fn set_vault(&mut self, caller: &Address, vault: Address) -> Result<(), LedgerError> {
        self.set_role(caller, Role::Vault, vault)
    }

    pub fn set_minter(&mut self, caller: &Address, minter: Address) -> Result<(), LedgerError> {
        self.set_role(caller, Role::Minter, minter)
    }

    pub fn set_admin(&mut self, caller: &Address, admin: Address) -> Result<(), LedgerError> {
        self.set_role(caller, Role::Admin, admin)
    }

    pub fn transfer_ownership(
        &mut self,
        caller: &Address,
        owner: Address,
    ) -> Result<(), LedgerError> {
        self.set_role(caller, Role::Owner, owner)
    }

    /// Owner only. Moves a role to a new holder; balances are not touched.
    pub fn set_role(
        &mut self,
        caller: &Address,
        role: Role,
        holder: Address,
    ) -> Result<(), LedgerError> {
        self.roles.require(Role::Owner, caller)?;
        let previous = self.roles.holder(role);
        self.roles.assign(role, holder);
        self.events.push(LedgerEvent::RoleChanged {
            role,
            previous,
            holder,
        });
        info!(%role, %previous, %holder, "role changed");
        Ok(())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            symbol: self.symbol.clone(),
            total_supply: self.total_supply,
            mint_cap: self.mint_cap,
            roles: self.roles.clone(),
            accounts: self.accounts.clone(),
            allowances: self.allowances.clone(),
            event_count: self.events.len(),
            state_root: compute_state_root(self.total_supply, &self.accounts, &self.allowances),
        }
    }

    fn ensure_spendable(&self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let current = self.accounts.get(account).cloned().unwrap_or_default();
        if amount > current.available() {
            warn!(%account, amount, balance = current.balance, reserve = current.reserve, "spend blocked");
            return Err(LedgerError::InsufficientAvailable {
                account: *account,
                requested: amount,
                balance: current.balance,
                reserve: current.reserve,
            });
        }
        Ok(())
    }

    fn credit(&mut self, account: &Address, amount: Amount) {
        self.accounts.entry(*account).or_default().balance += amount;
    }

    // Callers have already checked `from` against its available balance.
    fn move_funds(&mut self, from: &Address, to: &Address, amount: Amount) {
        self.accounts.entry(*from).or_default().balance -= amount;
        self.credit(to, amount);
    }
}

fn compute_state_root(
    total_supply: Amount,
    accounts: &BTreeMap<Address, AccountBalance>,
    allowances: &BTreeMap<Address, BTreeMap<Address, Amount>>,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    let mut hasher = Sha256::new();
    hasher.update(b"supply");
    hasher.update(total_supply.to_le_bytes());
    leaves.push(hasher.finalize().into());
    for (account, balance) in accounts {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_bytes());
        hasher.update(balance.balance.to_le_bytes());
        hasher.update(balance.reserve.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (owner, granted) in allowances {
        for (spender, amount) in granted {
            let mut hasher = Sha256::new();
            hasher.update(b"allow");
            hasher.update(owner.as_bytes());
            hasher.update(spender.as_bytes());
            hasher.update(amount.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"plx-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
