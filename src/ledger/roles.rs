use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::LedgerError;
use crate::address::Address;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Vault,
    Minter,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Vault => "vault",
            Role::Minter => "minter",
        };
        f.pad(name)
    }
}

/// Privileged addresses held by a ledger. One address may hold several roles;
/// each role only grants its own operations.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Roles {
    pub owner: Address,
    pub admin: Address,
    pub vault: Address,
    pub minter: Address,
}

impl Roles {
    pub fn holder(&self, role: Role) -> Address {
        match role {
            Role::Owner => self.owner,
            Role::Admin => self.admin,
            Role::Vault => self.vault,
            Role::Minter => self.minter,
        }
    }

    pub fn require(&self, role: Role, caller: &Address) -> Result<(), LedgerError> {
        if self.holder(role) == *caller {
            return Ok(());
        }
        warn!(%role, %caller, "caller does not hold required role");
        Err(LedgerError::Unauthorized {
            role,
            caller: *caller,
        })
    }

    pub(super) fn assign(&mut self, role: Role, holder: Address) {
        match role {
            Role::Owner => self.owner = holder,
            Role::Admin => self.admin = holder,
            Role::Vault => self.vault = holder,
            Role::Minter => self.minter = holder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_holder_passes_each_role_check() {
        let a = Address::from([1u8; 20]);
        let b = Address::from([2u8; 20]);
        let roles = Roles {
            owner: a,
            admin: a,
            vault: b,
            minter: a,
        };
        assert!(roles.require(Role::Owner, &a).is_ok());
        assert!(roles.require(Role::Admin, &a).is_ok());
        assert_eq!(
            roles.require(Role::Vault, &a),
            Err(LedgerError::Unauthorized {
                role: Role::Vault,
                caller: a
            })
        );
    }
}
