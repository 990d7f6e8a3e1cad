use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use plx_ledger::{
    config::DeploymentFile,
    ledger::{format_units, parse_units, Role},
    multisig::{Execution, ProposalId},
    store::{self, State},
    Action, Address, Amount,
};

#[derive(Parser)]
#[command(name = "plx", version, about = "PLX ledger and multisig wallets")]
struct Cli {
    /// State file the command reads and updates.
    #[arg(long, global = true, default_value = "plx-state.json")]
    state: PathBuf,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh state file from a TOML deployment file.
    Init {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Balance, reserve and spendable amount of an account.
    Balance { account: Address },
    /// Total supply, mint cap and role holders.
    Supply,
    Transfer {
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: String,
    },
    TransferFrom {
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        from: Address,
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: String,
    },
    Approve {
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        spender: Address,
        #[arg(long)]
        amount: String,
    },
    Allowance { owner: Address, spender: Address },
    SetReserve {
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        account: Address,
        #[arg(long)]
        amount: String,
    },
    Recall {
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        account: Address,
        #[arg(long)]
        amount: String,
    },
    Mint {
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: String,
    },
    SetVault {
        #[arg(long)]
        caller: Address,
        vault: Address,
    },
    SetMinter {
        #[arg(long)]
        caller: Address,
        minter: Address,
    },
    /// Propose a wallet action; counts as the submitter's confirmation.
    Submit {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        destination: Address,
        #[arg(long, default_value = "0")]
        value: String,
        #[arg(long, value_enum, default_value_t = ActionKind::Transfer)]
        action: ActionKind,
        /// Hex payload for `--action call`.
        #[arg(long)]
        payload: Option<String>,
    },
    Confirm {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        caller: Address,
        id: ProposalId,
    },
    Revoke {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        caller: Address,
        id: ProposalId,
    },
    Execute {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        caller: Address,
        id: ProposalId,
    },
    /// Show a proposal, or the wallet summary when no id is given.
    Proposal {
        #[arg(long)]
        wallet: String,
        id: Option<ProposalId>,
    },
    /// Print the ledger snapshot with its state root.
    Snapshot,
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionKind {
    Transfer,
    Mint,
    Call,
}

fn amount(state: &State, value: &str) -> Result<Amount> {
    parse_units(value, state.ledger.decimals())
        .with_context(|| format!("invalid amount {value:?}"))
}

fn show(state: &State, raw: Amount) -> String {
    format!(
        "{} {}",
        format_units(raw, state.ledger.decimals()),
        state.ledger.symbol()
    )
}

fn report(execution: Execution) {
    match execution {
        Execution::Pending {
            confirmations,
            threshold,
        } => println!("pending: {confirmations}/{threshold} confirmations"),
        Execution::Executed => println!("executed"),
        Execution::Skipped => println!("already executed; nothing forwarded"),
    }
}

fn init_cmd(state_path: &Path, config: &Path, force: bool) -> Result<()> {
    if state_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            state_path.display()
        );
    }
    let deployment = DeploymentFile::load(config)?.resolve()?;
    let state = State::from_deployment(deployment)?;
    store::save(state_path, &state)?;
    println!(
        "{} deployed: supply {} / cap {}",
        state.ledger.name(),
        show(&state, state.ledger.total_supply()),
        show(&state, state.ledger.mint_cap())
    );
    for wallet in state.wallets.values() {
        println!(
            "  wallet {:?} at {} ({}-of-{}, {:?})",
            wallet.label(),
            wallet.address(),
            wallet.threshold(),
            wallet.owners().len(),
            wallet.kind()
        );
    }
    println!("state → {}", state_path.display());
    Ok(())
}

/// Runs one command against the loaded state. Returns whether the state changed.
fn run(state: &mut State, command: Command) -> Result<bool> {
    match command {
        Command::Init { .. } => bail!("init runs before any state is loaded"),
        Command::Balance { account } => {
            let ledger = &state.ledger;
            println!("balance   {}", show(state, ledger.balance_of(&account)));
            println!("reserve   {}", show(state, ledger.reserve_of(&account)));
            println!("available {}", show(state, ledger.available_of(&account)));
            Ok(false)
        }
        Command::Supply => {
            let ledger = &state.ledger;
            let roles = ledger.roles();
            println!("total supply {}", show(state, ledger.total_supply()));
            println!("mint cap     {}", show(state, ledger.mint_cap()));
            println!("one unit     {}", ledger.one_unit());
            for role in [Role::Owner, Role::Admin, Role::Vault, Role::Minter] {
                println!("{role:<12} {}", roles.holder(role));
            }
            Ok(false)
        }
        Command::Allowance { owner, spender } => {
            println!("{}", show(state, state.ledger.allowance(&owner, &spender)));
            Ok(false)
        }
        Command::Transfer { caller, to, amount: value } => {
            let raw = amount(state, &value)?;
            state.ledger.transfer(&caller, &to, raw)?;
            println!("sent {} {caller} → {to}", show(state, raw));
            Ok(true)
        }
        Command::TransferFrom {
            caller,
            from,
            to,
            amount: value,
        } => {
            let raw = amount(state, &value)?;
            state.ledger.transfer_from(&caller, &from, &to, raw)?;
            println!("sent {} {from} → {to} (spender {caller})", show(state, raw));
            Ok(true)
        }
        Command::Approve {
            caller,
            spender,
            amount: value,
        } => {
            let raw = amount(state, &value)?;
            state.ledger.approve(&caller, &spender, raw);
            println!("{spender} may spend {} of {caller}", show(state, raw));
            Ok(true)
        }
        Command::SetReserve {
            caller,
            account,
            amount: value,
        } => {
            let raw = amount(state, &value)?;
            state.ledger.set_reserve(&caller, &account, raw)?;
            println!("reserve of {account} = {}", show(state, raw));
            Ok(true)
        }
        Command::Recall {
            caller,
            account,
            amount: value,
        } => {
            let raw = amount(state, &value)?;
            state.ledger.recall(&caller, &account, raw)?;
            println!("recalled {} from {account}", show(state, raw));
            Ok(true)
        }
        Command::Mint {
            caller,
            to,
            amount: value,
        } => {
            let raw = amount(state, &value)?;
            state.ledger.mint(&caller, &to, raw)?;
            println!(
                "minted {} to {to}; supply {}",
                show(state, raw),
                show(state, state.ledger.total_supply())
            );
            Ok(true)
        }
        Command::SetVault { caller, vault } => {
            state.ledger.set_vault(&caller, vault)?;
            println!("vault → {vault}");
            Ok(true)
        }
        Command::SetMinter { caller, minter } => {
            state.ledger.set_minter(&caller, minter)?;
            println!("minter → {minter}");
            Ok(true)
        }
        Command::Submit {
            wallet,
            caller,
            destination,
            value,
            action,
            payload,
        } => {
            let raw = amount(state, &value)?;
            let action = match (action, payload) {
                (ActionKind::Transfer, None) => Action::Transfer,
                (ActionKind::Mint, None) => Action::Mint,
                (ActionKind::Call, Some(hex_payload)) => Action::Call {
                    payload: hex::decode(hex_payload.trim_start_matches("0x"))
                        .context("invalid --payload hex")?,
                },
                (ActionKind::Call, None) => bail!("--action call needs --payload"),
                (_, Some(_)) => bail!("--payload only applies to --action call"),
            };
            let (wallet, ledger) = state.wallet_mut(&wallet)?;
            let submission = wallet.submit(&caller, destination, raw, action, ledger)?;
            println!("proposal {}", submission.id);
            report(submission.execution);
            Ok(true)
        }
        Command::Confirm { wallet, caller, id } => {
            let (wallet, ledger) = state.wallet_mut(&wallet)?;
            report(wallet.confirm(&caller, id, ledger)?);
            Ok(true)
        }
        Command::Revoke { wallet, caller, id } => {
            let (wallet, _) = state.wallet_mut(&wallet)?;
            let remaining = wallet.revoke(&caller, id)?;
            println!("revoked; {remaining}/{} confirmations", wallet.threshold());
            Ok(true)
        }
        Command::Execute { wallet, caller, id } => {
            let (wallet, ledger) = state.wallet_mut(&wallet)?;
            report(wallet.execute(&caller, id, ledger)?);
            Ok(true)
        }
        Command::Proposal { wallet, id } => {
            let wallet = state.wallet(&wallet)?;
            match id {
                Some(id) => {
                    let proposal = wallet
                        .proposal(id)
                        .with_context(|| format!("proposal {id} does not exist"))?;
                    println!("{}", serde_json::to_string_pretty(proposal)?);
                }
                None => {
                    println!(
                        "{:?} at {}: {}-of-{}",
                        wallet.label(),
                        wallet.address(),
                        wallet.threshold(),
                        wallet.owners().len()
                    );
                    for owner in wallet.owners() {
                        println!("  owner {owner}");
                    }
                    println!("  pending  {:?}", wallet.proposal_ids(true, false));
                    println!("  executed {:?}", wallet.proposal_ids(false, true));
                }
            }
            Ok(false)
        }
        Command::Snapshot => {
            let snapshot = state.ledger.snapshot();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(false)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Command::Init { config, force } = &cli.command {
        return init_cmd(&cli.state, config, *force);
    }

    let mut state = store::load(&cli.state)
        .with_context(|| format!("loading {}", cli.state.display()))?;
    let result = run(&mut state, cli.command);
    let persist = match &result {
        Ok(changed) => store::should_persist(Ok(*changed)),
        Err(err) => {
            let err: &(dyn std::error::Error + 'static) = err.as_ref();
            store::should_persist(Err(err))
        }
    };
    if persist {
        store::save(&cli.state, &state)?;
    }
    result.map(|_| ())
}
