//! Developer CLI for pairkit pairing storage.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use eyre::{eyre, WrapErr};
use pairkit_core::{AccountKey, FileStore, PairingStorage, PersonalizedNameStore, StorageConfig};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pairkit", version)]
#[command(about = "Inspect and reset pairing storage", long_about = None)]
struct Cli {
    /// Storage directory. Defaults to `<data_dir>/pairkit`.
    #[arg(long, env = "PAIRKIT_ROOT", global = true)]
    root: Option<PathBuf>,

    /// Number of account key slots.
    #[arg(long, env = "PAIRKIT_MAX_ACCOUNT_KEYS", global = true)]
    max_account_keys: Option<usize>,

    /// Run without the personalized name module.
    #[arg(long, global = true)]
    no_personalized_name: bool,

    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show stored data and reset state
    Status,

    /// Manage account keys
    AccountKey {
        #[command(subcommand)]
        command: AccountKeyCommand,
    },

    /// Manage the personalized name
    Name {
        #[command(subcommand)]
        command: NameCommand,
    },

    /// Delete all pairing data
    FactoryReset,
}

#[derive(Subcommand)]
enum AccountKeyCommand {
    /// Store a 16-byte key given as hex
    Add {
        /// Key bytes, hex encoded (32 characters)
        key: String,
    },

    /// List stored keys, oldest first
    List,
}

#[derive(Subcommand)]
enum NameCommand {
    /// Store the personalized name (empty deletes it)
    Set {
        /// The new name
        name: String,
    },

    /// Print the personalized name
    Get,
}

#[derive(Serialize)]
struct StatusOutput {
    root: String,
    account_keys: usize,
    max_account_keys: usize,
    personalized_name: Option<String>,
    reset_in_progress: bool,
    modules: Vec<String>,
    records_loaded: usize,
    records_rejected: usize,
    resumed_reset: bool,
}

#[derive(Serialize)]
struct AddedKey {
    slot: usize,
}

#[derive(Serialize)]
struct KeyList {
    account_keys: Vec<String>,
}

#[derive(Serialize)]
struct Name {
    personalized_name: String,
}

#[derive(Serialize)]
struct ResetDone {
    factory_reset: bool,
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let stdout = std::io::stdout();
    run(cli, &mut stdout.lock())
}

fn init_tracing(verbose: u8) -> eyre::Result<()> {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .wrap_err("failed to install tracing subscriber")?;
    // pairkit-core logs through the `log` facade.
    tracing_log::LogTracer::init().wrap_err("failed to bridge log records")?;
    Ok(())
}

fn run(cli: Cli, out: &mut impl Write) -> eyre::Result<()> {
    let root = match cli.root {
        Some(root) => root,
        None => default_root()?,
    };
    let mut config = StorageConfig::default();
    if let Some(max) = cli.max_account_keys {
        config.max_account_keys = max;
    }
    config.personalized_name = !cli.no_personalized_name;

    let store = FileStore::open(&root)
        .wrap_err_with(|| format!("failed to open storage at {}", root.display()))?;
    let storage = PairingStorage::boot(Arc::new(store), config).wrap_err("boot failed")?;
    let report = storage.boot_report();
    if report.resumed_reset {
        tracing::warn!("finished an interrupted factory reset");
    }

    match cli.command {
        Command::Status => {
            let status = StatusOutput {
                root: root.display().to_string(),
                account_keys: storage.account_keys().count(),
                max_account_keys: storage.account_keys().max_slots(),
                personalized_name: storage.personalized_name().map(PersonalizedNameStore::get),
                reset_in_progress: storage.reset_in_progress(),
                modules: storage.modules().into_iter().map(str::to_string).collect(),
                records_loaded: report.records_loaded,
                records_rejected: report.records_rejected,
                resumed_reset: report.resumed_reset,
            };
            emit(out, cli.json, &status, |out| {
                writeln!(out, "root:              {}", status.root)?;
                writeln!(
                    out,
                    "account keys:      {}/{}",
                    status.account_keys, status.max_account_keys
                )?;
                match &status.personalized_name {
                    Some(name) => writeln!(out, "personalized name: {name:?}")?,
                    None => writeln!(out, "personalized name: disabled")?,
                }
                writeln!(out, "reset in progress: {}", status.reset_in_progress)?;
                writeln!(out, "modules:           {}", status.modules.join(", "))?;
                writeln!(
                    out,
                    "boot:              {} loaded, {} rejected{}",
                    status.records_loaded,
                    status.records_rejected,
                    if status.resumed_reset { ", resumed reset" } else { "" }
                )
            })
        }
        Command::AccountKey { command } => match command {
            AccountKeyCommand::Add { key } => {
                let key = parse_account_key(&key)?;
                let slot = storage
                    .account_keys()
                    .save(&key)
                    .wrap_err("failed to save account key")?;
                emit(out, cli.json, &AddedKey { slot }, |out| {
                    writeln!(out, "stored in slot {slot}")
                })
            }
            AccountKeyCommand::List => {
                let list = KeyList {
                    account_keys: storage
                        .account_keys()
                        .get()
                        .iter()
                        .map(|key| hex::encode(key.as_bytes()))
                        .collect(),
                };
                emit(out, cli.json, &list, |out| {
                    for key in &list.account_keys {
                        writeln!(out, "{key}")?;
                    }
                    Ok(())
                })
            }
        },
        Command::Name { command } => {
            let names = storage
                .personalized_name()
                .ok_or_else(|| eyre!("personalized name support is disabled"))?;
            match command {
                NameCommand::Set { name } => {
                    names
                        .save(&name)
                        .wrap_err("failed to save personalized name")?;
                    let name = Name {
                        personalized_name: names.get(),
                    };
                    emit(out, cli.json, &name, |out| {
                        writeln!(out, "{}", name.personalized_name)
                    })
                }
                NameCommand::Get => {
                    let name = Name {
                        personalized_name: names.get(),
                    };
                    emit(out, cli.json, &name, |out| {
                        writeln!(out, "{}", name.personalized_name)
                    })
                }
            }
        }
        Command::FactoryReset => {
            storage
                .factory_reset()
                .wrap_err("factory reset failed, it resumes on the next run")?;
            emit(out, cli.json, &ResetDone { factory_reset: true }, |out| {
                writeln!(out, "factory reset complete")
            })
        }
    }
}

fn emit<W: Write, T: Serialize>(
    out: &mut W,
    json: bool,
    value: &T,
    text: impl FnOnce(&mut W) -> std::io::Result<()>,
) -> eyre::Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, value)?;
        writeln!(out)?;
    } else {
        text(out)?;
    }
    Ok(())
}

fn default_root() -> eyre::Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("pairkit"))
        .ok_or_else(|| eyre!("no data directory on this platform, pass --root"))
}

fn parse_account_key(input: &str) -> eyre::Result<AccountKey> {
    let bytes = hex::decode(input.trim().trim_start_matches("0x"))
        .wrap_err("account key is not valid hex")?;
    Ok(AccountKey::from_slice(&bytes)?)
}
