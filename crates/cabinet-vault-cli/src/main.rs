use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use cabinet_vault_core::config::{self, VaultConfig};
use cabinet_vault_core::{EncryptionKey, Vault, VaultError};
use cabinet_vault_store_sqlite::SqliteGateway;
use chrono::NaiveTime;
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "cabinet-vault")]
#[command(version, about = "Encrypted backup and restore for the practice database")]
struct Cli {
    /// SQLite database path (overrides CABINET_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory holding backup artifacts (overrides CABINET_BACKUP_DIR)
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
    /// Replace the whole database with the contents of an artifact
    Restore(ArtifactArgs),
    /// Decrypt an artifact and print its record counts
    Inspect(ArtifactArgs),
    Key {
        #[command(subcommand)]
        command: KeyCommand,
    },
}

#[derive(Debug, Subcommand)]
enum BackupCommand {
    /// Write today's artifact now
    Run,
    /// Back up once a day until interrupted
    Schedule(ScheduleArgs),
}

#[derive(Debug, Args)]
struct ScheduleArgs {
    /// Local time of day, HH:MM (overrides CABINET_BACKUP_TIME)
    #[arg(long)]
    at: Option<String>,
}

#[derive(Debug, Args)]
struct ArtifactArgs {
    artifact: PathBuf,
}

#[derive(Debug, Subcommand)]
enum KeyCommand {
    /// Print a fresh random key for ENCRYPTION_KEY
    Generate,
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<VaultError>())
        .map_or(1, VaultError::exit_code)
}

fn run(cli: Cli) -> Result<()> {
    if let Command::Key {
        command: KeyCommand::Generate,
    } = cli.command
    {
        println!("{}", EncryptionKey::generate().to_hex());
        return Ok(());
    }

    let mut config = VaultConfig::from_env().map_err(VaultError::from)?;
    if let Some(db) = cli.db {
        config = config.with_database_path(db);
    }
    if let Some(dir) = cli.backup_dir {
        config = config.with_backup_dir(dir);
    }

    match cli.command {
        Command::Backup {
            command: BackupCommand::Schedule(args),
        } => {
            let at = match args.at {
                Some(raw) => config::parse_backup_time(&raw),
                None => config.backup_time(),
            }
            .map_err(VaultError::from)?;
            let vault = open_vault(&config)?;
            run_schedule(vault, at)
        }
        Command::Backup {
            command: BackupCommand::Run,
        } => {
            let vault = open_vault(&config)?;
            let path = vault.backup()?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Restore(args) => {
            let vault = open_vault(&config)?;
            let report = vault.restore(&args.artifact)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Inspect(args) => {
            let vault = open_vault(&config)?;
            let summary = vault.inspect(&args.artifact)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        // handled before configuration is read
        Command::Key { .. } => Ok(()),
    }
}

fn open_vault(config: &VaultConfig) -> Result<Vault<SqliteGateway>> {
    let gateway = SqliteGateway::open(&config.database_path)?;
    Ok(Vault::from_config(gateway, config))
}

fn run_schedule(vault: Vault<SqliteGateway>, at: NaiveTime) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let vault = Arc::new(vault);
        let trigger = vault.schedule(at);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tracing::info!(
            "Daily backup scheduled at {} into {}",
            at.format("%H:%M"),
            vault.backup_dir().display()
        );

        let task = tokio::spawn(trigger.run(shutdown_rx));
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;

        tracing::info!("Shutdown requested, waiting for any running backup");
        let _ = shutdown_tx.send(true);
        task.await.context("backup schedule task failed")?;
        Ok::<(), anyhow::Error>(())
    })
}
