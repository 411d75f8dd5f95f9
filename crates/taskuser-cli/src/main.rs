//! taskuser CLI - provision, purge and run tasks under ephemeral identities

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use taskuser_core::config::default_config_path;
use taskuser_core::credentials::generate_password;
use taskuser_core::launcher::{describe, run_task};
use taskuser_core::task::generate_command;
use taskuser_core::{
    HostAccountProvider, HostConfig, IdentityManager, InMemoryHost, PurgeReport, TaskRun,
    WindowsHost,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskuser")]
#[command(author, version, about = "Run tasks under disposable OS user accounts")]
struct Cli {
    /// Host config file (defaults to TASKUSER_CONFIG env var, then built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Keep account changes in memory, use a scratch home parent and print
    /// commands instead of launching them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete task users and home directories left by earlier runs
    Purge,

    /// Purge, then create a fresh task user
    Provision,

    /// Purge, create a task user and run a task's commands as it
    Run {
        /// JSON task descriptor: {"task_id": .., "commands": [..], "env": {..}}
        #[arg(short, long, conflicts_with = "commands")]
        task: Option<PathBuf>,

        /// Task id for commands given on the command line
        #[arg(long, default_value = "adhoc")]
        task_id: String,

        /// Keep running later commands after one fails
        #[arg(long)]
        keep_going: bool,

        /// Commands to run, one script each
        commands: Vec<String>,
    },

    /// Print a freshly generated password
    Password,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("taskuser=info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config.or_else(default_config_path) {
        Some(path) => HostConfig::from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => HostConfig::default(),
    };
    tracing::info!(
        home_parent = %config.home_parent.display(),
        dry_run = cli.dry_run,
        "configuration loaded"
    );

    if cli.dry_run {
        config.home_parent = std::env::temp_dir().join("taskuser-dry-run");
        std::fs::create_dir_all(&config.home_parent)?;
        dispatch(IdentityManager::new(InMemoryHost::new(), config), cli.command, true)
    } else {
        let host = WindowsHost::new(config.clone());
        dispatch(IdentityManager::new(host, config), cli.command, false)
    }
}

fn dispatch<H: HostAccountProvider>(
    mut manager: IdentityManager<H>,
    command: Commands,
    dry_run: bool,
) -> anyhow::Result<()> {
    match command {
        Commands::Purge => {
            print_report(&manager.purge_stale_identities());
        }

        Commands::Provision => {
            print_report(&manager.startup()?);
            let identity = manager.current().context("no identity after startup")?;
            println!("identity: {}", identity.name());
            println!("home: {}", identity.home_dir().display());
        }

        Commands::Run {
            task,
            task_id,
            keep_going,
            commands,
        } => {
            let mut task = match task {
                Some(path) => TaskRun::from_file(&path)?,
                None => TaskRun::new(task_id, commands),
            };
            if task.is_empty() {
                bail!("task {} has no commands", task.task_id);
            }

            print_report(&manager.startup()?);
            let identity = manager.current().context("no identity after startup")?;
            println!("identity: {}", identity.name());

            if dry_run {
                for index in 0..task.len() {
                    let command = generate_command(&mut task, index, identity, manager.config())?;
                    println!(
                        "[{index}] {} -> {}",
                        describe(command.process(), Some(identity.password())),
                        command.log_file
                    );
                }
                return Ok(());
            }

            let results = run_task(&mut task, identity, manager.config(), keep_going);
            let mut failed = 0;
            for result in &results {
                match result {
                    Ok(done) => println!(
                        "[{}] ok in {:?} (log: {})",
                        done.index, done.duration, done.log_file
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("error: {e}");
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} of {} commands failed", task.len());
            }
        }

        Commands::Password => println!("{}", generate_password()),
    }

    Ok(())
}

fn print_report(report: &PurgeReport) {
    for account in &report.deleted_accounts {
        println!("deleted user {account}");
    }
    for dir in &report.removed_home_dirs {
        println!("removed {}", dir.display());
    }
    for warning in &report.warnings {
        println!("warning: {}: {}", warning.context, warning.error);
    }
}
