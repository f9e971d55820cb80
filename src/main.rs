use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rbd_backup::cli::{
    handle_backup_command, handle_forget_command, handle_run_command, BackupArgs, ForgetArgs,
    RunArgs,
};

#[derive(Parser)]
#[command(
    name = "rbd-backup",
    author = "Kaylee Beyene",
    version,
    about = "Snapshot based backups of Ceph RBD images",
    long_about = "rbd-backup exports Ceph RBD images to local files. In incremental \
                  mode it keeps a chain of one full export and daily diff exports \
                  within a sliding retention window; in full mode it takes a \
                  standalone full export on every run."
)]
struct Cli {
    /// Run the rbd and tar tools through sudo
    #[arg(long, global = true)]
    sudo: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pool sections of the profile file
    Run(RunArgs),

    /// Back up images of one pool from command-line flags
    Backup(BackupArgs),

    /// Drop a restore point and every export built on it
    Forget(ForgetArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let failures = match cli.command {
        Commands::Run(args) => handle_run_command(args, cli.sudo)?,
        Commands::Backup(args) => handle_backup_command(args, cli.sudo)?,
        Commands::Forget(args) => handle_forget_command(args, cli.sudo)?,
    };

    if !failures.is_empty() {
        anyhow::bail!("{}", failures);
    }

    Ok(())
}
