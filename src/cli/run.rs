//! Profile-driven runs
//!
//! Runs every pool section of the profile file, or a single one. A section
//! that fails validation is reported and skipped; the others still run.

use clap::Args;
use std::path::PathBuf;
use tracing::error;

use super::Failures;
use crate::backup::{BackupContext, ImageOutcome, Orchestrator};
use crate::config::paths::resolve_config_file;
use crate::config::settings::Settings;
use crate::display::{format_overview, format_summary};
use crate::error::{BackupError, BackupResult};
use crate::remote::RbdCli;

/// Arguments of `rbd-backup run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Profile file [default: /etc/rbd-backup/rbd-backup.yaml]
    #[arg(short, long, env = "RBD_BACKUP_CONFIG")]
    pub conf: Option<PathBuf>,

    /// Only run this pool section
    #[arg(short, long)]
    pub pool: Option<String>,

    /// Force check mode for every section
    #[arg(long)]
    pub check: bool,
}

/// Handle `rbd-backup run`
///
/// An unreadable profile fails the command; section and image failures are
/// counted in the returned `Failures`.
pub fn handle_run_command(args: RunArgs, sudo: bool) -> BackupResult<Failures> {
    let path = resolve_config_file(args.conf);
    let settings = Settings::load(&path)?;

    let pools: Vec<String> = match args.pool {
        Some(pool) => {
            if !settings.pools().contains(&pool.as_str()) {
                return Err(BackupError::Config(format!(
                    "No section for pool '{}' in {}",
                    pool,
                    path.display()
                )));
            }
            vec![pool]
        }
        None => settings.pools().into_iter().map(str::to_string).collect(),
    };

    let mut failures = Failures::default();
    for pool in &pools {
        match run_section(&settings, pool, args.check, sudo) {
            Ok(outcomes) => failures.add_outcomes(&outcomes),
            Err(e) => {
                error!("Section '{}' failed: {}", pool, e);
                failures.sections += 1;
            }
        }
    }

    Ok(failures)
}

fn run_section(
    settings: &Settings,
    pool: &str,
    check: bool,
    sudo: bool,
) -> BackupResult<Vec<ImageOutcome>> {
    let mut profile = settings.profile(pool)?;
    profile.check_mode |= check;

    let rbd = RbdCli::new(&profile.ceph_config).with_sudo(sudo);
    let ctx = BackupContext::from_profile(&profile, &rbd, &rbd);
    println!("{}", format_overview(&ctx, &profile.images, profile.mode));

    let outcomes = Orchestrator::new(ctx).run(&profile.images, profile.mode)?;
    println!("{}", format_summary(&outcomes));

    Ok(outcomes)
}
