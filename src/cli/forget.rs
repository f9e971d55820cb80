//! Forget a restore point
//!
//! Drops one snapshot's exports, everything built on them, and the remote
//! snapshots left without an export.

use clap::Args;
use std::path::PathBuf;

use super::Failures;
use crate::backup::{BackupContext, Orchestrator};
use crate::config::paths::BackupPaths;
use crate::display::format_actions;
use crate::error::BackupResult;
use crate::remote::rbd::{RbdCli, DEFAULT_CEPH_CONF};

/// Arguments of `rbd-backup forget`
#[derive(Args, Debug)]
pub struct ForgetArgs {
    /// Pool holding the image
    #[arg(short, long)]
    pub pool: String,

    /// Image whose restore point is dropped
    #[arg(short, long)]
    pub image: String,

    /// Backup snapshot name (BACKUPUTC...)
    #[arg(short, long)]
    pub snapshot: String,

    /// Destination directory of the exports
    #[arg(short, long)]
    pub dest: PathBuf,

    /// Only log what would be done
    #[arg(short = 'n', long)]
    pub check: bool,

    /// Ceph configuration file
    #[arg(short, long, default_value = DEFAULT_CEPH_CONF)]
    pub ceph_conf: PathBuf,
}

/// Handle `rbd-backup forget`
pub fn handle_forget_command(args: ForgetArgs, sudo: bool) -> BackupResult<Failures> {
    let rbd = RbdCli::new(args.ceph_conf).with_sudo(sudo);
    let ctx = BackupContext::new(args.pool, BackupPaths::new(args.dest), &rbd, &rbd)
        .with_check_mode(args.check);

    let report = Orchestrator::new(ctx).forget(&args.image, &args.snapshot)?;

    println!("{}: {}", report.image, report.state);
    print!("{}", format_actions(&report.actions));
    if report.check_mode {
        println!("(check mode, nothing was changed)");
    }

    Ok(Failures::default())
}
