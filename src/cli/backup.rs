//! Standalone backup command
//!
//! Backs up images of one pool from command-line flags, without a profile
//! file.

use clap::Args;
use std::path::PathBuf;

use super::Failures;
use crate::backup::{BackupContext, BackupWindow, Orchestrator, WindowUnit};
use crate::config::paths::BackupPaths;
use crate::config::settings::{BackupMode, ImageSelection};
use crate::display::{format_overview, format_summary};
use crate::error::BackupResult;
use crate::remote::rbd::{RbdCli, DEFAULT_CEPH_CONF};

/// Arguments of `rbd-backup backup`
#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Pool holding the images
    #[arg(short, long)]
    pub pool: String,

    /// Images to back up ('*' for every image of the pool)
    #[arg(short, long, num_args = 1.., required = true, value_delimiter = ',')]
    pub images: Vec<String>,

    /// Destination directory of the exports
    #[arg(short, long)]
    pub dest: PathBuf,

    /// Only log what would be done
    #[arg(short = 'n', long)]
    pub check: bool,

    /// Compress exports into .tar.gz archives
    #[arg(short = 'z', long)]
    pub compress: bool,

    /// Ceph configuration file
    #[arg(short, long, default_value = DEFAULT_CEPH_CONF)]
    pub ceph_conf: PathBuf,

    /// Backup mode
    #[arg(short, long, value_enum, default_value_t = BackupMode::Full)]
    pub mode: BackupMode,

    /// Size of the retention window (incremental mode)
    #[arg(long, default_value_t = 7)]
    pub window_size: u32,

    /// Unit of the retention window (incremental mode)
    #[arg(long, value_enum, default_value_t = WindowUnit::Days)]
    pub window_unit: WindowUnit,
}

/// Handle `rbd-backup backup`
pub fn handle_backup_command(args: BackupArgs, sudo: bool) -> BackupResult<Failures> {
    let images = ImageSelection::from_names(args.images)?;

    let rbd = RbdCli::new(args.ceph_conf).with_sudo(sudo);
    let ctx = BackupContext::new(args.pool, BackupPaths::new(args.dest), &rbd, &rbd)
        .with_window(BackupWindow::new(args.window_size, args.window_unit))
        .with_compress(args.compress)
        .with_check_mode(args.check);
    println!("{}", format_overview(&ctx, &images, args.mode));

    let outcomes = Orchestrator::new(ctx).run(&images, args.mode)?;
    println!("{}", format_summary(&outcomes));

    let mut failures = Failures::default();
    failures.add_outcomes(&outcomes);
    Ok(failures)
}
