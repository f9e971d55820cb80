//! rbd-backup - Snapshot based backups of Ceph RBD images
//!
//! This library implements a backup engine that keeps, per image, a chain
//! of local exports: a full export as the root and one diff export per run.
//! Retention is a sliding window; when the oldest snapshot falls out of it
//! the chain is re-rooted on the oldest snapshot still inside.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `backup`: Timestamps, windows, export naming, chains and the orchestrator
//! - `remote`: Snapshot and export collaborators (`rbd` command line adapter)
//! - `config`: Pool profiles and on-disk layout
//! - `cli`: Command handlers
//! - `display`: Terminal output formatting
//! - `error`: Custom error types
//!
//! # Example
//!
//! ```rust,ignore
//! use rbd_backup::config::Settings;
//!
//! let settings = Settings::load(Path::new("/etc/rbd-backup/rbd-backup.yaml"))?;
//! for pool in settings.pools() {
//!     let profile = settings.profile(pool)?;
//!     println!("{}: {}", pool, profile.images);
//! }
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod remote;

pub use error::{BackupError, BackupResult};
