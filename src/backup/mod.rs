//! Snapshot backup engine
//!
//! Keeps a chain of exports per image: one full export as the root, then
//! one diff export per run, each naming the snapshot it was taken from.
//! The chain is bounded by a sliding retention window; once the oldest
//! snapshot falls outside of it, the root moves forward.
//!
//! # Architecture
//!
//! - `timestamp`, `window`, `naming`: pure helpers for snapshot names, the
//!   retention window and export file names
//! - `chain`: the export chain of one image (`ChainGraph`, `ExportChain`)
//! - `orchestrator`: the per-image state machine (`Orchestrator`)
//! - `actions`: check-mode gate in front of every side effect
//! - `lock`: per-image advisory lock
//!
//! # Example
//!
//! ```rust,ignore
//! use rbd_backup::backup::{BackupContext, Orchestrator};
//! use rbd_backup::config::{BackupMode, BackupPaths, ImageSelection};
//! use rbd_backup::remote::RbdCli;
//!
//! let rbd = RbdCli::new("/etc/ceph/ceph.conf");
//! let ctx = BackupContext::new("rbd", BackupPaths::new("/backup"), &rbd, &rbd);
//! let outcomes = Orchestrator::new(ctx).run(&ImageSelection::All, BackupMode::Incremental)?;
//! ```

pub mod actions;
pub mod chain;
pub mod context;
pub mod lock;
pub mod naming;
pub mod orchestrator;
pub mod timestamp;
pub mod window;

pub use actions::{Action, ActionLog};
pub use chain::{ChainGraph, ExportChain};
pub use context::BackupContext;
pub use lock::ImageLock;
pub use naming::{ExportFile, ExportKind, ExportTarget};
pub use orchestrator::{BackupState, ImageOutcome, ImageReport, Orchestrator};
pub use window::{BackupWindow, WindowUnit};
