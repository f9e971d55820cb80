//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the backup engine.

pub mod backup;
pub mod forget;
pub mod run;

pub use backup::{handle_backup_command, BackupArgs};
pub use forget::{handle_forget_command, ForgetArgs};
pub use run::{handle_run_command, RunArgs};

use crate::backup::ImageOutcome;

/// Failures collected over one command
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Failures {
    /// Pool sections that could not run at all
    pub sections: usize,
    /// Images that failed inside sections that did run
    pub images: usize,
}

impl Failures {
    pub fn is_empty(&self) -> bool {
        self.sections == 0 && self.images == 0
    }

    /// Count the failed images of a pool run
    pub fn add_outcomes(&mut self, outcomes: &[ImageOutcome]) {
        self.images += outcomes.iter().filter(|o| !o.is_success()).count();
    }
}

impl std::fmt::Display for Failures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} section(s) and {} image(s) failed",
            self.sections, self.images
        )
    }
}
