//! Mutating actions and the check-mode gate
//!
//! Every side effect of a backup run goes through `ActionLog::perform`. In
//! check mode the action is logged and recorded but never executed, so a
//! check run walks the exact same decisions as a real one.

use std::fmt;
use std::path::PathBuf;

use tracing::info;

use crate::error::BackupResult;

/// A side effect of a backup run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CreateDir { path: PathBuf },
    CreateSnapshot { image: String, name: String },
    DeleteSnapshot { image: String, name: String },
    ExportFull { reference: String, dest: PathBuf },
    ExportDiff { base: String, reference: String, dest: PathBuf },
    Compress { src: PathBuf, dest: PathBuf },
    RemoveFile { path: PathBuf },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateDir { path } => write!(f, "Creating directory {}", path.display()),
            Self::CreateSnapshot { image, name } => {
                write!(f, "Creating snapshot {}@{}", image, name)
            }
            Self::DeleteSnapshot { image, name } => {
                write!(f, "Deleting snapshot {}@{}", image, name)
            }
            Self::ExportFull { reference, dest } => {
                write!(f, "Exporting image {} to {}", reference, dest.display())
            }
            Self::ExportDiff {
                base,
                reference,
                dest,
            } => write!(
                f,
                "Exporting diff {} -> {} to {}",
                base,
                reference,
                dest.display()
            ),
            Self::Compress { src, dest } => {
                write!(f, "Compressing {} to {}", src.display(), dest.display())
            }
            Self::RemoveFile { path } => write!(f, "Removing file {}", path.display()),
        }
    }
}

/// Records the actions of one image run and gates them on check mode
#[derive(Debug, Default)]
pub struct ActionLog {
    check_mode: bool,
    actions: Vec<Action>,
}

impl ActionLog {
    pub fn new(check_mode: bool) -> Self {
        Self {
            check_mode,
            actions: Vec::new(),
        }
    }

    pub fn is_check_mode(&self) -> bool {
        self.check_mode
    }

    /// Run `effect` for `action`, or only record it in check mode
    ///
    /// Outside check mode the action is recorded once `effect` succeeds.
    pub fn perform<F>(&mut self, action: Action, effect: F) -> BackupResult<()>
    where
        F: FnOnce() -> BackupResult<()>,
    {
        if self.check_mode {
            info!("[check] {}", action);
            self.actions.push(action);
            return Ok(());
        }

        info!("{}", action);
        effect()?;
        self.actions.push(action);
        Ok(())
    }

    /// Whether this check run would have created `image@name`
    pub fn plans_snapshot(&self, image: &str, name: &str) -> bool {
        self.check_mode
            && self.actions.iter().any(|action| {
                matches!(action, Action::CreateSnapshot { image: i, name: n } if i == image && n == name)
            })
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }
}
