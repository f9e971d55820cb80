//! Backup profiles for rbd-backup
//!
//! The profile file is YAML with one top-level entry per pool:
//!
//! ```yaml
//! rbd:
//!   images: vm1,vm2          # or "*" for every image in the pool
//!   destination directory: /srv/backup
//!   ceph config: /etc/ceph/ceph.conf
//!   check mode: no
//!   compress: yes
//!   window size: 7
//!   window unit: days        # minutes, hours, days, weeks or months
//!   backup mode: incremental # full or incremental
//! ```
//!
//! Sections are validated one at a time so a broken section does not stop
//! the others from running.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::backup::window::{BackupWindow, WindowUnit};
use crate::error::{BackupError, BackupResult};
use crate::remote::rbd::DEFAULT_CEPH_CONF;

/// Whether a run takes chained or standalone backups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    /// Snapshot, export fully, drop the snapshot
    Full,
    /// Snapshot chain with diff exports and a sliding window
    Incremental,
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Incremental => f.write_str("incremental"),
        }
    }
}

impl FromStr for BackupMode {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            other => Err(BackupError::UnknownBackupMode(other.to_string())),
        }
    }
}

/// Images selected for backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSelection {
    /// Every image of the pool (`*`)
    All,
    Named(Vec<String>),
}

impl ImageSelection {
    /// Parse a comma-separated list of image names
    pub fn parse(list: &str) -> BackupResult<Self> {
        Self::from_names(list.split(',').map(str::to_string).collect())
    }

    /// Build a selection, rejecting duplicates and empty names
    pub fn from_names(names: Vec<String>) -> BackupResult<Self> {
        let names: Vec<String> = names.iter().map(|n| n.trim().to_string()).collect();

        if names.len() == 1 && names[0] == "*" {
            return Ok(Self::All);
        }
        if names.is_empty() || names.iter().any(|n| n.is_empty()) {
            return Err(BackupError::Config("Empty image name in list of images".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(BackupError::DuplicateImage(name.clone()));
            }
        }

        Ok(Self::Named(names))
    }
}

impl fmt::Display for ImageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Named(names) => f.write_str(&names.join(",")),
        }
    }
}

/// A validated pool section
#[derive(Debug, Clone)]
pub struct PoolProfile {
    pub pool: String,
    pub images: ImageSelection,
    pub destination: PathBuf,
    pub ceph_config: PathBuf,
    pub check_mode: bool,
    pub compress: bool,
    pub window: BackupWindow,
    pub mode: BackupMode,
}

/// A pool section as written in the file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProfile {
    images: ListValue,
    #[serde(rename = "destination directory")]
    destination: PathBuf,
    #[serde(rename = "ceph config", default = "default_ceph_config")]
    ceph_config: PathBuf,
    #[serde(rename = "check mode", default)]
    check_mode: FlagValue,
    #[serde(default)]
    compress: FlagValue,
    #[serde(rename = "window size", default)]
    window_size: Option<NumberValue>,
    #[serde(rename = "window unit", default)]
    window_unit: Option<String>,
    #[serde(rename = "backup mode")]
    backup_mode: String,
}

fn default_ceph_config() -> PathBuf {
    PathBuf::from(DEFAULT_CEPH_CONF)
}

/// `images: a,b` or `images: [a, b]`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListValue {
    List(Vec<String>),
    Text(String),
}

/// YAML boolean, or one of the classic truthy/falsy words
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlagValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Default for FlagValue {
    fn default() -> Self {
        Self::Bool(false)
    }
}

impl FlagValue {
    fn resolve(&self, key: &str) -> BackupResult<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Int(0) => Ok(false),
            Self::Int(1) => Ok(true),
            Self::Int(other) => Err(invalid_value(key, other)),
            Self::Text(text) => match text.trim().to_lowercase().as_str() {
                "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
                "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
                _ => Err(invalid_value(key, text)),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberValue {
    Int(u32),
    Text(String),
}

impl NumberValue {
    fn resolve(&self, key: &str) -> BackupResult<u32> {
        match self {
            Self::Int(n) => Ok(*n),
            Self::Text(text) => text.trim().parse().map_err(|_| invalid_value(key, text)),
        }
    }
}

fn invalid_value(key: &str, value: impl fmt::Display) -> BackupError {
    BackupError::Config(format!("Invalid value for '{}': {}", key, value))
}

impl RawProfile {
    fn validate(self, pool: &str) -> BackupResult<PoolProfile> {
        let images = match self.images {
            ListValue::List(names) => ImageSelection::from_names(names)?,
            ListValue::Text(text) => ImageSelection::parse(&text)?,
        };

        let defaults = BackupWindow::default();
        let window = BackupWindow {
            size: match &self.window_size {
                Some(size) => size.resolve("window size")?,
                None => defaults.size,
            },
            unit: match &self.window_unit {
                Some(unit) => unit.parse::<WindowUnit>()?,
                None => defaults.unit,
            },
        };

        Ok(PoolProfile {
            pool: pool.to_string(),
            images,
            destination: self.destination,
            ceph_config: self.ceph_config,
            check_mode: self.check_mode.resolve("check mode")?,
            compress: self.compress.resolve("compress")?,
            window,
            mode: self.backup_mode.parse()?,
        })
    }
}

/// The profile file, split into pool sections
#[derive(Debug, Clone)]
pub struct Settings {
    sections: Vec<(String, serde_yaml::Value)>,
}

impl Settings {
    /// Load the profile file at `path`
    pub fn load(path: &Path) -> BackupResult<Self> {
        if !path.exists() {
            return Err(BackupError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            BackupError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::from_yaml_str(&contents)
    }

    /// Parse profile YAML, keeping section order
    pub fn from_yaml_str(contents: &str) -> BackupResult<Self> {
        let root: serde_yaml::Value = serde_yaml::from_str(contents)?;
        let mapping = match root {
            serde_yaml::Value::Mapping(mapping) => mapping,
            serde_yaml::Value::Null => serde_yaml::Mapping::new(),
            _ => {
                return Err(BackupError::Config(
                    "Expected one mapping entry per pool at the top level".into(),
                ))
            }
        };

        let mut sections = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let pool = match key {
                serde_yaml::Value::String(pool) => pool,
                other => {
                    return Err(BackupError::Config(format!(
                        "Pool names must be strings, found {:?}",
                        other
                    )))
                }
            };
            sections.push((pool, value));
        }

        if sections.is_empty() {
            return Err(BackupError::Config("No pool sections found".into()));
        }

        Ok(Self { sections })
    }

    /// Pool names, in file order
    pub fn pools(&self) -> Vec<&str> {
        self.sections.iter().map(|(pool, _)| pool.as_str()).collect()
    }

    /// Validate and return the profile of one pool
    pub fn profile(&self, pool: &str) -> BackupResult<PoolProfile> {
        let (_, value) = self
            .sections
            .iter()
            .find(|(name, _)| name == pool)
            .ok_or_else(|| BackupError::Config(format!("No section for pool '{}'", pool)))?;

        let raw: RawProfile = serde_yaml::from_value(value.clone()).map_err(|e| {
            BackupError::Config(format!("Invalid section '{}': {}", pool, e))
        })?;

        raw.validate(pool)
    }
}
