//! Configuration module for rbd-backup
//!
//! This module provides configuration management including:
//! - On-disk layout of exports and lock files
//! - Pool profiles loaded from the YAML profile file

pub mod paths;
pub mod settings;

pub use paths::BackupPaths;
pub use settings::{BackupMode, ImageSelection, PoolProfile, Settings};
