//! Backup timestamps embedded in snapshot and export names
//!
//! Every snapshot taken by rbd-backup is named `BACKUPUTC%Y%m%dT%H%M%S`.
//! The `BACKUP` prefix is reserved: snapshots without it belong to someone
//! else and are never touched.

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::error::{BackupError, BackupResult};

/// Reserved prefix of every snapshot name owned by rbd-backup
pub const PREFIX: &str = "BACKUP";

/// strftime format of a snapshot name
pub const FORMAT: &str = "BACKUPUTC%Y%m%dT%H%M%S";

/// Encode an instant as a snapshot name (second resolution)
pub fn encode(instant: DateTime<Utc>) -> String {
    instant.format(FORMAT).to_string()
}

/// Decode a snapshot name back into its instant
pub fn decode(name: &str) -> BackupResult<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(name, FORMAT)
        .map_err(|_| BackupError::MalformedTimestamp(name.to_string()))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Whether a snapshot name carries the reserved prefix
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(PREFIX)
}

/// Drop sub-second precision
pub fn truncate(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.with_nanosecond(0).unwrap_or(instant)
}

/// The current instant, truncated to whole seconds
pub fn now() -> DateTime<Utc> {
    truncate(Utc::now())
}
