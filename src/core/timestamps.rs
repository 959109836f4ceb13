//! The single freshness predicate and timestamp formatting.
//!
//! Every staleness question in the engine reduces to one comparison:
//! an artifact is fresh iff `mtime(artifact) >= mtime(input)`. The
//! comparison is strict and tolerance-free; filesystems with coarse
//! timestamp resolution collapse equal stamps to "fresh", which is the
//! conservative direction (no spurious rebuild).

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::core::errors::{KbError, Result};

/// True iff the artifact timestamp is at or after the input timestamp.
#[must_use]
pub fn artifact_is_fresh(artifact_mtime: SystemTime, input_mtime: SystemTime) -> bool {
    artifact_mtime >= input_mtime
}

/// Read a path's modification time.
pub fn mtime(path: &Path) -> Result<SystemTime> {
    let meta = fs::metadata(path).map_err(|e| KbError::io(path, e))?;
    meta.modified().map_err(|e| KbError::io(path, e))
}

/// Read a path's modification time, `None` if the path does not exist.
pub fn mtime_if_exists(path: &Path) -> Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.modified().map_err(|e| KbError::io(path, e))?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(KbError::io(path, e)),
    }
}

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS` (UTC) for freshness reasons.
#[must_use]
pub fn format_timestamp(ts: SystemTime) -> String {
    let dt: DateTime<Utc> = ts.into();
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format a timestamp as RFC 3339 for artifact metadata headers.
#[must_use]
pub fn format_rfc3339(ts: SystemTime) -> String {
    let dt: DateTime<Utc> = ts.into();
    dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Human-readable reason string for a freshness verdict, carrying both stamps.
#[must_use]
pub fn freshness_reason(fresh: bool, artifact_mtime: SystemTime, input_mtime: SystemTime) -> String {
    let verdict = if fresh { "fresh" } else { "stale" };
    format!(
        "{verdict}: artifact {} vs source {}",
        format_timestamp(artifact_mtime),
        format_timestamp(input_mtime),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn equal_timestamps_are_fresh() {
        let now = SystemTime::now();
        assert!(artifact_is_fresh(now, now));
    }

    #[test]
    fn newer_artifact_is_fresh() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let later = base + Duration::from_secs(1);
        assert!(artifact_is_fresh(later, base));
    }

    #[test]
    fn older_artifact_is_stale() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let later = base + Duration::from_secs(1);
        assert!(!artifact_is_fresh(base, later));
    }

    #[test]
    fn format_timestamp_shape() {
        let ts = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let formatted = format_timestamp(ts);
        // 2023-11-14 22:13:20 UTC.
        assert_eq!(formatted, "2023-11-14 22:13:20");
    }

    #[test]
    fn freshness_reason_carries_both_stamps() {
        let a = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let b = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_060);
        let reason = freshness_reason(false, a, b);
        assert!(reason.starts_with("stale"));
        assert!(reason.contains("2023-11-14 22:13:20"));
        assert!(reason.contains("2023-11-14 22:14:20"));
    }

    #[test]
    fn mtime_if_exists_handles_missing() {
        assert!(
            mtime_if_exists(Path::new("/definitely/not/here.md"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn mtime_reads_real_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let ts = mtime(tmp.path()).unwrap();
        assert!(ts <= SystemTime::now());
    }
}
