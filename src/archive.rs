//! WAL archive stream layout and range-preservation helpers (spec.md §3, §6,
//! §4.6 phase 6-7).
//!
//! The stream itself — pushing/getting segments — is an external
//! collaborator (spec.md §1); what lives here is purely the naming scheme
//! and the pure range-math the expiration engine's archive-retention phase
//! needs, kept separate from [`crate::expire`] so it can be tested against
//! the worked PITR scenario on its own.

use pgvault_types::{HistoryId, PgVersion};

/// The on-disk bucket name for one cluster identity's WAL stream.
pub fn archive_id(pg_version: PgVersion, history_id: HistoryId) -> String {
    format!("{pg_version}-{history_id}")
}

/// First 16 hex characters of a WAL segment name: the "major" directory a
/// segment lives under.
pub fn wal_major(wal_name: &str) -> Option<&str> {
    wal_name.get(0..16)
}

/// First 8 hex characters of a WAL segment or LSN-like name: the timeline.
pub fn timeline_of(wal_name: &str) -> Option<&str> {
    wal_name.get(0..8)
}

/// Parses `<8-hex>.history` into its timeline id, or `None` if the name
/// doesn't match.
pub fn history_file_timeline(filename: &str) -> Option<u32> {
    let stem = filename.strip_suffix(".history")?;
    if stem.len() != 8 {
        return None;
    }
    u32::from_str_radix(stem, 16).ok()
}

/// One contiguous WAL range this repository must keep, half-open at the top
/// when `stop` is `None` (meaning "to the end of the stream").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepRange {
    pub start: String,
    pub stop: Option<String>,
}

/// One eligible backup's recorded WAL range, as read from its catalog
/// record. A backup missing `archive_start` contributes nothing (spec.md
/// §4.6 phase 6: "not a basis for retention... the preceding backup's range
/// is kept as-is").
#[derive(Debug, Clone)]
pub struct BackupArchiveSpan {
    pub archive_start: Option<String>,
    pub archive_stop: Option<String>,
}

/// Sorts the anchored (has-`archive_start`) spans ascending by start. This
/// is the one place the "not a basis for retention" rule from spec.md §9 is
/// applied: spans missing `archive_start` are simply dropped here, so the
/// gap logic in [`wal_is_kept`] only ever sees backups with a defined
/// range.
fn anchored_spans(spans: &[BackupArchiveSpan]) -> Vec<(&str, Option<&str>)> {
    let mut anchored: Vec<(&str, Option<&str>)> = spans
        .iter()
        .filter_map(|s| {
            s.archive_start
                .as_deref()
                .map(|start| (start, s.archive_stop.as_deref()))
        })
        .collect();
    anchored.sort_by_key(|(start, _)| *start);
    anchored
}

/// Per-archiveId retention algorithm (spec.md §4.6 phase 6): the closed
/// range for every eligible backup but the last, the open `[start, +inf)`
/// range for the last, and the same-timeline gap between consecutive
/// backups.
pub fn compute_keep_ranges(spans: &[BackupArchiveSpan]) -> Vec<KeepRange> {
    let anchored = anchored_spans(spans);
    let mut ranges = Vec::with_capacity(anchored.len());
    for (i, (start, stop)) in anchored.iter().enumerate() {
        let is_last = i + 1 == anchored.len();
        ranges.push(KeepRange {
            start: start.to_string(),
            stop: if is_last { None } else { stop.map(str::to_string) },
        });
    }
    ranges
}

/// Whether `wal_name` falls inside a kept range: either one of the primary
/// per-backup ranges, or the same-timeline gap between two consecutive
/// eligible backups that preserves PITR reachability across it.
pub fn wal_is_kept(wal_name: &str, spans: &[BackupArchiveSpan]) -> bool {
    let anchored = anchored_spans(spans);

    for (i, (start, stop)) in anchored.iter().enumerate() {
        let is_last = i + 1 == anchored.len();
        if wal_name >= *start && (is_last || stop.map_or(true, |stop| wal_name <= stop)) {
            return true;
        }
        if let (Some(stop), false) = (stop, is_last) {
            let (next_start, _) = anchored[i + 1];
            if wal_name > *stop
                && wal_name < next_start
                && timeline_of(wal_name) == timeline_of(start)
            {
                return true;
            }
        }
    }
    false
}

/// The greatest timeline id referenced by any surviving backup's
/// `archive_start` under one archiveId — the threshold for the
/// timeline-history-file sweep (spec.md §4.6 phase 7).
pub fn max_kept_timeline(spans: &[BackupArchiveSpan]) -> Option<u32> {
    spans
        .iter()
        .filter_map(|s| s.archive_start.as_deref())
        .filter_map(timeline_of)
        .filter_map(|tl| u32::from_str_radix(tl, 16).ok())
        .max()
}
