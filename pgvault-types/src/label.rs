//! Backup label grammar (spec.md §3, §6).
//!
//! A label is the only authority on backup type: `YYYYMMDD-HHMMSSF` (full),
//! `..F_YYYYMMDD-HHMMSSD` (differential) or `..F_YYYYMMDD-HHMMSSI`
//! (incremental). Parsing a label never touches storage.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RepoError;

lazy_static! {
    static ref LABEL_RE: Regex =
        Regex::new(r"^(?P<full>[0-9]{8}-[0-9]{6})F(?:_(?P<child>[0-9]{8}-[0-9]{6})(?P<kind>[DI]))?$")
            .expect("static backup label regex must compile");
}

/// The three backup flavors. Differentials reference only the parent full;
/// incrementals reference the whole chain up to the parent full.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Diff,
    Incr,
}

impl BackupType {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Diff => "diff",
            BackupType::Incr => "incr",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, validated backup label.
///
/// `BackupLabel` never outlives the string it was parsed from logically
/// speaking, but since labels are always interned as strings on disk we keep
/// an owned copy rather than a borrow — the repository core looks labels up
/// by string far more often than it parses fresh ones.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupLabel(String);

impl BackupLabel {
    /// Parse and validate a label. This is the *only* place backup type and
    /// parent-full are derived; nothing else may infer them independently.
    pub fn parse(raw: &str) -> Result<Self, RepoError> {
        if !LABEL_RE.is_match(raw) {
            return Err(RepoError::OptionInvalidValue {
                value: raw.to_string(),
                reason: "is not a valid backup label format".to_string(),
            });
        }
        Ok(BackupLabel(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn backup_type(&self) -> BackupType {
        let caps = LABEL_RE.captures(&self.0).expect("validated on construction");
        match caps.name("kind").map(|m| m.as_str()) {
            None => BackupType::Full,
            Some("D") => BackupType::Diff,
            Some("I") => BackupType::Incr,
            Some(other) => unreachable!("label regex cannot capture kind {other:?}"),
        }
    }

    /// The full backup this label is a diff/incr of, or `None` for a full.
    pub fn parent_full(&self) -> Option<BackupLabel> {
        let caps = LABEL_RE.captures(&self.0).expect("validated on construction");
        let full_stamp = caps.name("full")?;
        if caps.name("kind").is_none() {
            return None;
        }
        Some(BackupLabel(format!("{}F", full_stamp.as_str())))
    }

    /// Timestamp component of the label (the first, full-backup, stamp for
    /// diff/incr labels is *not* this backup's own start time — callers that
    /// need the backup's own timestamp should use the catalog record's
    /// `timestamp_start` instead; this is purely the label's sort key).
    pub fn sort_key(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BackupLabel {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackupLabel::parse(s)
    }
}

impl AsRef<str> for BackupLabel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Ord for BackupLabel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for BackupLabel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_label() {
        let l = BackupLabel::parse("20181119-152138F").unwrap();
        assert_eq!(l.backup_type(), BackupType::Full);
        assert_eq!(l.parent_full(), None);
    }

    #[test]
    fn diff_label() {
        let l = BackupLabel::parse("20181119-152138F_20181119-152800D").unwrap();
        assert_eq!(l.backup_type(), BackupType::Diff);
        assert_eq!(l.parent_full().unwrap().as_str(), "20181119-152138F");
    }

    #[test]
    fn incr_label() {
        let l = BackupLabel::parse("20181119-152138F_20181119-152900I").unwrap();
        assert_eq!(l.backup_type(), BackupType::Incr);
        assert_eq!(l.parent_full().unwrap().as_str(), "20181119-152138F");
    }

    #[test]
    fn rejects_garbage() {
        assert!(BackupLabel::parse("20201119-123456F_20201119-234567I_extra").is_err());
        assert!(BackupLabel::parse("not-a-label").is_err());
        assert!(BackupLabel::parse("20181119-152138X").is_err());
    }

    #[test]
    fn sorts_lexically_by_timestamp() {
        let mut labels: Vec<BackupLabel> = vec![
            BackupLabel::parse("20181119-152900F").unwrap(),
            BackupLabel::parse("20181119-152138F").unwrap(),
            BackupLabel::parse("20181119-152800F").unwrap(),
        ];
        labels.sort();
        assert_eq!(
            labels.iter().map(|l| l.as_str()).collect::<Vec<_>>(),
            vec!["20181119-152138F", "20181119-152800F", "20181119-152900F"]
        );
    }
}
