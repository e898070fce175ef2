//! Explicit configuration structs passed into every entry point (spec.md §9
//! "No hidden process-wide state"). Nothing in this crate reaches for
//! ambient/global configuration; retention, cipher, and repository
//! selection are always threaded through as plain data.

use std::path::PathBuf;

use pgvault_types::{BackupType, RepoError};

/// Selector for full-backup retention mode (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionFullType {
    Count,
    Time,
}

/// Which backup kind anchors archive retention (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionArchiveType {
    Full,
    Diff,
    Incr,
}

impl RetentionArchiveType {
    /// Whether a record of the given backup type is "eligible" to anchor
    /// archive retention under this policy: `full` anchors only on fulls,
    /// `diff` anchors on fulls-counted-as-diffs plus diffs, `incr` anchors
    /// on anything.
    pub fn anchors(self, backup_type: BackupType) -> bool {
        match self {
            RetentionArchiveType::Full => backup_type == BackupType::Full,
            RetentionArchiveType::Diff => {
                matches!(backup_type, BackupType::Full | BackupType::Diff)
            }
            RetentionArchiveType::Incr => true,
        }
    }
}

/// Recognized retention options (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub retention_full_type: RetentionFullType,
    /// Count-mode: number of fulls to keep. Time-mode: number of time units.
    pub retention_full: Option<u32>,
    /// Keep this many differentials, full backups counting as a diff.
    pub retention_diff: Option<u32>,
    /// Keep WAL supporting this many eligible backups.
    pub retention_archive: Option<u32>,
    pub retention_archive_type: RetentionArchiveType,
    /// Time-mode unit length, in days. Only meaningful when
    /// `retention_full_type` is `Time`.
    pub time_unit_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            retention_full_type: RetentionFullType::Count,
            retention_full: None,
            retention_diff: None,
            retention_archive: None,
            retention_archive_type: RetentionArchiveType::Diff,
            time_unit_days: 1,
        }
    }
}

impl RetentionConfig {
    pub fn validate(&self) -> Result<(), RepoError> {
        if let Some(retention_full) = self.retention_full {
            if retention_full == 0 {
                return Err(RepoError::OptionInvalidValue {
                    value: "0".to_string(),
                    reason: "retention-full must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Per-invocation selection and mode for the expiration engine.
#[derive(Debug, Clone, Default)]
pub struct ExpireOptions {
    /// Ad-hoc `set=L`: expire this specific backup and its dependents,
    /// bypassing retention-window selection.
    pub set: Option<String>,
    /// Do not modify storage; log the would-be actions only.
    pub dry_run: bool,
}

/// Identifies and locates one repository the core operates against.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub repo_key: String,
    pub backup_path: PathBuf,
    pub archive_path: PathBuf,
    pub stanza: String,
    pub retention: RetentionConfig,
    /// User-level passphrase protecting this stanza's catalogs, when the
    /// stanza is encrypted (spec.md §6, §9 "no hidden process-wide state").
    pub cipher_passphrase: Option<Vec<u8>>,
}

impl RepoConfig {
    pub fn stanza_backup_dir(&self) -> PathBuf {
        self.backup_path.join(&self.stanza)
    }

    pub fn stanza_archive_dir(&self) -> PathBuf {
        self.archive_path.join(&self.stanza)
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.stanza_backup_dir().join(format!("{}.lock", self.stanza))
    }

    pub fn stop_file_path(&self) -> PathBuf {
        self.stanza_backup_dir().join("stop")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_archive_type_anchors_match_spec() {
        assert!(RetentionArchiveType::Diff.anchors(BackupType::Full));
        assert!(RetentionArchiveType::Diff.anchors(BackupType::Diff));
        assert!(!RetentionArchiveType::Diff.anchors(BackupType::Incr));
        assert!(RetentionArchiveType::Incr.anchors(BackupType::Incr));
        assert!(!RetentionArchiveType::Full.anchors(BackupType::Diff));
    }

    #[test]
    fn rejects_zero_retention_full() {
        let mut config = RetentionConfig::default();
        config.retention_full = Some(0);
        assert!(config.validate().is_err());
    }
}
