//! The backup record stored in `backup.info.current` (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pgvault_types::{BackupLabel, BackupType, RepoError};

/// The WAL options recorded for a single backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    pub archive_check: bool,
    pub archive_copy: bool,
    pub backup_standby: bool,
    pub checksum_page: bool,
    pub compress: bool,
    pub hardlink: bool,
    pub online: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        BackupOptions {
            archive_check: true,
            archive_copy: false,
            backup_standby: false,
            checksum_page: false,
            compress: true,
            hardlink: false,
            online: true,
        }
    }
}

/// One completed (or in-progress) backup, as tracked in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub label: BackupLabel,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub backrest_format: u32,
    pub backrest_version: String,
    pub history_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_stop: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lsn_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lsn_stop: Option<String>,
    pub timestamp_start: DateTime<Utc>,
    pub timestamp_stop: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior: Option<BackupLabel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<Vec<BackupLabel>>,
    pub info_size: u64,
    pub info_size_delta: u64,
    pub info_repo_size: u64,
    pub info_repo_size_delta: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub options: BackupOptions,
}

impl BackupRecord {
    /// Enforce the invariant tying backup type to `prior`/`reference`
    /// (spec.md §3): a full backup has neither, a diff/incr has both.
    pub fn validate_type_invariant(&self) -> Result<(), RepoError> {
        match self.backup_type {
            BackupType::Full => {
                if self.prior.is_some() || self.reference.is_some() {
                    return Err(RepoError::Assert {
                        reason: format!(
                            "full backup '{}' carries prior/reference",
                            self.label
                        ),
                    });
                }
            }
            BackupType::Diff | BackupType::Incr => {
                if self.prior.is_none() {
                    return Err(RepoError::Assert {
                        reason: format!(
                            "{} backup '{}' is missing prior",
                            self.backup_type, self.label
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// This record counts as a "diff" for retention purposes: actual diffs
    /// plus fulls, which retention treats as diffs (spec.md §4.6 step 4).
    pub fn counts_as_diff(&self) -> bool {
        matches!(self.backup_type, BackupType::Full | BackupType::Diff)
    }
}
