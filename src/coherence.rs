//! Cross-file coherence checks (spec.md §4.5): archive history against
//! backup history, and either catalog against a live cluster read.
//!
//! The live cluster read itself (querying `pg_control`, or connecting to
//! run a query) is an external collaborator out of scope here; callers pass
//! in the already-read values as [`PgControlInfo`].

use std::path::PathBuf;

use pgvault_types::{PgVersion, RepoError, SystemId};

use crate::catalog::archive_info::ArchiveInfo;
use crate::catalog::backup_info::BackupInfo;
use crate::infopg::InfoPg;

/// Cluster identity values read live from `pg_control` (or a connected
/// query), to be checked against a catalog's current history entry.
#[derive(Debug, Clone)]
pub struct PgControlInfo {
    pub pg_version: PgVersion,
    pub system_id: SystemId,
    pub catalog_version: u64,
    pub control_version: u32,
    /// Present only for a query-based check; compared against the
    /// configured data directory.
    pub data_directory: Option<PathBuf>,
}

/// For every `historyId` present in either catalog, `(historyId, pgVersion,
/// systemId)` must agree. Missing on either side or any mismatch is a
/// coherence failure.
pub fn pg_history(archive_info: &ArchiveInfo, backup_info: &BackupInfo) -> Result<(), RepoError> {
    compare_histories(archive_info.infopg(), backup_info.infopg())
}

fn compare_histories(archive: &InfoPg, backup: &InfoPg) -> Result<(), RepoError> {
    let mut history_ids: Vec<u32> = archive
        .entries()
        .iter()
        .chain(backup.entries().iter())
        .map(|e| e.history_id)
        .collect();
    history_ids.sort_unstable();
    history_ids.dedup();

    for history_id in history_ids {
        let from_archive = archive.find(history_id);
        let from_backup = backup.find(history_id);
        match (from_archive, from_backup) {
            (Ok(a), Ok(b)) if a.pg_version == b.pg_version && a.system_id == b.system_id => {}
            _ => {
                return Err(RepoError::Format {
                    file: "archive.info/backup.info".to_string(),
                    reason: "archive and backup history lists do not match".to_string(),
                })
            }
        }
    }

    Ok(())
}

/// For the *current* history entry, every identity field must match what
/// was read from the live cluster. `data_directory`, when present, is also
/// checked against `configured_path` — a query-based check can otherwise
/// succeed against the wrong cluster entirely if the port happens to match.
pub fn pg_live(
    infopg: &InfoPg,
    control: &PgControlInfo,
    configured_path: Option<&std::path::Path>,
) -> Result<(), RepoError> {
    let current = infopg.current()?;

    if current.pg_version != control.pg_version || current.system_id != control.system_id {
        return Err(RepoError::DbMismatch {
            reason: "pgVersion/systemId do not match the live cluster".to_string(),
        });
    }
    if current.catalog_version != Some(control.catalog_version)
        || current.control_version != Some(control.control_version)
    {
        return Err(RepoError::DbMismatch {
            reason: "catalogVersion/controlVersion do not match the live cluster".to_string(),
        });
    }

    if let (Some(live_dir), Some(configured)) = (&control.data_directory, configured_path) {
        if live_dir != configured {
            return Err(RepoError::DbMismatch {
                reason: "the configured path and port likely reference different clusters"
                    .to_string(),
            });
        }
    }

    Ok(())
}
