//! Retention-driven expiration (spec.md §4.6): the nine ordered phases that
//! turn a retention policy and/or an ad-hoc label into a set of removed
//! backups, pruned archive ranges, and swept timeline-history files.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};

use pgvault_tools::lock::{stop_file_present, try_lock_stanza};

use pgvault_types::{BackupLabel, BackupType, RepoError};

use crate::archive::{self, BackupArchiveSpan};
use crate::catalog::archive_info::ArchiveInfo;
use crate::catalog::backup_info::BackupInfo;
use crate::config::{ExpireOptions, RepoConfig, RetentionFullType};
use crate::record::BackupRecord;

/// What the engine did, so callers (and tests) can assert on it without
/// re-deriving it from catalog/filesystem state afterward.
#[derive(Debug, Clone, Default)]
pub struct ExpireReport {
    pub expired_labels: Vec<BackupLabel>,
    pub removed_archive_ids: Vec<String>,
    pub log_lines: Vec<String>,
}

impl ExpireReport {
    fn log(&mut self, dry_run: bool, line: String) {
        let line = if dry_run { format!("[DRY-RUN] {line}") } else { line };
        log::info!("{line}");
        self.log_lines.push(line);
    }

    fn warn(&mut self, dry_run: bool, line: String) {
        let line = if dry_run { format!("[DRY-RUN] {line}") } else { line };
        log::warn!("{line}");
        self.log_lines.push(line);
    }
}

/// Run the full expiration pipeline against one repository.
pub fn expire(
    backup_info: &mut BackupInfo,
    archive_info: &ArchiveInfo,
    repo: &RepoConfig,
    options: &ExpireOptions,
) -> Result<ExpireReport, RepoError> {
    repo.retention.validate()?;
    let mut report = ExpireReport::default();

    // Phase 1: lock and acquire.
    if stop_file_present(&repo.stop_file_path()) {
        return Err(RepoError::Stop {
            stanza: repo.stanza.clone(),
        });
    }
    let _lock = if options.dry_run {
        None
    } else {
        Some(
            try_lock_stanza(&repo.lockfile_path())
                .map_err(|err| RepoError::Other(err.context("acquiring stanza write lock")))?,
        )
    };

    let mut to_expire: BTreeSet<BackupLabel> = BTreeSet::new();

    // Phase 2: ad-hoc expire.
    if let Some(set) = &options.set {
        ad_hoc_expire(backup_info, set, &mut to_expire, &mut report, options.dry_run)?;
    }

    // Phase 3: full retention.
    if let Some(retention_full) = repo.retention.retention_full {
        full_retention(
            backup_info,
            retention_full,
            repo.retention.retention_full_type,
            repo.retention.time_unit_days,
            &mut to_expire,
            &mut report,
            options.dry_run,
        );
    }

    // Phase 4: diff retention.
    if let Some(retention_diff) = repo.retention.retention_diff {
        diff_retention(backup_info, retention_diff, &mut to_expire, &mut report, options.dry_run);
    }

    // Phase 5: removal of selected backups.
    remove_selected(backup_info, &to_expire, repo, &mut report, options.dry_run)?;

    // Phases 6-8: archive retention, timeline-history sweep, archiveId pruning.
    prune_archive(backup_info, archive_info, repo, &mut report, options.dry_run)?;

    // Phase 9: save catalogs.
    if !options.dry_run {
        backup_info.save(&repo.stanza_backup_dir(), repo.cipher_passphrase.as_deref())?;
    }

    Ok(report)
}

fn dependency_closure(backup_info: &BackupInfo, root: &BackupLabel) -> Vec<BackupLabel> {
    let mut result = vec![root.clone()];
    loop {
        let mut grew = false;
        for record in backup_info.current() {
            if result.contains(&record.label) {
                continue;
            }
            if let Some(prior) = &record.prior {
                if result.contains(prior) {
                    result.push(record.label.clone());
                    grew = true;
                }
            }
        }
        if !grew {
            break;
        }
    }
    result
}

fn newest_label(backup_info: &BackupInfo) -> Option<BackupLabel> {
    backup_info.current().map(|r| r.label.clone()).max()
}

/// Renders an expiration decision the way the original `expire` command
/// logs it: `"expire <kind> backup <label>"` for a lone backup, or
/// `"expire <kind> backup set: <label>, <label>, ..."` (ascending) when the
/// dependency closure pulls in more than just the root.
fn expire_log_line(kind: &str, closure: &[BackupLabel]) -> String {
    let mut sorted = closure.to_vec();
    sorted.sort();
    if sorted.len() <= 1 {
        format!("expire {kind} backup {}", sorted[0])
    } else {
        let joined = sorted
            .iter()
            .map(|label| label.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!("expire {kind} backup set: {joined}")
    }
}

fn ad_hoc_expire(
    backup_info: &BackupInfo,
    set: &str,
    to_expire: &mut BTreeSet<BackupLabel>,
    report: &mut ExpireReport,
    dry_run: bool,
) -> Result<(), RepoError> {
    let label = BackupLabel::parse(set)?;

    if !backup_info.contains(&label) {
        report.warn(dry_run, format!("backup '{label}' does not exist"));
        return Ok(());
    }

    let record = backup_info.find(&label)?;
    if record.backup_type == BackupType::Full {
        let current_history_id = backup_info.infopg().current()?.history_id;
        if record.history_id == current_history_id {
            let other_fulls_under_current = backup_info
                .current()
                .filter(|r| r.backup_type == BackupType::Full && r.history_id == current_history_id)
                .count();
            if other_fulls_under_current <= 1 {
                return Err(RepoError::BackupSetInvalid {
                    reason: format!(
                        "full backup '{label}' is the last backup under the current history and cannot be expired"
                    ),
                });
            }
        }
    }

    if newest_label(backup_info).as_ref() == Some(&label) {
        report.warn(dry_run, format!("expiring the newest backup '{label}' - PITR may be affected"));
    }

    let closure = dependency_closure(backup_info, &label);
    report.log(dry_run, expire_log_line("adhoc", &closure));
    to_expire.extend(closure);
    Ok(())
}

fn full_retention(
    backup_info: &BackupInfo,
    retention_full: u32,
    retention_type: RetentionFullType,
    time_unit_days: u32,
    to_expire: &mut BTreeSet<BackupLabel>,
    report: &mut ExpireReport,
    dry_run: bool,
) {
    let mut fulls: Vec<&BackupRecord> = backup_info
        .current()
        .filter(|r| r.backup_type == BackupType::Full)
        .collect();
    fulls.sort_by(|a, b| a.label.cmp(&b.label));

    match retention_type {
        RetentionFullType::Count => {
            let n = fulls.len().saturating_sub(retention_full as usize);
            for full in fulls.iter().take(n) {
                let closure = dependency_closure(backup_info, &full.label);
                report.log(dry_run, expire_log_line("full", &closure));
                to_expire.extend(closure);
            }
        }
        RetentionFullType::Time => {
            let cutoff = Utc::now() - Duration::days((time_unit_days * retention_full) as i64);
            let newest = newest_label(backup_info);
            for full in &fulls {
                if full.timestamp_stop >= cutoff {
                    continue;
                }
                // "keep one": the newest full-or-later backup must remain
                // regardless of how old it is.
                if Some(&full.label) == newest.as_ref() {
                    continue;
                }
                let closure = dependency_closure(backup_info, &full.label);
                report.log(dry_run, expire_log_line("time-based", &closure));
                to_expire.extend(closure);
            }
        }
    }
}

fn diff_retention(
    backup_info: &BackupInfo,
    retention_diff: u32,
    to_expire: &mut BTreeSet<BackupLabel>,
    report: &mut ExpireReport,
    dry_run: bool,
) {
    let mut diffs: Vec<&BackupRecord> = backup_info
        .current()
        .filter(|r| r.counts_as_diff() && !to_expire.contains(&r.label))
        .collect();
    diffs.sort_by(|a, b| a.label.cmp(&b.label));

    let n = diffs.len().saturating_sub(retention_diff as usize);
    for record in diffs.iter().take(n) {
        if record.backup_type == BackupType::Full {
            // Fulls count toward the diff budget but are only ever removed
            // by full retention (spec.md §4.6 phase 4).
            continue;
        }
        if to_expire.contains(&record.label) {
            continue;
        }
        let closure = dependency_closure(backup_info, &record.label);
        report.log(dry_run, expire_log_line("diff", &closure));
        to_expire.extend(closure);
    }
}

fn remove_selected(
    backup_info: &mut BackupInfo,
    to_expire: &BTreeSet<BackupLabel>,
    repo: &RepoConfig,
    report: &mut ExpireReport,
    dry_run: bool,
) -> Result<(), RepoError> {
    for label in to_expire {
        let dir = repo.stanza_backup_dir().join(label.as_str());
        if !dry_run {
            let manifest = dir.join("backup.manifest");
            let manifest_copy = dir.join("backup.manifest.copy");
            if manifest_copy.exists() && !manifest.exists() {
                report.log(dry_run, format!("in-progress backup '{label}' skipped"));
                continue;
            }

            backup_info.delete(label);
            report.expired_labels.push(label.clone());

            if dir.exists() {
                if dir.is_dir() {
                    fs::remove_dir_all(&dir).map_err(|err| {
                        RepoError::Other(anyhow::anyhow!(
                            "removing backup directory '{}': {err}",
                            dir.display()
                        ))
                    })?;
                } else {
                    fs::remove_file(&dir).map_err(|err| {
                        RepoError::Other(anyhow::anyhow!(
                            "removing backup path '{}': {err}",
                            dir.display()
                        ))
                    })?;
                }
            }
        } else {
            report.expired_labels.push(label.clone());
            report.log(dry_run, format!("remove backup directory '{}'", dir.display()));
        }
    }

    if !dry_run {
        update_latest_symlink(backup_info, repo)?;
    }

    Ok(())
}

fn update_latest_symlink(backup_info: &BackupInfo, repo: &RepoConfig) -> Result<(), RepoError> {
    let latest_path = repo.stanza_backup_dir().join("latest");
    if latest_path.exists() || latest_path.symlink_metadata().is_ok() {
        fs::remove_file(&latest_path).ok();
    }
    if let Some(label) = newest_label(backup_info) {
        #[cfg(unix)]
        std::os::unix::fs::symlink(label.as_str(), &latest_path).map_err(|err| {
            RepoError::Other(anyhow::anyhow!("updating 'latest' symlink: {err}"))
        })?;
    }
    Ok(())
}

fn prune_archive(
    backup_info: &BackupInfo,
    archive_info: &ArchiveInfo,
    repo: &RepoConfig,
    report: &mut ExpireReport,
    dry_run: bool,
) -> Result<(), RepoError> {
    let archive_type = repo.retention.retention_archive_type;

    let mut history_ids: Vec<u32> = backup_info.current().map(|r| r.history_id).collect();
    history_ids.sort_unstable();
    history_ids.dedup();

    for history_id in history_ids {
        let Ok(entry) = archive_info.infopg().find(history_id).or_else(|_| backup_info.infopg().find(history_id)) else {
            continue;
        };
        let archive_id = archive::archive_id(entry.pg_version, history_id);
        let archive_dir = repo.stanza_archive_dir().join(&archive_id);

        let spans: Vec<BackupArchiveSpan> = backup_info
            .current()
            .filter(|r| r.history_id == history_id && archive_type.anchors(r.backup_type))
            .map(|r| BackupArchiveSpan {
                archive_start: r.archive_start.clone(),
                archive_stop: r.archive_stop.clone(),
            })
            .collect();

        if !archive_dir.exists() {
            continue;
        }

        // Phase 6: WAL segment retention.
        prune_wal_segments(&archive_dir, &spans, report, dry_run)?;

        // Phase 7: timeline-history sweep.
        if let Some(max_timeline) = archive::max_kept_timeline(&spans) {
            prune_history_files(&archive_dir, max_timeline, report, dry_run)?;
        }

        // Phase 8: archiveId pruning.
        let has_backups = backup_info.current().any(|r| r.history_id == history_id);
        let is_empty = fs::read_dir(&archive_dir).map(|mut it| it.next().is_none()).unwrap_or(true);
        if !has_backups || is_empty {
            report.log(dry_run, format!("remove archive path: {}", archive_dir.display()));
            report.removed_archive_ids.push(archive_id);
            if !dry_run && archive_dir.exists() {
                fs::remove_dir_all(&archive_dir).map_err(|err| {
                    RepoError::Other(anyhow::anyhow!(
                        "removing archive path '{}': {err}",
                        archive_dir.display()
                    ))
                })?;
            }
        }
    }

    Ok(())
}

fn prune_wal_segments(
    archive_dir: &Path,
    spans: &[BackupArchiveSpan],
    report: &mut ExpireReport,
    dry_run: bool,
) -> Result<(), RepoError> {
    let mut major_dirs: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(archive_dir).map_err(|err| {
        RepoError::Other(anyhow::anyhow!("reading '{}': {err}", archive_dir.display()))
    })? {
        let entry = entry.map_err(|err| RepoError::Other(anyhow::anyhow!("{err}")))?;
        if entry.path().is_dir() {
            major_dirs.push(entry.path());
        }
    }

    for major_dir in major_dirs {
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(&major_dir).map_err(|err| {
            RepoError::Other(anyhow::anyhow!("reading '{}': {err}", major_dir.display()))
        })? {
            let entry = entry.map_err(|err| RepoError::Other(anyhow::anyhow!("{err}")))?;
            files.push(entry.path());
        }
        files.sort();

        for file in files {
            let Some(filename) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(wal_name) = filename.get(0..24) else {
                continue;
            };
            if !archive::wal_is_kept(wal_name, spans) {
                report.log(dry_run, format!("remove archive segment: {}", file.display()));
                if !dry_run {
                    fs::remove_file(&file).map_err(|err| {
                        RepoError::Other(anyhow::anyhow!("removing '{}': {err}", file.display()))
                    })?;
                }
            }
        }

        if !dry_run {
            let remaining = fs::read_dir(&major_dir).map(|mut it| it.next().is_none()).unwrap_or(false);
            if remaining {
                fs::remove_dir(&major_dir).ok();
            }
        }
    }

    Ok(())
}

fn prune_history_files(
    archive_dir: &Path,
    max_timeline: u32,
    report: &mut ExpireReport,
    dry_run: bool,
) -> Result<(), RepoError> {
    for entry in fs::read_dir(archive_dir).map_err(|err| {
        RepoError::Other(anyhow::anyhow!("reading '{}': {err}", archive_dir.display()))
    })? {
        let entry = entry.map_err(|err| RepoError::Other(anyhow::anyhow!("{err}")))?;
        let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let Some(timeline) = archive::history_file_timeline(&filename) else {
            continue;
        };
        if timeline < max_timeline {
            let path = entry.path();
            report.log(dry_run, format!("remove history file: {}", path.display()));
            if !dry_run {
                fs::remove_file(&path).map_err(|err| {
                    RepoError::Other(anyhow::anyhow!("removing '{}': {err}", path.display()))
                })?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetentionArchiveType, RetentionConfig};
    use crate::record::BackupOptions;
    use chrono::Utc;
    use std::path::PathBuf;

    fn tmp(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pgvault-expire-test-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("backup/main")).unwrap();
        std::fs::create_dir_all(dir.join("archive")).unwrap();
        dir
    }

    fn record(label: &str, backup_type: BackupType, prior: Option<&str>, history_id: u32) -> BackupRecord {
        BackupRecord {
            label: BackupLabel::parse(label).unwrap(),
            backup_type,
            backrest_format: 5,
            backrest_version: "1.0".to_string(),
            history_id,
            archive_start: None,
            archive_stop: None,
            lsn_start: None,
            lsn_stop: None,
            timestamp_start: Utc::now(),
            timestamp_stop: Utc::now(),
            prior: prior.map(|p| BackupLabel::parse(p).unwrap()),
            reference: None,
            info_size: 0,
            info_size_delta: 0,
            info_repo_size: 0,
            info_repo_size_delta: 0,
            error: None,
            options: BackupOptions::default(),
        }
    }

    fn repo_config(root: &Path) -> RepoConfig {
        RepoConfig {
            repo_key: "default".to_string(),
            backup_path: root.join("backup"),
            archive_path: root.join("archive"),
            stanza: "main".to_string(),
            retention: RetentionConfig {
                retention_full_type: RetentionFullType::Count,
                retention_full: Some(1),
                retention_diff: None,
                retention_archive: None,
                retention_archive_type: RetentionArchiveType::Diff,
                time_unit_days: 1,
            },
            cipher_passphrase: None,
        }
    }

    #[test]
    fn full_count_retention_keeps_last_n_and_dependents() {
        let dir = tmp("count");
        std::fs::create_dir_all(dir.join("backup/main")).unwrap();

        let mut backup_info = BackupInfo::new();
        backup_info.pg_set(15, 1, 1, 1);
        backup_info.add(record("20181119-152138F", BackupType::Full, None, 1)).unwrap();
        backup_info
            .add(record(
                "20181119-152138F_20181119-152200D",
                BackupType::Diff,
                Some("20181119-152138F"),
                1,
            ))
            .unwrap();
        backup_info.add(record("20181119-152800F", BackupType::Full, None, 1)).unwrap();
        backup_info.add(record("20181119-152900F", BackupType::Full, None, 1)).unwrap();
        backup_info
            .add(record(
                "20181119-152900F_20181119-153000I",
                BackupType::Incr,
                Some("20181119-152900F"),
                1,
            ))
            .unwrap();

        let repo = repo_config(&dir);
        let options = ExpireOptions::default();
        let report = expire(&mut backup_info, &ArchiveInfo::new(), &repo, &options).unwrap();

        assert_eq!(backup_info.current().count(), 2);
        assert!(backup_info
            .contains(&BackupLabel::parse("20181119-152900F").unwrap()));
        assert!(backup_info
            .contains(&BackupLabel::parse("20181119-152900F_20181119-153000I").unwrap()));
        assert!(!report.expired_labels.is_empty());
        assert!(report.log_lines.iter().any(|l| l
            == "expire full backup set: 20181119-152138F, 20181119-152138F_20181119-152200D"));
        assert!(report
            .log_lines
            .iter()
            .any(|l| l == "expire full backup 20181119-152800F"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn diff_retention_logs_plural_set_for_dependents() {
        let dir = tmp("diffplural");
        let mut backup_info = BackupInfo::new();
        backup_info.pg_set(15, 1, 1, 1);
        backup_info.add(record("20181119-152138F", BackupType::Full, None, 1)).unwrap();
        backup_info.add(record("20181119-152800F", BackupType::Full, None, 1)).unwrap();
        backup_info
            .add(record(
                "20181119-152800F_20181119-152152D",
                BackupType::Diff,
                Some("20181119-152800F"),
                1,
            ))
            .unwrap();
        backup_info
            .add(record(
                "20181119-152800F_20181119-152155I",
                BackupType::Incr,
                Some("20181119-152800F_20181119-152152D"),
                1,
            ))
            .unwrap();
        backup_info.add(record("20181119-152900F", BackupType::Full, None, 1)).unwrap();

        let mut repo = repo_config(&dir);
        repo.retention.retention_full = None;
        repo.retention.retention_diff = Some(1);
        let options = ExpireOptions::default();
        let report = expire(&mut backup_info, &ArchiveInfo::new(), &repo, &options).unwrap();

        assert!(report.log_lines.iter().any(|l| l
            == "expire diff backup set: 20181119-152800F_20181119-152152D, 20181119-152800F_20181119-152155I"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn diff_retention_logs_singular_form_without_dependents() {
        let dir = tmp("diffsingular");
        let mut backup_info = BackupInfo::new();
        backup_info.pg_set(15, 1, 1, 1);
        backup_info.add(record("20181119-152800F", BackupType::Full, None, 1)).unwrap();
        backup_info
            .add(record(
                "20181119-152800F_20181119-152152D",
                BackupType::Diff,
                Some("20181119-152800F"),
                1,
            ))
            .unwrap();
        backup_info.add(record("20181119-152900F", BackupType::Full, None, 1)).unwrap();

        let mut repo = repo_config(&dir);
        repo.retention.retention_full = None;
        repo.retention.retention_diff = Some(1);
        let options = ExpireOptions::default();
        let report = expire(&mut backup_info, &ArchiveInfo::new(), &repo, &options).unwrap();

        assert!(report
            .log_lines
            .iter()
            .any(|l| l == "expire diff backup 20181119-152800F_20181119-152152D"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn ad_hoc_expire_logs_plural_set_for_dependents() {
        let dir = tmp("adhocplural");
        let mut backup_info = BackupInfo::new();
        backup_info.pg_set(15, 1, 1, 1);
        backup_info.add(record("20181119-152138F", BackupType::Full, None, 1)).unwrap();
        backup_info
            .add(record(
                "20181119-152138F_20181119-152200D",
                BackupType::Diff,
                Some("20181119-152138F"),
                1,
            ))
            .unwrap();
        backup_info
            .add(record(
                "20181119-152138F_20181119-152300I",
                BackupType::Incr,
                Some("20181119-152138F_20181119-152200D"),
                1,
            ))
            .unwrap();
        backup_info.add(record("20181119-152900F", BackupType::Full, None, 1)).unwrap();

        let mut repo = repo_config(&dir);
        repo.retention.retention_full = None;
        let options = ExpireOptions {
            set: Some("20181119-152138F_20181119-152200D".to_string()),
            dry_run: false,
        };
        let report = expire(&mut backup_info, &ArchiveInfo::new(), &repo, &options).unwrap();

        assert!(report.log_lines.iter().any(|l| l
            == "expire adhoc backup set: 20181119-152138F_20181119-152200D, 20181119-152138F_20181119-152300I"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn full_time_retention_logs_plural_set_for_dependents() {
        let dir = tmp("fulltimeplural");
        let mut backup_info = BackupInfo::new();
        backup_info.pg_set(15, 1, 1, 1);

        let mut old_full = record("20180101-000000F", BackupType::Full, None, 1);
        old_full.timestamp_stop = Utc::now() - Duration::days(10);
        backup_info.add(old_full).unwrap();

        let mut old_diff = record(
            "20180101-000000F_20180101-010000D",
            BackupType::Diff,
            Some("20180101-000000F"),
            1,
        );
        old_diff.timestamp_stop = Utc::now() - Duration::days(10);
        backup_info.add(old_diff).unwrap();

        backup_info.add(record("20181119-152900F", BackupType::Full, None, 1)).unwrap();

        let mut repo = repo_config(&dir);
        repo.retention.retention_full_type = RetentionFullType::Time;
        repo.retention.retention_full = Some(1);
        repo.retention.time_unit_days = 1;
        let options = ExpireOptions::default();
        let report = expire(&mut backup_info, &ArchiveInfo::new(), &repo, &options).unwrap();

        assert!(report.log_lines.iter().any(|l| l
            == "expire time-based backup set: 20180101-000000F, 20180101-000000F_20180101-010000D"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn ad_hoc_expire_of_unknown_label_warns_without_removal() {
        let dir = tmp("unknown");
        let mut backup_info = BackupInfo::new();
        backup_info.pg_set(15, 1, 1, 1);
        backup_info.add(record("20181119-152138F", BackupType::Full, None, 1)).unwrap();

        let mut repo = repo_config(&dir);
        repo.retention.retention_full = None;
        let options = ExpireOptions {
            set: Some("20201119-123456F_20201119-234567I".to_string()),
            dry_run: false,
        };
        let report = expire(&mut backup_info, &ArchiveInfo::new(), &repo, &options).unwrap();
        assert!(report.expired_labels.is_empty());
        assert_eq!(backup_info.current().count(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn ad_hoc_expire_of_last_full_under_current_history_is_rejected() {
        let dir = tmp("lastfull");
        let mut backup_info = BackupInfo::new();
        backup_info.pg_set(15, 1, 1, 1);
        backup_info.add(record("20181119-152138F", BackupType::Full, None, 1)).unwrap();

        let mut repo = repo_config(&dir);
        repo.retention.retention_full = None;
        let options = ExpireOptions {
            set: Some("20181119-152138F".to_string()),
            dry_run: false,
        };
        let err = expire(&mut backup_info, &ArchiveInfo::new(), &repo, &options).unwrap_err();
        assert!(matches!(err, RepoError::BackupSetInvalid { .. }));
        assert_eq!(backup_info.current().count(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn idempotence_second_run_makes_no_changes() {
        let dir = tmp("idempotent");
        std::fs::create_dir_all(dir.join("backup/main")).unwrap();

        let mut backup_info = BackupInfo::new();
        backup_info.pg_set(15, 1, 1, 1);
        backup_info.add(record("20181119-152900F", BackupType::Full, None, 1)).unwrap();

        let mut repo = repo_config(&dir);
        repo.retention.retention_full = Some(5);
        let options = ExpireOptions::default();

        expire(&mut backup_info, &ArchiveInfo::new(), &repo, &options).unwrap();
        let before = backup_info.current().count();
        let report = expire(&mut backup_info, &ArchiveInfo::new(), &repo, &options).unwrap();
        assert_eq!(backup_info.current().count(), before);
        assert!(report.expired_labels.is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn dry_run_leaves_catalog_untouched() {
        let dir = tmp("dryrun");
        std::fs::create_dir_all(dir.join("backup/main")).unwrap();

        let mut backup_info = BackupInfo::new();
        backup_info.pg_set(15, 1, 1, 1);
        backup_info.add(record("20181119-152138F", BackupType::Full, None, 1)).unwrap();
        backup_info.add(record("20181119-152900F", BackupType::Full, None, 1)).unwrap();

        let repo = repo_config(&dir);
        let options = ExpireOptions {
            set: None,
            dry_run: true,
        };
        let report = expire(&mut backup_info, &ArchiveInfo::new(), &repo, &options).unwrap();
        assert_eq!(backup_info.current().count(), 2);
        assert!(report.log_lines.iter().all(|l| l.starts_with("[DRY-RUN]")));

        std::fs::remove_dir_all(&dir).ok();
    }
}
