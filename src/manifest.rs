//! Per-backup manifest: the exact inventory of every path, file, and link
//! copied into one backup (spec.md §3, §4.4).

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use pgvault_config::IniDocument;
use pgvault_tools::scan::{self, EntryKind, ScannedEntry};
use pgvault_types::{BackupLabel, HistoryId, PgVersion, RepoError, SystemId};

use crate::infopg::InfoPg;
use crate::record::BackupOptions;

/// Ownership/permission attributes shared by paths, files, and links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerAttrs {
    pub user: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Path,
    Link,
}

/// A root entry of the backup: always `pg_data`, plus optional link targets
/// for config files and tablespaces.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub target_type: TargetType,
    pub path: Option<String>,
    pub tablespace_id: Option<String>,
    pub tablespace_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PathRecord {
    pub attrs: OwnerAttrs,
}

#[derive(Debug, Clone, Default)]
pub struct FileRecord {
    pub checksum: String,
    pub size: u64,
    pub timestamp: i64,
    pub reference: Option<BackupLabel>,
    pub checksum_page: Option<bool>,
    pub checksum_page_error: Option<Vec<u32>>,
    pub repo_size: Option<u64>,
    pub bni: Option<u32>,
    pub bno: Option<u32>,
    pub rck: Option<String>,
    pub attrs: OwnerAttrs,
    pub master: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct LinkRecord {
    pub destination: String,
    pub user: Option<String>,
    pub group: Option<String>,
}

/// A database known to the cluster at backup time.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseRef {
    pub db_id: u32,
    pub db_last_system_id: u32,
}

/// The per-backup manifest itself: self-describing identity plus the four
/// tables of targets/paths/files/links.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub label: BackupLabel,
    pub pg_version: PgVersion,
    pub system_id: SystemId,
    pub history_id: HistoryId,
    pub timestamp_start: DateTime<Utc>,
    pub timestamp_stop: Option<DateTime<Utc>>,
    pub online: bool,
    pub options: BackupOptions,
    pub databases: BTreeMap<String, DatabaseRef>,
    pub targets: Vec<Target>,
    pub paths: BTreeMap<String, PathRecord>,
    pub files: BTreeMap<String, FileRecord>,
    pub links: BTreeMap<String, LinkRecord>,
}

impl Manifest {
    /// Walk the cluster's data directory and build a fresh manifest. The
    /// copy phase runs afterward and fills in checksums/repo-sizes via
    /// [`Manifest::file_update`].
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        data_directory: &Path,
        pg_version: PgVersion,
        system_id: SystemId,
        history_id: HistoryId,
        timestamp_start: DateTime<Utc>,
        online: bool,
        options: BackupOptions,
        excludes: &[String],
        tablespace_map: &BTreeMap<String, String>,
    ) -> Result<Self, RepoError> {
        let entries = scan::scan_data_directory(data_directory, excludes)
            .map_err(|err| RepoError::Other(err.context("building manifest")))?;

        let mut manifest = Manifest {
            label: placeholder_label(timestamp_start),
            pg_version,
            system_id,
            history_id,
            timestamp_start,
            timestamp_stop: None,
            online,
            options,
            databases: BTreeMap::new(),
            targets: vec![Target {
                name: "pg_data".to_string(),
                target_type: TargetType::Path,
                path: Some(data_directory.to_string_lossy().into_owned()),
                tablespace_id: None,
                tablespace_name: None,
            }],
            paths: BTreeMap::new(),
            files: BTreeMap::new(),
            links: BTreeMap::new(),
        };

        for entry in entries {
            manifest.record_scanned_entry(entry, tablespace_map)?;
        }

        Ok(manifest)
    }

    fn record_scanned_entry(
        &mut self,
        entry: ScannedEntry,
        tablespace_map: &BTreeMap<String, String>,
    ) -> Result<(), RepoError> {
        match entry.kind {
            EntryKind::Dir => {
                self.paths.insert(
                    entry.rel_path,
                    PathRecord {
                        attrs: OwnerAttrs {
                            user: Some(entry.uid.to_string()),
                            group: Some(entry.gid.to_string()),
                            mode: Some(entry.mode),
                        },
                    },
                );
            }
            EntryKind::File => {
                self.files.insert(
                    entry.rel_path,
                    FileRecord {
                        checksum: String::new(),
                        size: entry.size,
                        timestamp: entry.mtime,
                        reference: None,
                        checksum_page: None,
                        checksum_page_error: None,
                        repo_size: None,
                        bni: None,
                        bno: None,
                        rck: None,
                        attrs: OwnerAttrs {
                            user: Some(entry.uid.to_string()),
                            group: Some(entry.gid.to_string()),
                            mode: Some(entry.mode),
                        },
                        master: None,
                    },
                );
            }
            EntryKind::Link => {
                let destination = entry
                    .link_target
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();

                if destination.starts_with("pg_data") || destination.starts_with('/') && destination.contains("/pg_data/") {
                    return Err(RepoError::OptionInvalidValue {
                        value: entry.rel_path.clone(),
                        reason: "link target points inside pg_data".to_string(),
                    });
                }

                if let Some(oid) = entry.rel_path.strip_prefix("pg_tblspc/") {
                    let tablespace_name = tablespace_map.get(oid).cloned();
                    self.targets.push(Target {
                        name: entry.rel_path.clone(),
                        target_type: TargetType::Link,
                        path: Some(destination.clone()),
                        tablespace_id: Some(oid.to_string()),
                        tablespace_name,
                    });
                }

                self.links.insert(
                    entry.rel_path,
                    LinkRecord {
                        destination,
                        user: Some(entry.uid.to_string()),
                        group: Some(entry.gid.to_string()),
                    },
                );
            }
        }
        Ok(())
    }

    pub fn file_update(
        &mut self,
        name: &str,
        size: u64,
        repo_size: Option<u64>,
        checksum: String,
        timestamp: i64,
        checksum_page: Option<bool>,
        checksum_page_error: Option<Vec<u32>>,
        bni: Option<u32>,
        bno: Option<u32>,
        rck: Option<String>,
    ) -> Result<(), RepoError> {
        let file = self.files.get_mut(name).ok_or_else(|| RepoError::Assert {
            reason: format!("fileUpdate on unknown file '{name}'"),
        })?;
        file.size = size;
        file.repo_size = repo_size;
        file.checksum = checksum;
        file.timestamp = timestamp;
        file.checksum_page = checksum_page;
        file.checksum_page_error = checksum_page_error;
        file.bni = bni;
        file.bno = bno;
        file.rck = rck;
        Ok(())
    }

    pub fn link_update(&mut self, name: &str, new_destination: String) -> Result<(), RepoError> {
        let link = self.links.get_mut(name).ok_or_else(|| RepoError::Assert {
            reason: format!("linkUpdate on unknown link '{name}'"),
        })?;
        link.destination = new_destination;
        Ok(())
    }

    /// Repairs a target's dereferenced `path` (spec.md §4.4
    /// `targetUpdate(name, newPath|newFile)`): this manifest's `Target`
    /// tracks both a directory target's path and a single-file target's
    /// path through the same field, so either case is just a new `path`.
    pub fn target_update(&mut self, name: &str, new_path: String) -> Result<(), RepoError> {
        let target = self
            .targets
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| RepoError::Assert {
                reason: format!("targetUpdate on unknown target '{name}'"),
            })?;
        target.path = Some(new_path);
        Ok(())
    }

    pub fn file_remove(&mut self, name: &str) {
        self.files.remove(name);
    }

    pub fn link_remove(&mut self, name: &str) {
        self.links.remove(name);
    }

    pub fn target_remove(&mut self, name: &str) {
        self.targets.retain(|t| t.name != name);
    }

    /// Rewrite `reference` on files that are byte-identical (by checksum)
    /// to a file already present in one of `prior` manifests — the
    /// differential/incremental sharing policy (spec.md §4.4, §4.6).
    pub fn apply_references(&mut self, prior: &[(&BackupLabel, &Manifest)]) {
        for (name, file) in self.files.iter_mut() {
            if file.checksum.is_empty() {
                continue;
            }
            for (label, manifest) in prior {
                if let Some(prior_file) = manifest.files.get(name) {
                    if prior_file.checksum == file.checksum && prior_file.size == file.size {
                        file.reference = Some((*label).clone());
                        break;
                    }
                }
            }
        }
    }

    /// Checks that this manifest's identity triple is present in `infopg`.
    /// A manifest that fails this is *unusable*: its owning backup is
    /// marked invalid and skipped, without this call itself failing the
    /// caller's whole operation (spec.md §4.4).
    pub fn pg_validate(&self, infopg: &InfoPg) -> bool {
        match infopg.find(self.history_id) {
            Ok(entry) => entry.pg_version == self.pg_version && entry.system_id == self.system_id,
            Err(_) => false,
        }
    }

    pub fn encode(&self, file: &str) -> Result<Vec<u8>, RepoError> {
        let mut doc = IniDocument::new(file);

        let backup = doc.section_mut("backup");
        backup.set("backup-label", json!(self.label.as_str()));
        backup.set("backrest-format", json!(5));
        backup.set("backrest-version", json!(env!("CARGO_PKG_VERSION")));
        backup.set("backup-timestamp-start", json!(self.timestamp_start.timestamp()));
        if let Some(stop) = self.timestamp_stop {
            backup.set("backup-timestamp-stop", json!(stop.timestamp()));
        }

        let backup_db = doc.section_mut("backup:db");
        backup_db.set("db-id", json!(self.history_id));
        backup_db.set("db-version", json!(self.pg_version));
        backup_db.set("db-system-id", json!(self.system_id));

        let option = doc.section_mut("backup:option");
        option.set("option-archive-check", json!(self.options.archive_check));
        option.set("option-archive-copy", json!(self.options.archive_copy));
        option.set("option-backup-standby", json!(self.options.backup_standby));
        option.set("option-checksum-page", json!(self.options.checksum_page));
        option.set("option-compress", json!(self.options.compress));
        option.set("option-hardlink", json!(self.options.hardlink));
        option.set("option-online", json!(self.options.online));

        let target_section = doc.section_mut("backup:target");
        for target in &self.targets {
            let mut obj = serde_json::Map::new();
            obj.insert(
                "type".to_string(),
                json!(match target.target_type {
                    TargetType::Path => "path",
                    TargetType::Link => "link",
                }),
            );
            if let Some(path) = &target.path {
                obj.insert("path".to_string(), json!(path));
            }
            if let Some(id) = &target.tablespace_id {
                obj.insert("tablespace-id".to_string(), json!(id));
            }
            if let Some(name) = &target.tablespace_name {
                obj.insert("tablespace-name".to_string(), json!(name));
            }
            target_section.set(&target.name, Value::Object(obj));
        }

        let db_section = doc.section_mut("db");
        for (name, db) in &self.databases {
            db_section.set(
                name,
                json!({ "db-id": db.db_id, "db-last-system-id": db.db_last_system_id }),
            );
        }

        let file_default = most_common_file_attrs(&self.files);
        let file_section = doc.section_mut("target:file");
        for (name, file) in &self.files {
            file_section.set(name, encode_file_record(file, &file_default));
        }
        encode_owner_default(doc.section_mut("target:file:default"), &file_default);

        let link_default = most_common_link_attrs(&self.links);
        let link_section = doc.section_mut("target:link");
        for (name, link) in &self.links {
            link_section.set(name, encode_link_record(link, &link_default));
        }
        let ld = doc.section_mut("target:link:default");
        if let Some(user) = &link_default.0 {
            ld.set("user", json!(user));
        }
        if let Some(group) = &link_default.1 {
            ld.set("group", json!(group));
        }

        let path_default = most_common_path_attrs(&self.paths);
        let path_section = doc.section_mut("target:path");
        for (name, path) in &self.paths {
            path_section.set(name, encode_owner_attrs(&path.attrs, &path_default));
        }
        encode_owner_default(doc.section_mut("target:path:default"), &path_default);

        Ok(doc.encode())
    }

    pub fn decode(bytes: &[u8], file: &str, label: BackupLabel) -> Result<Self, RepoError> {
        let doc = IniDocument::decode(bytes, file)?;

        let backup_db = doc.section("backup:db").ok_or_else(|| RepoError::Format {
            file: file.to_string(),
            reason: "missing [backup:db]".to_string(),
        })?;
        let history_id = backup_db
            .get("db-id")
            .and_then(Value::as_u64)
            .ok_or_else(|| RepoError::Format {
                file: file.to_string(),
                reason: "missing backup:db db-id".to_string(),
            })? as HistoryId;
        let pg_version = backup_db
            .get("db-version")
            .and_then(Value::as_u64)
            .ok_or_else(|| RepoError::Format {
                file: file.to_string(),
                reason: "missing backup:db db-version".to_string(),
            })? as PgVersion;
        let system_id = backup_db
            .get("db-system-id")
            .and_then(Value::as_u64)
            .ok_or_else(|| RepoError::Format {
                file: file.to_string(),
                reason: "missing backup:db db-system-id".to_string(),
            })?;

        let backup = doc.section("backup").ok_or_else(|| RepoError::Format {
            file: file.to_string(),
            reason: "missing [backup]".to_string(),
        })?;
        let timestamp_start = backup
            .get("backup-timestamp-start")
            .and_then(Value::as_i64)
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .ok_or_else(|| RepoError::Format {
                file: file.to_string(),
                reason: "missing or invalid backup-timestamp-start".to_string(),
            })?;
        let timestamp_stop = backup
            .get("backup-timestamp-stop")
            .and_then(Value::as_i64)
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        let option = doc.section("backup:option");
        let options = BackupOptions {
            archive_check: bool_opt(option, "option-archive-check", true),
            archive_copy: bool_opt(option, "option-archive-copy", false),
            backup_standby: bool_opt(option, "option-backup-standby", false),
            checksum_page: bool_opt(option, "option-checksum-page", false),
            compress: bool_opt(option, "option-compress", true),
            hardlink: bool_opt(option, "option-hardlink", false),
            online: bool_opt(option, "option-online", true),
        };

        let mut targets = Vec::new();
        if let Some(section) = doc.section("backup:target") {
            for (name, value) in section.iter() {
                let obj = value.as_object().ok_or_else(|| RepoError::Format {
                    file: file.to_string(),
                    reason: format!("target '{name}' is not an object"),
                })?;
                let target_type = match obj.get("type").and_then(Value::as_str) {
                    Some("path") => TargetType::Path,
                    Some("link") => TargetType::Link,
                    _ => {
                        return Err(RepoError::Format {
                            file: file.to_string(),
                            reason: format!("target '{name}' has unknown type"),
                        })
                    }
                };
                targets.push(Target {
                    name: name.to_string(),
                    target_type,
                    path: obj.get("path").and_then(Value::as_str).map(str::to_string),
                    tablespace_id: obj
                        .get("tablespace-id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    tablespace_name: obj
                        .get("tablespace-name")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
        }

        let mut databases = BTreeMap::new();
        if let Some(section) = doc.section("db") {
            for (name, value) in section.iter() {
                let obj = value.as_object().ok_or_else(|| RepoError::Format {
                    file: file.to_string(),
                    reason: format!("database '{name}' is not an object"),
                })?;
                let db_id = obj.get("db-id").and_then(Value::as_u64).unwrap_or(0) as u32;
                let db_last_system_id =
                    obj.get("db-last-system-id").and_then(Value::as_u64).unwrap_or(0) as u32;
                databases.insert(
                    name.to_string(),
                    DatabaseRef {
                        db_id,
                        db_last_system_id,
                    },
                );
            }
        }

        let file_default = doc
            .section("target:file:default")
            .map(decode_owner_default)
            .unwrap_or_default();
        let mut files = BTreeMap::new();
        if let Some(section) = doc.section("target:file") {
            for (name, value) in section.iter() {
                files.insert(name.to_string(), decode_file_record(value, &file_default, file)?);
            }
        }

        let link_default = doc.section("target:link:default");
        let link_default_user = link_default
            .and_then(|s| s.get("user"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let link_default_group = link_default
            .and_then(|s| s.get("group"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut links = BTreeMap::new();
        if let Some(section) = doc.section("target:link") {
            for (name, value) in section.iter() {
                let obj = value.as_object().ok_or_else(|| RepoError::Format {
                    file: file.to_string(),
                    reason: format!("link '{name}' is not an object"),
                })?;
                let destination = obj
                    .get("destination")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RepoError::Format {
                        file: file.to_string(),
                        reason: format!("link '{name}' missing destination"),
                    })?
                    .to_string();
                let user = obj
                    .get("user")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| link_default_user.clone());
                let group = obj
                    .get("group")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| link_default_group.clone());
                links.insert(
                    name.to_string(),
                    LinkRecord {
                        destination,
                        user,
                        group,
                    },
                );
            }
        }

        let path_default = doc
            .section("target:path:default")
            .map(decode_owner_default)
            .unwrap_or_default();
        let mut paths = BTreeMap::new();
        if let Some(section) = doc.section("target:path") {
            for (name, value) in section.iter() {
                paths.insert(
                    name.to_string(),
                    PathRecord {
                        attrs: decode_owner_attrs(value, &path_default),
                    },
                );
            }
        }

        Ok(Manifest {
            label,
            pg_version,
            system_id,
            history_id,
            timestamp_start,
            timestamp_stop,
            online: options.online,
            options,
            databases,
            targets,
            paths,
            files,
            links,
        })
    }

    /// Load `backup.manifest`/`backup.manifest.copy` from `backup_dir`
    /// (spec.md §4.1, §4.3, §4.4). `label` is the directory name the
    /// manifest was found under — the file itself does not self-identify
    /// its own label. `cipher_pass` is the stanza's payload sub-passphrase
    /// (`BackupInfo::cipher_pass`), when the stanza is encrypted.
    pub fn load(backup_dir: &Path, label: BackupLabel, cipher_pass: Option<&[u8]>) -> Result<Self, RepoError> {
        let primary = backup_dir.join("backup.manifest");
        let copy = backup_dir.join("backup.manifest.copy");
        let value = pgvault_config::load_pair(&primary, &copy, |bytes, file| {
            let plaintext = pgvault_config::cipher_open(cipher_pass, bytes, file)?;
            Self::decode(&plaintext, file, label.clone())
        })?;
        pgvault_config::warn_if_pair_diverges(&primary, &copy, "backup.manifest");
        Ok(value)
    }

    pub fn save(&self, backup_dir: &Path, cipher_pass: Option<&[u8]>) -> Result<(), RepoError> {
        let primary = backup_dir.join("backup.manifest");
        let copy = backup_dir.join("backup.manifest.copy");
        let file = primary.display().to_string();
        let plaintext = self.encode(&file)?;
        let bytes = pgvault_config::cipher_seal(cipher_pass, &plaintext, &file)?;
        pgvault_config::save_pair(&primary, &copy, &bytes)
    }
}

fn placeholder_label(timestamp: DateTime<Utc>) -> BackupLabel {
    BackupLabel::parse(&timestamp.format("%Y%m%d-%H%M%SF").to_string())
        .expect("formatted timestamp always matches the full-backup label grammar")
}

fn bool_opt(section: Option<&pgvault_config::IniSection>, key: &str, default: bool) -> bool {
    section
        .and_then(|s| s.get(key))
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

fn most_common_file_attrs(files: &BTreeMap<String, FileRecord>) -> OwnerAttrs {
    attrs_from_triple(scan::most_common_attrs(files.values().filter_map(triple_of_owner)))
}

fn most_common_path_attrs(paths: &BTreeMap<String, PathRecord>) -> OwnerAttrs {
    attrs_from_triple(scan::most_common_attrs(
        paths.values().filter_map(|p| triple_of(&p.attrs)),
    ))
}

fn most_common_link_attrs(
    links: &BTreeMap<String, LinkRecord>,
) -> (Option<String>, Option<String>) {
    use std::collections::HashMap;
    let mut counts: HashMap<(String, String), usize> = HashMap::new();
    for link in links.values() {
        if let (Some(user), Some(group)) = (&link.user, &link.group) {
            *counts.entry((user.clone(), group.clone())).or_insert(0) += 1;
        }
    }
    match counts.into_iter().max_by_key(|(_, c)| *c) {
        Some(((user, group), _)) => (Some(user), Some(group)),
        None => (None, None),
    }
}

fn triple_of_owner(file: &FileRecord) -> Option<(u32, u32, u32)> {
    triple_of(&file.attrs)
}

fn triple_of(attrs: &OwnerAttrs) -> Option<(u32, u32, u32)> {
    match (&attrs.user, &attrs.group, attrs.mode) {
        (Some(user), Some(group), Some(mode)) => {
            Some((user.parse().ok()?, group.parse().ok()?, mode))
        }
        _ => None,
    }
}

fn attrs_from_triple(triple: Option<(u32, u32, u32)>) -> OwnerAttrs {
    match triple {
        Some((user, group, mode)) => OwnerAttrs {
            user: Some(user.to_string()),
            group: Some(group.to_string()),
            mode: Some(mode),
        },
        None => OwnerAttrs::default(),
    }
}

fn encode_owner_attrs(attrs: &OwnerAttrs, default: &OwnerAttrs) -> Value {
    let mut obj = serde_json::Map::new();
    if attrs.user != default.user {
        if let Some(user) = &attrs.user {
            obj.insert("user".to_string(), json!(user));
        }
    }
    if attrs.group != default.group {
        if let Some(group) = &attrs.group {
            obj.insert("group".to_string(), json!(group));
        }
    }
    if attrs.mode != default.mode {
        if let Some(mode) = attrs.mode {
            obj.insert("mode".to_string(), json!(format!("{mode:04o}")));
        }
    }
    Value::Object(obj)
}

fn encode_owner_default(section: &mut pgvault_config::IniSection, default: &OwnerAttrs) {
    if let Some(user) = &default.user {
        section.set("user", json!(user));
    }
    if let Some(group) = &default.group {
        section.set("group", json!(group));
    }
    if let Some(mode) = default.mode {
        section.set("mode", json!(format!("{mode:04o}")));
    }
}

fn decode_owner_default(section: &pgvault_config::IniSection) -> OwnerAttrs {
    OwnerAttrs {
        user: section.get("user").and_then(Value::as_str).map(str::to_string),
        group: section.get("group").and_then(Value::as_str).map(str::to_string),
        mode: section
            .get("mode")
            .and_then(Value::as_str)
            .and_then(|m| u32::from_str_radix(m, 8).ok()),
    }
}

fn decode_owner_attrs(value: &Value, default: &OwnerAttrs) -> OwnerAttrs {
    let obj = value.as_object();
    OwnerAttrs {
        user: obj
            .and_then(|o| o.get("user"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| default.user.clone()),
        group: obj
            .and_then(|o| o.get("group"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| default.group.clone()),
        mode: obj
            .and_then(|o| o.get("mode"))
            .and_then(Value::as_str)
            .and_then(|m| u32::from_str_radix(m, 8).ok())
            .or(default.mode),
    }
}

fn encode_file_record(file: &FileRecord, default: &OwnerAttrs) -> Value {
    let mut obj = match encode_owner_attrs(&file.attrs, default) {
        Value::Object(obj) => obj,
        _ => unreachable!(),
    };
    obj.insert("checksum".to_string(), json!(file.checksum));
    obj.insert("size".to_string(), json!(file.size));
    obj.insert("timestamp".to_string(), json!(file.timestamp));
    if let Some(reference) = &file.reference {
        obj.insert("reference".to_string(), json!(reference.as_str()));
    }
    if let Some(checksum_page) = file.checksum_page {
        obj.insert("checksum-page".to_string(), json!(checksum_page));
    }
    if let Some(errors) = &file.checksum_page_error {
        obj.insert("checksum-page-error".to_string(), json!(errors));
    }
    if let Some(repo_size) = file.repo_size {
        obj.insert("repo-size".to_string(), json!(repo_size));
    }
    if let Some(bni) = file.bni {
        obj.insert("bni".to_string(), json!(bni));
    }
    if let Some(bno) = file.bno {
        obj.insert("bno".to_string(), json!(bno));
    }
    if let Some(rck) = &file.rck {
        obj.insert("rck".to_string(), json!(rck));
    }
    if let Some(master) = file.master {
        obj.insert("master".to_string(), json!(master));
    }
    Value::Object(obj)
}

fn decode_file_record(value: &Value, default: &OwnerAttrs, file: &str) -> Result<FileRecord, RepoError> {
    let obj = value.as_object().ok_or_else(|| RepoError::Format {
        file: file.to_string(),
        reason: "file record is not an object".to_string(),
    })?;
    Ok(FileRecord {
        checksum: obj
            .get("checksum")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        size: obj.get("size").and_then(Value::as_u64).unwrap_or(0),
        timestamp: obj.get("timestamp").and_then(Value::as_i64).unwrap_or(0),
        reference: obj
            .get("reference")
            .and_then(Value::as_str)
            .and_then(|s| BackupLabel::parse(s).ok()),
        checksum_page: obj.get("checksum-page").and_then(Value::as_bool),
        checksum_page_error: obj.get("checksum-page-error").and_then(|v| {
            v.as_array()
                .map(|arr| arr.iter().filter_map(|e| e.as_u64().map(|n| n as u32)).collect())
        }),
        repo_size: obj.get("repo-size").and_then(Value::as_u64),
        bni: obj.get("bni").and_then(Value::as_u64).map(|v| v as u32),
        bno: obj.get("bno").and_then(Value::as_u64).map(|v| v as u32),
        rck: obj.get("rck").and_then(Value::as_str).map(str::to_string),
        attrs: decode_owner_attrs(value, default),
        master: obj.get("master").and_then(Value::as_bool),
    })
}

fn encode_link_record(link: &LinkRecord, default: &(Option<String>, Option<String>)) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("destination".to_string(), json!(link.destination));
    if link.user != default.0 {
        if let Some(user) = &link.user {
            obj.insert("user".to_string(), json!(user));
        }
    }
    if link.group != default.1 {
        if let Some(group) = &link.group {
            obj.insert("group".to_string(), json!(group));
        }
    }
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_manifest() -> Manifest {
        Manifest {
            label: BackupLabel::parse("20230101-000000F").unwrap(),
            pg_version: 15,
            system_id: 1,
            history_id: 1,
            timestamp_start: Utc::now(),
            timestamp_stop: None,
            online: true,
            options: BackupOptions::default(),
            databases: BTreeMap::new(),
            targets: vec![Target {
                name: "pg_data".to_string(),
                target_type: TargetType::Path,
                path: Some("/var/lib/pg".to_string()),
                tablespace_id: None,
                tablespace_name: None,
            }],
            paths: BTreeMap::new(),
            files: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    #[test]
    fn save_then_load_round_trips_through_the_file_pair() {
        let dir = std::env::temp_dir().join(format!("pgvault-manifest-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut manifest = empty_manifest();
        manifest.files.insert(
            "PG_VERSION".to_string(),
            FileRecord {
                checksum: "abc123".to_string(),
                size: 3,
                ..Default::default()
            },
        );
        manifest.save(&dir, None).unwrap();

        assert!(dir.join("backup.manifest").exists());
        let loaded = Manifest::load(&dir, manifest.label.clone(), None).unwrap();
        assert_eq!(loaded.files.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn save_then_load_round_trips_when_encrypted() {
        let dir = std::env::temp_dir().join(format!("pgvault-manifest-enc-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut manifest = empty_manifest();
        manifest.files.insert(
            "PG_VERSION".to_string(),
            FileRecord {
                checksum: "abc123".to_string(),
                size: 3,
                ..Default::default()
            },
        );
        manifest.save(&dir, Some(b"sub passphrase")).unwrap();

        let loaded = Manifest::load(&dir, manifest.label.clone(), Some(b"sub passphrase")).unwrap();
        assert_eq!(loaded.files.len(), 1);

        assert!(Manifest::load(&dir, manifest.label.clone(), None).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn roundtrips_through_codec() {
        let mut manifest = empty_manifest();
        manifest.files.insert(
            "PG_VERSION".to_string(),
            FileRecord {
                checksum: "abc123".to_string(),
                size: 3,
                timestamp: 1_700_000_000,
                attrs: OwnerAttrs {
                    user: Some("1000".to_string()),
                    group: Some("1000".to_string()),
                    mode: Some(0o600),
                },
                ..Default::default()
            },
        );

        let bytes = manifest.encode("backup.manifest").unwrap();
        let decoded = Manifest::decode(&bytes, "backup.manifest", manifest.label.clone()).unwrap();
        assert_eq!(decoded.files.len(), 1);
        assert_eq!(decoded.files["PG_VERSION"].checksum, "abc123");
    }

    #[test]
    fn file_update_fills_copy_phase_metadata() {
        let mut manifest = empty_manifest();
        manifest.files.insert("f".to_string(), FileRecord::default());
        manifest
            .file_update("f", 42, Some(40), "deadbeef".to_string(), 1700, None, None, None, None, None)
            .unwrap();
        assert_eq!(manifest.files["f"].checksum, "deadbeef");
        assert_eq!(manifest.files["f"].repo_size, Some(40));
    }

    #[test]
    fn target_update_repairs_dereferenced_path() {
        let mut manifest = empty_manifest();
        manifest.targets.push(Target {
            name: "pg_tblspc/16401".to_string(),
            target_type: TargetType::Link,
            path: Some("/old/tablespace/path".to_string()),
            tablespace_id: Some("16401".to_string()),
            tablespace_name: Some("ts1".to_string()),
        });

        manifest
            .target_update("pg_tblspc/16401", "/new/tablespace/path".to_string())
            .unwrap();

        let target = manifest.targets.iter().find(|t| t.name == "pg_tblspc/16401").unwrap();
        assert_eq!(target.path.as_deref(), Some("/new/tablespace/path"));
    }

    #[test]
    fn target_update_on_unknown_target_errors() {
        let mut manifest = empty_manifest();
        assert!(manifest.target_update("missing", "/x".to_string()).is_err());
    }

    #[test]
    fn pg_validate_rejects_unknown_history() {
        let manifest = empty_manifest();
        let infopg = InfoPg::new();
        assert!(!manifest.pg_validate(&infopg));
    }

    #[test]
    fn pg_validate_accepts_matching_history() {
        let mut manifest = empty_manifest();
        manifest.history_id = 1;
        let mut infopg = InfoPg::new();
        infopg.set(15, 1, None, None);
        assert!(manifest.pg_validate(&infopg));
    }

    #[test]
    fn apply_references_links_unchanged_files_to_prior_backup() {
        let mut prior = empty_manifest();
        prior.label = BackupLabel::parse("20230101-000000F").unwrap();
        prior.files.insert(
            "f".to_string(),
            FileRecord {
                checksum: "same".to_string(),
                size: 10,
                ..Default::default()
            },
        );

        let mut current = empty_manifest();
        current.label = BackupLabel::parse("20230101-000000F_20230101-010000I").unwrap();
        current.files.insert(
            "f".to_string(),
            FileRecord {
                checksum: "same".to_string(),
                size: 10,
                ..Default::default()
            },
        );

        let prior_label = prior.label.clone();
        current.apply_references(&[(&prior_label, &prior)]);
        assert_eq!(current.files["f"].reference, Some(prior_label));
    }
}
