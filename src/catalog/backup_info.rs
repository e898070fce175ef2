//! `backup.info`: an [`InfoPg`] history plus the map of known completed
//! backups (spec.md §2 item 4, §4.3).

use std::collections::BTreeMap;
use std::path::Path;

use pgvault_config::IniDocument;
use pgvault_types::{BackupLabel, BackupType, PgVersion, RepoError, SystemId};

use super::{read_cipher_pass, read_infopg, write_cipher_pass, write_infopg};
use crate::infopg::InfoPg;
use crate::record::BackupRecord;

#[derive(Debug, Clone, Default)]
pub struct BackupInfo {
    infopg: InfoPg,
    cipher_pass: Option<Vec<u8>>,
    current: BTreeMap<BackupLabel, BackupRecord>,
}

impl BackupInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn infopg(&self) -> &InfoPg {
        &self.infopg
    }

    pub fn cipher_pass(&self) -> Option<&[u8]> {
        self.cipher_pass.as_deref()
    }

    pub fn set_cipher_pass(&mut self, pass: Vec<u8>) {
        self.cipher_pass = Some(pass);
    }

    /// All known backups, ascending by label (the map's natural order,
    /// since [`BackupLabel`]'s `Ord` is lexical-by-timestamp).
    pub fn current(&self) -> impl Iterator<Item = &BackupRecord> {
        self.current.values()
    }

    pub fn find(&self, label: &BackupLabel) -> Result<&BackupRecord, RepoError> {
        self.current.get(label).ok_or_else(|| RepoError::Format {
            file: "backup.info".to_string(),
            reason: format!("backup '{label}' not found"),
        })
    }

    pub fn contains(&self, label: &BackupLabel) -> bool {
        self.current.contains_key(label)
    }

    /// Insert a new record. Requires `historyId` to be a known history
    /// entry and, for diff/incr, `prior` to already be present.
    pub fn add(&mut self, record: BackupRecord) -> Result<(), RepoError> {
        record.validate_type_invariant()?;
        self.infopg.find(record.history_id)?;
        if let Some(prior) = &record.prior {
            if !self.current.contains_key(prior) {
                return Err(RepoError::BackupSetInvalid {
                    reason: format!(
                        "backup '{}' references prior '{prior}' which is not in current[]",
                        record.label
                    ),
                });
            }
        }
        self.current.insert(record.label.clone(), record);
        Ok(())
    }

    /// Remove a label from the map. Dangling references held by surviving
    /// records are left as-is (spec.md §4.3) — this is purely a catalog
    /// edit, not a dependency check; callers in the expiration engine are
    /// responsible for computing dependency closures first.
    pub fn delete(&mut self, label: &BackupLabel) -> Option<BackupRecord> {
        self.current.remove(label)
    }

    /// Sorted labels, optionally restricted to one backup type.
    pub fn label_list(&self, type_filter: Option<BackupType>) -> Vec<BackupLabel> {
        self.current
            .values()
            .filter(|record| type_filter.map_or(true, |t| record.backup_type == t))
            .map(|record| record.label.clone())
            .collect()
    }

    /// Version/system-id and catalog/control coherence check against a live
    /// cluster read (spec.md §4.3).
    pub fn pg_check(
        &self,
        pg_version: PgVersion,
        system_id: SystemId,
        catalog_version: u64,
        control_version: u32,
    ) -> Result<(), RepoError> {
        let current = self.infopg.current()?;
        if current.pg_version != pg_version || current.system_id != system_id {
            return Err(RepoError::BackupMismatch {
                reason: "HINT: is this the correct stanza?".to_string(),
            });
        }
        if current.catalog_version != Some(catalog_version)
            || current.control_version != Some(control_version)
        {
            return Err(RepoError::BackupMismatch {
                reason: "HINT: the catalog or control version does not match - the repository may be corrupt".to_string(),
            });
        }
        Ok(())
    }

    /// Delegates to [`InfoPg::set`]; if the resulting identity differs from
    /// the previous current entry, `current[]` is cleared to protect
    /// against cross-cluster cross-talk (spec.md §4.3).
    pub fn pg_set(
        &mut self,
        pg_version: PgVersion,
        system_id: SystemId,
        catalog_version: u64,
        control_version: u32,
    ) {
        let previous = self.infopg.current().ok().cloned();
        self.infopg
            .set(pg_version, system_id, Some(catalog_version), Some(control_version));
        let changed = previous
            .map(|prev| {
                prev.pg_version != pg_version
                    || prev.system_id != system_id
                    || prev.catalog_version != Some(catalog_version)
                    || prev.control_version != Some(control_version)
            })
            .unwrap_or(false);
        if changed {
            self.current.clear();
        }
    }

    pub fn decode(bytes: &[u8], file: &str) -> Result<Self, RepoError> {
        let doc = IniDocument::decode(bytes, file)?;
        let infopg = read_infopg(&doc)?;
        let cipher_pass = read_cipher_pass(&doc)?;

        let mut current = BTreeMap::new();
        if let Some(section) = doc.section("backup:current") {
            for (label_str, value) in section.iter() {
                let label = BackupLabel::parse(label_str)?;
                let record: BackupRecord =
                    serde_json::from_value(value.clone()).map_err(|err| RepoError::Format {
                        file: file.to_string(),
                        reason: format!("backup '{label_str}' is malformed: {err}"),
                    })?;
                current.insert(label, record);
            }
        }

        Ok(BackupInfo {
            infopg,
            cipher_pass,
            current,
        })
    }

    pub fn encode(&self, file: &str) -> Result<Vec<u8>, RepoError> {
        let mut doc = IniDocument::new(file);

        let section = doc.section_mut("backup:current");
        for (label, record) in &self.current {
            let value = serde_json::to_value(record).map_err(|err| RepoError::Assert {
                reason: format!("backup record '{label}' failed to serialize: {err}"),
            })?;
            section.set(label.as_str(), value);
        }

        write_infopg(&mut doc, &self.infopg)?;
        write_cipher_pass(&mut doc, self.cipher_pass.as_deref());
        Ok(doc.encode())
    }

    /// Load `backup.info`/`backup.info.copy` from `stanza_dir` via the
    /// atomic primary/copy envelope (spec.md §4.1, §4.3): primary first,
    /// copy on any failure, both-fail surfaces as `FileMissingError`.
    /// `passphrase` is the user-level passphrase protecting the catalog
    /// itself, when the stanza is encrypted.
    pub fn load(stanza_dir: &Path, passphrase: Option<&[u8]>) -> Result<Self, RepoError> {
        let primary = stanza_dir.join("backup.info");
        let copy = stanza_dir.join("backup.info.copy");
        let value = pgvault_config::load_pair(&primary, &copy, |bytes, file| {
            let plaintext = pgvault_config::cipher_open(passphrase, bytes, file)?;
            Self::decode(&plaintext, file)
        })?;
        pgvault_config::warn_if_pair_diverges(&primary, &copy, "backup.info");
        Ok(value)
    }

    /// Write the copy, then the primary, so a reader that observes a torn
    /// primary always has a whole copy to fall back to.
    pub fn save(&self, stanza_dir: &Path, passphrase: Option<&[u8]>) -> Result<(), RepoError> {
        let primary = stanza_dir.join("backup.info");
        let copy = stanza_dir.join("backup.info.copy");
        let file = primary.display().to_string();
        let plaintext = self.encode(&file)?;
        let bytes = pgvault_config::cipher_seal(passphrase, &plaintext, &file)?;
        pgvault_config::save_pair(&primary, &copy, &bytes)
    }
}
