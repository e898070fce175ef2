//! `archive.info`: an [`InfoPg`] history plus the WAL stream's cipher
//! sub-passphrase (spec.md §2 item 3, §4.3).

use std::path::Path;

use pgvault_config::IniDocument;
use pgvault_types::{HistoryId, PgVersion, RepoError, SystemId};

use super::{read_cipher_pass, read_infopg, write_cipher_pass, write_infopg};
use crate::infopg::InfoPg;

#[derive(Debug, Clone, Default)]
pub struct ArchiveInfo {
    infopg: InfoPg,
    cipher_pass: Option<Vec<u8>>,
}

impl ArchiveInfo {
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

    /// Find the `historyId` whose entry matches `(pgVersion, systemId)`.
    pub fn pg_check(&self, pg_version: PgVersion, system_id: SystemId) -> Result<HistoryId, RepoError> {
        self.infopg
            .entries()
            .iter()
            .find(|e| e.pg_version == pg_version && e.system_id == system_id)
            .map(|e| e.history_id)
            .ok_or_else(|| RepoError::BackupMismatch {
                reason: format!(
                    "no archive.info history entry matches pgVersion={pg_version}, systemId={system_id}"
                ),
            })
    }

    /// Delegates to [`InfoPg::set`], the upgrade primitive.
    pub fn pg_set(&mut self, pg_version: PgVersion, system_id: SystemId) {
        self.infopg.set(pg_version, system_id, None, None);
    }

    pub fn decode(bytes: &[u8], file: &str) -> Result<Self, RepoError> {
        let doc = IniDocument::decode(bytes, file)?;
        let infopg = read_infopg(&doc)?;
        let cipher_pass = read_cipher_pass(&doc)?;
        Ok(ArchiveInfo { infopg, cipher_pass })
    }

    pub fn encode(&self, file: &str) -> Result<Vec<u8>, RepoError> {
        let mut doc = IniDocument::new(file);
        write_infopg(&mut doc, &self.infopg)?;
        write_cipher_pass(&mut doc, self.cipher_pass.as_deref());
        Ok(doc.encode())
    }

    /// Load `archive.info`/`archive.info.copy` from `stanza_dir` (spec.md
    /// §4.1, §4.3): primary first, copy on any failure. `passphrase` is the
    /// user-level passphrase protecting the catalog itself, when the stanza
    /// is encrypted; it is unrelated to the sub-passphrase the catalog
    /// carries for the WAL stream.
    pub fn load(stanza_dir: &Path, passphrase: Option<&[u8]>) -> Result<Self, RepoError> {
        let primary = stanza_dir.join("archive.info");
        let copy = stanza_dir.join("archive.info.copy");
        let value = pgvault_config::load_pair(&primary, &copy, |bytes, file| {
            let plaintext = pgvault_config::cipher_open(passphrase, bytes, file)?;
            Self::decode(&plaintext, file)
        })?;
        pgvault_config::warn_if_pair_diverges(&primary, &copy, "archive.info");
        Ok(value)
    }

    pub fn save(&self, stanza_dir: &Path, passphrase: Option<&[u8]>) -> Result<(), RepoError> {
        let primary = stanza_dir.join("archive.info");
        let copy = stanza_dir.join("archive.info.copy");
        let file = primary.display().to_string();
        let plaintext = self.encode(&file)?;
        let bytes = pgvault_config::cipher_seal(passphrase, &plaintext, &file)?;
        pgvault_config::save_pair(&primary, &copy, &bytes)
    }
}
