//! The append-only list of historical cluster identities (spec.md §4.2).
//!
//! Both catalogs embed one of these: `archive.info` tracks only
//! `(historyId, pgVersion, systemId)`, while `backup.info` additionally
//! carries `catalogVersion`/`controlVersion`. Rather than two structs, the
//! catalog/control fields are optional here and simply left `None` by
//! archive.info's usage.

use serde::{Deserialize, Serialize};

use pgvault_types::{HistoryId, PgVersion, RepoError, SystemId};

/// One era of the cluster's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub history_id: HistoryId,
    pub pg_version: PgVersion,
    pub system_id: SystemId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_version: Option<u32>,
}

/// The ordered, append-only history itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfoPg {
    entries: Vec<HistoryEntry>,
}

impl InfoPg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        InfoPg { entries }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry with the greatest `historyId`.
    pub fn current(&self) -> Result<&HistoryEntry, RepoError> {
        self.entries
            .iter()
            .max_by_key(|entry| entry.history_id)
            .ok_or_else(|| RepoError::Format {
                file: "db/db:history".to_string(),
                reason: "history is empty".to_string(),
            })
    }

    pub fn find(&self, history_id: HistoryId) -> Result<&HistoryEntry, RepoError> {
        self.entries
            .iter()
            .find(|entry| entry.history_id == history_id)
            .ok_or_else(|| RepoError::Format {
                file: "db:history".to_string(),
                reason: format!("historyId {history_id} not found"),
            })
    }

    /// The upgrade primitive: append a new identity, or replace the current
    /// one in place if nothing actually changed.
    pub fn set(
        &mut self,
        pg_version: PgVersion,
        system_id: SystemId,
        catalog_version: Option<u64>,
        control_version: Option<u32>,
    ) -> &HistoryEntry {
        let next_id = match self.entries.iter().map(|e| e.history_id).max() {
            None => 1,
            Some(current_id) => {
                let current = self
                    .entries
                    .iter()
                    .find(|e| e.history_id == current_id)
                    .expect("current_id came from entries");
                if current.pg_version == pg_version
                    && current.system_id == system_id
                    && current.catalog_version == catalog_version
                    && current.control_version == control_version
                {
                    current_id
                } else {
                    current_id + 1
                }
            }
        };

        if let Some(existing) = self.entries.iter_mut().find(|e| e.history_id == next_id) {
            existing.pg_version = pg_version;
            existing.system_id = system_id;
            existing.catalog_version = catalog_version;
            existing.control_version = control_version;
        } else {
            self.entries.push(HistoryEntry {
                history_id: next_id,
                pg_version,
                system_id,
                catalog_version,
                control_version,
            });
        }

        self.entries
            .iter()
            .find(|e| e.history_id == next_id)
            .expect("just inserted or updated")
    }

    /// The on-disk archive bucket name for this history's current entry:
    /// `"<pgVersion>-<historyId>"`.
    pub fn archive_id(&self) -> Result<String, RepoError> {
        let current = self.current()?;
        Ok(format!("{}-{}", current.pg_version, current.history_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_on_empty_history_starts_at_one() {
        let mut infopg = InfoPg::new();
        let entry = infopg.set(15, 7_000_000_000_000_000_000, Some(202107181), Some(1300));
        assert_eq!(entry.history_id, 1);
        assert_eq!(infopg.entries().len(), 1);
    }

    #[test]
    fn set_with_identical_attrs_replaces_in_place() {
        let mut infopg = InfoPg::new();
        infopg.set(15, 1, Some(1), Some(1));
        infopg.set(15, 1, Some(1), Some(1));
        assert_eq!(infopg.entries().len(), 1);
        assert_eq!(infopg.current().unwrap().history_id, 1);
    }

    #[test]
    fn set_with_changed_attrs_appends() {
        let mut infopg = InfoPg::new();
        infopg.set(15, 1, Some(1), Some(1));
        infopg.set(16, 1, Some(1), Some(1));
        assert_eq!(infopg.entries().len(), 2);
        assert_eq!(infopg.current().unwrap().history_id, 2);
        assert_eq!(infopg.current().unwrap().pg_version, 16);
    }

    #[test]
    fn find_missing_history_id_errors() {
        let infopg = InfoPg::new();
        assert!(infopg.find(1).is_err());
    }

    #[test]
    fn archive_id_combines_version_and_history() {
        let mut infopg = InfoPg::new();
        infopg.set(11, 42, None, None);
        assert_eq!(infopg.archive_id().unwrap(), "11-1");
    }
}
