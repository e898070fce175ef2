//! The two repository catalogs: `archive.info` and `backup.info` (spec.md
//! §4.3). Both wrap an [`InfoPg`] history; this module holds what they
//! share — reading/writing the `[db]`/`[db:history]` sections and the
//! optional cipher sub-passphrase — while [`archive_info`] and
//! [`backup_info`] add what's specific to each.

pub mod archive_info;
pub mod backup_info;

use serde_json::{json, Map, Value};

use pgvault_config::IniDocument;
use pgvault_types::{HistoryId, PgVersion, RepoError, SystemId};

use crate::infopg::{HistoryEntry, InfoPg};

/// The section holding the sub-passphrase used to encrypt this stanza's
/// payload files, when the stanza is encrypted at all.
const CIPHER_SECTION: &str = "cipher";
const CIPHER_PASS_KEY: &str = "cipher-pass";

pub(crate) fn write_infopg(doc: &mut IniDocument, infopg: &InfoPg) -> Result<(), RepoError> {
    let current = infopg.current()?;

    let db = doc.section_mut("db");
    db.set("db-id", json!(current.history_id));
    db.set("db-version", json!(current.pg_version));
    db.set("db-system-id", json!(current.system_id));
    if let Some(catalog_version) = current.catalog_version {
        db.set("db-catalog-version", json!(catalog_version));
    }
    if let Some(control_version) = current.control_version {
        db.set("db-control-version", json!(control_version));
    }

    let mut entries: Vec<&HistoryEntry> = infopg.entries().iter().collect();
    entries.sort_by_key(|entry| entry.history_id);

    let history = doc.section_mut("db:history");
    for entry in entries {
        let mut obj = Map::new();
        obj.insert("db-version".to_string(), json!(entry.pg_version));
        obj.insert("db-system-id".to_string(), json!(entry.system_id));
        if let Some(catalog_version) = entry.catalog_version {
            obj.insert("db-catalog-version".to_string(), json!(catalog_version));
        }
        if let Some(control_version) = entry.control_version {
            obj.insert("db-control-version".to_string(), json!(control_version));
        }
        history.set(entry.history_id.to_string(), Value::Object(obj));
    }

    Ok(())
}

pub(crate) fn read_infopg(doc: &IniDocument) -> Result<InfoPg, RepoError> {
    let file = "db:history";
    let Some(history) = doc.section("db:history") else {
        return Err(RepoError::Format {
            file: file.to_string(),
            reason: "missing [db:history] section".to_string(),
        });
    };

    let mut entries = Vec::new();
    for (key, value) in history.iter() {
        let history_id: HistoryId = key.parse().map_err(|_| RepoError::Format {
            file: file.to_string(),
            reason: format!("'{key}' is not a valid historyId"),
        })?;
        let obj = value.as_object().ok_or_else(|| RepoError::Format {
            file: file.to_string(),
            reason: format!("historyId {history_id} entry is not an object"),
        })?;
        let pg_version = obj
            .get("db-version")
            .and_then(Value::as_u64)
            .ok_or_else(|| RepoError::Format {
                file: file.to_string(),
                reason: format!("historyId {history_id} missing db-version"),
            })? as PgVersion;
        let system_id = obj
            .get("db-system-id")
            .and_then(Value::as_u64)
            .ok_or_else(|| RepoError::Format {
                file: file.to_string(),
                reason: format!("historyId {history_id} missing db-system-id"),
            })? as SystemId;
        let catalog_version = obj.get("db-catalog-version").and_then(Value::as_u64);
        let control_version = obj
            .get("db-control-version")
            .and_then(Value::as_u64)
            .map(|v| v as u32);

        entries.push(HistoryEntry {
            history_id,
            pg_version,
            system_id,
            catalog_version,
            control_version,
        });
    }

    if entries.is_empty() {
        return Err(RepoError::Format {
            file: file.to_string(),
            reason: "[db:history] has no entries".to_string(),
        });
    }

    Ok(InfoPg::from_entries(entries))
}

pub(crate) fn write_cipher_pass(doc: &mut IniDocument, cipher_pass: Option<&[u8]>) {
    if let Some(pass) = cipher_pass {
        doc.section_mut(CIPHER_SECTION)
            .set(CIPHER_PASS_KEY, json!(hex::encode(pass)));
    }
}

pub(crate) fn read_cipher_pass(doc: &IniDocument) -> Result<Option<Vec<u8>>, RepoError> {
    let Some(section) = doc.section(CIPHER_SECTION) else {
        return Ok(None);
    };
    let Some(value) = section.get(CIPHER_PASS_KEY) else {
        return Ok(None);
    };
    let hex_str = value.as_str().ok_or_else(|| RepoError::Format {
        file: CIPHER_SECTION.to_string(),
        reason: "cipher-pass is not a string".to_string(),
    })?;
    let bytes = hex::decode(hex_str).map_err(|err| RepoError::Format {
        file: CIPHER_SECTION.to_string(),
        reason: format!("cipher-pass is not valid hex: {err}"),
    })?;
    Ok(Some(bytes))
}
