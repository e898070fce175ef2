//! Shared plain-data types for the repository core.
//!
//! Nothing in this crate talks to storage or the cluster; it only defines
//! the vocabulary the rest of the workspace shares: the backup label
//! grammar, the cipher-mode enum, and the structured error kinds a caller
//! can match on.

pub mod error;
pub mod label;

pub use error::RepoError;
pub use label::{BackupLabel, BackupType};

use serde::{Deserialize, Serialize};

/// PostgreSQL major version, as an integer (`11`, `12`, ... `96` for 9.6).
pub type PgVersion = u32;

/// `pg_control`'s `system_identifier`.
pub type SystemId = u64;

/// Monotonically increasing identifier of one era of the cluster's identity.
pub type HistoryId = u32;

/// Whether (and how) a metadata or payload file is protected by a cipher.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CryptMode {
    /// Stored in the clear.
    None,
    /// Encrypted with the stanza's cipher sub-passphrase.
    Encrypt,
}

impl Default for CryptMode {
    fn default() -> Self {
        CryptMode::None
    }
}
