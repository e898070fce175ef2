//! Repository core: InfoPg cluster history, the `archive.info`/`backup.info`
//! catalogs, the per-backup manifest, cross-catalog coherence checks, and
//! the retention-driven expiration engine.

pub mod archive;
pub mod catalog;
pub mod coherence;
pub mod config;
pub mod expire;
pub mod infopg;
pub mod manifest;
pub mod record;

pub use catalog::archive_info::ArchiveInfo;
pub use catalog::backup_info::BackupInfo;
pub use expire::{expire, ExpireReport};
pub use infopg::{HistoryEntry, InfoPg};
pub use record::{BackupOptions, BackupRecord};
