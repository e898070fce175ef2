//! OS-facing helpers shared by the repository core: the stanza write lock
//! and cluster directory scanning.

pub mod lock;
pub mod scan;

pub use lock::{stop_file_present, try_lock_stanza, StanzaLockGuard};
pub use scan::{most_common_attrs, scan_data_directory, EntryKind, ScannedEntry, FIXED_EXCLUDES};
