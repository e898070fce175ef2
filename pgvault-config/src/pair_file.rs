//! Atomic primary/copy file pair storage (spec.md §4.3, §5).
//!
//! Every catalog and manifest is stored as two files, `X` and `X.copy`, with
//! identical content. Writers always write the copy first, then overwrite
//! the primary, so a reader that fails on a torn or missing primary can
//! fall back to a copy that is guaranteed to be whole.

use std::fs;
use std::path::Path;

use pgvault_types::RepoError;

/// Write `data` to `copy_path` first, then to `primary_path`.
///
/// Each individual write is a plain overwrite (not a rename-based atomic
/// swap) — atomicity here comes from the *pair*, not from either file in
/// isolation: a reader that observes a torn primary falls back to the copy,
/// which this ordering guarantees was already fully written.
pub fn save_pair(primary_path: &Path, copy_path: &Path, data: &[u8]) -> Result<(), RepoError> {
    fs::write(copy_path, data).map_err(|err| {
        RepoError::Other(anyhow::anyhow!(
            "unable to write '{}': {err}",
            copy_path.display()
        ))
    })?;
    fs::write(primary_path, data).map_err(|err| {
        RepoError::Other(anyhow::anyhow!(
            "unable to write '{}': {err}",
            primary_path.display()
        ))
    })?;
    Ok(())
}

/// Read sequence per spec.md §4.3: try the primary; on *any* error (missing,
/// checksum, decrypt, format) try the copy; if both fail, surface both
/// errors chained under `FileMissingError`. Logs a single line identifying
/// which file was actually used when falling back.
pub fn load_pair<T>(
    primary_path: &Path,
    copy_path: &Path,
    parse: impl Fn(&[u8], &str) -> Result<T, RepoError>,
) -> Result<T, RepoError> {
    let primary_err = match fs::read(primary_path) {
        Ok(bytes) => match parse(&bytes, &primary_path.display().to_string()) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        },
        Err(err) => RepoError::Other(anyhow::anyhow!(
            "unable to read '{}': {err}",
            primary_path.display()
        )),
    };

    match fs::read(copy_path) {
        Ok(bytes) => match parse(&bytes, &copy_path.display().to_string()) {
            Ok(value) => {
                log::warn!(
                    "using '{}' - primary file '{}' failed: {primary_err}",
                    copy_path.display(),
                    primary_path.display()
                );
                Ok(value)
            }
            Err(copy_err) => Err(RepoError::FileMissing {
                file: format!(
                    "{} (primary: {primary_err}; copy: {copy_err})",
                    primary_path.display()
                ),
            }),
        },
        Err(copy_io_err) => Err(RepoError::FileMissing {
            file: format!(
                "{} (primary: {primary_err}; copy: {copy_io_err})",
                primary_path.display()
            ),
        }),
    }
}

/// Compare primary and copy byte-for-byte, after both independently parse
/// successfully. A mismatch here is a soft error: the repository is still
/// usable (the primary won), but it is logged so an operator notices drift.
pub fn warn_if_pair_diverges(primary_path: &Path, copy_path: &Path, label: &str) {
    let (Ok(a), Ok(b)) = (fs::read(primary_path), fs::read(copy_path)) else {
        return;
    };
    if a != b {
        log::warn!(
            "{} does not match {}",
            copy_path.display(),
            label
        );
    }
}
