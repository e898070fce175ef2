//! Structured error kinds surfaced by the repository core (spec.md §7).
//!
//! Everything the core cannot recover from locally propagates as one of
//! these variants so callers (the CLI renderer, out of scope here) can map
//! it to an exit code without string-matching a message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("unable to load '{file}': not found on primary or copy")]
    FileMissing { file: String },

    #[error("checksum does not match in '{file}'")]
    Checksum { file: String },

    #[error("format error in '{file}': {reason}")]
    Format { file: String, reason: String },

    #[error("backup.info does not match cluster - HINT: is this the correct stanza?\n{reason}")]
    BackupMismatch { reason: String },

    #[error("database mismatch: {reason} - HINT: the configured path and port might reference different clusters")]
    DbMismatch { reason: String },

    #[error("backup set invalid: {reason}")]
    BackupSetInvalid { reason: String },

    #[error("'{value}' {reason}")]
    OptionInvalidValue { value: String, reason: String },

    #[error("repository path '{path}' is not empty")]
    PathNotEmpty { path: String },

    #[error("stop file exists for stanza '{stanza}'")]
    Stop { stanza: String },

    #[error("cluster appears to be running (pid file present); use --force to override")]
    PgRunning,

    #[error("internal invariant violated: {reason}")]
    Assert { reason: String },

    #[error("unable to decrypt/encrypt '{file}': {reason}")]
    Cipher { file: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepoError {
    /// The exit code category this error maps to (spec.md §6). The actual
    /// numeric exit code is assigned by the CLI renderer, out of scope here;
    /// this just gives that renderer a stable key to switch on.
    pub fn kind_name(&self) -> &'static str {
        match self {
            RepoError::FileMissing { .. } => "FileMissingError",
            RepoError::Checksum { .. } => "ChecksumError",
            RepoError::Format { .. } => "FormatError",
            RepoError::BackupMismatch { .. } => "BackupMismatchError",
            RepoError::DbMismatch { .. } => "DbMismatchError",
            RepoError::BackupSetInvalid { .. } => "BackupSetInvalidError",
            RepoError::OptionInvalidValue { .. } => "OptionInvalidValueError",
            RepoError::PathNotEmpty { .. } => "PathNotEmptyError",
            RepoError::Stop { .. } => "StopError",
            RepoError::PgRunning => "PgRunningError",
            RepoError::Assert { .. } => "AssertError",
            RepoError::Cipher { .. } => "CipherError",
            RepoError::Other(_) => "AssertError",
        }
    }
}
