//! Checksummed-INI codec and the atomic file-pair envelope every catalog
//! and manifest is stored with.

pub mod cipher;
pub mod ini;
pub mod pair_file;

pub use cipher::{open as cipher_open, seal as cipher_seal};
pub use ini::{IniDocument, IniSection};
pub use pair_file::{load_pair, save_pair, warn_if_pair_diverges};
