//! Checksummed-INI codec (spec.md §4.1).
//!
//! Files of the form
//! ```text
//! [section]
//! key=<json-value>
//! ...
//! [backrest]
//! backrest-checksum="<40-hex>"
//! ```
//! All catalog and manifest files use this envelope. The reader is a lazy,
//! non-restartable stream of `(section, key, value)` triples so memory use
//! stays bounded for very large manifests; `IniDocument` is the in-memory
//! tree built on top of it for callers that want random access.

use std::io::BufRead;

use openssl::hash::{Hasher, MessageDigest};
use pgvault_types::RepoError;
use serde_json::Value;

/// Conventional name of the trailing checksum section.
pub const CHECKSUM_SECTION: &str = "backrest";
/// Key carrying the checksum inside that section.
pub const CHECKSUM_KEY: &str = "backrest-checksum";

/// One entry yielded by the streaming reader, in file order.
///
/// The reader tracks section boundaries but not section *names* alongside
/// each key: `IniDocument::decode` (the only consumer so far) folds
/// `Section`/`KeyValue` events together into `(section, key, value)`
/// triples as it walks the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum IniEvent {
    Section(String),
    KeyValue(String, Value),
}

/// Lazily parses a checksummed-INI file, line by line.
///
/// Implements `Iterator`, so it is finite and non-restartable: once
/// exhausted (or once an error is yielded) it is spent. Comments (`#...`)
/// and blank lines are skipped silently.
pub struct IniReader<R> {
    lines: std::io::Lines<R>,
    in_section: bool,
    file: String,
    done: bool,
}

impl<R: BufRead> IniReader<R> {
    pub fn new(reader: R, file: impl Into<String>) -> Self {
        IniReader {
            lines: reader.lines(),
            in_section: false,
            file: file.into(),
            done: false,
        }
    }

    fn fmt_err(&self, reason: impl Into<String>) -> RepoError {
        RepoError::Format {
            file: self.file.clone(),
            reason: reason.into(),
        }
    }
}

impl<R: BufRead> Iterator for IniReader<R> {
    type Item = Result<IniEvent, RepoError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            let line = match self.lines.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Ok(line)) => line,
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(self.fmt_err(format!("io error reading line: {err}"))));
                }
            };

            let trimmed = line.trim_end();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if let Some(stripped) = trimmed.strip_prefix('[') {
                let Some(name) = stripped.strip_suffix(']') else {
                    self.done = true;
                    return Some(Err(self.fmt_err(format!("unterminated section header: {trimmed:?}"))));
                };
                if name.is_empty() {
                    self.done = true;
                    return Some(Err(self.fmt_err("empty section name")));
                }
                self.in_section = true;
                return Some(Ok(IniEvent::Section(name.to_string())));
            }

            if !self.in_section {
                self.done = true;
                return Some(Err(self.fmt_err(format!(
                    "key-bearing line before any section: {trimmed:?}"
                ))));
            }

            let Some(eq) = trimmed.find('=') else {
                self.done = true;
                return Some(Err(self.fmt_err(format!("missing '=' in line: {trimmed:?}"))));
            };
            let key = &trimmed[..eq];
            if key.is_empty() {
                self.done = true;
                return Some(Err(self.fmt_err("zero-length key")));
            }
            let raw_value = &trimmed[eq + 1..];
            let value: Value = match serde_json::from_str(raw_value) {
                Ok(v) => v,
                Err(err) => {
                    self.done = true;
                    return Some(Err(self.fmt_err(format!(
                        "invalid json value for key '{key}': {err}"
                    ))));
                }
            };
            return Some(Ok(IniEvent::KeyValue(key.to_string(), value)));
        }
    }
}

/// A section's keys, stored in insertion order internally (`set`/`get`/
/// `iter` see that order) but always serialized and checksummed in sorted
/// order via `sorted_keys()` (spec.md §4.1/§4.4).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IniSection {
    entries: Vec<(String, Value)>,
}

impl IniSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sorted_keys(&self) -> Vec<&(String, Value)> {
        let mut sorted: Vec<&(String, Value)> = self.entries.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        sorted
    }
}

/// The full section/key/value tree, insertion-ordered by section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IniDocument {
    sections: Vec<(String, IniSection)>,
    file: String,
}

impl IniDocument {
    pub fn new(file: impl Into<String>) -> Self {
        IniDocument {
            sections: Vec::new(),
            file: file.into(),
        }
    }

    pub fn section_mut(&mut self, name: &str) -> &mut IniSection {
        if let Some(idx) = self.sections.iter().position(|(n, _)| n == name) {
            &mut self.sections[idx].1
        } else {
            self.sections.push((name.to_string(), IniSection::new()));
            &mut self.sections.last_mut().unwrap().1
        }
    }

    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &IniSection)> {
        self.sections.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Parse a complete document from bytes, streaming through [`IniReader`],
    /// then verify the trailing checksum.
    pub fn decode(bytes: &[u8], file: impl Into<String>) -> Result<Self, RepoError> {
        let file = file.into();
        let mut doc = IniDocument::new(file.clone());
        let mut current: Option<String> = None;
        let reader = IniReader::new(std::io::Cursor::new(bytes), file.clone());
        for event in reader {
            match event? {
                IniEvent::Section(name) => current = Some(name),
                IniEvent::KeyValue(key, value) => {
                    let Some(section) = current.clone() else {
                        return Err(RepoError::Format {
                            file: file.clone(),
                            reason: "key before section".to_string(),
                        });
                    };
                    doc.section_mut(&section).set(key, value);
                }
            }
        }

        let checksum = doc
            .section(CHECKSUM_SECTION)
            .and_then(|s| s.get(CHECKSUM_KEY))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let Some(checksum) = checksum else {
            return Err(RepoError::Format {
                file,
                reason: format!("missing [{CHECKSUM_SECTION}] {CHECKSUM_KEY}"),
            });
        };

        let mut without_checksum = doc.clone();
        without_checksum.sections.retain(|(n, _)| n != CHECKSUM_SECTION);
        let expected = without_checksum.canonical_checksum();
        if expected != checksum {
            return Err(RepoError::Checksum { file });
        }

        Ok(doc)
    }

    /// Serialize as checksummed-INI: sections in insertion order, keys
    /// within each section in sorted order (spec.md §4.1/§4.4: "within each
    /// section keys are emitted in sorted order"), followed by the
    /// `[backrest]` checksum section computed over the canonical rendering
    /// of everything before it.
    pub fn encode(&self) -> Vec<u8> {
        let checksum = self.canonical_checksum();
        let mut out = Vec::new();
        for (name, section) in &self.sections {
            if name == CHECKSUM_SECTION {
                continue;
            }
            out.extend_from_slice(format!("[{name}]\n").as_bytes());
            for (key, value) in section.sorted_keys() {
                out.extend_from_slice(format!("{key}={value}\n", value = value).as_bytes());
            }
        }
        out.extend_from_slice(format!("[{CHECKSUM_SECTION}]\n").as_bytes());
        out.extend_from_slice(format!("{CHECKSUM_KEY}=\"{checksum}\"\n").as_bytes());
        out
    }

    /// Canonical JSON rendering used for the checksum: sections in
    /// insertion order, each as `"section":{...}`, keys sorted within a
    /// section, values rendered via `serde_json` (whose `Map` is
    /// `BTreeMap`-backed without the `preserve_order` feature, so nested
    /// object keys come out sorted too). The checksum section itself is
    /// never part of its own input.
    fn canonical_checksum(&self) -> String {
        let mut hasher = Hasher::new(MessageDigest::sha1()).expect("sha1 must be available");
        hasher.update(b"{").unwrap();
        let mut first_section = true;
        for (name, section) in &self.sections {
            if name == CHECKSUM_SECTION {
                continue;
            }
            if !first_section {
                hasher.update(b",").unwrap();
            }
            first_section = false;
            hasher
                .update(serde_json::to_string(name).unwrap().as_bytes())
                .unwrap();
            hasher.update(b":{").unwrap();
            let mut first_key = true;
            for (key, value) in section.sorted_keys() {
                if !first_key {
                    hasher.update(b",").unwrap();
                }
                first_key = false;
                hasher
                    .update(serde_json::to_string(key).unwrap().as_bytes())
                    .unwrap();
                hasher.update(b":").unwrap();
                hasher
                    .update(serde_json::to_string(value).unwrap().as_bytes())
                    .unwrap();
            }
            hasher.update(b"}").unwrap();
        }
        hasher.update(b"}").unwrap();
        let digest = hasher.finish().expect("sha1 finish");
        hex::encode(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(doc: &IniDocument) -> IniDocument {
        IniDocument::decode(&doc.encode(), "test").unwrap()
    }

    #[test]
    fn roundtrip_preserves_structure() {
        let mut doc = IniDocument::new("test");
        doc.section_mut("db").set("db-id", serde_json::json!(1));
        doc.section_mut("db")
            .set("db-system-id", serde_json::json!(6_862_691_166_000_000_000i64));
        let decoded = roundtrip(&doc);
        assert_eq!(decoded.section("db"), doc.section("db"));
    }

    #[test]
    fn checksum_mismatch_detected() {
        let mut doc = IniDocument::new("test");
        doc.section_mut("a").set("x", serde_json::json!(1));
        let mut bytes = doc.encode();
        // flip a byte inside the body, leaving the checksum line untouched
        let pos = bytes.iter().position(|&b| b == b'1').unwrap();
        bytes[pos] = b'2';
        let err = IniDocument::decode(&bytes, "test").unwrap_err();
        assert!(matches!(err, RepoError::Checksum { .. }));
    }

    #[test]
    fn encode_is_deterministic_regardless_of_insertion_perturbation() {
        let mut a = IniDocument::new("test");
        a.section_mut("s").set("z", serde_json::json!(1));
        a.section_mut("s").set("a", serde_json::json!(2));

        let mut b = IniDocument::new("test");
        b.section_mut("s").set("a", serde_json::json!(2));
        b.section_mut("s").set("z", serde_json::json!(1));

        assert_eq!(a.encode(), b.encode());
    }

    #[test]
    fn encode_writes_keys_in_sorted_order() {
        let mut doc = IniDocument::new("test");
        doc.section_mut("s").set("zeta", serde_json::json!(1));
        doc.section_mut("s").set("alpha", serde_json::json!(2));
        doc.section_mut("s").set("mid", serde_json::json!(3));

        let bytes = doc.encode();
        let text = String::from_utf8(bytes).unwrap();
        let alpha_pos = text.find("alpha=").unwrap();
        let mid_pos = text.find("mid=").unwrap();
        let zeta_pos = text.find("zeta=").unwrap();
        assert!(alpha_pos < mid_pos && mid_pos < zeta_pos);
    }

    #[test]
    fn rejects_key_before_section() {
        let err = IniDocument::decode(b"key=1\n", "test").unwrap_err();
        assert!(matches!(err, RepoError::Format { .. }));
    }

    #[test]
    fn rejects_unterminated_section() {
        let err = IniDocument::decode(b"[sect\nkey=1\n", "test").unwrap_err();
        assert!(matches!(err, RepoError::Format { .. }));
    }
}
