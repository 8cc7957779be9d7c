//! Idempotency ledger: append-only JSONL of processed draws.
//!
//! The whole file is read on open and indexed by draw id; the latest line
//! for a draw wins. Unreadable lines are skipped with a warning so one bad
//! write never wedges later runs.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StateStoreError;
use crate::model::LedgerEntry;

fn io_error(path: &Path, source: std::io::Error) -> StateStoreError {
    StateStoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Append-only ledger backed by a JSONL file.
pub struct Ledger {
    file: File,
    path: PathBuf,
    /// Latest entry per draw id.
    index: HashMap<u32, LedgerEntry>,
    skipped: usize,
    /// The file ends in a torn line; the next append starts a fresh one.
    torn_tail: bool,
}

impl Ledger {
    /// Open or create the ledger and rebuild its index.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let mut index = HashMap::new();
        let mut skipped = 0;
        let mut torn_tail = false;
        match fs::read(&path) {
            Ok(bytes) => {
                torn_tail = !bytes.is_empty() && !bytes.ends_with(b"\n");
                for (lineno, raw) in bytes.split(|b| *b == b'\n').enumerate() {
                    let parsed = std::str::from_utf8(raw)
                        .map_err(|e| e.to_string())
                        .and_then(|line| {
                            if line.trim().is_empty() {
                                return Ok(None);
                            }
                            serde_json::from_str::<LedgerEntry>(line)
                                .map(Some)
                                .map_err(|e| e.to_string())
                        });
                    match parsed {
                        Ok(Some(entry)) => {
                            index.insert(entry.draw_id, entry);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            skipped += 1;
                            tracing::warn!(
                                "skipping malformed ledger line {} in {}: {e}",
                                lineno + 1,
                                path.display()
                            );
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&path, e)),
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;

        tracing::debug!(
            "ledger {} loaded: {} draws, {skipped} skipped lines",
            path.display(),
            index.len()
        );

        Ok(Self {
            file,
            path,
            index,
            skipped,
            torn_tail,
        })
    }

    /// Append one entry and flush it to disk.
    pub fn append(&mut self, entry: LedgerEntry) -> Result<(), StateStoreError> {
        let json = serde_json::to_string(&entry)?;
        if self.torn_tail {
            writeln!(self.file).map_err(|e| io_error(&self.path, e))?;
            self.torn_tail = false;
        }
        writeln!(self.file, "{json}").map_err(|e| io_error(&self.path, e))?;
        self.file.flush().map_err(|e| io_error(&self.path, e))?;
        self.index.insert(entry.draw_id, entry);
        Ok(())
    }

    /// Latest entry recorded for `draw_id`.
    pub fn lookup(&self, draw_id: u32) -> Option<&LedgerEntry> {
        self.index.get(&draw_id)
    }

    /// True when the draw was already published with identical content.
    ///
    /// A quarantined draw is never considered processed, so an operator can
    /// rerun it with forced publication.
    pub fn already_processed(&self, draw_id: u32, content_hash: &str) -> bool {
        self.lookup(draw_id)
            .is_some_and(|e| e.content_hash == content_hash && e.decision.is_publish())
    }

    /// Number of malformed lines skipped on open.
    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Outcome;
    use chrono::Utc;

    fn entry(draw_id: u32, hash: &str, decision: Outcome) -> LedgerEntry {
        LedgerEntry {
            run_id: format!("run-{draw_id}-{hash}"),
            draw_id,
            content_hash: hash.to_string(),
            decision,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("state.jsonl");

        let mut ledger = Ledger::open(&path).unwrap();
        assert!(ledger.is_empty());
        ledger.append(entry(5322, "aaa", Outcome::Quarantine)).unwrap();
        ledger.append(entry(5322, "aaa", Outcome::Publish)).unwrap();
        drop(ledger);

        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.lookup(5322).unwrap().decision, Outcome::Publish);
        assert!(ledger.already_processed(5322, "aaa"));
        assert!(!ledger.already_processed(5322, "bbb"));
        assert!(!ledger.already_processed(5323, "aaa"));
    }

    #[test]
    fn test_quarantine_is_not_processed() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path().join("state.jsonl")).unwrap();
        ledger.append(entry(1, "h", Outcome::Quarantine)).unwrap();
        assert!(!ledger.already_processed(1, "h"));
        ledger.append(entry(1, "h", Outcome::PublishForced)).unwrap();
        assert!(ledger.already_processed(1, "h"));
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.jsonl");
        let good = serde_json::to_string(&entry(7, "h", Outcome::Publish)).unwrap();
        std::fs::write(&path, format!("{{not json\n\n{good}\n{{\"draw_id\": 8}}\n")).unwrap();

        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.skipped_lines(), 2);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.already_processed(7, "h"));
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.jsonl");
        let good = serde_json::to_string(&entry(7, "h", Outcome::Publish)).unwrap();
        let mut bytes = b"\xff\xfe garbage\n".to_vec();
        bytes.extend_from_slice(good.as_bytes());
        bytes.push(b'\n');
        std::fs::write(&path, bytes).unwrap();

        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.skipped_lines(), 1);
        assert!(ledger.already_processed(7, "h"));
    }

    #[test]
    fn test_append_after_torn_tail_starts_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.jsonl");
        std::fs::write(&path, r#"{"run_id":"x","draw_id":1"#).unwrap();

        let mut ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.skipped_lines(), 1);
        ledger.append(entry(5323, "h", Outcome::Publish)).unwrap();
        ledger.append(entry(5324, "k", Outcome::Publish)).unwrap();
        drop(ledger);

        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.skipped_lines(), 1);
        assert!(ledger.already_processed(5323, "h"));
        assert!(ledger.already_processed(5324, "k"));
    }
}
