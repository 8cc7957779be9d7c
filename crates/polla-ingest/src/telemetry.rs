//! Structured run events: an append-only JSONL stream mirrored to `tracing`.

use chrono::Utc;
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

const REDACTED: &str = "<redacted>";

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "credential",
    "apikey",
    "api_key",
    "authorization",
];

fn is_sensitive(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

/// Redact the values of sensitive-looking keys, recursively.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    if is_sensitive(&k) {
                        (k, Value::String(REDACTED.to_string()))
                    } else {
                        (k, sanitize(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        other => other,
    }
}

/// Per-run event writer.
pub struct EventLog {
    file: File,
    path: PathBuf,
    run_id: String,
    started: Instant,
}

impl EventLog {
    /// Open or create the event stream at `path` for one run.
    pub fn open(path: impl AsRef<Path>, run_id: &str) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file,
            path,
            run_id: run_id.to_string(),
            started: Instant::now(),
        })
    }

    /// Write one event. `fields` should be a JSON object; anything else is
    /// stored under `value`.
    pub fn emit(&mut self, event: &str, fields: Value) -> std::io::Result<()> {
        let mut line = Map::new();
        line.insert("run_id".into(), Value::String(self.run_id.clone()));
        line.insert("event".into(), Value::String(event.to_string()));
        line.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
        line.insert(
            "elapsed_ms".into(),
            Value::from(self.started.elapsed().as_millis() as u64),
        );
        match sanitize(fields) {
            Value::Object(map) => {
                for (k, v) in map {
                    line.entry(k).or_insert(v);
                }
            }
            Value::Null => {}
            other => {
                line.insert("value".into(), other);
            }
        }

        let json = Value::Object(line).to_string();
        tracing::info!(target: "polla::events", run_id = %self.run_id, "{event} {json}");
        writeln!(self.file, "{json}")?;
        self.file.flush()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_redacts_nested_keys() {
        let clean = sanitize(json!({
            "url": "https://t13.test",
            "api_key": "abc",
            "headers": {"Authorization": "Bearer x", "accept": "text/html"},
            "attempts": [{"session_token": "t"}],
        }));
        assert_eq!(clean["url"], "https://t13.test");
        assert_eq!(clean["api_key"], REDACTED);
        assert_eq!(clean["headers"]["Authorization"], REDACTED);
        assert_eq!(clean["headers"]["accept"], "text/html");
        assert_eq!(clean["attempts"][0]["session_token"], REDACTED);
    }

    #[test]
    fn test_emit_writes_jsonl_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut log = EventLog::open(&path, "run-1").unwrap();
        log.emit("pipeline_start", json!({"sources": 2, "password": "hunter2"}))
            .unwrap();
        log.emit("pipeline_complete", Value::Null).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["run_id"], "run-1");
        assert_eq!(lines[0]["event"], "pipeline_start");
        assert_eq!(lines[0]["sources"], 2);
        assert_eq!(lines[0]["password"], REDACTED);
        assert!(lines[0]["elapsed_ms"].is_u64());
        assert!(lines[1]["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_envelope_fields_cannot_be_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut log = EventLog::open(&path, "run-2").unwrap();
        log.emit("decision", json!({"run_id": "spoofed"})).unwrap();
        let line: Value =
            serde_json::from_str(std::fs::read_to_string(&path).unwrap().trim()).unwrap();
        assert_eq!(line["run_id"], "run-2");
    }
}
