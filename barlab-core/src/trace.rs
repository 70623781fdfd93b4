//! Append-only JSONL trace sink.
//!
//! Every record gets an ISO `ts` and, unless the caller already set one, the
//! writer's current `bar_index`. Writes are best-effort: a single attempt,
//! failures logged and swallowed — tracing must never fail a run.

use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

/// JSONL trace writer shared by the runner and the agent.
#[derive(Debug)]
pub struct TraceWriter {
    path: PathBuf,
    bar_index: AtomicUsize,
}

impl TraceWriter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            bar_index: AtomicUsize::new(0),
        }
    }

    pub fn set_bar(&self, bar_index: usize) {
        self.bar_index.store(bar_index, Ordering::Relaxed);
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append one event. Injects `ts` and a default `bar_index`.
    pub fn write(&self, event: Value) {
        let mut map = match event {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("event".into(), other);
                map
            }
        };
        map.insert(
            "ts".into(),
            Value::String(
                chrono::Local::now()
                    .format("%Y-%m-%dT%H:%M:%S%.6f")
                    .to_string(),
            ),
        );
        map.entry("bar_index".to_string())
            .or_insert_with(|| Value::from(self.bar_index.load(Ordering::Relaxed)));

        let line = Value::Object(map).to_string();
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(err) = result {
            tracing::warn!(path = %self.path.display(), %err, "trace write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_appends_lines_with_ts_and_bar_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let writer = TraceWriter::new(path.clone());
        writer.set_bar(7);
        writer.write(json!({"type": "agent_step", "dt": "2024-01-02"}));
        writer.write(json!({"type": "decision", "bar_index": 3}));

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "agent_step");
        assert_eq!(first["bar_index"], 7);
        assert!(first["ts"].is_string());

        // Explicit bar_index wins over the writer's current one
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["bar_index"], 3);
    }

    #[test]
    fn write_to_unwritable_path_does_not_panic() {
        let writer = TraceWriter::new(PathBuf::from("/nonexistent-dir/trace.jsonl"));
        writer.write(json!({"type": "agent_step"}));
    }
}
