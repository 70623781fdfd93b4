//! Filesystem-backed run memory: playbook, daily journal, keyed notes, recall.
//!
//! One workspace directory per run:
//!
//! ```text
//! <workspace>/
//!   playbook.md
//!   journal/<ISO-date>.md
//!   notes/<key>.md
//!   decisions.jsonl
//!   trace.jsonl
//!   result.json
//! ```
//!
//! Files are the source of truth; recall scans them in deterministic
//! (sorted) order.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("无法创建工作空间 {path}: {source}")]
    WorkspaceCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A unique per-run directory. Created once, never shared between runs.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a workspace at `root`, or a unique timestamped directory under
    /// the system temp dir when `root` is `None`.
    pub fn create(root: Option<PathBuf>) -> Result<Self, MemoryError> {
        let root = match root {
            Some(path) => path,
            None => {
                let ts = chrono::Local::now().format("%Y%m%d_%H%M%S_%6f");
                std::env::temp_dir().join("barlab").join(format!("run_{ts}"))
            }
        };
        for subdir in ["journal", "notes"] {
            fs::create_dir_all(root.join(subdir)).map_err(|source| {
                MemoryError::WorkspaceCreate {
                    path: root.clone(),
                    source,
                }
            })?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_string(&self) -> String {
        self.root.display().to_string()
    }
}

/// One recall hit: which file matched and its full content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallHit {
    pub source: String,
    pub content: String,
}

/// The memory store. Three core operations: log / note / recall, plus the
/// playbook seeded at run start.
pub struct Memory {
    ws: Workspace,
    current_date: Cell<NaiveDate>,
}

impl Memory {
    pub fn new(ws: Workspace, current_date: NaiveDate) -> Self {
        Self {
            ws,
            current_date: Cell::new(current_date),
        }
    }

    /// Sync the simulated date as the backtest loop advances; `log` keys
    /// journal files by it.
    pub fn set_date(&self, date: NaiveDate) {
        self.current_date.set(date);
    }

    pub fn workspace(&self) -> &Workspace {
        &self.ws
    }

    /// Seed `playbook.md` with the strategy description.
    pub fn init_playbook(&self, strategy_prompt: &str) -> Result<(), MemoryError> {
        fs::write(self.ws.root().join("playbook.md"), strategy_prompt)?;
        Ok(())
    }

    pub fn read_playbook(&self) -> String {
        fs::read_to_string(self.ws.root().join("playbook.md")).unwrap_or_default()
    }

    /// Append one entry to the day's journal.
    pub fn log(&self, content: &str, date: Option<NaiveDate>) -> Result<(), MemoryError> {
        let date = date.unwrap_or_else(|| self.current_date.get());
        let path = self.ws.root().join("journal").join(format!("{date}.md"));
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "\n- {content}")?;
        Ok(())
    }

    /// Create or overwrite a keyed note.
    pub fn note(&self, key: &str, content: &str) -> Result<(), MemoryError> {
        let path = self.ws.root().join("notes").join(format!("{key}.md"));
        fs::write(path, content)?;
        Ok(())
    }

    pub fn read_note(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.ws.root().join("notes").join(format!("{key}.md"))).ok()
    }

    /// Notes keyed `position_<symbol>` for each held symbol.
    pub fn read_position_notes(&self, symbols: &[String]) -> BTreeMap<String, String> {
        let mut notes = BTreeMap::new();
        for sym in symbols {
            if let Some(content) = self.read_note(&format!("position_{sym}")) {
                notes.insert(sym.clone(), content);
            }
        }
        notes
    }

    /// Keyword search: whitespace-split the query, return every journal,
    /// note, and playbook file containing any token. File order is
    /// deterministic (sorted names, journal before notes before playbook).
    pub fn recall(&self, query: &str) -> Vec<RecallHit> {
        let keywords: Vec<&str> = query.split_whitespace().collect();
        let mut hits = Vec::new();
        if keywords.is_empty() {
            return hits;
        }

        for dir in ["journal", "notes"] {
            for (name, text) in self.sorted_md_files(dir) {
                if keywords.iter().any(|kw| text.contains(kw)) {
                    hits.push(RecallHit {
                        source: format!("{dir}/{name}"),
                        content: text.trim().to_string(),
                    });
                }
            }
        }

        let playbook = self.read_playbook();
        if !playbook.is_empty() && keywords.iter().any(|kw| playbook.contains(kw)) {
            hits.push(RecallHit {
                source: "playbook.md".into(),
                content: playbook.trim().to_string(),
            });
        }
        hits
    }

    fn sorted_md_files(&self, dir: &str) -> Vec<(String, String)> {
        let mut files = Vec::new();
        let Ok(entries) = fs::read_dir(self.ws.root().join(dir)) else {
            return files;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "md") {
                if let (Some(name), Ok(text)) = (
                    path.file_name().map(|n| n.to_string_lossy().into_owned()),
                    fs::read_to_string(&path),
                ) {
                    files.push((name, text));
                }
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        files
    }
}
