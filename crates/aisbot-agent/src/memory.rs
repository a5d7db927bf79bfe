//! File-based agent memory.
//!
//! Two tiers under `<workspace>/memory/`:
//! - `MEMORY.md` — long-term facts and preferences
//! - `YYYY-MM-DD.md` — daily notes
//!
//! The context builder reads memory on every prompt build; the agent writes
//! it through the ordinary filesystem tools.

use std::path::{Path, PathBuf};

use chrono::Utc;

/// Reader/writer for the workspace memory directory.
pub struct MemoryStore {
    memory_dir: PathBuf,
    memory_file: PathBuf,
}

impl MemoryStore {
    /// Does not create the directory; reads of absent files return empty.
    pub fn new(workspace: &Path) -> Self {
        let memory_dir = workspace.join("memory");
        let memory_file = memory_dir.join("MEMORY.md");
        Self {
            memory_dir,
            memory_file,
        }
    }

    /// Long-term memory content, empty when absent.
    pub fn read_long_term(&self) -> String {
        std::fs::read_to_string(&self.memory_file).unwrap_or_default()
    }

    /// Replace the long-term memory file.
    pub fn write_long_term(&self, content: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.memory_dir)?;
        std::fs::write(&self.memory_file, content)
    }

    /// Today's notes file path.
    pub fn today_file(&self) -> PathBuf {
        self.memory_dir.join(format!("{}.md", today()))
    }

    /// Today's notes, empty when absent.
    pub fn read_today(&self) -> String {
        std::fs::read_to_string(self.today_file()).unwrap_or_default()
    }

    /// Append to today's notes, creating the file with a date header.
    pub fn append_today(&self, content: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.memory_dir)?;
        let path = self.today_file();
        let body = match std::fs::read_to_string(&path) {
            Ok(existing) => format!("{existing}\n{content}"),
            Err(_) => format!("# {}\n\n{content}", today()),
        };
        std::fs::write(&path, body)
    }

    /// Memory section for the system prompt, or `None` when everything is
    /// empty.
    pub fn get_memory_context(&self) -> Option<String> {
        let mut sections = Vec::new();

        let long_term = self.read_long_term();
        if !long_term.trim().is_empty() {
            sections.push(format!("## Long-term Memory\n\n{long_term}"));
        }
        let today_notes = self.read_today();
        if !today_notes.trim().is_empty() {
            sections.push(format!("## Today's Notes ({})\n\n{today_notes}", today()));
        }

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }

    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }

    pub fn memory_file(&self) -> &Path {
        &self.memory_file
    }
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_files_read_empty_without_creating_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(&dir.path().join("ws"));
        assert_eq!(store.read_long_term(), "");
        assert_eq!(store.read_today(), "");
        assert!(store.get_memory_context().is_none());
        assert!(!store.memory_dir().exists());
    }

    #[test]
    fn long_term_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        store.write_long_term("User prefers dark mode.").unwrap();
        assert_eq!(store.read_long_term(), "User prefers dark mode.");
    }

    #[test]
    fn append_today_creates_header_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());

        store.append_today("First note.").unwrap();
        store.append_today("Second note.").unwrap();

        let content = store.read_today();
        assert!(content.starts_with(&format!("# {}", today())));
        assert!(content.contains("First note."));
        assert!(content.contains("Second note."));
    }

    #[test]
    fn context_combines_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        store.write_long_term("Important fact.").unwrap();
        store.append_today("Worked on the bus.").unwrap();

        let ctx = store.get_memory_context().unwrap();
        assert!(ctx.contains("## Long-term Memory"));
        assert!(ctx.contains("Important fact."));
        assert!(ctx.contains("Today's Notes"));
        assert!(ctx.contains("Worked on the bus."));
    }

    #[test]
    fn whitespace_only_memory_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        store.write_long_term("  \n \n").unwrap();
        assert!(store.get_memory_context().is_none());
    }
}
