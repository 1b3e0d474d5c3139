//! Command history: an in-memory ring backed by a per-user file.
//!
//! The in-memory ring holds [`History::CAPACITY`] entries; the file may
//! grow past that between sessions (spec §9 flags an inconsistent "16
//! lines" comment in the original source — 10, the ring size, is
//! authoritative). `quit` truncates the file back down to the ring.

use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{ShellError, ShellResult};

/// Command history is never persisted when the entry being run is itself
/// a `!N` replay (spec §4.5 edge case).
pub struct History {
    ring: VecDeque<String>,
    capacity: usize,
}

impl History {
    pub const CAPACITY: usize = 10;

    pub fn new(capacity: usize) -> Self {
        History {
            ring: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a command line, evicting the oldest entry if full.
    pub fn push(&mut self, line: impl Into<String>) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(line.into());
    }

    /// 1-based, oldest first — the order `history` prints in.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &str)> {
        self.ring.iter().enumerate().map(|(i, s)| (i + 1, s.as_str()))
    }

    /// Looks up a 1-based ring index, as used by `!N`.
    pub fn get(&self, n: usize) -> Option<&str> {
        if n == 0 {
            return None;
        }
        self.ring.get(n - 1).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Reads the file end-to-backward, keeping only the most recent
    /// `capacity` lines, and restores insertion order (oldest first)
    /// before loading them into the ring.
    pub fn load_from_file(path: &Path, capacity: usize) -> ShellResult<Self> {
        let mut history = History::new(capacity);
        if !path.exists() {
            return Ok(history);
        }
        let contents = fs::read_to_string(path).map_err(ShellError::HistoryIo)?;
        let mut recent_first: Vec<&str> = contents
            .lines()
            .rev()
            .filter(|l| !l.is_empty())
            .take(capacity)
            .collect();
        recent_first.reverse();
        for line in recent_first {
            history.push(line.to_string());
        }
        Ok(history)
    }

    /// Overwrites the history file with exactly the current ring
    /// contents, oldest first — the truncation `quit` performs.
    pub fn save_to_file(&self, path: &Path) -> ShellResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ShellError::HistoryIo)?;
        }
        let mut f = fs::File::create(path).map_err(ShellError::HistoryIo)?;
        for (_, line) in self.entries() {
            writeln!(f, "{line}").map_err(ShellError::HistoryIo)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_evicts_oldest_past_capacity() {
        let mut h = History::new(3);
        h.push("a");
        h.push("b");
        h.push("c");
        h.push("d");
        let lines: Vec<&str> = h.entries().map(|(_, s)| s).collect();
        assert_eq!(lines, vec!["b", "c", "d"]);
    }

    #[test]
    fn get_is_one_based() {
        let mut h = History::new(10);
        h.push("first");
        h.push("second");
        assert_eq!(h.get(1), Some("first"));
        assert_eq!(h.get(2), Some("second"));
        assert_eq!(h.get(0), None);
        assert_eq!(h.get(3), None);
    }

    #[test]
    fn round_trip_through_file_keeps_last_n_in_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".tsh_history");

        let mut h = History::new(History::CAPACITY);
        for i in 1..=15 {
            h.push(format!("cmd{i}"));
        }
        h.save_to_file(&path).unwrap();

        let reloaded = History::load_from_file(&path, History::CAPACITY).unwrap();
        let lines: Vec<&str> = reloaded.entries().map(|(_, s)| s).collect();
        let expected: Vec<String> = (6..=15).map(|i| format!("cmd{i}")).collect();
        assert_eq!(lines, expected);
    }

    #[test]
    fn load_from_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope");
        let h = History::load_from_file(&path, History::CAPACITY).unwrap();
        assert!(h.is_empty());
    }
}
