//! Proc Mirror (C2)
//!
//! A persisted per-process status record, modeled on `/proc/<pid>/status`.
//! The mirror is an external sink keyed by pid: it owns no relationship to
//! the in-memory [`crate::job::JobTable`] beyond sharing a pid.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;

use crate::error::{ShellError, ShellResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcStat {
    /// Session leader.
    Ss,
    /// Running in background.
    R,
    /// Running in foreground.
    RPlus,
    /// Stopped.
    T,
}

impl ProcStat {
    pub fn code(&self) -> &'static str {
        match self {
            ProcStat::Ss => "Ss",
            ProcStat::R => "R",
            ProcStat::RPlus => "R+",
            ProcStat::T => "T",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcRecord {
    pub name: String,
    pub pid: Pid,
    pub ppid: Pid,
    pub pgid: Pid,
    pub sid: Pid,
    pub stat: ProcStat,
    pub username: String,
}

impl ProcRecord {
    fn render(&self) -> String {
        format!(
            "Name:\t{}\nPid:\t{}\nPPid:\t{}\nPGid:\t{}\nSid:\t{}\nSTAT:\t{}\nUsername:\t{}\n",
            self.name,
            self.pid,
            self.ppid,
            self.pgid,
            self.sid,
            self.stat.code(),
            self.username,
        )
    }
}

/// Pluggable key/value sink keyed by pid.
///
/// `edit_state` is read-modify-write and must tolerate a concurrently
/// deleted record by reporting `missing` (`Ok(false)`) rather than
/// propagating an error.
pub trait ProcMirror {
    fn create(&mut self, record: &ProcRecord) -> ShellResult<()>;
    fn write(&mut self, record: &ProcRecord) -> ShellResult<()>;
    fn read(&self, pid: Pid) -> ShellResult<Option<ProcRecord>>;
    fn edit_state(&mut self, pid: Pid, stat: ProcStat) -> ShellResult<bool>;
    fn remove(&mut self, pid: Pid) -> ShellResult<()>;
    fn remove_all(&mut self) -> ShellResult<()>;
    /// Enumerate the keyspace; used on startup to purge orphans from an
    /// earlier crashed run.
    fn list_pids(&self) -> ShellResult<Vec<Pid>>;
}

/// Directory-tree backed implementation: `<root>/<pid>/status`.
pub struct FsProcMirror {
    root: PathBuf,
}

impl FsProcMirror {
    pub fn new(root: impl Into<PathBuf>) -> ShellResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(ShellError::ProcMirrorIo)?;
        Ok(FsProcMirror { root })
    }

    fn status_path(&self, pid: Pid) -> PathBuf {
        self.root.join(pid.to_string()).join("status")
    }

    fn parse(contents: &str) -> Option<ProcRecord> {
        let mut fields: HashMap<&str, &str> = HashMap::new();
        for line in contents.lines() {
            if let Some((key, val)) = line.split_once(':') {
                fields.insert(key.trim(), val.trim());
            }
        }
        let stat = match *fields.get("STAT")? {
            "Ss" => ProcStat::Ss,
            "R" => ProcStat::R,
            "R+" => ProcStat::RPlus,
            "T" => ProcStat::T,
            _ => return None,
        };
        Some(ProcRecord {
            name: (*fields.get("Name")?).to_string(),
            pid: Pid::from_raw(fields.get("Pid")?.parse().ok()?),
            ppid: Pid::from_raw(fields.get("PPid")?.parse().ok()?),
            pgid: Pid::from_raw(fields.get("PGid")?.parse().ok()?),
            sid: Pid::from_raw(fields.get("Sid")?.parse().ok()?),
            stat,
            username: (*fields.get("Username")?).to_string(),
        })
    }
}

impl ProcMirror for FsProcMirror {
    fn create(&mut self, record: &ProcRecord) -> ShellResult<()> {
        let dir = self.root.join(record.pid.to_string());
        fs::create_dir_all(&dir).map_err(ShellError::ProcMirrorIo)?;
        self.write(record)
    }

    fn write(&mut self, record: &ProcRecord) -> ShellResult<()> {
        let path = self.status_path(record.pid);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ShellError::ProcMirrorIo)?;
        }
        let mut f = fs::File::create(&path).map_err(ShellError::ProcMirrorIo)?;
        f.write_all(record.render().as_bytes())
            .map_err(ShellError::ProcMirrorIo)?;
        Ok(())
    }

    fn read(&self, pid: Pid) -> ShellResult<Option<ProcRecord>> {
        let path = self.status_path(pid);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ShellError::ProcMirrorIo(e)),
        }
    }

    fn edit_state(&mut self, pid: Pid, stat: ProcStat) -> ShellResult<bool> {
        match self.read(pid)? {
            Some(mut record) => {
                record.stat = stat;
                self.write(&record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&mut self, pid: Pid) -> ShellResult<()> {
        let dir = self.root.join(pid.to_string());
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ShellError::ProcMirrorIo(e)),
        }
    }

    fn remove_all(&mut self) -> ShellResult<()> {
        for pid in self.list_pids()? {
            self.remove(pid)?;
        }
        Ok(())
    }

    fn list_pids(&self) -> ShellResult<Vec<Pid>> {
        let mut pids = vec![];
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(pids),
            Err(e) => return Err(ShellError::ProcMirrorIo(e)),
        };
        for entry in entries {
            let entry = entry.map_err(ShellError::ProcMirrorIo)?;
            if let Some(raw) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) {
                pids.push(Pid::from_raw(raw));
            }
        }
        Ok(pids)
    }
}

/// In-memory implementation used by unit tests that don't want filesystem
/// I/O in the critical path.
#[derive(Default)]
pub struct MemProcMirror {
    records: HashMap<i32, ProcRecord>,
}

impl ProcMirror for MemProcMirror {
    fn create(&mut self, record: &ProcRecord) -> ShellResult<()> {
        self.records.insert(record.pid.as_raw(), record.clone());
        Ok(())
    }

    fn write(&mut self, record: &ProcRecord) -> ShellResult<()> {
        self.records.insert(record.pid.as_raw(), record.clone());
        Ok(())
    }

    fn read(&self, pid: Pid) -> ShellResult<Option<ProcRecord>> {
        Ok(self.records.get(&pid.as_raw()).cloned())
    }

    fn edit_state(&mut self, pid: Pid, stat: ProcStat) -> ShellResult<bool> {
        match self.records.get_mut(&pid.as_raw()) {
            Some(record) => {
                record.stat = stat;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&mut self, pid: Pid) -> ShellResult<()> {
        self.records.remove(&pid.as_raw());
        Ok(())
    }

    fn remove_all(&mut self) -> ShellResult<()> {
        self.records.clear();
        Ok(())
    }

    fn list_pids(&self) -> ShellResult<Vec<Pid>> {
        Ok(self.records.keys().copied().map(Pid::from_raw).collect())
    }
}

pub fn default_proc_root() -> &'static Path {
    Path::new("proc")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pid: i32, stat: ProcStat) -> ProcRecord {
        ProcRecord {
            name: "tsh".into(),
            pid: Pid::from_raw(pid),
            ppid: Pid::from_raw(1),
            pgid: Pid::from_raw(pid),
            sid: Pid::from_raw(pid),
            stat,
            username: "root".into(),
        }
    }

    #[test]
    fn mem_mirror_round_trips() {
        let mut m = MemProcMirror::default();
        let r = sample(10, ProcStat::RPlus);
        m.create(&r).unwrap();
        let back = m.read(Pid::from_raw(10)).unwrap().unwrap();
        assert_eq!(back.stat.code(), "R+");
    }

    #[test]
    fn edit_state_reports_missing_for_deleted_record() {
        let mut m = MemProcMirror::default();
        assert!(!m.edit_state(Pid::from_raw(99), ProcStat::T).unwrap());
    }

    #[test]
    fn stat_codes_match_spec() {
        assert_eq!(ProcStat::Ss.code(), "Ss");
        assert_eq!(ProcStat::R.code(), "R");
        assert_eq!(ProcStat::RPlus.code(), "R+");
        assert_eq!(ProcStat::T.code(), "T");
    }

    #[test]
    fn fs_mirror_create_read_edit_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = FsProcMirror::new(dir.path()).unwrap();
        let r = sample(55, ProcStat::R);
        m.create(&r).unwrap();

        let back = m.read(Pid::from_raw(55)).unwrap().unwrap();
        assert_eq!(back.stat.code(), "R");
        assert_eq!(back.username, "root");

        assert!(m.edit_state(Pid::from_raw(55), ProcStat::T).unwrap());
        let back = m.read(Pid::from_raw(55)).unwrap().unwrap();
        assert_eq!(back.stat.code(), "T");

        m.remove(Pid::from_raw(55)).unwrap();
        assert!(m.read(Pid::from_raw(55)).unwrap().is_none());
    }

    #[test]
    fn fs_mirror_edit_state_missing_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = FsProcMirror::new(dir.path()).unwrap();
        assert!(!m.edit_state(Pid::from_raw(321), ProcStat::T).unwrap());
    }

    #[test]
    fn fs_mirror_list_pids_enumerates_numeric_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = FsProcMirror::new(dir.path()).unwrap();
        m.create(&sample(1, ProcStat::Ss)).unwrap();
        m.create(&sample(2, ProcStat::R)).unwrap();
        let mut pids: Vec<i32> = m.list_pids().unwrap().iter().map(|p| p.as_raw()).collect();
        pids.sort();
        assert_eq!(pids, vec![1, 2]);
        m.remove_all().unwrap();
        assert!(m.list_pids().unwrap().is_empty());
    }
}
