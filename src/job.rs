//! Job Table (C1)
//!
//! A bounded set of tracked child processes with state. Every mutation
//! performed from the main thread must happen with all process signals
//! masked (see [`crate::signal::SignalMaskGuard`]); signal handlers may
//! mutate directly since they run with the handled signal blocked and
//! widen to a full mask themselves before touching this table.

use nix::unistd::Pid;

use crate::error::{ShellError, ShellResult};

/// Maximum number of jobs the table can track at once.
pub const MAX_JOBS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Empty slot.
    Undef,
    Foreground,
    Background,
    Stopped,
}

impl JobState {
    /// The listing label used by `jobs` and the scenarios in spec §8.
    pub fn label(&self) -> &'static str {
        match self {
            JobState::Undef => "Undef",
            JobState::Foreground => "Foreground",
            JobState::Background => "Running",
            JobState::Stopped => "Stopped",
        }
    }
}

/// A monotonically allocated job id in `[1, MAX_JOBS]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u32);

#[derive(Debug, Clone)]
pub struct Job {
    pub pid: Pid,
    pub jid: JobId,
    pub state: JobState,
    pub cmdline: String,
}

/// Fixed-capacity table of tracked child processes.
///
/// Invariants (checked by the property tests in [`crate::job::tests`]):
/// - at most one slot has `state == Foreground`,
/// - `pid == 0 <=> state == Undef <=> jid == JobId(0)`,
/// - jid values among non-empty slots are pairwise distinct,
/// - after each removal, `next` equals `max(jid) + 1` over the remaining
///   slots (wrapping to 1 past `MAX_JOBS`).
pub struct JobTable {
    slots: [Option<Job>; MAX_JOBS],
    next: u32,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        JobTable {
            slots: Default::default(),
            next: 1,
        }
    }

    /// Inserts into the first empty slot, assigning the next jid.
    pub fn add(&mut self, pid: Pid, state: JobState, cmdline: impl Into<String>) -> ShellResult<JobId> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(ShellError::JobTableFull)?;

        let jid = JobId(self.next);
        *slot = Some(Job {
            pid,
            jid,
            state,
            cmdline: cmdline.into(),
        });

        self.next = if self.next as usize >= MAX_JOBS {
            1
        } else {
            self.next + 1
        };

        Ok(jid)
    }

    /// Clears the slot with matching pid and recomputes `next`.
    pub fn remove(&mut self, pid: Pid) -> bool {
        let removed = self
            .slots
            .iter_mut()
            .find(|s| s.as_ref().map(|j| j.pid) == Some(pid))
            .map(|s| *s = None)
            .is_some();

        if removed {
            self.next = self
                .slots
                .iter()
                .flatten()
                .map(|j| j.jid.0)
                .max()
                .map(|m| m + 1)
                .unwrap_or(1);
        }

        removed
    }

    pub fn lookup_by_pid(&self, pid: Pid) -> Option<&Job> {
        self.slots.iter().flatten().find(|j| j.pid == pid)
    }

    pub fn lookup_by_pid_mut(&mut self, pid: Pid) -> Option<&mut Job> {
        self.slots.iter_mut().flatten().find(|j| j.pid == pid)
    }

    pub fn lookup_by_jid(&self, jid: JobId) -> Option<&Job> {
        self.slots.iter().flatten().find(|j| j.jid == jid)
    }

    pub fn lookup_by_jid_mut(&mut self, jid: JobId) -> Option<&mut Job> {
        self.slots.iter_mut().flatten().find(|j| j.jid == jid)
    }

    /// Returns the pid of the unique foreground slot, if any.
    pub fn fg_pid(&self) -> Option<Pid> {
        self.slots
            .iter()
            .flatten()
            .find(|j| j.state == JobState::Foreground)
            .map(|j| j.pid)
    }

    /// Used by `logout` to refuse exit while jobs remain.
    pub fn any_non_empty(&self) -> bool {
        self.slots.iter().any(|s| s.is_some())
    }

    /// Jobs ordered by slot index, the way `jobs` prints them.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().flatten()
    }

    /// One line per tracked job: `[jid] (pid) <State> <cmdline>`.
    pub fn list(&self) -> Vec<String> {
        self.iter()
            .map(|j| format!("[{}] ({}) {} {}", j.jid.0, j.pid, j.state.label(), j.cmdline))
            .collect()
    }
}
