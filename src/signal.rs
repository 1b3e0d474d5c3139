//! Signal Layer (C3)
//!
//! Installs the three async-signal-safe handlers (`on_child`,
//! `on_interrupt`, `on_stop`) described in spec §4.3. Handlers reach the
//! process-wide [`ShellContext`](crate::context::ShellContext) through a
//! `static` pointer established once, before any handler is installed, by
//! [`crate::context::install_context`].
//!
//! Handlers are installed with their `sa_mask` set to block every signal
//! (`SigSet::all()`), which is what gives the spec's "entire reap loop
//! runs with all signals masked" property for free — the kernel, not the
//! handler body, enforces the mask for the handler's duration.

use std::os::raw::c_int;
use std::sync::atomic::Ordering;

use nix::errno::Errno;
use nix::sys::signal::{
    kill, sigaction, sigprocmask, sigsuspend, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow,
    Signal,
};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{write, Pid};

use crate::context::context;
use crate::error::{ShellError, ShellResult};
use crate::job::JobState;
use crate::proc_mirror::ProcStat;

/// Writes a diagnostic to stderr using only `write(2)` — no allocation, no
/// buffered stdio, safe to call from within a signal handler.
pub fn sigsafe_eprint(msg: &str) {
    let _ = write(std::io::stderr(), msg.as_bytes());
}

/// A `SigSet` containing every signal; used both as the handler `sa_mask`
/// and by the main thread whenever it needs to mask the world before
/// mutating the job table or proc mirror.
pub fn full_mask() -> SigSet {
    SigSet::all()
}

/// RAII guard that blocks a signal set on construction and restores the
/// previously-active mask on drop. The main thread wraps every job-table
/// or proc-mirror mutation in one of these so a signal handler can never
/// observe a half-updated structure.
pub struct SignalMaskGuard {
    previous: SigSet,
}

impl SignalMaskGuard {
    pub fn block(set: &SigSet) -> ShellResult<Self> {
        let mut previous = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(set), Some(&mut previous))
            .map_err(ShellError::SignalInstall)?;
        Ok(SignalMaskGuard { previous })
    }

    pub fn block_all() -> ShellResult<Self> {
        Self::block(&full_mask())
    }
}

impl Drop for SignalMaskGuard {
    fn drop(&mut self) {
        let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
    }
}

/// Installs `on_child`/`on_interrupt`/`on_stop` for `SIGCHLD`/`SIGINT`/`SIGTSTP`.
pub fn install_handlers() -> ShellResult<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_child),
        SaFlags::SA_RESTART,
        full_mask(),
    );
    unsafe { sigaction(Signal::SIGCHLD, &action) }.map_err(ShellError::SignalInstall)?;

    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::SA_RESTART,
        full_mask(),
    );
    unsafe { sigaction(Signal::SIGINT, &action) }.map_err(ShellError::SignalInstall)?;

    let action = SigAction::new(
        SigHandler::Handler(on_stop),
        SaFlags::SA_RESTART,
        full_mask(),
    );
    unsafe { sigaction(Signal::SIGTSTP, &action) }.map_err(ShellError::SignalInstall)?;

    Ok(())
}

/// Reaps zero-or-more children in non-blocking, including-stopped mode
/// until none are ready. Runs under the handler's own full `sa_mask`.
extern "C" fn on_child(_sig: c_int) {
    let saved_errno = Errno::last();
    let ctx = context();

    loop {
        let status = waitpid(
            Pid::from_raw(-1),
            Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED),
        );
        match status {
            Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                let was_fg = unsafe {
                    ctx.job_table.with_mut(|jt| {
                        let was_fg = jt
                            .lookup_by_pid(pid)
                            .map(|j| j.state == JobState::Foreground)
                            .unwrap_or(false);
                        jt.remove(pid);
                        was_fg
                    })
                };
                unsafe {
                    let _ = ctx.proc_mirror.with_mut(|pm| pm.remove(pid));
                }
                if was_fg {
                    ctx.fg_pid.store(pid.as_raw(), Ordering::SeqCst);
                }
            }
            Ok(WaitStatus::Stopped(pid, _)) => {
                unsafe {
                    ctx.job_table.with_mut(|jt| {
                        if let Some(job) = jt.lookup_by_pid_mut(pid) {
                            job.state = JobState::Stopped;
                        }
                    });
                    let _ = ctx.proc_mirror.with_mut(|pm| pm.edit_state(pid, ProcStat::T));
                }
                ctx.fg_pid.store(pid.as_raw(), Ordering::SeqCst);
            }
            Ok(WaitStatus::StillAlive) => break,
            Err(Errno::ECHILD) => break,
            Err(_) => {
                sigsafe_eprint("tsh: on_child: waitpid error\n");
                break;
            }
            _ => {}
        }
    }

    Errno::set(saved_errno);
}

/// Ctrl-C: forwards `SIGINT` to the foreground job's process group and
/// retires it from the job table immediately.
extern "C" fn on_interrupt(_sig: c_int) {
    let saved_errno = Errno::last();
    let ctx = context();

    let fg = unsafe { ctx.job_table.with(|jt| jt.fg_pid()) };
    if let Some(pid) = fg {
        unsafe {
            ctx.job_table.with_mut(|jt| {
                jt.remove(pid);
            });
            let _ = ctx.proc_mirror.with_mut(|pm| pm.remove(pid));
        }
        ctx.fg_pid.store(pid.as_raw(), Ordering::SeqCst);
        if kill(Pid::from_raw(-pid.as_raw()), Signal::SIGINT).is_err() {
            sigsafe_eprint("tsh: on_interrupt: kill failed\n");
        }
    }

    Errno::set(saved_errno);
}

/// Ctrl-Z: marks the foreground job stopped and forwards `SIGTSTP` to its
/// process group.
extern "C" fn on_stop(_sig: c_int) {
    let saved_errno = Errno::last();
    let ctx = context();

    let fg = unsafe { ctx.job_table.with(|jt| jt.fg_pid()) };
    if let Some(pid) = fg {
        unsafe {
            ctx.job_table.with_mut(|jt| {
                if let Some(job) = jt.lookup_by_pid_mut(pid) {
                    job.state = JobState::Stopped;
                }
            });
            let _ = ctx.proc_mirror.with_mut(|pm| pm.edit_state(pid, ProcStat::T));
        }
        if kill(Pid::from_raw(-pid.as_raw()), Signal::SIGTSTP).is_err() {
            sigsafe_eprint("tsh: on_stop: kill failed\n");
        }
    }

    Errno::set(saved_errno);
}

/// Blocks `SIGCHLD` temporarily; used while sigsuspend-based helpers need
/// to compute "everything blocked except these signals".
pub fn sigset_with(signals: &[Signal]) -> SigSet {
    let mut set = SigSet::empty();
    for sig in signals {
        set.add(*sig);
    }
    set
}

pub(crate) fn do_sigsuspend(mask: &SigSet) {
    let _ = sigsuspend(mask);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigset_with_contains_given_signals() {
        let set = sigset_with(&[Signal::SIGCHLD, Signal::SIGINT]);
        assert!(set.contains(Signal::SIGCHLD));
        assert!(set.contains(Signal::SIGINT));
        assert!(!set.contains(Signal::SIGTSTP));
    }
}
