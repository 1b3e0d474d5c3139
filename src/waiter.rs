//! Foreground Waiter (C4)
//!
//! Suspends the shell until the current foreground job leaves FG tenure.
//! The caller must already hold `block_set` blocked on entry — `wait_fg`
//! never performs the *initial* block itself, so the handler cannot race
//! between the caller's check and the first suspension.

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::sync::atomic::Ordering;

use crate::context::ShellContext;
use crate::signal::do_sigsuspend;

/// While `fg_pid != pid`, atomically unblocks `block_set` and suspends
/// until any signal is delivered, then re-blocks and rechecks. Resets
/// `fg_pid` to 0 once the wait is satisfied.
pub fn wait_fg(ctx: &ShellContext, pid: Pid, block_set: &[Signal]) {
    let mut wait_mask = nix::sys::signal::SigSet::all();
    for sig in block_set {
        wait_mask.remove(*sig);
    }

    while ctx.fg_pid.load(Ordering::SeqCst) != pid.as_raw() {
        do_sigsuspend(&wait_mask);
    }

    ctx.fg_pid.store(0, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{context_for_test, SignalSafeCell};
    use crate::history::History;
    use crate::job::JobTable;
    use crate::proc_mirror::MemProcMirror;
    use crate::context::ShellContext;
    use std::sync::atomic::AtomicI32;

    #[test]
    #[serial_test::serial(shell_context)]
    fn wait_fg_returns_immediately_when_fg_pid_already_matches() {
        let ctx = context_for_test(ShellContext {
            user: "root".into(),
            home: "/root".into(),
            session_id: Pid::from_raw(1),
            verbose: false,
            credentials_path: "/tmp/tsh-test-users".into(),
            history_path: "/tmp/tsh-test-history".into(),
            job_table: SignalSafeCell::new(JobTable::new()),
            proc_mirror: SignalSafeCell::new(Box::new(MemProcMirror::default())),
            history: SignalSafeCell::new(History::new(10)),
            fg_pid: AtomicI32::new(42),
        });

        wait_fg(ctx, Pid::from_raw(42), &[Signal::SIGCHLD]);
        assert_eq!(ctx.fg_pid.load(Ordering::SeqCst), 0);
    }
}
