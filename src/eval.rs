//! Evaluator (C5)
//!
//! Parses one command line, forks external commands or dispatches a
//! builtin, and wires up the job table, proc mirror, and foreground
//! waiter (C1–C4).

use std::ffi::CString;

use nix::sys::signal::Signal;
use nix::unistd::{execvp, fork, getpid, setpgid, ForkResult, Pid};

use crate::builtin::Builtins;
use crate::context::ShellContext;
use crate::error::ShellError;
use crate::job::JobState;
use crate::proc_mirror::{ProcRecord, ProcStat};
use crate::signal::SignalMaskGuard;
use crate::tokenize;
use crate::waiter::wait_fg;

/// What the session loop should do after evaluating one line.
pub enum EvalControl {
    Continue,
    Quit(i32),
}

/// Evaluates one line of input.
///
/// `record_history` is `false` only for lines replayed via `!N` — the
/// replay itself must not be re-persisted (spec §4.5).
pub fn eval_line(
    ctx: &'static ShellContext,
    builtins: &Builtins,
    raw_line: &str,
    record_history: bool,
) -> anyhow::Result<EvalControl> {
    let trimmed = raw_line.trim();
    if trimmed.is_empty() {
        return Ok(EvalControl::Continue);
    }

    if let Some(n) = tokenize::history_replay_index(trimmed) {
        let entry = unsafe { ctx.history.with(|h| h.get(n).map(|s| s.to_string())) };
        return match entry {
            Some(cmd) => eval_line(ctx, builtins, &cmd, false),
            None => {
                println!("{}", ShellError::HistoryIndexOutOfRange(n));
                Ok(EvalControl::Continue)
            }
        };
    }

    if record_history {
        unsafe {
            ctx.history.with_mut(|h| h.push(trimmed.to_string()));
        }
    }

    let mut args = tokenize::tokenize(trimmed);
    if args.is_empty() {
        return Ok(EvalControl::Continue);
    }
    let bg = tokenize::strip_background(&mut args);

    if let Some(builtin) = builtins.get(args[0].as_str()) {
        return builtin.run(ctx, &args);
    }

    run_external(ctx, &args, bg, trimmed)
}

fn run_external(
    ctx: &'static ShellContext,
    args: &[String],
    bg: bool,
    cmdline: &str,
) -> anyhow::Result<EvalControl> {
    let child_sigset = crate::signal::sigset_with(&[Signal::SIGCHLD]);
    let _guard = SignalMaskGuard::block(&child_sigset)?;

    match unsafe { fork() }? {
        ForkResult::Child => {
            child_exec(ctx, args, bg, &child_sigset);
            unreachable!("child_exec never returns");
        }
        ForkResult::Parent { child } => {
            {
                let _full = SignalMaskGuard::block_all()?;
                unsafe {
                    ctx.job_table.with_mut(|jt| {
                        jt.add(
                            child,
                            if bg { JobState::Background } else { JobState::Foreground },
                            cmdline.to_string(),
                        )
                    })?;
                }
            }

            if bg {
                println!("{child} {cmdline}");
            } else {
                wait_fg(ctx, child, &[Signal::SIGCHLD]);
            }

            Ok(EvalControl::Continue)
        }
    }
}

/// Runs in the forked child: own process group, own proc record, unblock
/// the child signal, then exec.
fn child_exec(ctx: &ShellContext, args: &[String], bg: bool, child_sigset: &nix::sys::signal::SigSet) -> ! {
    let pid = getpid();
    let _ = setpgid(pid, pid);

    let record = ProcRecord {
        name: args[0].clone(),
        pid,
        ppid: ctx.session_id,
        pgid: pid,
        sid: ctx.session_id,
        stat: if bg { ProcStat::R } else { ProcStat::RPlus },
        username: ctx.user.clone(),
    };
    unsafe {
        let _ = ctx.proc_mirror.with_mut(|pm| pm.create(&record));
    }

    let _ = nix::sys::signal::sigprocmask(
        nix::sys::signal::SigmaskHow::SIG_UNBLOCK,
        Some(child_sigset),
        None,
    );

    let cmd = CString::new(args[0].as_str()).unwrap();
    let argv: Vec<CString> = args.iter().map(|a| CString::new(a.as_str()).unwrap()).collect();

    match execvp(&cmd, &argv) {
        Ok(_) => unreachable!(),
        Err(_) => {
            eprintln!("{}: Command not found.", args[0]);
            std::process::exit(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::Builtins;
    use crate::context::{context_for_test, SignalSafeCell};
    use crate::history::History;
    use crate::job::JobTable;
    use crate::proc_mirror::MemProcMirror;
    use std::sync::atomic::AtomicI32;

    fn fresh_ctx() -> &'static ShellContext {
        context_for_test(ShellContext {
            user: "root".into(),
            home: "/root".into(),
            session_id: Pid::from_raw(std::process::id() as i32),
            verbose: false,
            credentials_path: "/tmp/tsh-eval-test-users".into(),
            history_path: "/tmp/tsh-eval-test-history".into(),
            job_table: SignalSafeCell::new(JobTable::new()),
            proc_mirror: SignalSafeCell::new(Box::new(MemProcMirror::default())),
            history: SignalSafeCell::new(History::new(History::CAPACITY)),
            fg_pid: AtomicI32::new(0),
        })
    }

    #[test]
    #[serial_test::serial(shell_context)]
    fn blank_line_continues_without_touching_history() {
        let ctx = fresh_ctx();
        let builtins = Builtins::default();
        let outcome = eval_line(ctx, &builtins, "   ", true).unwrap();
        assert!(matches!(outcome, EvalControl::Continue));
        assert_eq!(unsafe { ctx.history.with(|h| h.len()) }, 0);
    }

    #[test]
    #[serial_test::serial(shell_context)]
    fn history_bang_replay_does_not_re_record() {
        let ctx = fresh_ctx();
        let builtins = Builtins::default();
        eval_line(ctx, &builtins, "jobs", true).unwrap();
        assert_eq!(unsafe { ctx.history.with(|h| h.len()) }, 1);

        eval_line(ctx, &builtins, "!1", true).unwrap();
        // replaying "jobs" re-dispatches the builtin but must not push a
        // second history entry for the replay itself.
        assert_eq!(unsafe { ctx.history.with(|h| h.len()) }, 1);
    }

    #[test]
    #[serial_test::serial(shell_context)]
    fn out_of_range_bang_reports_error_without_evaluating() {
        let ctx = fresh_ctx();
        let builtins = Builtins::default();
        let outcome = eval_line(ctx, &builtins, "!9", true).unwrap();
        assert!(matches!(outcome, EvalControl::Continue));
    }
}
