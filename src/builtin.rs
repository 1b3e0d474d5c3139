//! Builtin Dispatcher (C6)
//!
//! One [`BuiltinCmd`] implementation per builtin, registered in a
//! [`Builtins`] lookup table the way `shrs_core::builtin::Builtins`
//! populates its own `HashMap` in `default()`.

use std::collections::HashMap;
use std::os::unix::fs::DirBuilderExt;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::auth;
use crate::context::ShellContext;
use crate::error::ShellError;
use crate::eval::EvalControl;
use crate::job::{JobId, JobState};
use crate::proc_mirror::ProcStat;
use crate::signal::SignalMaskGuard;

pub trait BuiltinCmd: Send + Sync {
    fn run(&self, ctx: &ShellContext, args: &[String]) -> anyhow::Result<EvalControl>;
}

pub struct Builtins {
    table: HashMap<&'static str, Box<dyn BuiltinCmd>>,
}

impl Builtins {
    pub fn get(&self, name: &str) -> Option<&dyn BuiltinCmd> {
        self.table.get(name).map(|b| b.as_ref())
    }
}

impl Default for Builtins {
    fn default() -> Self {
        let table: HashMap<&'static str, Box<dyn BuiltinCmd>> = HashMap::from([
            ("quit", Box::new(Quit) as Box<dyn BuiltinCmd>),
            ("logout", Box::new(Logout) as Box<dyn BuiltinCmd>),
            ("jobs", Box::new(Jobs) as Box<dyn BuiltinCmd>),
            ("fg", Box::new(Fg) as Box<dyn BuiltinCmd>),
            ("bg", Box::new(Bg) as Box<dyn BuiltinCmd>),
            ("history", Box::new(HistoryCmd) as Box<dyn BuiltinCmd>),
            ("adduser", Box::new(Adduser) as Box<dyn BuiltinCmd>),
        ]);
        Builtins { table }
    }
}

/// Persists the history ring to disk, truncating the file to exactly its
/// contents (spec §6).
fn flush_history(ctx: &ShellContext) {
    let saved = unsafe { ctx.history.with(|h| h.save_to_file(&ctx.history_path)) };
    if let Err(e) = saved {
        eprintln!("tsh: failed to save history: {e}");
    }
}

struct Quit;

impl BuiltinCmd for Quit {
    fn run(&self, ctx: &ShellContext, _args: &[String]) -> anyhow::Result<EvalControl> {
        flush_history(ctx);
        unsafe {
            let _ = ctx.proc_mirror.with_mut(|pm| pm.remove_all());
        }
        Ok(EvalControl::Quit(0))
    }
}

struct Logout;

impl BuiltinCmd for Logout {
    fn run(&self, ctx: &ShellContext, args: &[String]) -> anyhow::Result<EvalControl> {
        let has_jobs = unsafe { ctx.job_table.with(|jt| jt.any_non_empty()) };
        if has_jobs {
            println!("There are suspended jobs.");
            return Ok(EvalControl::Continue);
        }
        Quit.run(ctx, args)
    }
}

struct Jobs;

impl BuiltinCmd for Jobs {
    fn run(&self, ctx: &ShellContext, _args: &[String]) -> anyhow::Result<EvalControl> {
        let lines = unsafe { ctx.job_table.with(|jt| jt.list()) };
        for line in lines {
            println!("{line}");
        }
        Ok(EvalControl::Continue)
    }
}

/// Resolves a bare number into a `(pid, jid, cmdline, state)` tuple.
///
/// Disambiguation per spec §4.6: try the argument as a pid first; if no
/// job has that pid, fall back to treating it as a jid.
fn resolve_selector(ctx: &ShellContext, token: &str) -> Option<(Pid, JobId, String, JobState)> {
    let raw: i32 = token.parse().ok()?;
    unsafe {
        ctx.job_table.with(|jt| {
            let job = jt
                .lookup_by_pid(Pid::from_raw(raw))
                .or_else(|| jt.lookup_by_jid(JobId(raw as u32)))?;
            Some((job.pid, job.jid, job.cmdline.clone(), job.state))
        })
    }
}

struct Fg;

impl BuiltinCmd for Fg {
    fn run(&self, ctx: &ShellContext, args: &[String]) -> anyhow::Result<EvalControl> {
        let Some(token) = args.get(1) else {
            println!("fg: usage: fg <job-id | pid>");
            return Ok(EvalControl::Continue);
        };
        let Some((pid, _jid, _cmdline, state)) = resolve_selector(ctx, token) else {
            println!("{}", ShellError::JobNotFound(token.clone()));
            return Ok(EvalControl::Continue);
        };

        if state == JobState::Foreground {
            println!("job is already in the foreground.");
            return Ok(EvalControl::Continue);
        }

        let was_stopped = state == JobState::Stopped;
        {
            let _guard = SignalMaskGuard::block_all()?;
            unsafe {
                ctx.job_table.with_mut(|jt| {
                    if let Some(job) = jt.lookup_by_pid_mut(pid) {
                        job.state = JobState::Foreground;
                    }
                });
                let _ = ctx.proc_mirror.with_mut(|pm| pm.edit_state(pid, ProcStat::RPlus));
            }
        }

        if was_stopped && kill(Pid::from_raw(-pid.as_raw()), Signal::SIGCONT).is_err() {
            eprintln!("tsh: fg: failed to resume {pid}");
        }

        crate::waiter::wait_fg(ctx, pid, &[Signal::SIGCHLD]);
        Ok(EvalControl::Continue)
    }
}

struct Bg;

impl BuiltinCmd for Bg {
    fn run(&self, ctx: &ShellContext, args: &[String]) -> anyhow::Result<EvalControl> {
        let Some(token) = args.get(1) else {
            println!("bg: usage: bg <job-id | pid>");
            return Ok(EvalControl::Continue);
        };
        let Some((pid, jid, cmdline, state)) = resolve_selector(ctx, token) else {
            println!("{}", ShellError::JobNotFound(token.clone()));
            return Ok(EvalControl::Continue);
        };

        match state {
            JobState::Foreground => {
                println!("must be stopped before moving...");
                return Ok(EvalControl::Continue);
            }
            JobState::Background => {
                println!("job is already running in the background.");
                return Ok(EvalControl::Continue);
            }
            JobState::Stopped => {}
            JobState::Undef => unreachable!("resolved job can't be in an empty slot"),
        }

        {
            let _guard = SignalMaskGuard::block_all()?;
            unsafe {
                ctx.job_table.with_mut(|jt| {
                    if let Some(job) = jt.lookup_by_pid_mut(pid) {
                        job.state = JobState::Background;
                    }
                });
                let _ = ctx.proc_mirror.with_mut(|pm| pm.edit_state(pid, ProcStat::R));
            }
        }

        if kill(Pid::from_raw(-pid.as_raw()), Signal::SIGCONT).is_err() {
            eprintln!("tsh: bg: failed to resume {pid}");
        }

        println!("[{}] ({}) Running {}", jid.0, pid, cmdline);
        Ok(EvalControl::Continue)
    }
}

struct HistoryCmd;

impl BuiltinCmd for HistoryCmd {
    fn run(&self, ctx: &ShellContext, _args: &[String]) -> anyhow::Result<EvalControl> {
        let lines: Vec<(usize, String)> =
            unsafe { ctx.history.with(|h| h.entries().map(|(n, s)| (n, s.to_string())).collect()) };
        for (n, line) in lines {
            println!("{n}\t{line}");
        }
        Ok(EvalControl::Continue)
    }
}

struct Adduser;

impl BuiltinCmd for Adduser {
    fn run(&self, ctx: &ShellContext, args: &[String]) -> anyhow::Result<EvalControl> {
        if !ctx.is_root() {
            println!("root privileges required to run adduser.");
            return Ok(EvalControl::Continue);
        }
        let (Some(username), Some(password)) = (args.get(1), args.get(2)) else {
            println!("adduser: usage: adduser <username> <password>");
            return Ok(EvalControl::Continue);
        };
        if username.is_empty() || password.is_empty() {
            println!("adduser: username and password must be non-empty.");
            return Ok(EvalControl::Continue);
        }
        if auth::user_exists(&ctx.credentials_path, username)? {
            println!("adduser: user already exists.");
            return Ok(EvalControl::Continue);
        }

        let home = format!("home/{username}");
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&home)?;
        auth::add_user(&ctx.credentials_path, username, password, &home)?;
        println!("adduser: added user {username}.");
        Ok(EvalControl::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{context_for_test, SignalSafeCell};
    use crate::history::History;
    use crate::job::JobTable;
    use crate::proc_mirror::MemProcMirror;
    use std::sync::atomic::AtomicI32;

    fn fresh_ctx(user: &str) -> &'static ShellContext {
        context_for_test(ShellContext {
            user: user.to_string(),
            home: "/root".into(),
            session_id: Pid::from_raw(1),
            verbose: false,
            credentials_path: "/tmp/tsh-builtin-test-users".into(),
            history_path: "/tmp/tsh-builtin-test-history".into(),
            job_table: SignalSafeCell::new(JobTable::new()),
            proc_mirror: SignalSafeCell::new(Box::new(MemProcMirror::default())),
            history: SignalSafeCell::new(History::new(History::CAPACITY)),
            fg_pid: AtomicI32::new(0),
        })
    }

    #[test]
    #[serial_test::serial(shell_context)]
    fn jobs_lists_nothing_when_empty() {
        let ctx = fresh_ctx("root");
        let outcome = Jobs.run(ctx, &["jobs".to_string()]).unwrap();
        assert!(matches!(outcome, EvalControl::Continue));
    }

    #[test]
    #[serial_test::serial(shell_context)]
    fn logout_refuses_with_live_jobs() {
        let ctx = fresh_ctx("root");
        unsafe {
            ctx.job_table.with_mut(|jt| {
                jt.add(Pid::from_raw(123), JobState::Background, "sleep 10 &").unwrap()
            });
        }
        let outcome = Logout.run(ctx, &["logout".to_string()]).unwrap();
        assert!(matches!(outcome, EvalControl::Continue));
    }

    #[test]
    #[serial_test::serial(shell_context)]
    fn logout_quits_with_no_jobs() {
        let ctx = fresh_ctx("root");
        let outcome = Logout.run(ctx, &["logout".to_string()]).unwrap();
        assert!(matches!(outcome, EvalControl::Quit(0)));
    }

    #[test]
    #[serial_test::serial(shell_context)]
    fn fg_reports_missing_job() {
        let ctx = fresh_ctx("root");
        let outcome = Fg.run(ctx, &["fg".to_string(), "9".to_string()]).unwrap();
        assert!(matches!(outcome, EvalControl::Continue));
    }

    #[test]
    #[serial_test::serial(shell_context)]
    fn resolve_selector_tries_pid_before_falling_back_to_jid() {
        let ctx = fresh_ctx("root");
        let jid = unsafe {
            ctx.job_table
                .with_mut(|jt| jt.add(Pid::from_raw(777), JobState::Background, "sleep 5 &").unwrap())
        };
        // A bare pid match takes priority.
        let via_pid = resolve_selector(ctx, "777").unwrap();
        assert_eq!(via_pid.0, Pid::from_raw(777));
        assert_eq!(via_pid.1, jid);

        // No job has pid == jid.0, so it falls back to a jid lookup.
        let via_jid = resolve_selector(ctx, &jid.0.to_string()).unwrap();
        assert_eq!(via_jid.0, Pid::from_raw(777));
    }

    #[test]
    #[serial_test::serial(shell_context)]
    fn bg_on_foreground_job_is_refused() {
        let ctx = fresh_ctx("root");
        unsafe {
            ctx.job_table.with_mut(|jt| {
                jt.add(Pid::from_raw(555), JobState::Foreground, "cat").unwrap()
            });
        }
        let outcome = Bg.run(ctx, &["bg".to_string(), "555".to_string()]).unwrap();
        assert!(matches!(outcome, EvalControl::Continue));
        let state = unsafe {
            ctx.job_table
                .with(|jt| jt.lookup_by_pid(Pid::from_raw(555)).map(|j| j.state))
        };
        assert_eq!(state, Some(JobState::Foreground));
    }

    #[test]
    #[serial_test::serial(shell_context)]
    fn adduser_requires_root() {
        let ctx = fresh_ctx("alice");
        let outcome = Adduser
            .run(ctx, &["adduser".to_string(), "bob".to_string(), "pw".to_string()])
            .unwrap();
        assert!(matches!(outcome, EvalControl::Continue));
        assert!(!auth::user_exists(&ctx.credentials_path, "bob").unwrap());
    }
}
