//! The single owning shell context (spec §9 Design Notes).
//!
//! Every process-wide global (logged-in user, home path, session id, job
//! table, history ring, proc mirror, `fg_pid`) lives in one
//! [`ShellContext`] value, created once in `main`, leaked to `'static`,
//! and published through an atomic pointer *before* any signal handler is
//! installed. Handlers and the main loop both reach it through
//! [`context()`].
//!
//! A `Mutex` is deliberately not used anywhere in here: the handlers run
//! on the main thread's stack whenever a signal is delivered, so a `Mutex`
//! held by the main thread at the moment a handler fires would deadlock
//! the handler against itself. Signal masking (see [`crate::signal`]) is
//! the only synchronization primitive safe for this execution model.

use std::cell::UnsafeCell;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, AtomicPtr, Ordering};

use nix::unistd::Pid;

use crate::history::History;
use crate::job::JobTable;
use crate::proc_mirror::ProcMirror;

/// Interior-mutability cell whose safety invariant is enforced by
/// discipline, not the type system: every call to `with`/`with_mut` must
/// happen either from inside a signal handler (which the kernel already
/// runs with every signal blocked, see [`crate::signal::install_handlers`])
/// or from the main thread while holding a
/// [`crate::signal::SignalMaskGuard`].
pub struct SignalSafeCell<T>(UnsafeCell<T>);

// Safety: access is single-threaded; concurrent "access" only ever comes
// from a signal handler preempting the main thread, and both sides honor
// the masking discipline documented on the type.
unsafe impl<T> Sync for SignalSafeCell<T> {}

impl<T> SignalSafeCell<T> {
    pub fn new(value: T) -> Self {
        SignalSafeCell(UnsafeCell::new(value))
    }

    /// # Safety
    /// Caller must hold a full signal mask (or be running inside a signal
    /// handler whose `sa_mask` already blocks everything).
    pub unsafe fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.0.get())
    }

    /// # Safety
    /// See [`SignalSafeCell::with`].
    pub unsafe fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut *self.0.get())
    }
}

pub struct ShellContext {
    pub user: String,
    pub home: PathBuf,
    pub session_id: Pid,
    pub verbose: bool,
    /// Path to the colon-separated credential store (spec §6); consulted
    /// by the `adduser` builtin and by login in `main`.
    pub credentials_path: PathBuf,
    /// Path to this user's persisted history file, truncated to the ring
    /// on `quit` (spec §6).
    pub history_path: PathBuf,
    pub job_table: SignalSafeCell<JobTable>,
    pub proc_mirror: SignalSafeCell<Box<dyn ProcMirror>>,
    pub history: SignalSafeCell<History>,
    pub fg_pid: AtomicI32,
}

impl ShellContext {
    /// `adduser` and any other admin-only builtin are gated on this.
    pub fn is_root(&self) -> bool {
        self.user == "root"
    }
}

static CONTEXT_PTR: AtomicPtr<ShellContext> = AtomicPtr::new(std::ptr::null_mut());

/// Leaks `ctx` to `'static` and publishes it. Must be called exactly once,
/// before [`crate::signal::install_handlers`].
pub fn install_context(ctx: ShellContext) -> &'static ShellContext {
    let leaked: &'static ShellContext = Box::leak(Box::new(ctx));
    CONTEXT_PTR.store(leaked as *const ShellContext as *mut ShellContext, Ordering::SeqCst);
    leaked
}

/// Panics if called before [`install_context`] — every entry point that
/// can observe a signal must call `install_context` first.
pub fn context() -> &'static ShellContext {
    let ptr = CONTEXT_PTR.load(Ordering::SeqCst);
    assert!(!ptr.is_null(), "shell context accessed before installation");
    unsafe { &*ptr }
}

#[cfg(test)]
pub(crate) fn context_for_test(ctx: ShellContext) -> &'static ShellContext {
    install_context(ctx)
}
