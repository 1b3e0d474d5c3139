//! Session Loop (C7): CLI parsing, authentication, and the
//! prompt/read/evaluate driver described in spec §4.7.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use log::info;
use nix::unistd::getpid;

use tsh::auth;
use tsh::builtin::Builtins;
use tsh::context::{install_context, SignalSafeCell, ShellContext};
use tsh::error::ShellError;
use tsh::eval::{eval_line, EvalControl};
use tsh::history::History;
use tsh::job::JobTable;
use tsh::proc_mirror::{FsProcMirror, ProcMirror, ProcRecord, ProcStat};
use tsh::signal::install_handlers;

/// `tsh`: an interactive job-control shell.
#[derive(Parser, Debug)]
#[command(name = "tsh", version, about)]
struct Cli {
    /// Enable debug-level logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Suppress the `tsh> ` prompt (useful when driving tsh from a script).
    #[arg(short = 'p', long = "no-prompt")]
    no_prompt: bool,

    /// Override the credential store path (default `~/.tshrc_users`).
    #[arg(long = "users-file")]
    users_file: Option<PathBuf>,

    /// Override the proc-mirror root (default `proc/`).
    #[arg(long = "proc-root")]
    proc_root: Option<PathBuf>,
}

fn default_credentials_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tshrc_users")
}

fn prompt_line(prompt: &str) -> io::Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut buf = String::new();
    let n = io::stdin().lock().read_line(&mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(buf.trim_end_matches(['\n', '\r']).to_string()))
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Warn };
    env_logger::Builder::new().filter_level(level).init();

    let credentials_path = cli.users_file.unwrap_or_else(default_credentials_path);
    let proc_root = cli.proc_root.unwrap_or_else(|| PathBuf::from("proc"));

    let Some(username) = prompt_line("login: ").unwrap_or(None) else {
        std::process::exit(0);
    };
    let Some(password) = prompt_line("password: ").unwrap_or(None) else {
        std::process::exit(0);
    };

    let credential = match auth::authenticate(&credentials_path, &username, &password) {
        Ok(c) => c,
        Err(ShellError::AuthFailed) => {
            eprintln!("tsh: incorrect username or password.");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("tsh: failed to read credential store: {e}");
            std::process::exit(1);
        }
    };

    let history_path = PathBuf::from(&credential.home).join(".tsh_history");
    let history = match History::load_from_file(&history_path, History::CAPACITY) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("tsh: failed to load history: {e}");
            History::new(History::CAPACITY)
        }
    };

    let proc_mirror = match FsProcMirror::new(&proc_root) {
        Ok(pm) => pm,
        Err(e) => {
            eprintln!("tsh: failed to initialize proc mirror: {e}");
            std::process::exit(1);
        }
    };

    let session_id = getpid();
    let ctx = install_context(ShellContext {
        user: credential.username.clone(),
        home: PathBuf::from(&credential.home),
        session_id,
        verbose: cli.verbose,
        credentials_path,
        history_path,
        job_table: SignalSafeCell::new(JobTable::new()),
        proc_mirror: SignalSafeCell::new(Box::new(proc_mirror)),
        history: SignalSafeCell::new(history),
        fg_pid: std::sync::atomic::AtomicI32::new(0),
    });

    unsafe {
        let _ = ctx.proc_mirror.with_mut(|pm| {
            pm.create(&ProcRecord {
                name: "tsh".to_string(),
                pid: session_id,
                ppid: session_id,
                pgid: session_id,
                sid: session_id,
                stat: ProcStat::Ss,
                username: ctx.user.clone(),
            })
        });
    }

    if let Err(e) = install_handlers() {
        eprintln!("tsh: failed to install signal handlers: {e}");
        std::process::exit(1);
    }

    info!("session started for {}", ctx.user);

    let builtins = Builtins::default();
    let mut exit_code = 0;
    // The prompt is skipped on the iteration immediately after login (spec §4.7, §6).
    let mut just_logged_in = true;

    loop {
        let line = if cli.no_prompt {
            let mut buf = String::new();
            match io::stdin().lock().read_line(&mut buf) {
                Ok(0) => break,
                Ok(_) => buf,
                Err(_) => break,
            }
        } else {
            let prompt = if just_logged_in { "" } else { "tsh> " };
            match prompt_line(prompt) {
                Ok(Some(l)) => l,
                Ok(None) => break,
                Err(_) => break,
            }
        };
        just_logged_in = false;

        match eval_line(ctx, &builtins, &line, true) {
            Ok(EvalControl::Continue) => {}
            Ok(EvalControl::Quit(code)) => {
                exit_code = code;
                break;
            }
            Err(e) => eprintln!("tsh: {e}"),
        }
    }

    std::process::exit(exit_code);
}
