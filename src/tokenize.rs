//! Command-line tokenization (external collaborator; spec §4.5 edge
//! cases). Produces the argument vector the core evaluator consumes.
//!
//! Supports single-quote grouping (`'a b'` is one argument with the
//! quotes stripped) and a trailing `&` marking a background job. No
//! globbing, redirection, or pipe syntax — those are explicit Non-goals.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Recognizes a bare `!N` history-replay command.
    static ref HISTORY_BANG: Regex = Regex::new(r"^!(\d+)$").unwrap();
}

/// Splits a line into arguments, honoring single-quoted spans.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut have_token = false;

    for c in line.chars() {
        match c {
            '\'' => {
                in_quotes = !in_quotes;
                have_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if have_token {
                    args.push(std::mem::take(&mut current));
                    have_token = false;
                }
            }
            c => {
                current.push(c);
                have_token = true;
            }
        }
    }
    if have_token {
        args.push(current);
    }

    args
}

/// Strips a trailing `&` (as its own token, or suffixed onto the last
/// token) and reports whether the command should run in the background.
pub fn strip_background(args: &mut Vec<String>) -> bool {
    match args.last() {
        Some(last) if last == "&" => {
            args.pop();
            true
        }
        Some(last) if last.len() > 1 && last.ends_with('&') => {
            let stripped = last[..last.len() - 1].to_string();
            *args.last_mut().unwrap() = stripped;
            true
        }
        _ => false,
    }
}

/// If `line` is a bare `!N`, returns the 1-based history index.
pub fn history_replay_index(line: &str) -> Option<usize> {
    HISTORY_BANG
        .captures(line.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
