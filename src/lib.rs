//! `tsh` — an interactive, signal-driven job-control shell.
//!
//! The library crate exists so the component modules (C1–C6) can be unit
//! and property tested in isolation; [`crate::main`]'s binary wires them
//! into the session loop described in spec §4.7.

pub mod auth;
pub mod builtin;
pub mod context;
pub mod error;
pub mod eval;
pub mod history;
pub mod job;
pub mod proc_mirror;
pub mod signal;
pub mod tokenize;
pub mod waiter;
