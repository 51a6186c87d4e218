//! Orchestration core for coding agents running in tmux panes.
//!
//! Every operation takes a [`context::Context`] (multiplexer, backlog,
//! config, cancel token, event log) and returns a typed payload that the
//! CLI wraps in a versioned [`envelope::Envelope`].

pub mod agent;
pub mod alert;
pub mod assign;
pub mod backlog;
pub mod cancel;
pub mod capture;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod control;
pub mod detector;
pub mod envelope;
pub mod error;
pub mod handoff;
pub mod health;
pub mod indicator;
pub mod inspect;
pub mod log;
pub mod paths;
pub mod probe;
pub mod prompt;
pub mod redact;
pub mod restart;
pub mod session;
pub mod shell_completion;
pub mod spawn;
pub mod terse;
pub mod tmux;
