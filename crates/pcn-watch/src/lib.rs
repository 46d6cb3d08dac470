//! pcn-watch library entry point.
//!
//! Re-exports the binary's modules so that unit tests and `main.rs` share
//! the same module tree.
//!
//! # What does pcn-watch do? (for beginners)
//!
//! `pcn-watch` subscribes to the kernel's process events and prints one line
//! per event, either as human-readable text or as JSON:
//!
//! 1. Load `config.toml` (optional) and apply command-line overrides.
//! 2. Start a dedicated reader thread that owns the netlink connection.
//! 3. Print every event the thread forwards until Ctrl-C.
//! 4. If the connection is lost (for example the kernel overran the receive
//!    buffer), wait `reconnect_delay_ms` and subscribe again.

/// TOML configuration file.
pub mod config;

/// Text and JSON rendering of event records.
pub mod output;

/// Blocking reader thread and reconnect loop.
pub mod reader;
