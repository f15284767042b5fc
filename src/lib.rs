//! natsbee: forwards NATS messages to stdout as JSON events.
//!
//! The bridge itself lives in `natsbee-nats`. This crate is the host process:
//!
//! * `config` loads `[logger]`, `[input]` and `[output]` from TOML and
//!   validates them with `validator`.
//! * `logger` installs the `tracing` subscriber (console and/or journald).
//! * `core` holds the stdout event writer and OS signal handling.

pub mod config;
pub mod core;
pub mod logger;
