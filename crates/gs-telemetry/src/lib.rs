//! Logging and operation tracing for the gitshuffle binaries.
//!
//! - **Logging**: human-readable or JSON output via `tracing-subscriber`,
//!   always on stderr so command output on stdout stays machine-readable
//! - **Tracing**: uuid-derived trace/span ids attached to one span per CLI
//!   operation

pub mod logging;
pub mod tracing_setup;
