pub mod backend;
pub mod chunker;
pub mod config;
pub mod duration;
pub mod engine;
pub mod error;
pub mod git;
pub mod lockfile;
pub mod manifest;
pub mod plan;
pub mod planner;
pub mod scan;
pub mod state;
pub mod types;

#[cfg(feature = "libgit2")]
pub mod git2_ops;

pub use error::{Result, ShuffleError};
