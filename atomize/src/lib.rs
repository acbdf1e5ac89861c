//! Atomic git commit planner with a safe execution engine.
//!
//! A diff (supplied, or captured from a repository) is handed to an untrusted
//! plan generator, which groups the changes into single-concern commit units.
//! The plan is validated structurally and semantically, then applied one unit
//! at a time: stage, verify the staged diff against the snapshot, commit. Any
//! doubt aborts the run instead of producing an unintended commit.
//!
//! - **[`core`]**: Pure, deterministic logic (diff parsing, semantic rules,
//!   commit messages, the execution state machine). No I/O.
//! - **[`io`]**: Side-effecting operations (git, subprocesses, config, prompts,
//!   repository locks).
//!
//! Orchestration modules ([`snapshot`], [`validate`], [`plan`], [`apply`],
//! [`pipeline`]) coordinate the two to implement the CLI and service calls.

pub mod apply;
pub mod cancel;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod plan;
pub mod report;
pub mod snapshot;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
