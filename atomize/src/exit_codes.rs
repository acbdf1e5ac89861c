//! Stable exit codes for `atomize` commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Bad flags or conflicting inputs.
pub const USAGE: i32 = 2;
/// Empty, oversized or unreadable diff input.
pub const INPUT_INVALID: i32 = 3;
/// Plan generator could not run, failed, or timed out.
pub const LLM_RUNTIME: i32 = 4;
/// Plan rejected after the correction retry, or a plan conflict at apply time.
pub const LLM_PARSE: i32 = 5;
/// Git failure, drift, verification mismatch or lock contention.
pub const GIT: i32 = 6;
pub const CONFIG: i32 = 7;
/// Cancelled by SIGINT.
pub const INTERRUPTED: i32 = 130;
