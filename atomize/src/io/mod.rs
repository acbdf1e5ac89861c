//! Side-effecting adapters: git, subprocesses, configuration, prompts, locks.

pub mod config;
pub mod generator;
pub mod git;
pub mod lock;
pub mod process;
pub mod prompt;
