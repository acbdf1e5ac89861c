//! Deterministic, pure logic shared by the planner and the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod diff;
pub mod message;
pub mod semantic;
pub mod state;
pub mod types;
