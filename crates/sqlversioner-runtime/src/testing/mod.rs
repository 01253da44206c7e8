//! Test doubles for the reconciliation engine.

mod memory;

pub use memory::MemoryHistoryStore;
