//! The job-state document and its on-disk store

/// Typed state document: step location, serial, tool paths, command and transfer history
pub mod document;

/// Load and atomically replace `state.json`
pub mod store;
