//! Push and pull job files with rsync.
//!
//! The upload history only ever records transfers whose rsync exited 0: state is written
//! after the external process has finished, never before.

/// Which files an upload sends
pub mod manifest;

/// `upload` and `download` against a remote host
pub mod remote;
