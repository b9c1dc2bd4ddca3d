//! Run scripts and cluster submission scripts

/// Token substitution shared by headers and settings blocks
pub mod template;

/// Build the resumable run script and the composed cluster script for the current step
pub mod continuation;

/// Cluster scripts wrapping the `script-*.py` files in the job root
pub mod wrapper;
