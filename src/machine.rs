//! Machine configuration: which cluster header, resources and tools to use on a host

/// Typed machine entry and the values derived from it
pub mod config;

/// Catalog of machines keyed by name or hostname pattern
pub mod catalog;

/// Validate raw catalog JSON against the embedded JSON schema
pub mod schema;

/// Turn a walltime setting into the hour budget handed to the run script
pub mod walltime;
