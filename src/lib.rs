//! Firmforge - incremental multi-toolchain firmware builds
//!
//! This library scans a convention-organized embedded source tree, compiles
//! only what changed with a GCC, ARM or IAR toolchain, links or archives the
//! result, and assembles merged, checksum-patched firmware images.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Resource collection, incremental engine and image assembly
//! - [`infra`] - Infrastructure layer (filesystem, processes, toolchain backends)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
