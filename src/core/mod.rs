//! Core build logic
//!
//! Process execution and filesystem helpers live in [`crate::infra`].
//!
//! # Submodules
//!
//! - [`target`] - CPU cores, label classes and the target description
//! - [`resources`] - Classified file registry with lazily scanned features
//! - [`ignore`] - Per-directory ignore manifests
//! - [`scanner`] - Resource collector
//! - [`provider`] - Configuration provider contract (regions, header data)
//! - [`manifest`] - Manifest (firmforge.toml) parsing and validation
//! - [`symbols`] - Preprocessor symbol sets
//! - [`depfile`] - Make-style dependency file parsing
//! - [`staleness`] - Timestamp cache and the rebuild predicate
//! - [`config_header`] - Content-cached configuration header
//! - [`options_file`] - Content-addressed response files
//! - [`profile`] - Per-language build-profile fingerprints
//! - [`scheduler`] - Sequential or pooled compile job execution
//! - [`engine`] - Incremental compile, archive and link
//! - [`memap`] - Memory usage from linker map files
//! - [`image`] - Firmware image assembly

pub mod config_header;
pub mod depfile;
pub mod engine;
pub mod ignore;
pub mod image;
pub mod manifest;
pub mod memap;
pub mod options_file;
pub mod profile;
pub mod provider;
pub mod resources;
pub mod scanner;
pub mod scheduler;
pub mod staleness;
pub mod symbols;
pub mod target;
