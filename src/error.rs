//! Error types for firmforge
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Resource scanning errors
///
/// Scan errors are never swallowed: they abort the scan and propagate to the caller.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Reading a directory or file failed
    #[error("IO error while scanning '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// An ignore-manifest pattern could not be compiled
    #[error("Invalid ignore pattern '{pattern}' in '{file}': {error}")]
    InvalidPattern {
        file: PathBuf,
        pattern: String,
        error: String,
    },
}

/// Build errors raised by the incremental engine and the scheduler
#[derive(Error, Debug)]
pub enum BuildError {
    /// A tool exited with a non-zero status
    #[error("Command failed with {status}: {command}\n{output}")]
    Tool {
        command: String,
        status: String,
        output: String,
    },

    /// The tool reported that the target is not supported
    #[error("Target not supported while building '{source_file}':\n{output}")]
    NotSupported { source_file: PathBuf, output: String },

    /// Configuration could not be resolved for this target/toolchain permutation
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Outstanding jobs did not drain within the wall-clock bound
    #[error("Build timed out after {seconds}s with {pending} job(s) still running")]
    Timeout { seconds: u64, pending: usize },

    /// A required input (linker script, policy, device mapping) is absent
    #[error("Missing required artifact: {item}")]
    MissingArtifact { item: String },

    /// Two sources would be compiled into the same object
    #[error("'{first}' and '{second}' both compile to '{object}'")]
    ObjectClash {
        object: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },

    /// Cancellation was requested while jobs were outstanding
    #[error("Build cancelled")]
    Cancelled,

    /// Failed to launch a tool
    #[error("Failed to execute '{program}': {error}")]
    Spawn { program: String, error: String },

    /// IO error on a build artifact
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// Scan error surfaced during a build
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Image assembly error surfaced during a build
    #[error(transparent)]
    Image(#[from] ImageError),
}

impl BuildError {
    /// Whether the orchestration layer may skip this permutation and carry on
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::NotSupported { .. } | Self::Config { .. })
    }
}

/// Firmware image assembly errors
#[derive(Error, Debug)]
pub enum ImageError {
    /// Malformed Intel HEX input
    #[error("Invalid Intel HEX at line {line}: {reason}")]
    InvalidHex { line: usize, reason: String },

    /// A region artifact is larger than the region it is placed in
    #[error("Contents of region '{region}' ({size} bytes) do not fit in {capacity} bytes")]
    RegionOverflow {
        region: String,
        size: usize,
        capacity: u32,
    },

    /// No region is marked active, or more than one is
    #[error("Exactly one active region is required, found {count}")]
    ActiveRegion { count: usize },

    /// A required input is absent
    #[error("Missing required artifact: {item}")]
    MissingArtifact { item: String },

    /// IO error on an image file
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

/// Manifest loading errors
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Manifest file does not exist
    #[error("Manifest not found at '{path}'")]
    NotFound { path: PathBuf },

    /// Manifest could not be parsed
    #[error("Failed to parse manifest: {0}")]
    Parse(String),

    /// Manifest parsed but is semantically invalid
    #[error("Invalid manifest: {0}")]
    Invalid(String),
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to remove directory
    #[error("Failed to remove directory '{path}': {error}")]
    RemoveDir { path: PathBuf, error: String },

    /// Failed to remove file
    #[error("Failed to remove file '{path}': {error}")]
    RemoveFile { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// Failed to read file
    #[error("Failed to read file '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },
}

impl FilesystemError {
    /// Split into the offending path and the underlying error message
    fn into_parts(self) -> (PathBuf, String) {
        match self {
            Self::CreateDir { path, error }
            | Self::RemoveDir { path, error }
            | Self::RemoveFile { path, error }
            | Self::WriteFile { path, error }
            | Self::ReadFile { path, error } => (path, error),
        }
    }
}

impl From<FilesystemError> for BuildError {
    fn from(err: FilesystemError) -> Self {
        let (path, error) = err.into_parts();
        Self::Io { path, error }
    }
}

impl From<FilesystemError> for ImageError {
    fn from(err: FilesystemError) -> Self {
        let (path, error) = err.into_parts();
        Self::Io { path, error }
    }
}
