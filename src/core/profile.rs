//! Build-profile fingerprints
//!
//! Every object depends on a small JSON file describing the flags and
//! symbols of its language. When those change the file is rewritten, its
//! mtime moves forward and every object of that language becomes stale.
//! When they do not, the file is left alone.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::core::symbols::is_timestamp;
use crate::error::BuildError;
use crate::infra::filesystem;
use crate::infra::toolchain::Language;

/// Content of a `.profile-<lang>` file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub flags: Vec<String>,
    pub symbols: Vec<String>,
}

impl Fingerprint {
    /// Sorted fingerprint, ignoring the build timestamp
    pub fn new(flags: &[String], symbols: &[String]) -> Self {
        let mut flags = flags.to_vec();
        flags.sort();
        let mut symbols: Vec<String> = symbols
            .iter()
            .filter(|s| !is_timestamp(s))
            .cloned()
            .collect();
        symbols.sort();
        symbols.dedup();
        Self { flags, symbols }
    }
}

/// Path of the fingerprint file for `language`
pub fn path(build_dir: &Path, language: Language) -> PathBuf {
    build_dir.join(format!("{}-{}", defaults::PROFILE_FILE_PREFIX, language.key()))
}

/// Write the fingerprint if it differs from the one on disk
///
/// Returns the file path and whether it was (re)written.
pub fn update(
    build_dir: &Path,
    language: Language,
    fingerprint: &Fingerprint,
) -> Result<(PathBuf, bool), BuildError> {
    let path = path(build_dir, language);
    let current = std::fs::read_to_string(&path)
        .ok()
        .and_then(|text| serde_json::from_str::<Fingerprint>(&text).ok());
    if current.as_ref() == Some(fingerprint) {
        return Ok((path, false));
    }

    let json = serde_json::to_string_pretty(fingerprint).map_err(|e| BuildError::Io {
        path: path.clone(),
        error: e.to_string(),
    })?;
    tracing::debug!("Build profile for {} changed", language.key());
    filesystem::write_file(&path, &json)?;
    Ok((path, true))
}
