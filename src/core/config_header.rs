//! Generated configuration header
//!
//! The header is cached by content, not by timestamp. Rewriting it with
//! identical content would bump its mtime and make every object stale, so
//! it is only touched when its sha256 changes.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::defaults;
use crate::core::provider::ConfigData;
use crate::error::BuildError;
use crate::infra::filesystem;

/// Outcome of refreshing the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderUpdate {
    /// Header to force-include, `None` if there is none
    pub path: Option<PathBuf>,
    /// Content changed or was removed: everything must be rebuilt
    pub rebuild_all: bool,
}

/// Render the header text; empty when there is nothing to configure
pub fn render(data: Option<&ConfigData>) -> String {
    let Some(data) = data.filter(|d| !d.is_empty()) else {
        return String::new();
    };

    let mut out = String::new();
    out.push_str("// Automatically generated configuration file.\n");
    out.push_str("// DO NOT EDIT, content will be overwritten.\n\n");
    out.push_str("#ifndef __FIRMFORGE_CONFIG_DATA__\n");
    out.push_str("#define __FIRMFORGE_CONFIG_DATA__\n\n");

    if !data.params.is_empty() {
        out.push_str("// Configuration parameters\n");
        for (name, value) in &data.params {
            out.push_str(&format!("#define {name} {value}\n"));
        }
        out.push('\n');
    }

    if !data.macros.is_empty() {
        let mut macros = data.macros.clone();
        macros.sort();
        macros.dedup();
        out.push_str("// Macros\n");
        for m in &macros {
            let line = match m.split_once('=') {
                Some((name, value)) => format!("#define {name} {value}\n"),
                None => format!("#define {m}\n"),
            };
            out.push_str(&line);
        }
        out.push('\n');
    }

    out.push_str("#endif\n");
    out
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Bring the header in `build_dir` in line with `content`
pub fn update(build_dir: &Path, content: &str) -> Result<HeaderUpdate, BuildError> {
    let path = build_dir.join(defaults::CONFIG_HEADER);
    let existing = path.is_file().then(|| filesystem::read_bytes(&path)).transpose()?;

    match (existing, content.is_empty()) {
        (None, true) => Ok(HeaderUpdate {
            path: None,
            rebuild_all: false,
        }),
        (Some(_), true) => {
            tracing::info!("Configuration header no longer needed, removing it");
            filesystem::remove_file(&path)?;
            Ok(HeaderUpdate {
                path: None,
                rebuild_all: true,
            })
        }
        (None, false) => {
            tracing::debug!("Writing {}", path.display());
            filesystem::write_file(&path, content)?;
            Ok(HeaderUpdate {
                path: Some(path),
                rebuild_all: false,
            })
        }
        (Some(old), false) => {
            let changed = digest(&old) != digest(content.as_bytes());
            if changed {
                tracing::info!("Configuration changed, rebuilding everything");
                filesystem::write_file(&path, content)?;
            }
            Ok(HeaderUpdate {
                path: Some(path),
                rebuild_all: changed,
            })
        }
    }
}
