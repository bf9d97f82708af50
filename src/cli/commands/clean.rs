//! CLI implementation for `firmforge clean` command
//!
//! Removes the project's output directory.

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::output::status;
use crate::infra::filesystem;

/// Execute the clean command
pub fn execute(path: &Path) -> Result<()> {
    let manifest = super::load_manifest(path)?;
    let output_dir = path.join(&manifest.build.output_dir);

    if !output_dir.exists() {
        println!("{} Nothing to clean", status::SUCCESS);
        return Ok(());
    }

    filesystem::remove_dir_all(&output_dir).with_context(|| "Failed to clean build artifacts")?;
    println!("{} Removed {}/", status::SUCCESS, manifest.build.output_dir.display());
    Ok(())
}
