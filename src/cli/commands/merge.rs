//! Merge command implementation
//!
//! Implements `firmforge merge`: assemble the manifest's regions from
//! pre-built artifacts without compiling anything.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::cli::output::status;
use crate::core::engine::BinaryFormat;
use crate::core::image;
use crate::core::provider::ConfigProvider;

/// Execute the merge command
pub fn execute(
    project_dir: &Path,
    app: Option<PathBuf>,
    output: Option<PathBuf>,
    format: Option<BinaryFormat>,
) -> Result<()> {
    let manifest = super::load_manifest(project_dir)?;
    if !manifest.has_regions() {
        bail!("The manifest defines no [[regions]] to merge");
    }

    let mut options = manifest.image.clone();
    if let Some(format) = format {
        options.format = format;
    }
    let out_dir = output.map_or_else(
        || project_dir.join(&manifest.build.output_dir),
        |dir| project_dir.join(dir),
    );
    let app = app.map(|path| project_dir.join(path));

    let assembled = image::assemble(
        &manifest.regions(),
        app.as_deref(),
        &out_dir,
        &manifest.project.name,
        &options,
    )
    .with_context(|| format!("Failed to merge regions of {}", manifest.project.name))?;

    println!("{} Merged image: {}", status::SUCCESS, assembled.merged.display());
    if let Some(update) = assembled.update {
        println!("  Update image: {}", update.display());
    }
    Ok(())
}
