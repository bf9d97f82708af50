//! Firmware image assembly
//!
//! Post-link stage: merge the fresh build output with pre-built region
//! artifacts, align segments, patch vendor checksum rows and optionally
//! hand the result to a signing tool.
//!
//! # Submodules
//!
//! - [`sparse`] - Sparse address-space image
//! - [`ihex`] - Intel HEX codec
//! - [`merge`] - Region merging and the update image
//! - [`checksum`] - Checksum and metadata row patching
//! - [`signing`] - Device/policy resolution and the signing tool

pub mod checksum;
pub mod ihex;
pub mod merge;
pub mod signing;
pub mod sparse;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::core::engine::BinaryFormat;
use crate::core::provider::Region;
use crate::error::ImageError;

pub use checksum::ChecksumLayout;
pub use signing::SigningConfig;
pub use sparse::SparseImage;

/// `[image]` section of the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOptions {
    /// Output format of the linked binary and the merged image
    pub format: BinaryFormat,
    /// Segment alignment; 0 or 1 disables alignment
    pub alignment: u32,
    /// Patch checksum and metadata rows
    pub checksum: bool,
    pub layout: ChecksumLayout,
    pub signing: Option<SigningConfig>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            format: BinaryFormat::default(),
            alignment: defaults::DEFAULT_SEGMENT_ALIGNMENT,
            checksum: false,
            layout: ChecksumLayout::default(),
            signing: None,
        }
    }
}

/// Files written by [`assemble`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledImage {
    /// Every region merged
    pub merged: PathBuf,
    /// Updatable regions only
    pub update: Option<PathBuf>,
}

/// Path of the merged image for `name`
pub fn merged_path(out_dir: &Path, name: &str, format: BinaryFormat) -> PathBuf {
    out_dir.join(format!("{name}_merged.{}", format.extension()))
}

/// Path of the update image for `name`
pub fn update_path(out_dir: &Path, name: &str, format: BinaryFormat) -> PathBuf {
    out_dir.join(format!("{name}_update.{}", format.extension()))
}

fn finish(mut image: SparseImage, options: &ImageOptions) -> SparseImage {
    if options.alignment > 1 {
        image = image.align(options.alignment, defaults::FLASH_FILL_BYTE);
    }
    if options.checksum {
        checksum::patch(&mut image, &options.layout);
    }
    image
}

/// Merge `regions` and write the merged and update images
///
/// `active` is the current build's output for the active region; pass
/// `None` to merge pre-built artifacts only.
pub fn assemble(
    regions: &[Region],
    active: Option<&Path>,
    out_dir: &Path,
    name: &str,
    options: &ImageOptions,
) -> Result<AssembledImage, ImageError> {
    let merged_image = finish(merge::merge_regions(regions, active)?, options);
    if merged_image.is_empty() {
        return Err(ImageError::MissingArtifact {
            item: format!("contents for image '{name}'"),
        });
    }
    let merged = merged_path(out_dir, name, options.format);
    merge::save(&merged_image, &merged)?;
    tracing::info!("Merged image: {}", merged.display());

    let update = match merge::update_image(regions, active)? {
        Some(image) if !image.is_empty() => {
            let path = update_path(out_dir, name, options.format);
            merge::save(&finish(image, options), &path)?;
            tracing::info!("Update image: {}", path.display());
            Some(path)
        }
        _ => None,
    };

    Ok(AssembledImage { merged, update })
}
