//! Region merging
//!
//! Regions are placed in ascending start order. Each region's bytes come
//! from its pre-built artifact, or from the fresh build output for the
//! active region. Overlapping regions resolve last-write-wins.

use std::path::Path;

use crate::config::defaults;
use crate::core::image::ihex;
use crate::core::image::sparse::SparseImage;
use crate::core::provider::Region;
use crate::error::ImageError;
use crate::infra::filesystem;

fn is_hex(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("hex") || e.eq_ignore_ascii_case("ihex"))
}

/// Load an artifact; flat binaries are placed at `offset`
pub fn load(path: &Path, offset: u32) -> Result<SparseImage, ImageError> {
    if !path.is_file() {
        return Err(ImageError::MissingArtifact {
            item: format!("image '{}'", path.display()),
        });
    }
    if is_hex(path) {
        ihex::parse(&filesystem::read_file(path)?)
    } else {
        Ok(SparseImage::from_bin(&filesystem::read_bytes(path)?, offset))
    }
}

/// Write an image as Intel HEX or flat binary, chosen by extension
pub fn save(image: &SparseImage, path: &Path) -> Result<(), ImageError> {
    if is_hex(path) {
        filesystem::write_file(path, &ihex::render(image))?;
    } else {
        filesystem::write_bytes(path, &image.to_bin(defaults::FLASH_FILL_BYTE))?;
    }
    Ok(())
}

/// Load a region's contents and check they fit
fn load_region(region: &Region, source: &Path) -> Result<SparseImage, ImageError> {
    let part = load(source, region.start)?;
    let (Some(first), Some(last)) = (part.start(), part.end()) else {
        return Ok(part);
    };
    if first < region.start || last > region.end() {
        let size = (last - u64::from(first.min(region.start))) as usize;
        return Err(ImageError::RegionOverflow {
            region: region.name.clone(),
            size,
            capacity: region.size,
        });
    }
    Ok(part)
}

/// Merge regions into one image
///
/// With `active` set, exactly one region must be marked active and it
/// takes its bytes from `active`. Without it, active regions are treated
/// like any other and need their own artifact. Inactive regions with no
/// artifact are skipped.
pub fn merge_regions(regions: &[Region], active: Option<&Path>) -> Result<SparseImage, ImageError> {
    if active.is_some() {
        let count = regions.iter().filter(|r| r.active).count();
        if count != 1 {
            return Err(ImageError::ActiveRegion { count });
        }
    }

    let mut ordered: Vec<&Region> = regions.iter().collect();
    ordered.sort_by_key(|r| r.start);

    let mut image = SparseImage::new();
    for region in ordered {
        let source = match (region.active, active) {
            (true, Some(fresh)) => fresh,
            _ => match region.path.as_deref() {
                Some(path) => path,
                None if region.active => {
                    return Err(ImageError::MissingArtifact {
                        item: format!("artifact for active region '{}'", region.name),
                    });
                }
                None => {
                    tracing::debug!("Region '{}' has no artifact, leaving it empty", region.name);
                    continue;
                }
            },
        };
        tracing::debug!(
            "Merging '{}' at 0x{:08x} from {}",
            region.name,
            region.start,
            source.display()
        );
        let part = load_region(region, source)?;
        image.merge(&part);
    }
    Ok(image)
}

/// Merge only the regions marked updatable
///
/// Returns `None` when no region is updatable.
pub fn update_image(regions: &[Region], active: Option<&Path>) -> Result<Option<SparseImage>, ImageError> {
    let updatable: Vec<Region> = regions.iter().filter(|r| r.updatable).cloned().collect();
    if updatable.is_empty() {
        return Ok(None);
    }
    // The active artifact applies only if the active region is updatable
    let active = active.filter(|_| updatable.iter().any(|r| r.active));
    merge_regions(&updatable, active).map(Some)
}
