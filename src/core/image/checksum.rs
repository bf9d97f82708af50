//! Vendor checksum and metadata patching
//!
//! Some parts carry a 16-bit checksum of the program area in a dedicated
//! flash row, and a metadata row holding a copy of that checksum, the
//! silicon device id and a secondary checksum over both. Patching only
//! rewrites rows already present in the input image.

use serde::{Deserialize, Serialize};

use crate::core::image::sparse::SparseImage;

/// Addresses of the checksum and metadata rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksumLayout {
    /// Two big-endian checksum bytes
    pub checksum_addr: u32,
    /// Metadata row: checksum copy, device id, secondary checksum
    pub metadata_addr: u32,
    /// First address summed into the checksum
    pub program_start: u32,
    /// First address past the summed area
    pub program_end: u32,
}

impl Default for ChecksumLayout {
    fn default() -> Self {
        Self {
            checksum_addr: 0x9030_0000,
            metadata_addr: 0x9050_0000,
            program_start: 0x1000_0000,
            program_end: 0x1010_0000,
        }
    }
}

/// Byte layout of the metadata row
const META_LEN: usize = 8;
const META_DEVICE_ID: usize = 2;
const META_SECONDARY: usize = 6;

/// What [`patch`] rewrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub checksum: Option<u16>,
    pub secondary: Option<u16>,
}

/// Two's-complement 16-bit checksum of the populated program bytes
pub fn program_checksum(image: &SparseImage, layout: &ChecksumLayout) -> u16 {
    let area = image.slice(layout.program_start, u64::from(layout.program_end));
    let sum = area
        .segments()
        .flat_map(|(_, data)| data.iter())
        .fold(0u32, |acc, b| acc.wrapping_add(u32::from(*b)));
    (sum as u16).wrapping_neg()
}

/// Secondary checksum over the primary checksum and the device id
pub fn secondary_checksum(checksum: u16, device_id: u32) -> u16 {
    let low = (device_id & 0xFFFF) as u16;
    let high = (device_id >> 16) as u16;
    checksum.wrapping_add(low).wrapping_add(high).wrapping_neg()
}

/// Recompute checksum and metadata rows present in `image`
pub fn patch(image: &mut SparseImage, layout: &ChecksumLayout) -> PatchReport {
    let mut report = PatchReport::default();
    if image.read(layout.checksum_addr, 2).is_none() {
        tracing::debug!("No checksum row at 0x{:08x}, skipping patch", layout.checksum_addr);
        return report;
    }

    let checksum = program_checksum(image, layout);
    image.write(layout.checksum_addr, &checksum.to_be_bytes());
    report.checksum = Some(checksum);
    tracing::debug!("Patched checksum 0x{checksum:04x}");

    let device_id = image.read(layout.metadata_addr, META_LEN).map(|meta| {
        u32::from_be_bytes([
            meta[META_DEVICE_ID],
            meta[META_DEVICE_ID + 1],
            meta[META_DEVICE_ID + 2],
            meta[META_DEVICE_ID + 3],
        ])
    });
    if let Some(device_id) = device_id {
        let secondary = secondary_checksum(checksum, device_id);
        image.write(layout.metadata_addr, &checksum.to_be_bytes());
        image.write(
            layout.metadata_addr + META_SECONDARY as u32,
            &secondary.to_be_bytes(),
        );
        report.secondary = Some(secondary);
        tracing::debug!("Patched metadata for device 0x{device_id:08x}");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LAYOUT: ChecksumLayout = ChecksumLayout {
        checksum_addr: 0x9030_0000,
        metadata_addr: 0x9050_0000,
        program_start: 0x1000_0000,
        program_end: 0x1010_0000,
    };

    #[test]
    fn test_patch_writes_negated_sum_big_endian() {
        let mut image = SparseImage::from_bin(&[0x01, 0x02, 0x03], LAYOUT.program_start);
        image.write(LAYOUT.checksum_addr, &[0, 0]);

        let report = patch(&mut image, &LAYOUT);
        assert_eq!(report.checksum, Some(0xFFFA));
        assert_eq!(image.read(LAYOUT.checksum_addr, 2), Some(&[0xFF, 0xFA][..]));
        assert_eq!(report.secondary, None);
    }

    #[test]
    fn test_no_checksum_row_is_left_alone() {
        let mut image = SparseImage::from_bin(&[1, 2, 3], LAYOUT.program_start);
        let before = image.clone();
        assert_eq!(patch(&mut image, &LAYOUT), PatchReport::default());
        assert_eq!(image, before);
        assert!(!image.overlaps(LAYOUT.checksum_addr, 2));
    }

    #[test]
    fn test_metadata_secondary_checksum() {
        let mut image = SparseImage::from_bin(&[0x10; 4], LAYOUT.program_start);
        image.write(LAYOUT.checksum_addr, &[0, 0]);
        image.write(LAYOUT.metadata_addr, &[0, 0, 0xE2, 0x07, 0x11, 0x00, 0, 0]);

        let report = patch(&mut image, &LAYOUT);
        let checksum = 0x40u16.wrapping_neg();
        let expected = checksum.wrapping_add(0x1100).wrapping_add(0xE207).wrapping_neg();
        assert_eq!(report.secondary, Some(expected));

        let meta = image.read(LAYOUT.metadata_addr, 8).unwrap().to_vec();
        assert_eq!(&meta[0..2], &checksum.to_be_bytes());
        assert_eq!(&meta[2..6], &[0xE2, 0x07, 0x11, 0x00]);
        assert_eq!(&meta[6..8], &expected.to_be_bytes());
    }

    #[test]
    fn test_bytes_outside_program_area_not_summed() {
        let mut image = SparseImage::from_bin(&[0x05], LAYOUT.program_start);
        image.write(LAYOUT.program_end, &[0x77; 16]);
        image.write(LAYOUT.checksum_addr, &[0, 0]);
        assert_eq!(patch(&mut image, &LAYOUT).checksum, Some(0x5u16.wrapping_neg()));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn test_patched_value_is_negated_sum_mod_64k(
            program in proptest::collection::vec(any::<u8>(), 1..2048)
        ) {
            let mut image = SparseImage::from_bin(&program, LAYOUT.program_start);
            image.write(LAYOUT.checksum_addr, &[0, 0]);
            patch(&mut image, &LAYOUT);

            let sum: u64 = program.iter().map(|b| u64::from(*b)).sum();
            let expected = ((0x1_0000 - (sum % 0x1_0000)) % 0x1_0000) as u16;
            prop_assert_eq!(image.read(LAYOUT.checksum_addr, 2), Some(&expected.to_be_bytes()[..]));
        }
    }
}
