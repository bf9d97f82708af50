//! Intel HEX reader and writer
//!
//! The reader accepts data (00), end-of-file (01), extended segment
//! address (02) and extended linear address (04) records. Start address
//! records (03, 05) are accepted and dropped. The writer emits fixed-width
//! data records and never writes a start address record.

use crate::config::defaults;
use crate::core::image::sparse::SparseImage;
use crate::error::ImageError;

const DATA: u8 = 0x00;
const END_OF_FILE: u8 = 0x01;
const EXTENDED_SEGMENT: u8 = 0x02;
const START_SEGMENT: u8 = 0x03;
const EXTENDED_LINEAR: u8 = 0x04;
const START_LINEAR: u8 = 0x05;

fn invalid(line: usize, reason: impl Into<String>) -> ImageError {
    ImageError::InvalidHex {
        line,
        reason: reason.into(),
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)).wrapping_neg()
}

/// Parse Intel HEX text into a sparse image
pub fn parse(text: &str) -> Result<SparseImage, ImageError> {
    let mut image = SparseImage::new();
    let mut base: u32 = 0;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let Some(body) = line.strip_prefix(':') else {
            return Err(invalid(line_no, "record does not start with ':'"));
        };
        let bytes = hex::decode(body).map_err(|e| invalid(line_no, e.to_string()))?;
        if bytes.len() < 5 {
            return Err(invalid(line_no, "record too short"));
        }
        let count = bytes[0] as usize;
        if bytes.len() != count + 5 {
            return Err(invalid(
                line_no,
                format!("byte count {count} does not match record length"),
            ));
        }
        let (record, sum) = bytes.split_at(bytes.len() - 1);
        if checksum(record) != sum[0] {
            return Err(invalid(line_no, "checksum mismatch"));
        }

        let offset = u32::from(u16::from_be_bytes([bytes[1], bytes[2]]));
        let data = &bytes[4..4 + count];
        match bytes[3] {
            DATA => image.write(base.wrapping_add(offset), data),
            END_OF_FILE => return Ok(image),
            EXTENDED_SEGMENT if count == 2 => {
                base = u32::from(u16::from_be_bytes([data[0], data[1]])) << 4;
            }
            EXTENDED_LINEAR if count == 2 => {
                base = u32::from(u16::from_be_bytes([data[0], data[1]])) << 16;
            }
            START_SEGMENT | START_LINEAR => {}
            EXTENDED_SEGMENT | EXTENDED_LINEAR => {
                return Err(invalid(line_no, "address record must carry 2 bytes"));
            }
            other => return Err(invalid(line_no, format!("unknown record type {other:02X}"))),
        }
    }

    Err(invalid(text.lines().count(), "missing end-of-file record"))
}

fn push_record(out: &mut String, kind: u8, offset: u16, data: &[u8]) {
    let mut record = Vec::with_capacity(data.len() + 4);
    record.push(data.len() as u8);
    record.extend_from_slice(&offset.to_be_bytes());
    record.push(kind);
    record.extend_from_slice(data);
    let sum = checksum(&record);
    out.push_str(&format!(":{}{:02X}\n", hex::encode_upper(&record), sum));
}

/// Render an image as Intel HEX with the default record width
pub fn render(image: &SparseImage) -> String {
    render_with_width(image, defaults::HEX_RECORD_WIDTH)
}

/// Render an image as Intel HEX
///
/// Records never cross a 64 KiB boundary; an extended linear address
/// record precedes data whenever the upper address half changes.
pub fn render_with_width(image: &SparseImage, width: usize) -> String {
    let width = width.clamp(1, 255);
    let mut out = String::new();
    let mut upper: Option<u16> = None;

    for (start, data) in image.segments() {
        let mut addr = u64::from(start);
        let mut rest = data;
        while !rest.is_empty() {
            let high = (addr >> 16) as u16;
            if upper != Some(high) {
                push_record(&mut out, EXTENDED_LINEAR, 0, &high.to_be_bytes());
                upper = Some(high);
            }
            let low = (addr & 0xFFFF) as u16;
            let to_boundary = 0x1_0000 - usize::from(low);
            let take = rest.len().min(width).min(to_boundary);
            push_record(&mut out, DATA, low, &rest[..take]);
            rest = &rest[take..];
            addr += take as u64;
        }
    }

    push_record(&mut out, END_OF_FILE, 0, &[]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_simple_records() {
        let text = ":0400000001020304F2\n:00000001FF\n";
        let image = parse(text).unwrap();
        assert_eq!(image.to_bin(0xFF), vec![1, 2, 3, 4]);
        assert_eq!(image.start(), Some(0));
    }

    #[test]
    fn test_extended_linear_address() {
        let text = ":020000041000EA\n:02000000AABB99\n:00000001FF\n";
        let image = parse(text).unwrap();
        assert_eq!(image.start(), Some(0x1000_0000));
        assert_eq!(image.get(0x1000_0001), Some(0xBB));
    }

    #[test]
    fn test_extended_segment_address() {
        let text = ":020000021000EC\n:0100000055AA\n:00000001FF\n";
        let image = parse(text).unwrap();
        assert_eq!(image.get(0x10000), Some(0x55));
    }

    #[test]
    fn test_start_records_are_ignored() {
        let text = ":0400000508000000EF\n:0100000055AA\n:00000001FF\n";
        let image = parse(text).unwrap();
        assert_eq!(image.len(), 1);
    }

    #[test]
    fn test_bad_checksum_is_rejected() {
        let err = parse(":0100000055AB\n:00000001FF\n").unwrap_err();
        assert!(matches!(err, ImageError::InvalidHex { line: 1, .. }));
    }

    #[test]
    fn test_missing_eof_is_rejected() {
        assert!(parse(":0100000055AA\n").is_err());
    }

    #[test]
    fn test_render_has_no_start_record() {
        let image = SparseImage::from_bin(&[0u8; 40], 0x0800_0000);
        let text = render(&image);
        assert!(!text.contains("\n:04000005"));
        assert!(!text.contains("\n:04000003"));
        assert!(text.starts_with(":0200000408"));
        assert!(text.ends_with(":00000001FF\n"));
        // 40 bytes in 16-byte records
        let data_lines: Vec<_> = text.lines().filter(|l| &l[7..9] == "00").collect();
        assert_eq!(data_lines.len(), 3);
        assert!(data_lines[0].starts_with(":10"));
        assert!(data_lines[2].starts_with(":08"));
    }

    #[test]
    fn test_render_splits_at_64k_boundary() {
        let image = SparseImage::from_bin(&[0xAB; 8], 0xFFFC);
        let text = render(&image);
        assert!(text.contains(":020000040001F9"));
        assert_eq!(parse(&text).unwrap(), image);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn test_rendered_images_parse_back(
            start in 0u32..0x0002_0000,
            data in proptest::collection::vec(any::<u8>(), 1..300)
        ) {
            let image = SparseImage::from_bin(&data, start);
            prop_assert_eq!(parse(&render(&image)).unwrap(), image);
        }
    }
}
