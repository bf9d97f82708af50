//! Sparse address-space image
//!
//! Bytes are held in non-overlapping, non-adjacent segments keyed by start
//! address. Writes that touch or overlap existing segments coalesce with
//! them; the bytes written last win.

use std::collections::BTreeMap;

/// Size of the 32-bit address space
const ADDRESS_SPACE: u64 = 1 << 32;

/// A sparse firmware image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseImage {
    segments: BTreeMap<u32, Vec<u8>>,
}

fn seg_end(start: u32, data: &[u8]) -> u64 {
    u64::from(start) + data.len() as u64
}

impl SparseImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image holding `bytes` at `offset`
    pub fn from_bin(bytes: &[u8], offset: u32) -> Self {
        let mut image = Self::new();
        image.write(offset, bytes);
        image
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments in address order
    pub fn segments(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.segments.iter().map(|(s, d)| (*s, d.as_slice()))
    }

    /// Number of populated bytes
    pub fn len(&self) -> usize {
        self.segments.values().map(Vec::len).sum()
    }

    /// Lowest populated address
    pub fn start(&self) -> Option<u32> {
        self.segments.keys().next().copied()
    }

    /// One past the highest populated address
    pub fn end(&self) -> Option<u64> {
        self.segments.iter().next_back().map(|(s, d)| seg_end(*s, d))
    }

    /// Byte at `addr`, if populated
    pub fn get(&self, addr: u32) -> Option<u8> {
        let (start, data) = self.segments.range(..=addr).next_back()?;
        data.get((addr - start) as usize).copied()
    }

    /// `len` bytes from `addr`, only if every one of them is populated
    pub fn read(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let (start, data) = self.segments.range(..=addr).next_back()?;
        let offset = (addr - start) as usize;
        data.get(offset..offset.checked_add(len)?)
    }

    /// Whether any byte in `[addr, addr + len)` is populated
    pub fn overlaps(&self, addr: u32, len: u64) -> bool {
        let end = u64::from(addr) + len;
        self.segments
            .iter()
            .any(|(s, d)| u64::from(*s) < end && seg_end(*s, d) > u64::from(addr))
    }

    /// Write `data` at `addr`, replacing whatever was there
    pub fn write(&mut self, addr: u32, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let room = (ADDRESS_SPACE - u64::from(addr)) as usize;
        let data = if data.len() > room {
            tracing::warn!("Truncating write at 0x{addr:08x}: exceeds the address space");
            &data[..room]
        } else {
            data
        };
        let end = u64::from(addr) + data.len() as u64;

        // Segments that overlap or touch [addr, end)
        let upper = u32::try_from(end).unwrap_or(u32::MAX);
        let touching: Vec<u32> = self
            .segments
            .range(..=upper)
            .filter(|(s, d)| seg_end(**s, d) >= u64::from(addr))
            .map(|(s, _)| *s)
            .collect();

        let mut new_start = addr;
        let mut new_end = end;
        for key in &touching {
            let seg = &self.segments[key];
            new_start = new_start.min(*key);
            new_end = new_end.max(seg_end(*key, seg));
        }

        let mut merged = vec![0u8; (new_end - u64::from(new_start)) as usize];
        for key in touching {
            if let Some(seg) = self.segments.remove(&key) {
                let offset = (key - new_start) as usize;
                merged[offset..offset + seg.len()].copy_from_slice(&seg);
            }
        }
        let offset = (addr - new_start) as usize;
        merged[offset..offset + data.len()].copy_from_slice(data);
        self.segments.insert(new_start, merged);
    }

    /// Copy every segment of `other` into this image (last write wins)
    pub fn merge(&mut self, other: &SparseImage) {
        for (start, data) in other.segments() {
            self.write(start, data);
        }
    }

    /// Bytes within `[start, end)` only
    pub fn slice(&self, start: u32, end: u64) -> SparseImage {
        let mut out = SparseImage::new();
        for (s, d) in self.segments() {
            let lo = u64::from(s).max(u64::from(start));
            let hi = seg_end(s, d).min(end);
            if lo < hi {
                let from = (lo - u64::from(s)) as usize;
                let to = (hi - u64::from(s)) as usize;
                out.write(lo as u32, &d[from..to]);
            }
        }
        out
    }

    /// Flat binary from the lowest to the highest address, gaps filled
    pub fn to_bin(&self, fill: u8) -> Vec<u8> {
        let (Some(start), Some(end)) = (self.start(), self.end()) else {
            return Vec::new();
        };
        let mut out = vec![fill; (end - u64::from(start)) as usize];
        for (s, d) in self.segments() {
            let offset = (s - start) as usize;
            out[offset..offset + d.len()].copy_from_slice(d);
        }
        out
    }

    /// Extend every segment outward to `alignment` boundaries
    ///
    /// Padding bytes come from this image where populated and `fill`
    /// elsewhere.
    pub fn align(&self, alignment: u32, fill: u8) -> SparseImage {
        if alignment <= 1 {
            return self.clone();
        }
        let align = u64::from(alignment);
        let mut out = SparseImage::new();
        for (s, d) in self.segments() {
            let lo = u64::from(s) / align * align;
            let hi = seg_end(s, d).div_ceil(align) * align;
            let hi = hi.min(ADDRESS_SPACE);
            let bytes: Vec<u8> = (lo..hi)
                .map(|a| self.get(a as u32).unwrap_or(fill))
                .collect();
            out.write(lo as u32, &bytes);
        }
        out
    }
}
