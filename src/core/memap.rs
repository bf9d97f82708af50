//! Memory usage from linker map files

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::BuildError;
use crate::infra::filesystem;

/// Output section totals in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub text: u64,
    pub data: u64,
    pub bss: u64,
}

impl MemoryUsage {
    /// Flash footprint: code plus initialised data
    pub fn rom(&self) -> u64 {
        self.text + self.data
    }

    /// RAM footprint: initialised plus zeroed data
    pub fn ram(&self) -> u64 {
        self.data + self.bss
    }
}

/// Result of reading a map file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MapReport {
    Indexed(MemoryUsage),
    Unsupported { toolchain: String },
}

/// Reads a linker map file produced by a given toolchain
pub trait MemoryMapReporter {
    /// Index memory usage, or report that the map format is not understood
    fn report(&self, map_file: &Path, toolchain: &str) -> Result<MapReport, BuildError>;
}

/// Reporter for GNU ld map files
#[derive(Debug, Clone, Copy, Default)]
pub struct GnuMapReporter;

fn section_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>\.[A-Za-z_][\w.]*)\s+0x(?P<addr>[0-9a-fA-F]+)\s+0x(?P<size>[0-9a-fA-F]+)")
            .expect("valid section regex")
    })
}

/// Sum the top-level output sections of a GNU map
pub fn parse_gnu_map(content: &str) -> MemoryUsage {
    let mut usage = MemoryUsage::default();
    let mut pending: Option<&str> = None;
    for raw in content.lines() {
        // Long section names put address and size on the following line
        if pending.is_none() && raw.starts_with('.') && !raw.contains(char::is_whitespace) {
            pending = Some(raw);
            continue;
        }
        let line = match pending.take() {
            Some(name) => format!("{name} {}", raw.trim_start()),
            None => raw.to_string(),
        };
        let Some(caps) = section_regex().captures(&line) else {
            continue;
        };
        let Ok(size) = u64::from_str_radix(&caps["size"], 16) else {
            continue;
        };
        let name = &caps["name"];
        if name == ".text" || name.starts_with(".text.") || name == ".rodata" || name == ".ARM.exidx" {
            usage.text += size;
        } else if name == ".data" || name.starts_with(".data.") {
            usage.data += size;
        } else if name == ".bss" || name.starts_with(".bss.") || name == ".heap" || name == ".stack_dummy" {
            usage.bss += size;
        }
    }
    usage
}

impl MemoryMapReporter for GnuMapReporter {
    fn report(&self, map_file: &Path, toolchain: &str) -> Result<MapReport, BuildError> {
        if !matches!(toolchain, "GCC_ARM" | "GCC") {
            return Ok(MapReport::Unsupported {
                toolchain: toolchain.to_string(),
            });
        }
        let content = filesystem::read_file(map_file)?;
        Ok(MapReport::Indexed(parse_gnu_map(&content)))
    }
}
