//! Configuration provider contract
//!
//! The engine and the image assembler never resolve configuration
//! themselves. They read memory regions and config-header data from a
//! [`ConfigProvider`]; the manifest is the provider the CLI uses.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A named, address-ranged slice of a firmware image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub start: u32,
    pub size: u32,
    /// Pre-built artifact placed in this region
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Filled by the fresh link output of the current build
    #[serde(default)]
    pub active: bool,
    /// Included in the update image
    #[serde(default)]
    pub updatable: bool,
}

impl Region {
    /// An inactive region backed by a pre-built artifact
    pub fn prebuilt(name: impl Into<String>, start: u32, size: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            start,
            size,
            path: Some(path.into()),
            active: false,
            updatable: false,
        }
    }

    /// The region receiving the current build's output
    pub fn application(name: impl Into<String>, start: u32, size: u32) -> Self {
        Self {
            name: name.into(),
            start,
            size,
            path: None,
            active: true,
            updatable: true,
        }
    }

    /// First address past the region
    pub fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.size)
    }
}

/// A RAM region, exported to the linker as start/size symbols
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamRegion {
    pub name: String,
    pub start: u32,
    pub size: u32,
    #[serde(default)]
    pub active: bool,
}

/// Data rendered into the generated config header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigData {
    /// Configuration parameters, rendered as `#define NAME VALUE`
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Bare macros (`NAME` or `NAME=VALUE`)
    #[serde(default)]
    pub macros: Vec<String>,
}

impl ConfigData {
    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.macros.is_empty()
    }
}

/// Source of resolved configuration
pub trait ConfigProvider {
    /// Whether the layout defines ROM regions
    fn has_regions(&self) -> bool {
        !self.regions().is_empty()
    }

    /// ROM regions, in declaration order
    fn regions(&self) -> Vec<Region>;

    /// Whether the layout defines RAM regions
    fn has_ram_regions(&self) -> bool {
        !self.ram_regions().is_empty()
    }

    /// RAM regions, in declaration order
    fn ram_regions(&self) -> Vec<RamRegion>;

    /// Config-header data, `None` when configuration produces no header
    fn config_data(&self) -> Option<ConfigData>;
}

/// Provider with fixed contents
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    pub regions: Vec<Region>,
    pub ram_regions: Vec<RamRegion>,
    pub data: Option<ConfigData>,
}

impl ConfigProvider for StaticConfig {
    fn regions(&self) -> Vec<Region> {
        self.regions.clone()
    }

    fn ram_regions(&self) -> Vec<RamRegion> {
        self.ram_regions.clone()
    }

    fn config_data(&self) -> Option<ConfigData> {
        self.data.clone()
    }
}

/// Linker symbols describing the active regions
///
/// They tell the linker script where the application lives when the layout
/// places it behind a bootloader.
pub fn region_symbols(provider: &dyn ConfigProvider) -> Vec<String> {
    let mut symbols = Vec::new();
    if let Some(active) = provider.regions().into_iter().find(|r| r.active) {
        symbols.push(format!("FIRMFORGE_APP_START=0x{:x}", active.start));
        symbols.push(format!("FIRMFORGE_APP_SIZE=0x{:x}", active.size));
    }
    for ram in provider.ram_regions().into_iter().filter(|r| r.active) {
        let name = ram.name.to_ascii_uppercase();
        symbols.push(format!("FIRMFORGE_{name}_START=0x{:x}", ram.start));
        symbols.push(format!("FIRMFORGE_{name}_SIZE=0x{:x}", ram.size));
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_presence_checks() {
        let empty = StaticConfig::default();
        assert!(!empty.has_regions());
        assert!(!empty.has_ram_regions());

        let config = StaticConfig {
            regions: vec![Region::application("application", 0x8000, 0x1000)],
            ..StaticConfig::default()
        };
        assert!(config.has_regions());
    }

    #[test]
    fn test_region_symbols() {
        let config = StaticConfig {
            regions: vec![
                Region::prebuilt("bootloader", 0, 0x8000, "boot.bin"),
                Region::application("application", 0x8000, 0x78000),
            ],
            ram_regions: vec![RamRegion {
                name: "ram".to_string(),
                start: 0x2000_0000,
                size: 0x1_0000,
                active: true,
            }],
            data: None,
        };
        assert_eq!(
            region_symbols(&config),
            vec![
                "FIRMFORGE_APP_START=0x8000",
                "FIRMFORGE_APP_SIZE=0x78000",
                "FIRMFORGE_RAM_START=0x20000000",
                "FIRMFORGE_RAM_SIZE=0x10000",
            ]
        );
    }

    #[test]
    fn test_region_end_does_not_overflow() {
        let region = Region::application("top", 0xFFFF_FF00, 0x100);
        assert_eq!(region.end(), 0x1_0000_0000);
    }
}
