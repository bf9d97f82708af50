//! Target description
//!
//! A [`Target`] is the resolved view of the `[target]` manifest table: the
//! CPU core, the label sets that drive directory filtering, and the macros
//! contributed by the target itself.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported CPU cores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Core {
    CortexM0,
    CortexM0Plus,
    CortexM3,
    CortexM4,
    CortexM4F,
    CortexM7,
    CortexM7F,
    CortexM7FD,
    CortexM23,
    CortexM33,
    CortexM33F,
    CortexA9,
}

/// Floating point unit attached to a core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fpu {
    None,
    /// Single precision VFPv4 (M4F)
    SinglePrecisionV4,
    /// Single precision VFPv5 (M7F, M33F)
    SinglePrecisionV5,
    /// Double precision VFPv5 (M7FD)
    DoublePrecisionV5,
    /// NEON/VFPv3 (A9)
    Neon,
}

impl Core {
    /// All known cores, in declaration order
    pub const ALL: &'static [Core] = &[
        Core::CortexM0,
        Core::CortexM0Plus,
        Core::CortexM3,
        Core::CortexM4,
        Core::CortexM4F,
        Core::CortexM7,
        Core::CortexM7F,
        Core::CortexM7FD,
        Core::CortexM23,
        Core::CortexM33,
        Core::CortexM33F,
        Core::CortexA9,
    ];

    /// Canonical name as written in the manifest
    pub fn name(self) -> &'static str {
        match self {
            Core::CortexM0 => "Cortex-M0",
            Core::CortexM0Plus => "Cortex-M0+",
            Core::CortexM3 => "Cortex-M3",
            Core::CortexM4 => "Cortex-M4",
            Core::CortexM4F => "Cortex-M4F",
            Core::CortexM7 => "Cortex-M7",
            Core::CortexM7F => "Cortex-M7F",
            Core::CortexM7FD => "Cortex-M7FD",
            Core::CortexM23 => "Cortex-M23",
            Core::CortexM33 => "Cortex-M33",
            Core::CortexM33F => "Cortex-M33F",
            Core::CortexA9 => "Cortex-A9",
        }
    }

    /// The `-mcpu` style name, without FPU suffixes
    pub fn cpu(self) -> &'static str {
        match self {
            Core::CortexM0 => "cortex-m0",
            Core::CortexM0Plus => "cortex-m0plus",
            Core::CortexM3 => "cortex-m3",
            Core::CortexM4 | Core::CortexM4F => "cortex-m4",
            Core::CortexM7 | Core::CortexM7F | Core::CortexM7FD => "cortex-m7",
            Core::CortexM23 => "cortex-m23",
            Core::CortexM33 | Core::CortexM33F => "cortex-m33",
            Core::CortexA9 => "cortex-a9",
        }
    }

    /// Floating point unit of this core
    pub fn fpu(self) -> Fpu {
        match self {
            Core::CortexM4F => Fpu::SinglePrecisionV4,
            Core::CortexM7F | Core::CortexM33F => Fpu::SinglePrecisionV5,
            Core::CortexM7FD => Fpu::DoublePrecisionV5,
            Core::CortexA9 => Fpu::Neon,
            _ => Fpu::None,
        }
    }

    /// Whether the core executes Thumb only
    pub fn is_cortex_m(self) -> bool {
        !matches!(self, Core::CortexA9)
    }

    /// Labels implied by the core, added to the TARGET label class
    pub fn labels(self) -> Vec<&'static str> {
        let (short, like) = match self {
            Core::CortexM0 => ("M0", "LIKE_CORTEX_M0"),
            Core::CortexM0Plus => ("M0P", "LIKE_CORTEX_M0"),
            Core::CortexM3 => ("M3", "LIKE_CORTEX_M3"),
            Core::CortexM4 | Core::CortexM4F => ("M4", "LIKE_CORTEX_M4"),
            Core::CortexM7 | Core::CortexM7F | Core::CortexM7FD => ("M7", "LIKE_CORTEX_M7"),
            Core::CortexM23 => ("M23", "LIKE_CORTEX_M23"),
            Core::CortexM33 | Core::CortexM33F => ("M33", "LIKE_CORTEX_M33"),
            Core::CortexA9 => ("A9", "LIKE_CORTEX_A9"),
        };
        let family = if self.is_cortex_m() { "CORTEX_M" } else { "CORTEX_A" };
        vec![short, like, family, "CORTEX"]
    }

    /// CPU-family constants passed to both the assembler and the compilers
    pub fn symbols(self) -> Vec<&'static str> {
        let mut symbols = match self {
            Core::CortexM0 => vec!["__CORTEX_M0", "ARM_MATH_CM0"],
            Core::CortexM0Plus => vec!["__CORTEX_M0PLUS", "ARM_MATH_CM0PLUS"],
            Core::CortexM3 => vec!["__CORTEX_M3", "ARM_MATH_CM3"],
            Core::CortexM4 | Core::CortexM4F => vec!["__CORTEX_M4", "ARM_MATH_CM4"],
            Core::CortexM7 | Core::CortexM7F | Core::CortexM7FD => {
                vec!["__CORTEX_M7", "ARM_MATH_CM7"]
            }
            Core::CortexM23 => vec!["__CORTEX_M23", "ARM_MATH_ARMV8MBL"],
            Core::CortexM33 | Core::CortexM33F => vec!["__CORTEX_M33", "ARM_MATH_ARMV8MML"],
            Core::CortexA9 => vec!["__CORTEX_A9", "ARM_MATH_CA9", "__EVAL"],
        };
        if self.fpu() != Fpu::None {
            symbols.push("__FPU_PRESENT=1");
        }
        symbols.push("__CMSIS_RTOS");
        symbols
    }
}

impl fmt::Display for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Core {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Core::ALL
            .iter()
            .copied()
            .find(|core| core.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown core '{s}'"))
    }
}

impl TryFrom<String> for Core {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Core> for String {
    fn from(core: Core) -> Self {
        core.name().to_string()
    }
}

/// Label classes recognised in directory names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LabelClass {
    Target,
    Toolchain,
    Feature,
    Component,
}

impl LabelClass {
    /// All label classes
    pub const ALL: &'static [LabelClass] = &[
        LabelClass::Target,
        LabelClass::Toolchain,
        LabelClass::Feature,
        LabelClass::Component,
    ];

    /// Directory-name prefix that encodes this class
    pub fn prefix(self) -> &'static str {
        match self {
            LabelClass::Target => "TARGET_",
            LabelClass::Toolchain => "TOOLCHAIN_",
            LabelClass::Feature => "FEATURE_",
            LabelClass::Component => "COMPONENT_",
        }
    }

    /// Split a directory name into its label class and label, if it encodes one
    pub fn parse_dir_name(name: &str) -> Option<(LabelClass, &str)> {
        LabelClass::ALL
            .iter()
            .find_map(|class| name.strip_prefix(class.prefix()).map(|label| (*class, label)))
    }
}

impl fmt::Display for LabelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix().trim_end_matches('_'))
    }
}

/// Resolved target description
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Target name (always part of the TARGET labels)
    pub name: String,
    /// CPU core
    pub core: Core,
    /// Extra TARGET labels (vendor, family, board)
    pub extra_labels: Vec<String>,
    /// Enabled features
    pub features: Vec<String>,
    /// Enabled components
    pub components: Vec<String>,
    /// Hardware peripherals present on the device
    pub device_has: Vec<String>,
    /// Target-supplied macros
    pub macros: Vec<String>,
}

impl Target {
    /// Create a target with only a name and a core
    pub fn new(name: impl Into<String>, core: Core) -> Self {
        Self {
            name: name.into(),
            core,
            extra_labels: Vec::new(),
            features: Vec::new(),
            components: Vec::new(),
            device_has: Vec::new(),
            macros: Vec::new(),
        }
    }

    /// Add extra TARGET labels
    #[must_use]
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_labels.extend(labels.into_iter().map(Into::into));
        self
    }

    /// Enable features
    #[must_use]
    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features.extend(features.into_iter().map(Into::into));
        self
    }

    /// Enable components
    #[must_use]
    pub fn with_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.components.extend(components.into_iter().map(Into::into));
        self
    }

    /// All active TARGET labels: name, extra labels and core-implied labels
    pub fn target_labels(&self) -> BTreeSet<String> {
        let mut labels: BTreeSet<String> = BTreeSet::new();
        labels.insert(self.name.clone());
        labels.extend(self.extra_labels.iter().cloned());
        labels.extend(self.core.labels().into_iter().map(String::from));
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_parse_round_trip_names() {
        for core in Core::ALL {
            assert_eq!(core.name().parse::<Core>().unwrap(), *core);
        }
        assert_eq!("cortex-m4f".parse::<Core>().unwrap(), Core::CortexM4F);
        assert!("Cortex-Z80".parse::<Core>().is_err());
    }

    #[test]
    fn test_fpu_symbol_only_on_fpu_cores() {
        assert!(Core::CortexM4F.symbols().contains(&"__FPU_PRESENT=1"));
        assert!(!Core::CortexM4.symbols().contains(&"__FPU_PRESENT=1"));
        assert!(Core::CortexM0.symbols().contains(&"__CORTEX_M0"));
    }

    #[test]
    fn test_label_class_parse_dir_name() {
        assert_eq!(
            LabelClass::parse_dir_name("TARGET_K64F"),
            Some((LabelClass::Target, "K64F"))
        );
        assert_eq!(
            LabelClass::parse_dir_name("TOOLCHAIN_GCC_ARM"),
            Some((LabelClass::Toolchain, "GCC_ARM"))
        );
        assert_eq!(
            LabelClass::parse_dir_name("FEATURE_BLE"),
            Some((LabelClass::Feature, "BLE"))
        );
        assert_eq!(
            LabelClass::parse_dir_name("COMPONENT_SD"),
            Some((LabelClass::Component, "SD"))
        );
        assert_eq!(LabelClass::parse_dir_name("drivers"), None);
    }

    #[test]
    fn test_target_labels_include_name_and_core() {
        let target = Target::new("K64F", Core::CortexM4F).with_labels(["FREESCALE"]);
        let labels = target.target_labels();
        assert!(labels.contains("K64F"));
        assert!(labels.contains("FREESCALE"));
        assert!(labels.contains("M4"));
        assert!(labels.contains("CORTEX_M"));
    }
}
