//! Preprocessor symbol sets
//!
//! The engine passes two symbol sets to the tools: a small one for the
//! assembler and a larger one for the C and C++ compilers. Both are sorted
//! and deduplicated, so their order never depends on manifest order, and
//! computed at most once per [`SymbolCache`].

use std::collections::BTreeSet;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::defaults;
use crate::core::target::Target;
use crate::infra::toolchain::Toolchain;

/// Optimisation flags that mark a debug build
const DEBUG_FLAGS: &[&str] = &["-O0", "-On", "-Og"];

/// Inputs the symbol sets are derived from
#[derive(Debug, Clone)]
pub struct SymbolInputs<'a> {
    pub target: &'a Target,
    pub toolchain: &'a dyn Toolchain,
    /// Extra macros from the build configuration
    pub macros: &'a [String],
    /// Build timestamp (seconds since the epoch)
    pub timestamp: u64,
}

/// Assembler symbols: CPU-family constants plus target and user macros
pub fn asm_symbols(inputs: &SymbolInputs<'_>) -> Vec<String> {
    let mut symbols: BTreeSet<String> = inputs
        .target
        .core
        .symbols()
        .into_iter()
        .map(String::from)
        .collect();
    symbols.extend(inputs.target.macros.iter().cloned());
    symbols.extend(inputs.macros.iter().cloned());
    symbols.into_iter().collect()
}

/// Compiler symbols: the assembler set plus label, presence and build flags
pub fn general_symbols(inputs: &SymbolInputs<'_>) -> Vec<String> {
    let target = inputs.target;
    let toolchain = inputs.toolchain;
    let mut symbols: BTreeSet<String> = asm_symbols(inputs).into_iter().collect();

    symbols.extend(target.target_labels().iter().map(|l| format!("TARGET_{l}")));
    symbols.extend(toolchain.labels().iter().map(|l| format!("TOOLCHAIN_{l}")));
    symbols.extend(target.device_has.iter().map(|d| format!("DEVICE_{d}=1")));
    symbols.extend(target.features.iter().map(|f| format!("FEATURE_{f}=1")));
    symbols.extend(target.components.iter().map(|c| format!("COMPONENT_{c}=1")));
    symbols.insert("__FIRMFORGE__=1".to_string());
    symbols.insert(format!("{}={}", defaults::TIMESTAMP_SYMBOL, inputs.timestamp));

    let debug = toolchain
        .flags()
        .all()
        .any(|f| DEBUG_FLAGS.contains(&f.as_str()));
    symbols.insert(if debug { "FIRMFORGE_DEBUG" } else { "FIRMFORGE_RELEASE" }.to_string());

    symbols.into_iter().collect()
}

/// Whether a symbol is the build timestamp
pub fn is_timestamp(symbol: &str) -> bool {
    symbol
        .split_once('=')
        .map_or(symbol, |(name, _)| name)
        == defaults::TIMESTAMP_SYMBOL
}

/// Seconds since the epoch, for [`SymbolInputs::timestamp`]
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Lazily computed symbol sets, fixed for the lifetime of an engine
#[derive(Debug, Default)]
pub struct SymbolCache {
    asm: OnceLock<Vec<String>>,
    general: OnceLock<Vec<String>>,
}

impl SymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Symbols for the given language family
    pub fn get(&self, inputs: &SymbolInputs<'_>, for_asm: bool) -> &[String] {
        if for_asm {
            self.asm.get_or_init(|| asm_symbols(inputs))
        } else {
            self.general.get_or_init(|| general_symbols(inputs))
        }
    }
}

/// Convenience for call sites holding an `Arc<dyn Toolchain>`
pub fn inputs<'a>(
    target: &'a Target,
    toolchain: &'a dyn Toolchain,
    macros: &'a [String],
    timestamp: u64,
) -> SymbolInputs<'a> {
    SymbolInputs {
        target,
        toolchain,
        macros,
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::Core;
    use crate::infra::toolchain::{gcc::GccArm, Profile, ToolchainConfig};

    fn target() -> Target {
        let mut target = Target::new("K64F", Core::CortexM4F).with_features(["BLE"]);
        target.device_has = vec!["SERIAL".to_string(), "I2C".to_string()];
        target.macros = vec!["CPU_MK64FN1M0VMD12".to_string()];
        target
    }

    #[test]
    fn test_general_contains_labels_and_presence_flags() {
        let target = target();
        let gcc = GccArm::new(&ToolchainConfig::new(Core::CortexM4F));
        let symbols = general_symbols(&inputs(&target, &gcc, &[], 1_700_000_000));

        for expected in [
            "TARGET_K64F",
            "TARGET_M4",
            "TOOLCHAIN_GCC_ARM",
            "DEVICE_SERIAL=1",
            "FEATURE_BLE=1",
            "CPU_MK64FN1M0VMD12",
            "__CORTEX_M4",
            "FIRMFORGE_BUILD_TIMESTAMP=1700000000",
            "FIRMFORGE_RELEASE",
        ] {
            assert!(symbols.iter().any(|s| s == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_asm_is_subset_without_labels() {
        let target = target();
        let gcc = GccArm::new(&ToolchainConfig::new(Core::CortexM4F));
        let macros = vec!["APP_MACRO".to_string()];
        let asm = asm_symbols(&inputs(&target, &gcc, &macros, 0));
        assert!(asm.contains(&"APP_MACRO".to_string()));
        assert!(!asm.iter().any(|s| s.starts_with("TARGET_")));
    }

    #[test]
    fn test_sets_are_sorted_and_deduplicated() {
        let target = target();
        let gcc = GccArm::new(&ToolchainConfig::new(Core::CortexM4F));
        let macros = vec!["B".to_string(), "A".to_string(), "B".to_string()];
        let symbols = general_symbols(&inputs(&target, &gcc, &macros, 0));
        let mut sorted = symbols.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(symbols, sorted);
    }

    #[test]
    fn test_debug_profile_sets_debug_symbol() {
        let target = target();
        let config = ToolchainConfig::new(Core::CortexM4F).with_profile(Profile::Debug);
        let gcc = GccArm::new(&config);
        let symbols = general_symbols(&inputs(&target, &gcc, &[], 0));
        assert!(symbols.contains(&"FIRMFORGE_DEBUG".to_string()));
    }

    #[test]
    fn test_language_debug_flag_sets_debug_symbol() {
        let target = target();
        let mut config = ToolchainConfig::new(Core::CortexM4F);
        config.extra_flags.c.push("-O0".to_string());
        let gcc = GccArm::new(&config);
        let symbols = general_symbols(&inputs(&target, &gcc, &[], 0));
        assert!(symbols.contains(&"FIRMFORGE_DEBUG".to_string()));
        assert!(!symbols.contains(&"FIRMFORGE_RELEASE".to_string()));
    }

    #[test]
    fn test_cache_computes_once() {
        let cache = SymbolCache::new();
        let target = target();
        let gcc = GccArm::new(&ToolchainConfig::new(Core::CortexM4F));
        let first = cache.get(&inputs(&target, &gcc, &[], 1), false).to_vec();
        let second = cache.get(&inputs(&target, &gcc, &[], 2), false).to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn test_is_timestamp() {
        assert!(is_timestamp("FIRMFORGE_BUILD_TIMESTAMP=123"));
        assert!(!is_timestamp("FIRMFORGE_DEBUG"));
    }
}
