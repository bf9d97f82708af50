//! Manifest (firmforge.toml) parsing and validation
//!
//! The manifest is the main configuration file for a firmforge project:
//! target description, toolchain settings, build options, the memory
//! layout and image post-processing. String values support environment
//! variable substitution using `${VAR}` syntax.
//!
//! A loaded manifest is the [`ConfigProvider`] the CLI hands to the engine
//! and the image assembler.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::core::image::ImageOptions;
use crate::core::provider::{ConfigData, ConfigProvider, RamRegion, Region};
use crate::core::target::{Core, Target};
use crate::error::ManifestError;
use crate::infra::toolchain::{FlagSet, Profile, ToolchainConfig, TOOLCHAIN_NAMES};

/// The project manifest (firmforge.toml)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Project configuration
    pub project: ProjectConfig,

    /// Target description
    pub target: TargetConfig,

    /// Toolchain settings
    #[serde(default)]
    pub toolchain: ToolchainSection,

    /// Build configuration
    #[serde(default)]
    pub build: BuildConfig,

    /// ROM regions
    #[serde(default)]
    pub regions: Vec<Region>,

    /// RAM regions
    #[serde(default)]
    pub ram_regions: Vec<RamRegion>,

    /// Image post-processing
    #[serde(default)]
    pub image: ImageOptions,
}

/// Project-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    /// Project name, also the artifact name
    pub name: String,

    /// Project version
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// `[target]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetConfig {
    /// Target name
    pub name: String,

    /// CPU core, e.g. `Cortex-M4F`
    pub core: Core,

    /// Extra TARGET labels
    #[serde(default)]
    pub labels: Vec<String>,

    /// Enabled features
    #[serde(default)]
    pub features: Vec<String>,

    /// Enabled components
    #[serde(default)]
    pub components: Vec<String>,

    /// Hardware peripherals present on the device
    #[serde(default)]
    pub device_has: Vec<String>,

    /// Target macros
    #[serde(default)]
    pub macros: Vec<String>,

    /// Data for the generated config header
    #[serde(default)]
    pub config: Option<ConfigData>,
}

/// `[toolchain]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolchainSection {
    /// Backend name (`GCC_ARM`, `ARM` or `IAR`)
    #[serde(default = "default_toolchain")]
    pub name: String,

    /// Directory holding the tool executables
    #[serde(default)]
    pub bin_dir: Option<PathBuf>,

    /// Executable prefix
    #[serde(default)]
    pub prefix: Option<String>,

    /// Build profile
    #[serde(default)]
    pub profile: Profile,

    /// Extra flags per language
    #[serde(default)]
    pub flags: FlagSet,

    /// Pass long argument lists through options files
    #[serde(default = "default_true")]
    pub response_files: bool,
}

fn default_toolchain() -> String {
    "GCC_ARM".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ToolchainSection {
    fn default() -> Self {
        Self {
            name: default_toolchain(),
            bin_dir: None,
            prefix: None,
            profile: Profile::default(),
            flags: FlagSet::default(),
            response_files: true,
        }
    }
}

/// `[build]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildConfig {
    /// Source roots, relative to the project directory
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    /// Output directory, relative to the project directory
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Number of parallel compile jobs
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Wall-clock bound for a compile pass, in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Produce a static archive instead of a linked program
    #[serde(default)]
    pub library: bool,

    /// Extra macros
    #[serde(default)]
    pub macros: Vec<String>,
}

fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(defaults::DEFAULT_BUILD_DIR)
}

fn default_timeout() -> u64 {
    defaults::DEFAULT_BUILD_TIMEOUT_SECS
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            output_dir: default_output_dir(),
            jobs: None,
            timeout: default_timeout(),
            library: false,
            macros: Vec::new(),
        }
    }
}

fn env_var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"))
}

/// Substitute environment variables in a string using `${VAR}` syntax
///
/// Unset variables expand to the empty string.
///
/// ```
/// use firmforge::core::manifest::substitute_env_vars;
///
/// std::env::set_var("FF_DOC_VAR", "hello");
/// assert_eq!(substitute_env_vars("prefix_${FF_DOC_VAR}_suffix"), "prefix_hello_suffix");
/// std::env::remove_var("FF_DOC_VAR");
/// ```
pub fn substitute_env_vars(input: &str) -> String {
    env_var_regex()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Recursively substitute environment variables in a TOML value
fn substitute_in_value(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => *s = substitute_env_vars(s),
        toml::Value::Array(items) => items.iter_mut().for_each(substitute_in_value),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| substitute_in_value(v)),
        _ => {}
    }
}

impl Manifest {
    /// Load and validate a manifest, resolving relative paths against its directory
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        if !path.is_file() {
            return Err(ManifestError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::Parse(format!("{}: {e}", path.display())))?;
        let mut manifest = Self::from_toml(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        manifest.resolve_paths(base);
        Ok(manifest)
    }

    /// Parse and validate manifest text, substituting environment variables
    pub fn from_toml(content: &str) -> Result<Self, ManifestError> {
        let mut value: toml::Value =
            toml::from_str(content).map_err(|e| ManifestError::Parse(e.to_string()))?;
        substitute_in_value(&mut value);
        let manifest: Manifest = value
            .try_into()
            .map_err(|e: toml::de::Error| ManifestError::Parse(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Serialize manifest to TOML string
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check the manifest for semantic errors, reporting all of them
    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut errors = Vec::new();

        if self.project.name.trim().is_empty() {
            errors.push("Field 'project.name' cannot be empty".to_string());
        }
        if self.target.name.trim().is_empty() {
            errors.push("Field 'target.name' cannot be empty".to_string());
        }
        let toolchain = self.toolchain.name.to_ascii_uppercase();
        if !TOOLCHAIN_NAMES.contains(&toolchain.as_str()) {
            errors.push(format!(
                "Unknown toolchain '{}'. Valid toolchains: {}",
                self.toolchain.name,
                TOOLCHAIN_NAMES.join(", ")
            ));
        }
        if self.build.roots.is_empty() {
            errors.push("Field 'build.roots' cannot be empty".to_string());
        }

        let active = self.regions.iter().filter(|r| r.active).count();
        if active > 1 {
            errors.push(format!("At most one region may be active, found {active}"));
        }
        for region in &self.regions {
            if region.size == 0 {
                errors.push(format!("Region '{}' has zero size", region.name));
            }
            if region.end() > 1 << 32 {
                errors.push(format!("Region '{}' extends past the address space", region.name));
            }
        }
        for region in &self.ram_regions {
            if region.size == 0 {
                errors.push(format!("RAM region '{}' has zero size", region.name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ManifestError::Invalid(errors.join("; ")))
        }
    }

    /// Make region artifact paths absolute
    fn resolve_paths(&mut self, base: &Path) {
        for region in &mut self.regions {
            if let Some(path) = region.path.as_mut() {
                if path.is_relative() {
                    *path = base.join(&*path);
                }
            }
        }
    }

    /// Target description for the collector and the engine
    pub fn to_target(&self) -> Target {
        let mut target = Target::new(&self.target.name, self.target.core)
            .with_labels(self.target.labels.iter().cloned())
            .with_features(self.target.features.iter().cloned())
            .with_components(self.target.components.iter().cloned());
        target.device_has.clone_from(&self.target.device_has);
        target.macros.clone_from(&self.target.macros);
        target
    }

    /// Toolchain settings for this invocation
    pub fn toolchain_config(&self) -> ToolchainConfig {
        let mut config = ToolchainConfig::new(self.target.core).with_profile(self.toolchain.profile);
        config.bin_dir.clone_from(&self.toolchain.bin_dir);
        config.prefix.clone_from(&self.toolchain.prefix);
        config.extra_flags = self.toolchain.flags.clone();
        config.response_files = self.toolchain.response_files;
        config
    }

    /// Source roots under `project_dir`
    pub fn roots(&self, project_dir: &Path) -> Vec<PathBuf> {
        self.build.roots.iter().map(|r| project_dir.join(r)).collect()
    }

    /// Build directory for one toolchain under `project_dir`
    pub fn build_dir(&self, project_dir: &Path, toolchain: &str) -> PathBuf {
        project_dir
            .join(&self.build.output_dir)
            .join(&self.target.name)
            .join(toolchain.to_ascii_uppercase())
    }
}

impl ConfigProvider for Manifest {
    fn regions(&self) -> Vec<Region> {
        self.regions.clone()
    }

    fn ram_regions(&self) -> Vec<RamRegion> {
        self.ram_regions.clone()
    }

    fn config_data(&self) -> Option<ConfigData> {
        self.target.config.clone().filter(|data| !data.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::BinaryFormat;
    use proptest::prelude::*;

    const FULL: &str = r#"
[project]
name = "blinky"
version = "1.2.0"

[target]
name = "K64F"
core = "Cortex-M4F"
labels = ["FREESCALE", "KSDK"]
features = ["BLE"]
device_has = ["SERIAL", "I2C"]
macros = ["CPU_MK64FN1M0VMD12"]

[target.config.params]
STDIO_BAUD = "115200"

[toolchain]
name = "GCC_ARM"
profile = "release"
response_files = false

[toolchain.flags]
c = ["-std=gnu11"]

[build]
roots = ["src", "lib"]
jobs = 4
library = false

[[regions]]
name = "bootloader"
start = 0x0
size = 0x10000
path = "prebuilt/boot.bin"

[[regions]]
name = "application"
start = 0x10000
size = 0xF0000
active = true
updatable = true

[[ram_regions]]
name = "SRAM_L"
start = 0x1FFF0000
size = 0x10000

[image]
format = "hex"
alignment = 256
"#;

    // ============================================
    // Unit Tests
    // ============================================

    #[test]
    fn test_manifest_deserializes_full_example() {
        let manifest = Manifest::from_toml(FULL).expect("Failed to parse valid TOML");

        assert_eq!(manifest.project.name, "blinky");
        assert_eq!(manifest.target.core, Core::CortexM4F);
        assert_eq!(manifest.toolchain.profile, Profile::Release);
        assert!(!manifest.toolchain.response_files);
        assert_eq!(manifest.build.jobs, Some(4));
        assert_eq!(manifest.regions.len(), 2);
        assert_eq!(manifest.regions[1].start, 0x10000);
        assert!(manifest.regions[1].active);
        assert_eq!(manifest.image.format, BinaryFormat::Hex);
        assert_eq!(
            manifest.config_data().unwrap().params["STDIO_BAUD"],
            "115200"
        );
    }

    #[test]
    fn test_manifest_default_values() {
        let manifest = Manifest::from_toml(
            "[project]\nname = \"x\"\n[target]\nname = \"T\"\ncore = \"Cortex-M0\"\n",
        )
        .unwrap();
        assert_eq!(manifest.project.version, "0.1.0");
        assert_eq!(manifest.toolchain.name, "GCC_ARM");
        assert!(manifest.toolchain.response_files);
        assert_eq!(manifest.build.roots, vec![PathBuf::from(".")]);
        assert_eq!(manifest.build.output_dir, PathBuf::from("BUILD"));
        assert_eq!(manifest.image.alignment, 256);
        assert!(!manifest.has_regions());
        assert!(manifest.config_data().is_none());
    }

    #[test]
    fn test_manifest_missing_required_target() {
        let err = Manifest::from_toml("[project]\nname = \"x\"\n").unwrap_err();
        assert!(err.to_string().contains("target"), "unexpected error: {err}");
    }

    #[test]
    fn test_manifest_reports_every_invalid_field() {
        let content = r#"
[project]
name = ""
[target]
name = "T"
core = "Cortex-M4"
[toolchain]
name = "CLANG"
[[regions]]
name = "a"
start = 0
size = 16
active = true
[[regions]]
name = "b"
start = 16
size = 16
active = true
"#;
        let err = Manifest::from_toml(content).unwrap_err().to_string();
        assert!(err.contains("project.name"));
        assert!(err.contains("CLANG"));
        assert!(err.contains("At most one region"));
    }

    #[test]
    fn test_env_substitution_in_values() {
        std::env::set_var("FIRMFORGE_TEST_TARGET", "NUCLEO_F401RE");
        let manifest = Manifest::from_toml(
            "[project]\nname = \"x\"\n[target]\nname = \"${FIRMFORGE_TEST_TARGET}\"\ncore = \"Cortex-M4F\"\n",
        )
        .unwrap();
        std::env::remove_var("FIRMFORGE_TEST_TARGET");
        assert_eq!(manifest.target.name, "NUCLEO_F401RE");
    }

    #[test]
    fn test_unset_env_var_expands_to_empty() {
        assert_eq!(substitute_env_vars("a${FIRMFORGE_SURELY_UNSET_VAR}b"), "ab");
        assert_eq!(substitute_env_vars("no vars"), "no vars");
    }

    #[test]
    fn test_to_target_and_toolchain_config() {
        let manifest = Manifest::from_toml(FULL).unwrap();
        let target = manifest.to_target();
        assert!(target.target_labels().contains("KSDK"));
        assert_eq!(target.features, vec!["BLE".to_string()]);
        assert_eq!(target.device_has.len(), 2);

        let config = manifest.toolchain_config();
        assert_eq!(config.profile, Profile::Release);
        assert_eq!(config.extra_flags.c, vec!["-std=gnu11".to_string()]);
        assert!(!config.response_files);
    }

    #[test]
    fn test_load_resolves_region_paths() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join(defaults::MANIFEST_FILE);
        std::fs::write(&path, FULL).unwrap();
        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(
            manifest.regions[0].path.as_deref(),
            Some(temp.path().join("prebuilt/boot.bin").as_path())
        );
        assert_eq!(
            manifest.build_dir(temp.path(), "gcc_arm"),
            temp.path().join("BUILD/K64F/GCC_ARM")
        );
    }

    #[test]
    fn test_load_missing_manifest() {
        let err = Manifest::load(Path::new("/nonexistent/firmforge.toml")).unwrap_err();
        assert!(matches!(err, ManifestError::NotFound { .. }));
    }

    // ============================================
    // Property Tests
    // ============================================

    fn name_strategy() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,15}"
    }

    fn region_strategy() -> impl Strategy<Value = Region> {
        ("[a-z]{1,8}", 0u32..0x1000_0000, 1u32..0x10_0000, any::<bool>()).prop_map(
            |(name, start, size, updatable)| Region {
                name,
                start,
                size,
                path: None,
                active: false,
                updatable,
            },
        )
    }

    fn manifest_strategy() -> impl Strategy<Value = Manifest> {
        (
            name_strategy(),
            name_strategy(),
            prop::sample::select(Core::ALL.to_vec()),
            prop::collection::vec(region_strategy(), 0..4),
            prop::option::of(1usize..64),
        )
            .prop_map(|(project, target, core, regions, jobs)| Manifest {
                project: ProjectConfig {
                    name: project,
                    version: default_version(),
                },
                target: TargetConfig {
                    name: target.to_uppercase(),
                    core,
                    labels: Vec::new(),
                    features: Vec::new(),
                    components: Vec::new(),
                    device_has: Vec::new(),
                    macros: Vec::new(),
                    config: None,
                },
                toolchain: ToolchainSection::default(),
                build: BuildConfig {
                    jobs,
                    ..BuildConfig::default()
                },
                regions,
                ram_regions: Vec::new(),
                image: ImageOptions::default(),
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_manifest_toml_roundtrip(manifest in manifest_strategy()) {
            let toml_str = manifest.to_toml().expect("Failed to serialize");
            let parsed = Manifest::from_toml(&toml_str).expect("Failed to parse");
            prop_assert_eq!(manifest, parsed);
        }
    }
}
