//! Toolchain backends
//!
//! The [`Toolchain`] trait is the capability contract the build engine is
//! polymorphic over. Backends translate symbolic inputs (sources, objects,
//! defines, include directories) into concrete command lines and parse the
//! diagnostics their tools print. The engine never asks which backend it is
//! talking to.
//!
//! Three backends are provided:
//!
//! - [`gcc::GccArm`] - GNU Arm Embedded (`arm-none-eabi-gcc`)
//! - [`arm::ArmCompiler`] - Arm Compiler 6 (`armclang`/`armlink`)
//! - [`iar::IarArm`] - IAR Embedded Workbench (`iccarm`/`ilinkarm`)

pub mod arm;
pub mod gcc;
pub mod iar;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::core::target::Core;
use crate::error::BuildError;

/// A single command line: program followed by its arguments
pub type ToolCommand = Vec<String>;

/// Build profile selecting optimisation and debug flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Debug,
    #[default]
    Develop,
    Release,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Profile::Debug),
            "develop" => Ok(Profile::Develop),
            "release" => Ok(Profile::Release),
            other => Err(format!(
                "Unknown profile '{other}' (expected debug, develop or release)"
            )),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Debug => f.write_str("debug"),
            Profile::Develop => f.write_str("develop"),
            Profile::Release => f.write_str("release"),
        }
    }
}

/// Languages with their own flag set and profile fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    Asm,
    C,
    Cpp,
    Link,
}

impl Language {
    /// Suffix of the fingerprint file for this language
    pub fn key(self) -> &'static str {
        match self {
            Language::Asm => "asm",
            Language::C => "c",
            Language::Cpp => "cxx",
            Language::Link => "ld",
        }
    }
}

/// Flags per language
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSet {
    /// Flags shared by the C and C++ compilers (and the assembler where it is the same driver)
    #[serde(default)]
    pub common: Vec<String>,
    /// C compiler flags
    #[serde(default)]
    pub c: Vec<String>,
    /// C++ compiler flags
    #[serde(default)]
    pub cxx: Vec<String>,
    /// Assembler flags
    #[serde(default)]
    pub asm: Vec<String>,
    /// Linker flags
    #[serde(default)]
    pub ld: Vec<String>,
}

impl FlagSet {
    /// Flags specific to one language (common flags excluded)
    pub fn for_language(&self, language: Language) -> &[String] {
        match language {
            Language::Asm => &self.asm,
            Language::C => &self.c,
            Language::Cpp => &self.cxx,
            Language::Link => &self.ld,
        }
    }

    /// Append every flag of `other`
    pub fn extend(&mut self, other: &FlagSet) {
        self.common.extend(other.common.iter().cloned());
        self.c.extend(other.c.iter().cloned());
        self.cxx.extend(other.cxx.iter().cloned());
        self.asm.extend(other.asm.iter().cloned());
        self.ld.extend(other.ld.iter().cloned());
    }

    /// Every flag of every language
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.common
            .iter()
            .chain(&self.c)
            .chain(&self.cxx)
            .chain(&self.asm)
            .chain(&self.ld)
    }
}

fn to_strings(flags: &[&str]) -> Vec<String> {
    flags.iter().map(|f| (*f).to_string()).collect()
}

/// Toolchain settings resolved once per invocation
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    /// Directory containing the tool executables (PATH lookup when absent)
    pub bin_dir: Option<PathBuf>,
    /// Executable prefix, e.g. `arm-none-eabi-`
    pub prefix: Option<String>,
    /// Target CPU core
    pub core: Core,
    /// Build profile
    pub profile: Profile,
    /// User flags appended after the profile flags
    pub extra_flags: FlagSet,
    /// Pass long argument lists through options files
    pub response_files: bool,
}

impl ToolchainConfig {
    /// Config with defaults for the given core
    pub fn new(core: Core) -> Self {
        Self {
            bin_dir: None,
            prefix: None,
            core,
            profile: Profile::default(),
            extra_flags: FlagSet::default(),
            response_files: true,
        }
    }

    /// Set the build profile
    #[must_use]
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the executable directory
    #[must_use]
    pub fn with_bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = Some(dir.into());
        self
    }

    /// Resolve an executable name to a command
    ///
    /// An explicit `bin_dir` wins; otherwise the tool is looked up on `PATH`
    /// and, failing that, left bare so the spawn error names it.
    pub fn tool(&self, name: &str) -> String {
        if let Some(dir) = &self.bin_dir {
            return dir.join(name).display().to_string();
        }
        which::which(name).map_or_else(|_| name.to_string(), |p| p.display().to_string())
    }
}

/// Inputs of one compile or assemble step
#[derive(Debug, Clone)]
pub struct CompileInput<'a> {
    /// Source file
    pub source: &'a Path,
    /// Object file to produce
    pub object: &'a Path,
    /// Make-rule dependency file to produce, if the tool writes one
    pub dep_file: Option<&'a Path>,
    /// Preprocessor symbols (`NAME` or `NAME=VALUE`)
    pub defines: &'a [String],
    /// Include arguments, already rendered (`-Idir` list or a single options-file reference)
    pub include_args: &'a [String],
    /// Generated header force-included into every translation unit
    pub config_header: Option<&'a Path>,
}

/// Inputs of the link step
#[derive(Debug, Clone)]
pub struct LinkInput<'a> {
    /// Executable to produce
    pub output: &'a Path,
    /// Object arguments, already rendered (paths or a single options-file reference)
    pub object_args: &'a [String],
    /// Static libraries
    pub libraries: &'a [PathBuf],
    /// Linker script / scatter file / ICF
    pub linker_script: &'a Path,
    /// Map file to produce
    pub map_file: &'a Path,
    /// Extra linker arguments (symbol redirects)
    pub extra_args: &'a [String],
}

/// Severity of a tool diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    /// Parse the severity word used by the various tools
    pub fn parse(word: &str) -> Severity {
        let word = word.to_ascii_lowercase();
        if word.contains("error") {
            Severity::Error
        } else if word.contains("warning") {
            Severity::Warning
        } else {
            Severity::Note
        }
    }
}

/// A structured diagnostic parsed from tool output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub code: Option<String>,
    pub message: String,
}

/// Parse diagnostics matching `re`, which must capture `severity` and `message`
/// and may capture `file`, `line`, `col` and `code`
pub(crate) fn parse_with(re: &Regex, output: &str) -> Vec<Diagnostic> {
    output
        .lines()
        .filter_map(|line| re.captures(line.trim_end()))
        .map(|caps| Diagnostic {
            severity: Severity::parse(&caps["severity"]),
            file: caps.name("file").map(|m| PathBuf::from(m.as_str())),
            line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
            column: caps.name("col").and_then(|m| m.as_str().parse().ok()),
            code: caps.name("code").map(|m| m.as_str().to_string()),
            message: caps["message"].trim().to_string(),
        })
        .collect()
}

/// Capability contract of a toolchain backend
pub trait Toolchain: Send + Sync + fmt::Debug {
    /// Toolchain name as used in the manifest (`GCC_ARM`, `ARM`, `IAR`)
    fn name(&self) -> &'static str;

    /// Labels activating `TOOLCHAIN_*` directories
    fn labels(&self) -> &'static [&'static str];

    /// Extension of linker scripts understood by the linker
    fn linker_script_ext(&self) -> &'static str;

    /// Extension of static archives
    fn archive_ext(&self) -> &'static str;

    /// Extension of object files
    fn object_ext(&self) -> &'static str {
        "o"
    }

    /// CPU-derived flags, shared by every language
    fn cpu_flags(&self) -> Vec<String>;

    /// Effective flags: profile flags, CPU flags and user flags
    fn flags(&self) -> &FlagSet;

    /// Whether options files are honoured
    fn supports_response_files(&self) -> bool;

    /// Reference to an options file on the compiler command line
    fn response_file_args(&self, path: &Path) -> Vec<String> {
        vec![format!("@{}", path.display())]
    }

    /// Reference to an options file on the linker and archiver command line
    fn object_list_args(&self, path: &Path) -> Vec<String> {
        self.response_file_args(path)
    }

    /// Render include directories as arguments
    fn include_args(&self, dirs: &[PathBuf]) -> Vec<String> {
        dirs.iter().map(|d| format!("-I{}", d.display())).collect()
    }

    /// Arguments force-including the generated config header
    fn config_header_args(&self, header: &Path) -> Vec<String> {
        vec!["-include".to_string(), header.display().to_string()]
    }

    /// Dependency file produced next to an object
    ///
    /// `None` when the tool cannot emit one for `language`; the object then
    /// depends on its source alone.
    fn dep_file(&self, object: &Path, _language: Language) -> Option<PathBuf> {
        Some(object.with_extension("d"))
    }

    /// Assemble a source file
    fn assemble(&self, input: &CompileInput<'_>) -> Vec<ToolCommand>;

    /// Compile a C source file
    fn compile_c(&self, input: &CompileInput<'_>) -> Vec<ToolCommand>;

    /// Compile a C++ source file
    fn compile_cpp(&self, input: &CompileInput<'_>) -> Vec<ToolCommand>;

    /// Link objects into an executable
    fn link(&self, input: &LinkInput<'_>) -> Vec<ToolCommand>;

    /// Create a static archive
    fn archive(&self, object_args: &[String], output: &Path) -> Vec<ToolCommand>;

    /// Extract a raw binary or Intel HEX image from an executable
    fn binary(&self, elf: &Path, output: &Path) -> ToolCommand;

    /// Parse tool output into structured diagnostics
    fn parse_diagnostics(&self, output: &str) -> Vec<Diagnostic>;

    /// Mangled name of a `void name(void)` C++ function
    fn mangle(&self, name: &str) -> String {
        format!("_Z{}{}v", name.len(), name)
    }

    /// Linker arguments redirecting references from `source` to `target`
    fn redirect_symbol(&self, source: &str, target: &str, build_dir: &Path) -> Result<Vec<String>, BuildError>;

    /// Whether tool output reports that the target is not supported
    fn is_not_supported(&self, output: &str) -> bool {
        output.contains(defaults::NOT_SUPPORTED_MARKER)
    }
}

/// Names accepted by [`from_name`]
pub const TOOLCHAIN_NAMES: &[&str] = &["GCC_ARM", "ARM", "IAR"];

/// Instantiate a backend by manifest name
pub fn from_name(name: &str, config: &ToolchainConfig) -> Result<Arc<dyn Toolchain>, BuildError> {
    match name.to_ascii_uppercase().as_str() {
        "GCC_ARM" | "GCC" => Ok(Arc::new(gcc::GccArm::new(config))),
        "ARM" | "ARMC6" => Ok(Arc::new(arm::ArmCompiler::new(config))),
        "IAR" => Ok(Arc::new(iar::IarArm::new(config))),
        other => Err(BuildError::Config {
            message: format!(
                "Unknown toolchain '{other}'. Supported toolchains: {}",
                TOOLCHAIN_NAMES.join(", ")
            ),
        }),
    }
}
