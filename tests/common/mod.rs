//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Test project context
///
/// Creates a temporary directory for test projects and provides
/// utilities for setting up test scenarios.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Create a binary file in the test project
    pub fn create_bytes(&self, name: &str, content: &[u8]) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Create a directory in the test project
    pub fn create_dir(&self, name: &str) {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(path).expect("Failed to create directory");
    }

    /// Check if a file exists in the test project
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Read a file from the test project
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Read a binary file from the test project
    pub fn read_bytes(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Write the minimal source tree used by build tests
    ///
    /// One C file, one C++ file, a header directory, a linker script and
    /// a source that only applies to another target.
    pub fn with_sample_sources(&self) -> &Self {
        self.create_file("src/main.c", "#include \"board.h\"\nint main(void) { return 0; }\n");
        self.create_file("src/driver.cpp", "void driver_init(void) {}\n");
        self.create_file("include/board.h", "#define BOARD 1\n");
        self.create_file("TARGET_TESTBOARD/TESTBOARD.ld", "MEMORY {}\n");
        self.create_file("TARGET_OTHER/other.c", "int other;\n");
        self
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample manifest TOML for testing
pub const SAMPLE_MANIFEST: &str = r#"
[project]
name = "blinky"
version = "1.0.0"

[target]
name = "TESTBOARD"
core = "Cortex-M4"
"#;

/// Run the firmforge binary in `dir`
pub fn run_firmforge(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_firmforge"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute firmforge")
}

/// Fake GNU Arm tools driven by `sh`
///
/// The compiler writes the object named by `-o` and, when asked, a
/// make-rule dependency file naming the source. The linker writes the
/// executable and an empty map. `objcopy` writes `IMAGE_BYTES`.
#[cfg(unix)]
pub mod fake_gcc {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Bytes every extracted binary contains
    pub const IMAGE_BYTES: &str = "FIRMWARE";

    const COMPILER: &str = r#"#!/bin/sh
echo "$0 $*" >> "$(dirname "$0")/invocations.log"
out=""; dep=""; map=""; src=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -MF) dep="$2"; shift ;;
    -Wl,-Map=*) map="${1#-Wl,-Map=}" ;;
    *) src="$1" ;;
  esac
  shift
done
if [ -f "$src" ] && grep -q -e NOT_SUPPORTED -- "$src"; then
  echo "$src: [NOT_SUPPORTED] target not supported"
  exit 1
fi
if [ -f "$src" ] && grep -q -e SYNTAX_ERROR -- "$src"; then
  echo "$src:1:1: error: expected ';' before '}' token"
  exit 1
fi
[ -n "$dep" ] && printf '%s: %s\n' "$out" "$src" > "$dep"
[ -n "$map" ] && : > "$map"
echo object > "$out"
"#;

    const ARCHIVER: &str = r#"#!/bin/sh
echo "$0 $*" >> "$(dirname "$0")/invocations.log"
echo archive > "$2"
"#;

    const OBJCOPY: &str = r#"#!/bin/sh
echo "$0 $*" >> "$(dirname "$0")/invocations.log"
for last; do :; done
printf 'FIRMWARE' > "$last"
"#;

    fn write_tool(dir: &Path, name: &str, script: &str) {
        let path = dir.join(name);
        std::fs::write(&path, script).expect("Failed to write fake tool");
        let mut perms = std::fs::metadata(&path).expect("stat fake tool").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod fake tool");
    }

    /// Install the fake tools into `dir` and return it
    pub fn install(dir: &Path) -> PathBuf {
        std::fs::create_dir_all(dir).expect("Failed to create tool directory");
        write_tool(dir, "arm-none-eabi-gcc", COMPILER);
        write_tool(dir, "arm-none-eabi-g++", COMPILER);
        write_tool(dir, "arm-none-eabi-ar", ARCHIVER);
        write_tool(dir, "arm-none-eabi-objcopy", OBJCOPY);
        dir.to_path_buf()
    }

    /// Number of recorded invocations of `tool`
    pub fn invocations(dir: &Path, tool: &str) -> usize {
        std::fs::read_to_string(dir.join("invocations.log"))
            .unwrap_or_default()
            .lines()
            .filter(|line| {
                line.split_whitespace()
                    .next()
                    .is_some_and(|program| program.ends_with(tool))
            })
            .count()
    }

    /// Number of recorded compile steps (`-c` invocations)
    pub fn compiles(dir: &Path) -> usize {
        std::fs::read_to_string(dir.join("invocations.log"))
            .unwrap_or_default()
            .lines()
            .filter(|line| line.split_whitespace().any(|arg| arg == "-c"))
            .count()
    }
}

/// Manifest pointing the GCC backend at the fake tools in `bin_dir`
pub fn manifest_with_tools(bin_dir: &Path) -> String {
    format!(
        "{SAMPLE_MANIFEST}\n[toolchain]\nname = \"GCC_ARM\"\nbin_dir = \"{}\"\n",
        bin_dir.display()
    )
}
