//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod clean;
pub mod merge;
pub mod scan;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use crate::config::defaults;
use crate::core::engine::BinaryFormat;
use crate::core::manifest::Manifest;
use crate::infra::toolchain::Profile;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile, link and assemble the firmware image
    Build {
        /// Toolchain to build with; repeat to build several permutations
        #[arg(short, long = "toolchain", value_name = "NAME")]
        toolchains: Vec<String>,

        /// Number of parallel compile jobs
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Build profile (debug, develop, release)
        #[arg(long)]
        profile: Option<Profile>,

        /// Rebuild every source regardless of timestamps
        #[arg(long)]
        clean: bool,
    },

    /// List the resources the collector finds
    Scan {
        /// Toolchain whose labels are active
        #[arg(short, long)]
        toolchain: Option<String>,

        /// Output in JSON format for scripting
        #[arg(long)]
        json: bool,
    },

    /// Merge pre-built region artifacts into one image
    Merge {
        /// Artifact for the active region
        #[arg(long)]
        app: Option<PathBuf>,

        /// Output directory (defaults to the project's output directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_parser = parse_format)]
        format: Option<BinaryFormat>,
    },

    /// Remove build artifacts
    Clean,
}

fn parse_format(s: &str) -> Result<BinaryFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "bin" => Ok(BinaryFormat::Bin),
        "hex" | "ihex" => Ok(BinaryFormat::Hex),
        other => Err(format!("Unknown format '{other}' (expected bin or hex)")),
    }
}

impl Commands {
    /// Execute the command
    pub async fn run(self, quiet: bool) -> Result<()> {
        let current_dir = std::env::current_dir()?;
        match self {
            Self::Build {
                toolchains,
                jobs,
                profile,
                clean,
            } => {
                let options = build::BuildOptions {
                    toolchains,
                    jobs,
                    profile,
                    clean,
                    quiet,
                };
                build::execute(&current_dir, options).await
            }
            Self::Scan { toolchain, json } => scan::execute(&current_dir, toolchain, json),
            Self::Merge {
                app,
                output,
                format,
            } => merge::execute(&current_dir, app, output, format),
            Self::Clean => clean::execute(&current_dir),
        }
    }
}

/// Load the project manifest, with a hint when there is none
pub(crate) fn load_manifest(project_dir: &Path) -> Result<Manifest> {
    let manifest_path = project_dir.join(defaults::MANIFEST_FILE);
    if !manifest_path.exists() {
        bail!(
            "No {} found in {}",
            defaults::MANIFEST_FILE,
            project_dir.display()
        );
    }
    Manifest::load(&manifest_path)
        .with_context(|| format!("Failed to load manifest from {}", manifest_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("HEX").unwrap(), BinaryFormat::Hex);
        assert_eq!(parse_format("bin").unwrap(), BinaryFormat::Bin);
        assert!(parse_format("elf").is_err());
    }
}
