//! Scan command implementation
//!
//! Implements `firmforge scan`: run the resource collector with the target's
//! labels and list what it found. Feature subtrees are listed by name only;
//! they are not scanned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::output::{self, status};
use crate::core::resources::{Duplicate, FileType, Resources};
use crate::core::scanner::Collector;
use crate::infra::toolchain;

/// Machine-readable scan result
#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub toolchain: String,
    pub files: BTreeMap<FileType, Vec<PathBuf>>,
    pub include_dirs: Vec<PathBuf>,
    pub ignored_dirs: Vec<PathBuf>,
    pub features: Vec<String>,
    pub duplicates: Vec<Duplicate>,
}

impl ScanReport {
    fn new(toolchain: &str, resources: &Resources) -> Self {
        let files = resources
            .summary()
            .into_keys()
            .map(|t| {
                let paths = resources.files(t).iter().map(|f| f.path.clone()).collect();
                (t, paths)
            })
            .collect();
        Self {
            toolchain: toolchain.to_string(),
            files,
            include_dirs: resources.include_dirs().to_vec(),
            ignored_dirs: resources.ignored_dirs().to_vec(),
            features: resources.feature_names().map(String::from).collect(),
            duplicates: resources.duplicates(),
        }
    }
}

/// Execute the scan command
pub fn execute(project_dir: &Path, toolchain_name: Option<String>, json: bool) -> Result<()> {
    let manifest = super::load_manifest(project_dir)?;
    let name = toolchain_name.unwrap_or_else(|| manifest.toolchain.name.clone());
    let backend = toolchain::from_name(&name, &manifest.toolchain_config())?;
    let target = manifest.to_target();

    let spinner = output::create_spinner(&format!("Scanning {} for {}", project_dir.display(), target.name), json);
    let resources = Collector::for_target(&target, backend.labels())
        .collect_ignores(true)
        .ignore_path(&project_dir.join(&manifest.build.output_dir))
        .scan(&manifest.roots(project_dir));
    spinner.finish_and_clear();
    let resources = resources.with_context(|| format!("Failed to scan {}", project_dir.display()))?;
    let report = ScanReport::new(backend.name(), &resources);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{} {} for {} with {}",
        status::INFO,
        manifest.project.name,
        target.name,
        report.toolchain
    );
    for (file_type, paths) in &report.files {
        println!("  {file_type:?}: {}", paths.len());
        for path in paths {
            println!("    {}", display_relative(project_dir, path));
        }
    }
    println!("  Include paths: {}", report.include_dirs.len());
    for dir in &report.include_dirs {
        println!("    {}", display_relative(project_dir, dir));
    }
    if !report.ignored_dirs.is_empty() {
        println!("  Ignored:");
        for dir in &report.ignored_dirs {
            println!("    {}", display_relative(project_dir, dir));
        }
    }
    if !report.features.is_empty() {
        println!("  Features available: {}", report.features.join(", "));
    }
    for dup in &report.duplicates {
        println!(
            "{} Duplicate source name '{}': {}",
            status::WARNING,
            dup.stem,
            dup.paths
                .iter()
                .map(|p| display_relative(project_dir, p))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(())
}

fn display_relative(base: &Path, path: &Path) -> String {
    let base = std::path::absolute(base).unwrap_or_else(|_| base.to_path_buf());
    path.strip_prefix(&base)
        .unwrap_or(path)
        .display()
        .to_string()
}
