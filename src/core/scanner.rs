//! Resource collector
//!
//! Walks source roots depth-first and produces a [`Resources`] registry.
//! Per directory the collector:
//!
//! 1. prunes it if it matches an ignore rule declared higher up,
//! 2. prunes hidden and VCS directories silently,
//! 3. prunes `TARGET_`/`TOOLCHAIN_`/`COMPONENT_` directories whose label is
//!    inactive (recording them as ignored),
//! 4. defers `FEATURE_` directories to a lazily scanned subtree,
//! 5. reads its `.buildignore` before descending and registers it as an
//!    include directory.
//!
//! The collector never writes to the source tree.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::defaults;
use crate::core::ignore::IgnoreRuleSet;
use crate::core::resources::{FileRef, FileType, Resources, ScanContext};
use crate::core::target::{LabelClass, Target};
use crate::error::ScanError;

/// Directory names of version control systems
const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn", ".bzr", "CVS"];

/// What to do with a directory encountered during the walk
#[derive(Debug, PartialEq, Eq)]
enum DirAction {
    /// Scan its contents
    Descend,
    /// Skip without reporting
    Skip,
    /// Skip and report as ignored
    Prune,
    /// Register as a deferred feature subtree
    Feature(String),
}

/// Resource collector
#[derive(Debug, Clone, Default)]
pub struct Collector {
    context: ScanContext,
    rules: IgnoreRuleSet,
}

impl Collector {
    /// Create a collector with explicit label sets
    pub fn new(labels: BTreeMap<LabelClass, BTreeSet<String>>) -> Self {
        Self {
            context: ScanContext {
                labels,
                collect_ignores: false,
            },
            rules: IgnoreRuleSet::new(),
        }
    }

    /// Create a collector whose labels are derived from a target and toolchain
    pub fn for_target(target: &Target, toolchain_labels: &[&str]) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(LabelClass::Target, target.target_labels());
        labels.insert(
            LabelClass::Toolchain,
            toolchain_labels.iter().map(|l| (*l).to_string()).collect(),
        );
        labels.insert(LabelClass::Feature, target.features.iter().cloned().collect());
        labels.insert(
            LabelClass::Component,
            target.components.iter().cloned().collect(),
        );
        Self::new(labels)
    }

    /// Record pruned directories in the result
    #[must_use]
    pub fn collect_ignores(mut self, enabled: bool) -> Self {
        self.context.collect_ignores = enabled;
        self
    }

    /// Never descend into `path` (typically the build output directory)
    #[must_use]
    pub fn ignore_path(mut self, path: &Path) -> Self {
        if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
            let pattern = name.to_string_lossy();
            if let Err(e) = self.rules.add_pattern(parent, &pattern) {
                tracing::warn!("Cannot ignore {}: {e}", path.display());
            }
        }
        self
    }

    /// Scan every root into one registry
    pub fn scan(&self, roots: &[PathBuf]) -> Result<Resources, ScanError> {
        let mut resources = Resources::new(self.context.clone());
        for root in roots {
            let root = std::path::absolute(root).map_err(|e| ScanError::Io {
                path: root.clone(),
                error: e.to_string(),
            })?;
            tracing::debug!("Scanning {}", root.display());
            scan_into(&mut resources, &root, &root, self.rules.clone())?;
        }
        tracing::info!(
            "Found {} sources in {} directories",
            resources.sources().count(),
            resources.include_dirs().len()
        );
        Ok(resources)
    }
}

/// Classify a directory below the scan root
fn classify_dir(name: &str, context: &ScanContext) -> DirAction {
    if name.starts_with('.') || VCS_DIRS.contains(&name) {
        return DirAction::Skip;
    }
    match LabelClass::parse_dir_name(name) {
        Some((LabelClass::Feature, label)) => DirAction::Feature(label.to_string()),
        Some((class, label)) if !context.is_active(class, label) => DirAction::Prune,
        _ => DirAction::Descend,
    }
}

fn io_error(path: &Path, error: impl ToString) -> ScanError {
    ScanError::Io {
        path: path.to_path_buf(),
        error: error.to_string(),
    }
}

/// Walk `root` into `resources`, attributing files to `base`
pub(crate) fn scan_into(
    resources: &mut Resources,
    root: &Path,
    base: &Path,
    mut rules: IgnoreRuleSet,
) -> Result<(), ScanError> {
    let context = resources.context().clone();
    let mut walker = WalkDir::new(root).sort_by_file_name().into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            io_error(&path, e)
        })?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();

        if entry.file_type().is_dir() {
            if entry.depth() > 0 {
                if rules.is_ignored(path) {
                    tracing::debug!("Ignoring {} (ignore rule)", path.display());
                    resources.add_ignored_dir(path.to_path_buf());
                    walker.skip_current_dir();
                    continue;
                }
                match classify_dir(&name, &context) {
                    DirAction::Descend => {}
                    DirAction::Skip => {
                        walker.skip_current_dir();
                        continue;
                    }
                    DirAction::Prune => {
                        tracing::debug!("Ignoring {} (inactive label)", path.display());
                        resources.add_ignored_dir(path.to_path_buf());
                        walker.skip_current_dir();
                        continue;
                    }
                    DirAction::Feature(feature) => {
                        tracing::debug!("Deferring feature {feature} at {}", path.display());
                        resources.add_feature_dir(
                            &feature,
                            path.to_path_buf(),
                            base.to_path_buf(),
                            &rules,
                        );
                        walker.skip_current_dir();
                        continue;
                    }
                }
            }

            let manifest = path.join(defaults::IGNORE_FILE);
            if manifest.is_file() {
                let content = std::fs::read_to_string(&manifest).map_err(|e| io_error(&manifest, e))?;
                rules.add_manifest(path, &content, &manifest)?;
            }
            resources.add_include_dir(path.to_path_buf());
        } else {
            if name == defaults::IGNORE_FILE || rules.is_ignored(path) {
                continue;
            }
            resources.add_file(FileType::classify(path), FileRef::new(path, base));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with(class: LabelClass, labels: &[&str]) -> ScanContext {
        let mut map = BTreeMap::new();
        map.insert(class, labels.iter().map(|l| (*l).to_string()).collect());
        ScanContext {
            labels: map,
            collect_ignores: true,
        }
    }

    #[test]
    fn test_classify_hidden_and_vcs() {
        let ctx = ScanContext::default();
        assert_eq!(classify_dir(".git", &ctx), DirAction::Skip);
        assert_eq!(classify_dir(".cache", &ctx), DirAction::Skip);
        assert_eq!(classify_dir("CVS", &ctx), DirAction::Skip);
        assert_eq!(classify_dir("src", &ctx), DirAction::Descend);
    }

    #[test]
    fn test_classify_labels() {
        let ctx = context_with(LabelClass::Target, &["A"]);
        assert_eq!(classify_dir("TARGET_A", &ctx), DirAction::Descend);
        assert_eq!(classify_dir("TARGET_B", &ctx), DirAction::Prune);
        assert_eq!(classify_dir("TOOLCHAIN_GCC", &ctx), DirAction::Prune);
        assert_eq!(
            classify_dir("FEATURE_BLE", &ctx),
            DirAction::Feature("BLE".to_string())
        );
    }
}
