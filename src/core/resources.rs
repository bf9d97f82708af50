//! Categorized file registry
//!
//! [`Resources`] holds every file found by the collector, classified into
//! exactly one [`FileType`], together with include paths, ignored
//! directories, the active label sets and the lazily scanned feature subtrees.

use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::ignore::IgnoreRuleSet;
use crate::core::target::LabelClass;
use crate::error::ScanError;

/// File categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Asm,
    C,
    Cpp,
    Header,
    Object,
    Archive,
    LinkerScript,
    Hex,
    Bin,
    Json,
    RepoMeta,
    Other,
}

impl FileType {
    /// Classify a file by exact name or extension
    ///
    /// Total: every path maps to exactly one category, `Other` when nothing matches.
    pub fn classify(path: &Path) -> FileType {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        if name == ".gitmodules" {
            return FileType::RepoMeta;
        }

        let Some(ext) = path.extension().map(|e| e.to_string_lossy()) else {
            return FileType::Other;
        };
        // `.S` (preprocessed assembly) is case-sensitive, everything else is not
        if ext == "S" {
            return FileType::Asm;
        }
        match ext.to_ascii_lowercase().as_str() {
            "s" | "asm" => FileType::Asm,
            "c" => FileType::C,
            "cpp" | "cc" | "cxx" | "c++" => FileType::Cpp,
            "h" | "hpp" | "hh" | "hxx" | "inc" | "tpp" => FileType::Header,
            "o" | "obj" => FileType::Object,
            "a" | "ar" => FileType::Archive,
            "ld" | "sct" | "icf" => FileType::LinkerScript,
            "hex" => FileType::Hex,
            "bin" => FileType::Bin,
            "json" => FileType::Json,
            "lib" => FileType::RepoMeta,
            _ => FileType::Other,
        }
    }

    /// Whether files of this type are compiled into objects
    pub fn is_source(self) -> bool {
        matches!(self, FileType::Asm | FileType::C | FileType::Cpp)
    }
}

/// A classified file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FileRef {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Scan root the file was found under
    pub base: PathBuf,
}

impl FileRef {
    /// Create a file reference
    pub fn new(path: impl Into<PathBuf>, base: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            base: base.into(),
        }
    }

    /// Path relative to the scan root (the full path when outside it)
    pub fn relative(&self) -> &Path {
        self.path.strip_prefix(&self.base).unwrap_or(&self.path)
    }

    /// Rewrite the path onto a different base
    pub fn rebased(&self, new_base: &Path) -> PathBuf {
        new_base.join(self.relative())
    }

    /// File stem, used for object names and duplicate detection
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Sources that would produce clashing object names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Duplicate {
    /// Shared file stem
    pub stem: String,
    /// All sources with that stem
    pub paths: Vec<PathBuf>,
}

/// Scan parameters carried into deferred feature scans
#[derive(Debug, Clone, Default)]
pub struct ScanContext {
    /// Active labels per class
    pub labels: BTreeMap<LabelClass, BTreeSet<String>>,
    /// Whether ignored directories are recorded
    pub collect_ignores: bool,
}

impl ScanContext {
    /// Whether `label` is active within `class`
    pub fn is_active(&self, class: LabelClass, label: &str) -> bool {
        self.labels
            .get(&class)
            .is_some_and(|labels| labels.contains(label))
    }
}

/// A feature subtree scanned on first lookup
#[derive(Debug)]
pub struct LazyFeature {
    /// Feature directories found so far, with the root they belong to
    dirs: Vec<(PathBuf, PathBuf)>,
    /// Ignore rules in force where the directories were found
    rules: IgnoreRuleSet,
    /// Labels and reporting options of the parent scan
    context: ScanContext,
    /// Memoized scan result
    cell: OnceCell<Resources>,
}

impl LazyFeature {
    pub(crate) fn new(context: ScanContext, rules: IgnoreRuleSet) -> Self {
        Self {
            dirs: Vec::new(),
            rules,
            context,
            cell: OnceCell::new(),
        }
    }

    pub(crate) fn add_dir(&mut self, dir: PathBuf, base: PathBuf, rules: &IgnoreRuleSet) {
        self.rules.extend(rules);
        self.dirs.push((dir, base));
    }

    /// Directories registered under this feature
    pub fn dirs(&self) -> impl Iterator<Item = &Path> {
        self.dirs.iter().map(|(dir, _)| dir.as_path())
    }

    /// Whether the subtree has already been scanned
    pub fn is_scanned(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Scan the subtree on first call; later calls return the memoized result
    pub fn get(&self) -> Result<&Resources, ScanError> {
        if let Some(resources) = self.cell.get() {
            return Ok(resources);
        }
        let mut resources = Resources::new(self.context.clone());
        for (dir, base) in &self.dirs {
            tracing::debug!("Scanning feature directory {}", dir.display());
            crate::core::scanner::scan_into(&mut resources, dir, base, self.rules.clone())?;
        }
        Ok(self.cell.get_or_init(|| resources))
    }
}

/// Categorized file registry
#[derive(Debug, Default)]
pub struct Resources {
    files: BTreeMap<FileType, Vec<FileRef>>,
    include_dirs: Vec<PathBuf>,
    ignored_dirs: Vec<PathBuf>,
    linker_script: Option<FileRef>,
    features: BTreeMap<String, LazyFeature>,
    context: ScanContext,
}

impl Resources {
    /// Create an empty registry for the given scan context
    pub fn new(context: ScanContext) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }

    /// Register a classified file
    pub fn add_file(&mut self, file_type: FileType, file: FileRef) {
        if file_type == FileType::LinkerScript {
            if let Some(previous) = &self.linker_script {
                tracing::debug!("Linker script {} replaces {}", file, previous);
            }
            self.linker_script = Some(file.clone());
        }
        self.files.entry(file_type).or_default().push(file);
    }

    /// Register an include directory (deduplicated, visit order preserved)
    pub fn add_include_dir(&mut self, dir: PathBuf) {
        if !self.include_dirs.contains(&dir) {
            self.include_dirs.push(dir);
        }
    }

    /// Record a pruned directory
    pub fn add_ignored_dir(&mut self, dir: PathBuf) {
        if self.context.collect_ignores {
            self.ignored_dirs.push(dir);
        }
    }

    /// Register a feature directory for deferred scanning
    pub(crate) fn add_feature_dir(
        &mut self,
        name: &str,
        dir: PathBuf,
        base: PathBuf,
        rules: &IgnoreRuleSet,
    ) {
        let context = self.context.clone();
        self.features
            .entry(name.to_string())
            .or_insert_with(|| LazyFeature::new(context, IgnoreRuleSet::default()))
            .add_dir(dir, base, rules);
    }

    /// Files of one category
    pub fn files(&self, file_type: FileType) -> &[FileRef] {
        self.files.get(&file_type).map_or(&[], Vec::as_slice)
    }

    /// All compilable sources (assembly, C, C++)
    pub fn sources(&self) -> impl Iterator<Item = (FileType, &FileRef)> {
        self.files
            .iter()
            .filter(|(file_type, _)| file_type.is_source())
            .flat_map(|(file_type, files)| files.iter().map(move |f| (*file_type, f)))
    }

    /// Include directories in visit order
    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    /// Directories pruned during the scan (only when reporting is enabled)
    pub fn ignored_dirs(&self) -> &[PathBuf] {
        &self.ignored_dirs
    }

    /// The effective linker script: the last one registered wins
    pub fn linker_script(&self) -> Option<&FileRef> {
        self.linker_script.as_ref()
    }

    /// Active labels of one class
    pub fn labels(&self, class: LabelClass) -> impl Iterator<Item = &str> {
        self.context
            .labels
            .get(&class)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Scan context this registry was built with
    pub fn context(&self) -> &ScanContext {
        &self.context
    }

    /// Names of all feature subtrees found
    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    /// Deferred feature entry, without triggering a scan
    pub fn lazy_feature(&self, name: &str) -> Option<&LazyFeature> {
        self.features.get(name)
    }

    /// Resources of one feature, scanned on first lookup
    pub fn feature(&self, name: &str) -> Result<Option<&Resources>, ScanError> {
        self.features.get(name).map(LazyFeature::get).transpose()
    }

    /// Flatten this registry with every active feature, recursively
    pub fn resolve_features(&self, active: &[String]) -> Result<Resources, ScanError> {
        let mut merged = Resources::new(self.context.clone());
        merged.merge(self);
        let mut pending: Vec<&Resources> = vec![self];
        while let Some(resources) = pending.pop() {
            for name in active {
                if let Some(feature) = resources.feature(name)? {
                    tracing::debug!("Enabling feature {name}");
                    merged.merge(feature);
                    pending.push(feature);
                }
            }
        }
        Ok(merged)
    }

    /// Append the files, include dirs and ignored dirs of `other`
    ///
    /// Feature subtrees of `other` are not copied; use [`Resources::resolve_features`].
    pub fn merge(&mut self, other: &Resources) {
        for (file_type, files) in &other.files {
            for file in files {
                self.add_file(*file_type, file.clone());
            }
        }
        for dir in &other.include_dirs {
            self.add_include_dir(dir.clone());
        }
        self.ignored_dirs.extend(other.ignored_dirs.iter().cloned());
    }

    /// Sources sharing a file stem, which would collide in flat object/archive names
    pub fn duplicates(&self) -> Vec<Duplicate> {
        let mut by_stem: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for (_, file) in self.sources() {
            by_stem.entry(file.stem()).or_default().push(file.path.clone());
        }
        by_stem
            .into_iter()
            .filter(|(_, paths)| paths.len() > 1)
            .map(|(stem, mut paths)| {
                paths.sort();
                Duplicate { stem, paths }
            })
            .collect()
    }

    /// Number of files per category
    pub fn summary(&self) -> BTreeMap<FileType, usize> {
        self.files.iter().map(|(t, f)| (*t, f.len())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_extension() {
        assert_eq!(FileType::classify(Path::new("a/startup.S")), FileType::Asm);
        assert_eq!(FileType::classify(Path::new("a/startup.s")), FileType::Asm);
        assert_eq!(FileType::classify(Path::new("main.c")), FileType::C);
        assert_eq!(FileType::classify(Path::new("main.cpp")), FileType::Cpp);
        assert_eq!(FileType::classify(Path::new("main.cc")), FileType::Cpp);
        assert_eq!(FileType::classify(Path::new("gpio.h")), FileType::Header);
        assert_eq!(FileType::classify(Path::new("libc.a")), FileType::Archive);
        assert_eq!(FileType::classify(Path::new("K64F.ld")), FileType::LinkerScript);
        assert_eq!(FileType::classify(Path::new("K64F.sct")), FileType::LinkerScript);
        assert_eq!(FileType::classify(Path::new("boot.hex")), FileType::Hex);
        assert_eq!(FileType::classify(Path::new("boot.bin")), FileType::Bin);
        assert_eq!(FileType::classify(Path::new("mbed_lib.json")), FileType::Json);
        assert_eq!(FileType::classify(Path::new("rtos.lib")), FileType::RepoMeta);
        assert_eq!(FileType::classify(Path::new(".gitmodules")), FileType::RepoMeta);
        assert_eq!(FileType::classify(Path::new("README")), FileType::Other);
        assert_eq!(FileType::classify(Path::new("notes.txt")), FileType::Other);
    }

    #[test]
    fn test_second_linker_script_replaces_first() {
        let mut resources = Resources::default();
        resources.add_file(FileType::LinkerScript, FileRef::new("/p/a.ld", "/p"));
        resources.add_file(FileType::LinkerScript, FileRef::new("/p/b.ld", "/p"));
        assert_eq!(
            resources.linker_script().unwrap().path,
            PathBuf::from("/p/b.ld")
        );
    }

    #[test]
    fn test_duplicates_single_pair() {
        let mut resources = Resources::default();
        resources.add_file(FileType::C, FileRef::new("/p/a/foo.c", "/p"));
        resources.add_file(FileType::C, FileRef::new("/p/b/foo.c", "/p"));
        resources.add_file(FileType::C, FileRef::new("/p/b/bar.c", "/p"));

        let duplicates = resources.duplicates();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].stem, "foo");
        assert_eq!(duplicates[0].paths.len(), 2);
    }

    #[test]
    fn test_unique_stems_no_duplicates() {
        let mut resources = Resources::default();
        resources.add_file(FileType::C, FileRef::new("/p/a/foo.c", "/p"));
        resources.add_file(FileType::Cpp, FileRef::new("/p/b/bar.cpp", "/p"));
        assert!(resources.duplicates().is_empty());
    }

    #[test]
    fn test_file_ref_relative_and_rebase() {
        let file = FileRef::new("/proj/src/main.c", "/proj");
        assert_eq!(file.relative(), Path::new("src/main.c"));
        assert_eq!(
            file.rebased(Path::new("/build")),
            PathBuf::from("/build/src/main.c")
        );
        assert_eq!(file.stem(), "main");
    }

    #[test]
    fn test_include_dirs_deduplicated() {
        let mut resources = Resources::default();
        resources.add_include_dir(PathBuf::from("/p"));
        resources.add_include_dir(PathBuf::from("/p/inc"));
        resources.add_include_dir(PathBuf::from("/p"));
        assert_eq!(resources.include_dirs().len(), 2);
    }
}
