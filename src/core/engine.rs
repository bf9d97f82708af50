//! Incremental build engine
//!
//! Turns a [`Resources`] registry into objects, then into a linked program
//! or a static archive, recompiling only what changed. Staleness of an
//! object is decided from:
//!
//! - the source and the headers listed in its dependency file,
//! - the build-profile fingerprint of its language,
//! - the generated config header.
//!
//! A missing dependency file always recompiles. A changed config header
//! recompiles everything once.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::defaults;
use crate::core::config_header;
use crate::core::depfile;
use crate::core::options_file;
use crate::core::profile::{self, Fingerprint};
use crate::core::provider::{region_symbols, ConfigProvider};
use crate::core::resources::{FileRef, FileType, Resources};
use crate::core::scheduler::{CompileJob, JobResult, Scheduler};
use crate::core::staleness::StatCache;
use crate::core::symbols::{self, SymbolCache, SymbolInputs};
use crate::core::target::Target;
use crate::error::BuildError;
use crate::infra::filesystem;
use crate::infra::process;
use crate::infra::toolchain::{CompileInput, Language, LinkInput, ToolCommand, Toolchain};

/// Output format of the extracted binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryFormat {
    #[default]
    Bin,
    Hex,
}

impl BinaryFormat {
    pub fn extension(self) -> &'static str {
        match self {
            BinaryFormat::Bin => "bin",
            BinaryFormat::Hex => "hex",
        }
    }
}

/// What a build produced
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    /// Number of sources compiled in this invocation
    pub compiled: usize,
    /// Every object handed to the linker or archiver
    pub objects: Vec<PathBuf>,
    /// Linked executable or archive
    pub artifact: Option<PathBuf>,
    /// Whether the link or archive step ran
    pub relinked: bool,
    /// Extracted binary image
    pub binary: Option<PathBuf>,
    /// Linker map file
    pub map_file: Option<PathBuf>,
}

/// One entry of `compile_commands.json`
#[derive(Debug, Clone, Serialize)]
struct CompileCommand {
    directory: String,
    file: String,
    output: String,
    arguments: Vec<String>,
}

/// Incremental build engine for one target/toolchain permutation
pub struct Engine {
    target: Target,
    toolchain: Arc<dyn Toolchain>,
    build_dir: PathBuf,
    macros: Vec<String>,
    timestamp: u64,
    symbols: SymbolCache,
    stat_cache: StatCache,
    scheduler: Scheduler,
    build_all: bool,
    config_header: Option<PathBuf>,
    link_args: Vec<String>,
    compiled: usize,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("target", &self.target.name)
            .field("toolchain", &self.toolchain.name())
            .field("build_dir", &self.build_dir)
            .field("build_all", &self.build_all)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine writing into `build_dir`
    pub fn new(target: Target, toolchain: Arc<dyn Toolchain>, build_dir: impl Into<PathBuf>) -> Self {
        let scheduler = Scheduler::new(Arc::clone(&toolchain));
        Self {
            target,
            toolchain,
            build_dir: build_dir.into(),
            macros: Vec::new(),
            timestamp: symbols::now(),
            symbols: SymbolCache::new(),
            stat_cache: StatCache::new(),
            scheduler,
            build_all: false,
            config_header: None,
            link_args: Vec::new(),
            compiled: 0,
        }
    }

    /// Extra macros for every compile
    #[must_use]
    pub fn with_macros(mut self, macros: Vec<String>) -> Self {
        self.macros.extend(macros);
        self
    }

    /// Replace the job scheduler (worker count, timeout, cancellation)
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Rebuild every source regardless of timestamps
    #[must_use]
    pub fn with_build_all(mut self, build_all: bool) -> Self {
        self.build_all = build_all;
        self
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn toolchain(&self) -> &Arc<dyn Toolchain> {
        &self.toolchain
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Whether this invocation ignores timestamps
    pub fn build_all(&self) -> bool {
        self.build_all
    }

    /// Sources compiled by the last [`Engine::compile_sources`]
    pub fn compiled(&self) -> usize {
        self.compiled
    }

    fn symbol_inputs(&self) -> SymbolInputs<'_> {
        symbols::inputs(&self.target, self.toolchain.as_ref(), &self.macros, self.timestamp)
    }

    /// Preprocessor symbols for the assembler (`for_asm`) or the compilers
    pub fn get_symbols(&self, for_asm: bool) -> Vec<String> {
        self.symbols.get(&self.symbol_inputs(), for_asm).to_vec()
    }

    /// Take region symbols and config-header data from a provider
    ///
    /// Must be called before the first compile: symbol sets are frozen on
    /// first use.
    pub fn apply_config(&mut self, provider: &dyn ConfigProvider) -> Result<(), BuildError> {
        self.macros.extend(region_symbols(provider));
        filesystem::create_dir_all(&self.build_dir)?;
        let content = config_header::render(provider.config_data().as_ref());
        let update = config_header::update(&self.build_dir, &content)?;
        if update.rebuild_all {
            self.build_all = true;
        }
        self.config_header = update.path;
        Ok(())
    }

    /// Redirect linker references from `source` to `target`
    pub fn redirect_symbol(&mut self, source: &str, target: &str) -> Result<(), BuildError> {
        filesystem::create_dir_all(&self.build_dir)?;
        let args = self
            .toolchain
            .redirect_symbol(source, target, &self.build_dir)?;
        self.link_args.extend(args);
        Ok(())
    }

    /// Object path for a source, mirroring its location under the scan root
    ///
    /// With several scan roots the objects of each root are kept under a
    /// directory named after it.
    pub fn object_path(&self, source: &FileRef, multi_root: bool) -> PathBuf {
        let mut dir = self.build_dir.clone();
        if multi_root {
            if let Some(name) = source.base.file_name() {
                dir.push(name);
            }
        }
        dir.join(source.relative())
            .with_extension(self.toolchain.object_ext())
    }

    fn include_args(&self, resources: &Resources) -> Result<Vec<String>, BuildError> {
        let args = self.toolchain.include_args(resources.include_dirs());
        if self.toolchain.supports_response_files() && !args.is_empty() {
            let file = options_file::get_or_create(&self.build_dir, "includes", &args)?;
            Ok(self.toolchain.response_file_args(&file))
        } else {
            Ok(args)
        }
    }

    fn object_args(&self, objects: &[PathBuf]) -> Result<Vec<String>, BuildError> {
        let args: Vec<String> = objects.iter().map(|o| o.display().to_string()).collect();
        if self.toolchain.supports_response_files() && !args.is_empty() {
            let file = options_file::get_or_create(&self.build_dir, "link_files", &args)?;
            Ok(self.toolchain.object_list_args(&file))
        } else {
            Ok(args)
        }
    }

    /// Refresh the fingerprint of every compile language
    fn update_profiles(&self) -> Result<Vec<(Language, PathBuf)>, BuildError> {
        let flags = self.toolchain.flags();
        let cpu = self.toolchain.cpu_flags();
        let mut paths = Vec::new();
        for language in [Language::Asm, Language::C, Language::Cpp] {
            let mut all_flags = cpu.clone();
            all_flags.extend(flags.common.iter().cloned());
            all_flags.extend(flags.for_language(language).iter().cloned());
            let symbols = self.get_symbols(language == Language::Asm);
            let (path, _) = profile::update(&self.build_dir, language, &Fingerprint::new(&all_flags, &symbols))?;
            paths.push((language, path));
        }
        Ok(paths)
    }

    /// Whether `object` must be rebuilt from `source`
    fn needs_compile(&self, source: &Path, object: &Path, dep_file: Option<&Path>, extra: &[&Path]) -> bool {
        if self.build_all {
            return true;
        }
        let mut deps: Vec<PathBuf> = vec![source.to_path_buf()];
        deps.extend(extra.iter().map(|p| p.to_path_buf()));
        if let Some(dep_file) = dep_file {
            match depfile::read(dep_file) {
                Some(headers) => deps.extend(headers),
                None => {
                    tracing::debug!("{} has no dependency file", object.display());
                    return true;
                }
            }
        }
        self.stat_cache.need_update(object, &deps)
    }

    /// Compile every stale source and return all objects to link
    pub async fn compile_sources(&mut self, resources: &Resources) -> Result<Vec<PathBuf>, BuildError> {
        for dup in resources.duplicates() {
            tracing::warn!(
                "Sources share the name '{}': {}",
                dup.stem,
                dup.paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        filesystem::create_dir_all(&self.build_dir)?;
        let include_args = self.include_args(resources)?;
        let profiles = self.update_profiles()?;
        let asm_symbols = self.get_symbols(true);
        let symbols = self.get_symbols(false);

        let roots: BTreeSet<&Path> = resources.sources().map(|(_, s)| s.base.as_path()).collect();
        let multi_root = roots.len() > 1;

        let mut objects = Vec::new();
        let mut owners: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
        let mut jobs = Vec::new();
        let mut database = Vec::new();

        for (file_type, source) in resources.sources() {
            let language = match file_type {
                FileType::Asm => Language::Asm,
                FileType::C => Language::C,
                _ => Language::Cpp,
            };
            let object = self.object_path(source, multi_root);
            if let Some(first) = owners.insert(object.clone(), source.path.clone()) {
                return Err(BuildError::ObjectClash {
                    object,
                    first,
                    second: source.path.clone(),
                });
            }
            let dep_file = self.toolchain.dep_file(&object, language);
            let defines = if language == Language::Asm { &asm_symbols } else { &symbols };
            let input = CompileInput {
                source: &source.path,
                object: &object,
                dep_file: dep_file.as_deref(),
                defines,
                include_args: &include_args,
                config_header: self.config_header.as_deref(),
            };
            let commands: Vec<ToolCommand> = match language {
                Language::Asm => self.toolchain.assemble(&input),
                Language::C => self.toolchain.compile_c(&input),
                _ => self.toolchain.compile_cpp(&input),
            };

            if let Some(first) = commands.first() {
                database.push(CompileCommand {
                    directory: self.build_dir.display().to_string(),
                    file: source.path.display().to_string(),
                    output: object.display().to_string(),
                    arguments: first.clone(),
                });
            }

            let profile_path = profiles
                .iter()
                .find(|(l, _)| *l == language)
                .map(|(_, p)| p.as_path());
            let mut extra: Vec<&Path> = profile_path.into_iter().collect();
            if let Some(header) = &self.config_header {
                extra.push(header);
            }

            if self.needs_compile(&source.path, &object, dep_file.as_deref(), &extra) {
                if let Some(parent) = object.parent() {
                    filesystem::create_dir_all(parent)?;
                }
                jobs.push(CompileJob {
                    source: source.path.clone(),
                    object: object.clone(),
                    commands,
                    dep_file,
                });
            }
            objects.push(object);
        }

        self.write_compile_commands(&database)?;

        let total = objects.len();
        self.compiled = jobs.len();
        if jobs.is_empty() {
            tracing::info!("All {total} objects are up to date");
        } else {
            tracing::info!("Compiling {} of {total} sources", jobs.len());
        }
        let results: Vec<JobResult> = self.scheduler.run(jobs).await?;
        tracing::debug!("{} compile jobs finished", results.len());

        objects.extend(resources.files(FileType::Object).iter().map(|f| f.path.clone()));
        objects.sort();
        Ok(objects)
    }

    fn write_compile_commands(&self, entries: &[CompileCommand]) -> Result<(), BuildError> {
        let path = self.build_dir.join(defaults::COMPILE_COMMANDS_FILE);
        let json = serde_json::to_string_pretty(entries).map_err(|e| BuildError::Io {
            path: path.clone(),
            error: e.to_string(),
        })?;
        if filesystem::read_file(&path).ok().as_deref() != Some(json.as_str()) {
            filesystem::write_file(&path, &json)?;
        }
        Ok(())
    }

    /// Linker script matching the toolchain
    fn linker_script<'a>(&self, resources: &'a Resources) -> Result<&'a FileRef, BuildError> {
        let ext = self.toolchain.linker_script_ext();
        let matches = |f: &&FileRef| f.path.extension().is_some_and(|e| e == ext);
        resources
            .linker_script()
            .filter(matches)
            .or_else(|| resources.files(FileType::LinkerScript).iter().rev().find(matches))
            .ok_or_else(|| BuildError::MissingArtifact {
                item: format!("linker script (*.{ext}) for target {}", self.target.name),
            })
    }

    async fn run_step(&self, commands: &[ToolCommand]) -> Result<(), BuildError> {
        let out = process::run_all(commands, None).await?;
        if !out.success {
            return Err(BuildError::Tool {
                command: out.command.clone(),
                status: out.status(),
                output: out.output,
            });
        }
        for diag in self.toolchain.parse_diagnostics(&out.output) {
            tracing::warn!("{}", diag.message);
        }
        Ok(())
    }

    /// Link objects into `<name>.elf`
    ///
    /// Returns the executable, its map file and whether the link ran.
    pub async fn link_program(
        &mut self,
        resources: &Resources,
        objects: &[PathBuf],
        name: &str,
    ) -> Result<(PathBuf, PathBuf, bool), BuildError> {
        let script = self.linker_script(resources)?.path.clone();
        let elf = self.build_dir.join(format!("{name}.elf"));
        let map = self.build_dir.join(format!("{name}.map"));
        let libraries: Vec<PathBuf> = resources
            .files(FileType::Archive)
            .iter()
            .map(|f| f.path.clone())
            .collect();

        let flags = self.toolchain.flags();
        let mut ld_flags = self.toolchain.cpu_flags();
        ld_flags.extend(flags.ld.iter().cloned());
        ld_flags.extend(self.link_args.iter().cloned());
        let (profile_path, _) = profile::update(
            &self.build_dir,
            Language::Link,
            &Fingerprint::new(&ld_flags, &region_macros(&self.macros)),
        )?;

        let mut deps: Vec<PathBuf> = objects.to_vec();
        deps.extend(libraries.iter().cloned());
        deps.push(script.clone());
        deps.push(profile_path);

        let need = self.compiled > 0 || self.build_all || self.stat_cache.need_update(&elf, &deps);
        if !need {
            tracing::info!("{} is up to date", elf.display());
            return Ok((elf, map, false));
        }

        tracing::info!("Link: {}", elf.display());
        let object_args = self.object_args(objects)?;
        let input = LinkInput {
            output: &elf,
            object_args: &object_args,
            libraries: &libraries,
            linker_script: &script,
            map_file: &map,
            extra_args: &self.link_args,
        };
        let commands = self.toolchain.link(&input);
        self.run_step(&commands).await?;
        Ok((elf, map, true))
    }

    /// Archive objects into `lib<name>.<ext>`
    pub async fn archive(&mut self, objects: &[PathBuf], name: &str) -> Result<(PathBuf, bool), BuildError> {
        let output = self
            .build_dir
            .join(format!("lib{name}.{}", self.toolchain.archive_ext()));
        let need = self.compiled > 0 || self.build_all || self.stat_cache.need_update(&output, objects);
        if !need {
            tracing::info!("{} is up to date", output.display());
            return Ok((output, false));
        }

        tracing::info!("Archive: {}", output.display());
        // Archivers append; start from scratch so removed objects disappear
        filesystem::remove_file(&output)?;
        let object_args = self.object_args(objects)?;
        let commands = self.toolchain.archive(&object_args, &output);
        self.run_step(&commands).await?;
        Ok((output, true))
    }

    /// Extract a raw binary or Intel HEX image next to `elf`
    pub async fn binary(&self, elf: &Path, format: BinaryFormat) -> Result<PathBuf, BuildError> {
        let output = elf.with_extension(format.extension());
        let command = self.toolchain.binary(elf, &output);
        self.run_step(&[command]).await?;
        Ok(output)
    }

    /// Compile, then link or archive
    pub async fn build(
        &mut self,
        resources: &Resources,
        name: &str,
        library: bool,
        format: BinaryFormat,
    ) -> Result<BuildOutcome, BuildError> {
        let objects = self.compile_sources(resources).await?;
        let mut outcome = BuildOutcome {
            compiled: self.compiled,
            ..BuildOutcome::default()
        };

        if library {
            let (archive, relinked) = self.archive(&objects, name).await?;
            outcome.artifact = Some(archive);
            outcome.relinked = relinked;
        } else {
            let (elf, map, relinked) = self.link_program(resources, &objects, name).await?;
            let binary = elf.with_extension(format.extension());
            outcome.binary = if relinked || !binary.exists() {
                Some(self.binary(&elf, format).await?)
            } else {
                Some(binary)
            };
            outcome.artifact = Some(elf);
            outcome.map_file = Some(map);
            outcome.relinked = relinked;
        }
        outcome.objects = objects;
        Ok(outcome)
    }
}

/// Region symbols among the engine macros, which affect the link
fn region_macros(macros: &[String]) -> Vec<String> {
    macros
        .iter()
        .filter(|m| m.starts_with("FIRMFORGE_") && (m.contains("_START=") || m.contains("_SIZE=")))
        .cloned()
        .collect()
}
