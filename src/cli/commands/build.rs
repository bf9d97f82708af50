//! Build command implementation
//!
//! Implements `firmforge build`: scan, compile, link, then assemble the
//! firmware image, once per requested toolchain. Permutations that fail
//! with a configuration or not-supported error are skipped; any other
//! failure stops the command.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::cli::output::{self, status};
use crate::core::engine::{BuildOutcome, Engine};
use crate::core::image::{self, signing};
use crate::core::manifest::Manifest;
use crate::core::memap::{GnuMapReporter, MapReport, MemoryMapReporter};
use crate::core::provider::ConfigProvider;
use crate::core::scanner::Collector;
use crate::core::scheduler::{JobResult, ProgressFn, Scheduler};
use crate::error::BuildError;
use crate::infra::toolchain::{self, Profile};

/// Build options
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Toolchains to build with (the manifest's when empty)
    pub toolchains: Vec<String>,
    /// Number of parallel jobs
    pub jobs: Option<usize>,
    /// Profile override
    pub profile: Option<Profile>,
    /// Ignore timestamps
    pub clean: bool,
    /// Hide progress and summaries
    pub quiet: bool,
}

/// Execute the build command
pub async fn execute(project_dir: &Path, options: BuildOptions) -> Result<()> {
    let manifest = super::load_manifest(project_dir)?;
    let toolchains = if options.toolchains.is_empty() {
        vec![manifest.toolchain.name.clone()]
    } else {
        options.toolchains.clone()
    };

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let token = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling build");
                token.cancel();
            }
        }
    });

    tracing::info!("Building project: {}", manifest.project.name);
    let mut skipped = Vec::new();
    let mut result = Ok(());
    for name in &toolchains {
        match build_permutation(project_dir, &manifest, name, &options, cancel.clone()).await {
            Ok(()) => {}
            Err(e) if is_skippable(&e) => {
                if !options.quiet {
                    println!("{} Skipping {name}: {e:#}", status::WARNING);
                }
                skipped.push(name.clone());
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    watcher.abort();
    result?;

    if skipped.len() == toolchains.len() {
        anyhow::bail!("No toolchain permutation could be built");
    }
    Ok(())
}

/// Whether a permutation failure may be skipped
fn is_skippable(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<BuildError>()
        .is_some_and(BuildError::is_skippable)
}

/// Build the project with one toolchain
async fn build_permutation(
    project_dir: &Path,
    manifest: &Manifest,
    name: &str,
    options: &BuildOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let mut config = manifest.toolchain_config();
    if let Some(profile) = options.profile {
        config.profile = profile;
    }
    let toolchain = toolchain::from_name(name, &config)?;
    let build_dir = manifest.build_dir(project_dir, toolchain.name());
    let target = manifest.to_target();

    let resources = Collector::for_target(&target, toolchain.labels())
        .ignore_path(&project_dir.join(&manifest.build.output_dir))
        .scan(&manifest.roots(project_dir))
        .with_context(|| format!("Failed to scan sources for {name}"))?
        .resolve_features(&target.features)?;

    let bar = output::create_build_bar(resources.sources().count() as u64, options.quiet);
    bar.set_message(toolchain.name());
    let progress: ProgressFn = {
        let bar = bar.clone();
        Arc::new(move |result: &JobResult| {
            bar.inc(1);
            if let Some(file) = result.source.file_name() {
                bar.set_message(file.to_string_lossy().into_owned());
            }
        })
    };

    let mut scheduler = Scheduler::new(Arc::clone(&toolchain))
        .with_timeout(Duration::from_secs(manifest.build.timeout))
        .with_cancellation(cancel)
        .with_progress(progress);
    if let Some(jobs) = options.jobs.or(manifest.build.jobs) {
        scheduler = scheduler.with_workers(jobs);
    }

    let mut engine = Engine::new(target, Arc::clone(&toolchain), &build_dir)
        .with_macros(manifest.build.macros.clone())
        .with_scheduler(scheduler)
        .with_build_all(options.clean);
    engine.apply_config(manifest)?;

    let outcome = engine
        .build(
            &resources,
            &manifest.project.name,
            manifest.build.library,
            manifest.image.format,
        )
        .await;
    bar.finish_and_clear();
    let outcome = outcome?;

    report_memory(&outcome, toolchain.name(), options.quiet);
    let image = assemble_image(project_dir, manifest, &outcome, &build_dir).await?;

    if !options.quiet {
        println!(
            "{} Built {} with {} ({} compiled, {} objects)",
            status::SUCCESS,
            manifest.project.name,
            toolchain.name(),
            outcome.compiled,
            outcome.objects.len()
        );
        if let Some(artifact) = &outcome.artifact {
            println!("  Artifact: {}", artifact.display());
        }
        if let Some(image) = image {
            println!("  Image: {}", image.display());
        }
    }
    Ok(())
}

fn report_memory(outcome: &BuildOutcome, toolchain: &str, quiet: bool) {
    let Some(map_file) = &outcome.map_file else {
        return;
    };
    match GnuMapReporter.report(map_file, toolchain) {
        Ok(MapReport::Indexed(usage)) if !quiet => {
            println!(
                "{} Memory: ROM {} / RAM {}",
                status::INFO,
                output::format_size(usage.rom()),
                output::format_size(usage.ram())
            );
        }
        Ok(MapReport::Unsupported { toolchain }) => {
            tracing::debug!("No memory report for {toolchain} map files");
        }
        Ok(MapReport::Indexed(_)) => {}
        Err(e) => tracing::warn!("Cannot read map file: {e}"),
    }
}

/// Merge regions and sign; returns the final image path
async fn assemble_image(
    project_dir: &Path,
    manifest: &Manifest,
    outcome: &BuildOutcome,
    build_dir: &Path,
) -> Result<Option<std::path::PathBuf>> {
    let Some(binary) = outcome.binary.as_deref() else {
        return Ok(None);
    };
    let final_image = if manifest.has_regions() {
        let assembled = image::assemble(
            &manifest.regions(),
            Some(binary),
            build_dir,
            &manifest.project.name,
            &manifest.image,
        )
        .map_err(BuildError::from)?;
        assembled.merged
    } else {
        binary.to_path_buf()
    };

    if let Some(signing) = &manifest.image.signing {
        let plan = signing::resolve(signing, project_dir).map_err(BuildError::from)?;
        plan.sign(&final_image).await?;
    }
    Ok(Some(final_image))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_and_not_supported_are_skippable() {
        let err = anyhow::Error::new(BuildError::Config {
            message: "no such toolchain".to_string(),
        });
        assert!(is_skippable(&err));

        let err = anyhow::Error::new(BuildError::NotSupported {
            source_file: "main.c".into(),
            output: String::new(),
        })
        .context("while building");
        assert!(is_skippable(&err));

        let err = anyhow::Error::new(BuildError::Cancelled);
        assert!(!is_skippable(&err));
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = execute(temp.path(), BuildOptions::default()).await.unwrap_err();
        assert!(err.to_string().contains("firmforge.toml"));
    }
}
