//! Compile job scheduling
//!
//! Small rebuilds run sequentially. Once there are more than
//! `workers * POOL_THRESHOLD_FACTOR` jobs they go to a pool of `workers`
//! tasks bounded by a semaphore. In both modes the controller waits on job
//! completion, the cancellation token and the wall-clock deadline together:
//!
//! - cancellation aborts outstanding jobs and returns immediately,
//! - the deadline aborts outstanding jobs and reports a timeout,
//! - the first failing job aborts the rest and its error is returned.
//!
//! Aborted jobs drop their child process, which kills it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::defaults;
use crate::error::BuildError;
use crate::infra::process;
use crate::infra::toolchain::{Diagnostic, Severity, ToolCommand, Toolchain};

/// One stale source to compile
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub source: PathBuf,
    pub object: PathBuf,
    /// Commands run in order; the first failure ends the job
    pub commands: Vec<ToolCommand>,
    /// Dependency file the compiler writes, read on the next run
    pub dep_file: Option<PathBuf>,
}

/// Result of a successful job
#[derive(Debug, Clone)]
pub struct JobResult {
    pub source: PathBuf,
    pub object: PathBuf,
    /// Combined tool output
    pub output: String,
    /// Warnings and notes parsed from the output
    pub diagnostics: Vec<Diagnostic>,
}

/// Called once per finished job
pub type ProgressFn = Arc<dyn Fn(&JobResult) + Send + Sync>;

/// Job scheduler for one build
#[derive(Clone)]
pub struct Scheduler {
    toolchain: Arc<dyn Toolchain>,
    workers: usize,
    timeout: Duration,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("toolchain", &self.toolchain.name())
            .field("workers", &self.workers)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Scheduler with one worker per CPU
    pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            toolchain,
            workers: num_cpus::get(),
            timeout: Duration::from_secs(defaults::DEFAULT_BUILD_TIMEOUT_SECS),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Set the worker count (at least one)
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the wall-clock bound for draining all jobs
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use an externally owned cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Report each finished job
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Token that cancels this scheduler's jobs
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Whether `count` jobs go to the pool
    pub fn uses_pool(&self, count: usize) -> bool {
        count > self.workers * defaults::POOL_THRESHOLD_FACTOR
    }

    /// Run every job; results are in completion order
    pub async fn run(&self, jobs: Vec<CompileJob>) -> Result<Vec<JobResult>, BuildError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let deadline = Instant::now() + self.timeout;
        if self.uses_pool(jobs.len()) {
            tracing::debug!("Compiling {} sources on {} workers", jobs.len(), self.workers);
            self.run_pooled(jobs, deadline).await
        } else {
            tracing::debug!("Compiling {} sources sequentially", jobs.len());
            self.run_sequential(jobs, deadline).await
        }
    }

    async fn run_sequential(
        &self,
        jobs: Vec<CompileJob>,
        deadline: Instant,
    ) -> Result<Vec<JobResult>, BuildError> {
        let total = jobs.len();
        let mut results = Vec::with_capacity(total);
        for job in jobs {
            let toolchain = Arc::clone(&self.toolchain);
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(BuildError::Cancelled),
                () = tokio::time::sleep_until(deadline) => {
                    return Err(BuildError::Timeout {
                        seconds: self.timeout.as_secs(),
                        pending: total - results.len(),
                    });
                }
                result = execute(job, toolchain) => {
                    let result = result?;
                    self.report(&result);
                    results.push(result);
                }
            }
        }
        Ok(results)
    }

    async fn run_pooled(
        &self,
        jobs: Vec<CompileJob>,
        deadline: Instant,
    ) -> Result<Vec<JobResult>, BuildError> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();
        let total = jobs.len();
        for job in jobs {
            let sem = Arc::clone(&semaphore);
            let toolchain = Arc::clone(&self.toolchain);
            set.spawn(async move {
                let _permit = sem.acquire_owned().await.map_err(|_| BuildError::Cancelled)?;
                execute(job, toolchain).await
            });
        }

        let mut results = Vec::with_capacity(total);
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::warn!("Build cancelled with {} job(s) outstanding", set.len());
                    set.abort_all();
                    semaphore.close();
                    return Err(BuildError::Cancelled);
                }
                () = tokio::time::sleep_until(deadline) => {
                    let pending = set.len();
                    set.abort_all();
                    semaphore.close();
                    return Err(BuildError::Timeout {
                        seconds: self.timeout.as_secs(),
                        pending,
                    });
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(result))) => {
                        self.report(&result);
                        results.push(result);
                    }
                    Some(Ok(Err(e))) => {
                        set.abort_all();
                        semaphore.close();
                        return Err(e);
                    }
                    Some(Err(join_error)) => {
                        set.abort_all();
                        semaphore.close();
                        return Err(BuildError::Tool {
                            command: "compile worker".to_string(),
                            status: "panicked".to_string(),
                            output: join_error.to_string(),
                        });
                    }
                },
            }
        }
        Ok(results)
    }

    fn report(&self, result: &JobResult) {
        for diag in &result.diagnostics {
            let file = diag
                .file
                .as_ref()
                .map_or_else(|| result.source.display().to_string(), |f| f.display().to_string());
            match diag.severity {
                Severity::Warning | Severity::Error => tracing::warn!(
                    file = %file,
                    line = diag.line.unwrap_or(0),
                    "{}",
                    diag.message
                ),
                Severity::Note => tracing::debug!(file = %file, "{}", diag.message),
            }
        }
        if let Some(progress) = &self.progress {
            progress(result);
        }
    }
}

/// Run one job's commands and classify a failure
async fn execute(job: CompileJob, toolchain: Arc<dyn Toolchain>) -> Result<JobResult, BuildError> {
    tracing::info!("Compile: {}", job.source.display());
    let out = process::run_all(&job.commands, None).await?;
    if !out.success {
        if toolchain.is_not_supported(&out.output) {
            return Err(BuildError::NotSupported {
                source_file: job.source,
                output: out.output,
            });
        }
        return Err(BuildError::Tool {
            command: out.command.clone(),
            status: out.status(),
            output: out.output,
        });
    }
    let diagnostics = toolchain.parse_diagnostics(&out.output);
    Ok(JobResult {
        source: job.source,
        object: job.object,
        output: out.output,
        diagnostics,
    })
}
