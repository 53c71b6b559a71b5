use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use sous_chef::Chef;
use sous_traits::BuildContext;
use sous_types::{Package, Source};

use crate::environment::Environment;
use crate::error::ExecutorError;
use crate::locks::Locks;
use crate::operation::{ExecutionOutcome, Operation};
use crate::output::{OutputError, OutputSink};
use crate::provenance::write_direct_url;

/// The installer exit code reserved for a user interrupt.
const USER_INTERRUPT: i32 = -2;

/// The number of operations allowed in flight at once, absent an explicit limit.
const DEFAULT_CONCURRENCY: usize = 8;

/// Applies a resolved batch of operations to a target environment.
///
/// Operations run concurrently up to the configured limit, with operations naming the
/// same distribution serialized against each other. Failures are contained: a failing
/// operation is reported and counted, and never aborts its siblings.
pub struct Executor<T: BuildContext + Send + Sync> {
    environment: Arc<dyn Environment>,
    chef: Arc<Chef<T>>,
    output: Arc<OutputHandle>,
    locks: Arc<Locks>,
    semaphore: Arc<Semaphore>,
    verbose: bool,
}

impl<T: BuildContext + Send + Sync + 'static> Executor<T> {
    /// Initialize a new executor over the given environment and artifact source.
    pub fn new(
        environment: Arc<dyn Environment>,
        chef: Chef<T>,
        sink: impl OutputSink + 'static,
    ) -> Self {
        Self {
            environment,
            chef: Arc::new(chef),
            output: Arc::new(OutputHandle {
                sink: Box::new(sink),
                guard: Mutex::new(()),
            }),
            locks: Arc::new(Locks::default()),
            semaphore: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            verbose: false,
        }
    }

    /// Report skip reasons and the skipped count in the batch summary.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Cap the number of operations in flight at once.
    #[must_use]
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(limit));
        self
    }

    /// Execute the batch and return the number of failed or cancelled operations.
    ///
    /// An empty batch produces no output at all. Otherwise the summary is written first,
    /// then operations are scheduled; output from concurrent operations interleaves by
    /// whole lines (whole blocks, for failure reports).
    pub async fn execute(&self, operations: Vec<Operation>) -> usize {
        if operations.is_empty() {
            return 0;
        }
        if let Err(err) = self.write_summary(&operations) {
            debug!("Failed to write the batch summary: {err}");
            return operations.len();
        }

        let mut tasks = JoinSet::new();
        for operation in operations {
            let worker = Worker {
                environment: self.environment.clone(),
                chef: self.chef.clone(),
                output: self.output.clone(),
                locks: self.locks.clone(),
                semaphore: self.semaphore.clone(),
                verbose: self.verbose,
            };
            tasks.spawn(async move { worker.run(operation).await });
        }

        let mut failures = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(outcome) if outcome.is_failure() => failures += 1,
                Ok(_) => {}
                Err(err) => {
                    debug!("An operation task did not complete: {err}");
                    failures += 1;
                }
            }
        }
        failures
    }

    fn write_summary(&self, operations: &[Operation]) -> Result<(), OutputError> {
        let mut installs = 0;
        let mut updates = 0;
        let mut removals = 0;
        let mut skipped = 0;
        for operation in operations {
            if operation.skip_reason().is_some() {
                skipped += 1;
                continue;
            }
            match operation {
                Operation::Install { .. } => installs += 1,
                Operation::Update { .. } => updates += 1,
                Operation::Uninstall { .. } => removals += 1,
            }
        }

        let mut summary = format!(
            "Package operations: {installs} install{}, {updates} update{}, {removals} removal{}",
            pluralize(installs),
            pluralize(updates),
            pluralize(removals),
        );
        if skipped > 0 && self.verbose {
            summary.push_str(&format!(", {skipped} skipped"));
        }

        self.output.write_block(&[String::new(), summary, String::new()])
    }
}

/// Serializes writes so that multi-line failure reports come out contiguous.
struct OutputHandle {
    sink: Box<dyn OutputSink>,
    guard: Mutex<()>,
}

impl OutputHandle {
    fn write_line(&self, line: &str) -> Result<(), OutputError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.sink.write_line(line)
    }

    fn write_block(&self, lines: &[String]) -> Result<(), OutputError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        for line in lines {
            self.sink.write_line(line)?;
        }
        Ok(())
    }
}

/// The per-operation execution state handed to a spawned task.
struct Worker<T: BuildContext + Send + Sync> {
    environment: Arc<dyn Environment>,
    chef: Arc<Chef<T>>,
    output: Arc<OutputHandle>,
    locks: Arc<Locks>,
    semaphore: Arc<Semaphore>,
    verbose: bool,
}

impl<T: BuildContext + Send + Sync> Worker<T> {
    async fn run(self, operation: Operation) -> ExecutionOutcome {
        let message = operation_message(&operation);

        if let Some(reason) = operation.skip_reason() {
            if self.verbose {
                let line = format!("  • {message}: Skipped for the following reason: {reason}");
                if let Err(err) = self.output.write_line(&line) {
                    let err = ExecutorError::from(err);
                    self.report_failure(&err);
                    return ExecutionOutcome::Failed(err);
                }
            }
            return ExecutionOutcome::Skipped(reason.to_string());
        }

        let Ok(_permit) = self.semaphore.acquire().await else {
            return ExecutionOutcome::Cancelled;
        };
        let lock = self.locks.acquire(operation.package().name().as_str()).await;
        let _guard = lock.lock().await;

        if let Err(err) = self.output.write_line(&format!("  • {message}")) {
            let err = ExecutorError::from(err);
            self.report_failure(&err);
            return ExecutionOutcome::Failed(err);
        }

        let result = match &operation {
            Operation::Install { package, .. } => self.install(package).await,
            Operation::Update { from, to, .. } => self.update(from, to).await,
            Operation::Uninstall { package, .. } => self.remove(package).await,
        };
        match result {
            Ok(0) => ExecutionOutcome::Succeeded,
            Ok(USER_INTERRUPT) => {
                if let Err(err) = self.output.write_line(&format!("  • {message}: Cancelled")) {
                    debug!("Failed to report a cancelled operation: {err}");
                }
                ExecutionOutcome::Cancelled
            }
            Ok(code) => {
                let err = ExecutorError::Subprocess(code);
                self.report_failure(&err);
                ExecutionOutcome::Failed(err)
            }
            Err(err) => {
                self.report_failure(&err);
                ExecutionOutcome::Failed(err)
            }
        }
    }

    /// Write a failure report as one contiguous block.
    fn report_failure(&self, err: &ExecutorError) {
        let mut lines = vec![String::new(), "  Exception".to_string(), String::new()];
        for line in err.to_string().lines() {
            lines.push(format!("  {line}"));
        }
        if let Err(err) = self.output.write_block(&lines) {
            debug!("Failed to report an operation failure: {err}");
        }
    }

    async fn install(&self, package: &Package) -> Result<i32, ExecutorError> {
        match package.source() {
            Source::Directory {
                path,
                develop: true,
            } => {
                let code = self.environment.run_installer(&editable_args(path))?;
                self.stamp(package, code)?;
                Ok(code)
            }
            Source::Git { develop, .. } => {
                // The commit that was actually checked out goes into the provenance
                // record, so the package is pinned before anything is installed.
                let fetch = self.chef.checkout(package).await?;
                let pinned = package.clone().with_resolved_reference(&fetch.commit);
                let code = if *develop {
                    self.environment.run_installer(&editable_args(&fetch.path))?
                } else {
                    let archive = self.chef.build_working_copy(&pinned, &fetch).await?;
                    self.environment.install_archive(&archive)?
                };
                self.stamp(&pinned, code)?;
                Ok(code)
            }
            _ => {
                let archive = self.chef.get_artifact(package).await?;
                let code = self.environment.install_archive(&archive)?;
                self.stamp(package, code)?;
                Ok(code)
            }
        }
    }

    async fn update(&self, from: &Package, to: &Package) -> Result<i32, ExecutorError> {
        let code = self.remove(from).await?;
        if code != 0 {
            return Ok(code);
        }
        self.install(to).await
    }

    async fn remove(&self, package: &Package) -> Result<i32, ExecutorError> {
        Ok(self
            .environment
            .remove_distribution(package.name(), package.version())?)
    }

    /// Record where an installed distribution came from, for sources that have a direct
    /// origin. Only real environments are stamped, and only after a successful install.
    fn stamp(&self, package: &Package, code: i32) -> Result<(), ExecutorError> {
        if code != 0 || !self.environment.is_venv() {
            return Ok(());
        }
        if matches!(package.source(), Source::Registry) {
            return Ok(());
        }
        let metadata = self
            .environment
            .metadata_directory(package.name(), package.version())?;
        write_direct_url(&metadata, package)?;
        Ok(())
    }
}

/// The progress line for an operation, without indentation or status suffix.
fn operation_message(operation: &Operation) -> String {
    match operation {
        Operation::Install { package, .. } => {
            format!("Installing {} ({})", package.name(), package.pretty_version())
        }
        Operation::Update { from, to, .. } => format!(
            "Updating {} ({} -> {})",
            from.name(),
            from.pretty_version(),
            to.pretty_version(),
        ),
        Operation::Uninstall { package, .. } => {
            format!("Removing {} ({})", package.name(), package.pretty_version())
        }
    }
}

fn pluralize(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn editable_args(path: &Path) -> Vec<String> {
    vec![
        "install".to_string(),
        "--no-deps".to_string(),
        "-e".to_string(),
        path.to_string_lossy().into_owned(),
    ]
}
