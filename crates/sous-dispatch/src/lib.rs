//! The host implementation of [`BuildContext`]: drives the real toolchain through
//! subprocesses. Wheel builds shell out to `python -m build`; checkouts shell out to
//! `git`. Hung subprocesses are the caller's operational concern; nothing here imposes
//! timeouts.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Output;

use anyhow::{Context, Result, bail};
use fs_err as fs;
use tokio::process::Command;
use tracing::debug;
use url::Url;

use sous_traits::{BuildContext, Fetch};

/// Builds wheels and checks out repositories with the host's `python` and `git`.
#[derive(Debug, Clone)]
pub struct HostDispatch {
    python: PathBuf,
    git: PathBuf,
}

impl HostDispatch {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            git: PathBuf::from("git"),
        }
    }

    /// Override the `git` executable (e.g., a wrapper with credentials).
    #[must_use]
    pub fn with_git(self, git: impl Into<PathBuf>) -> Self {
        Self {
            git: git.into(),
            ..self
        }
    }

    async fn run(&self, program: &Path, args: &[&str], cwd: Option<&Path>) -> Result<Output> {
        let mut command = Command::new(program);
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        let output = command
            .output()
            .await
            .with_context(|| format!("Failed to spawn `{}`", program.display()))?;
        if !output.status.success() {
            bail!(
                "`{} {}` failed with {}:\n{}",
                program.display(),
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim_end(),
            );
        }
        Ok(output)
    }
}

impl BuildContext for HostDispatch {
    fn build_directory<'a>(
        &'a self,
        source: &'a Path,
        wheel_dir: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            debug!("Building wheel for {}", source.display());
            let source_arg = source.to_string_lossy();
            let outdir_arg = wheel_dir.to_string_lossy();
            self.run(
                &self.python,
                &["-m", "build", "--wheel", "--outdir", &outdir_arg, &source_arg],
                None,
            )
            .await?;

            // The build backend controls the exact file name; pick up whatever landed.
            for entry in fs::read_dir(wheel_dir)? {
                let entry = entry?;
                let name = entry.file_name();
                if Path::new(&name)
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("whl"))
                {
                    return Ok(name.to_string_lossy().into_owned());
                }
            }
            bail!("Build of `{}` produced no wheel", source.display());
        })
    }

    fn checkout<'a>(
        &'a self,
        url: &'a Url,
        reference: Option<&'a str>,
        target: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<Fetch>> + Send + 'a>> {
        Box::pin(async move {
            if target.join(".git").exists() {
                debug!("Fetching {url} into existing checkout");
                self.run(&self.git, &["fetch", "--tags", "origin"], Some(target))
                    .await?;
            } else {
                debug!("Cloning {url}");
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let target_arg = target.to_string_lossy();
                self.run(&self.git, &["clone", url.as_str(), &target_arg], None)
                    .await?;
            }

            if let Some(reference) = reference {
                // A local branch does not move when `origin/<branch>` does, so prefer
                // the remote-tracking ref; tags and commits have no remote-tracking
                // counterpart and resolve by their literal name.
                let remote = format!("origin/{reference}");
                if self
                    .run(&self.git, &["checkout", "--detach", &remote], Some(target))
                    .await
                    .is_err()
                {
                    self.run(&self.git, &["checkout", "--detach", reference], Some(target))
                        .await?;
                }
            }

            let output = self
                .run(&self.git, &["rev-parse", "HEAD"], Some(target))
                .await?;
            let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(Fetch {
                path: target.to_path_buf(),
                commit,
            })
        })
    }
}
