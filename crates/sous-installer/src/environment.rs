use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use fs_err as fs;
use thiserror::Error;
use tracing::debug;

use sous_types::{PackageName, Version};

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("No metadata directory for {name} ({version})")]
    MissingMetadataDir { name: PackageName, version: Version },
    #[error("{0}")]
    Failure(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The target runtime environment, as the executor sees it.
///
/// Install and uninstall primitives report an installer exit code: `0` for success, `-2`
/// for the reserved user-interrupt sentinel, anything else for failure. Implementations
/// that mutate the environment directly (without a subprocess) report `0`.
pub trait Environment: Send + Sync {
    /// Run the external installer with the given arguments and return its exit code.
    fn run_installer(&self, args: &[String]) -> Result<i32, EnvironmentError>;

    /// Install a prebuilt archive.
    fn install_archive(&self, archive: &Path) -> Result<i32, EnvironmentError>;

    /// Remove an installed distribution.
    fn remove_distribution(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<i32, EnvironmentError>;

    /// Locate the metadata directory of an installed distribution.
    fn metadata_directory(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<PathBuf, EnvironmentError>;

    /// Whether this is a real virtual environment (as opposed to a test double).
    /// Provenance metadata is only stamped into real environments.
    fn is_venv(&self) -> bool;
}

/// A real virtual environment rooted at a directory, driven through its own `pip`.
#[derive(Debug, Clone)]
pub struct Virtualenv {
    root: PathBuf,
}

impl Virtualenv {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The environment's interpreter.
    pub fn python(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("Scripts").join("python.exe")
        } else {
            self.root.join("bin").join("python")
        }
    }

    fn pip(&self, args: &[String]) -> Result<i32, EnvironmentError> {
        debug!("Running pip {}", args.join(" "));
        let status = std::process::Command::new(self.python())
            .arg("-m")
            .arg("pip")
            .args(args)
            .status()?;
        Ok(exit_code(status))
    }

    fn site_packages(&self) -> Option<PathBuf> {
        if cfg!(windows) {
            let candidate = self.root.join("Lib").join("site-packages");
            return candidate.is_dir().then_some(candidate);
        }
        let lib = self.root.join("lib");
        for entry in fs::read_dir(lib).ok()?.flatten() {
            let candidate = entry.path().join("site-packages");
            if candidate.is_dir() {
                return Some(candidate);
            }
        }
        None
    }
}

impl Environment for Virtualenv {
    fn run_installer(&self, args: &[String]) -> Result<i32, EnvironmentError> {
        self.pip(args)
    }

    fn install_archive(&self, archive: &Path) -> Result<i32, EnvironmentError> {
        self.pip(&[
            "install".to_string(),
            "--no-deps".to_string(),
            archive.to_string_lossy().into_owned(),
        ])
    }

    fn remove_distribution(
        &self,
        name: &PackageName,
        _version: &Version,
    ) -> Result<i32, EnvironmentError> {
        self.pip(&[
            "uninstall".to_string(),
            "-y".to_string(),
            name.to_string(),
        ])
    }

    fn metadata_directory(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<PathBuf, EnvironmentError> {
        let dist_info = format!("{}-{}.dist-info", name.as_str().replace('-', "_"), version);
        let candidate = self
            .site_packages()
            .map(|site_packages| site_packages.join(dist_info));
        match candidate {
            Some(path) if path.is_dir() => Ok(path),
            _ => Err(EnvironmentError::MissingMetadataDir {
                name: name.clone(),
                version: version.clone(),
            }),
        }
    }

    fn is_venv(&self) -> bool {
        self.root.join("pyvenv.cfg").is_file()
    }
}

/// Map a subprocess exit status to the installer exit-code convention: signal-terminated
/// processes report the negated signal number, so a user interrupt surfaces as `-2`.
#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| -status.signal().unwrap_or(1))
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
