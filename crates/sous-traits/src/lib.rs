//! Avoid cyclic crate dependencies between the artifact builder and the host toolchain.
//!
//! To materialize a `directory` or `git` source, the builder needs to drive external
//! tooling: a wheel build for project directories, and a version-control checkout for
//! repositories. Those live in `sous-dispatch`, which in turn needs the builder's cache
//! layout. This trait dispatches between the two crates without an actual crate
//! dependency between them, the same way the test suite swaps in hermetic stand-ins.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use url::Url;

/// A version-control working copy, checked out at a known commit.
#[derive(Debug, Clone)]
pub struct Fetch {
    /// The path to the working copy.
    pub path: PathBuf,
    /// The commit that was actually checked out.
    pub commit: String,
}

/// External tooling required to turn a source tree into an installable artifact.
pub trait BuildContext {
    /// Build a wheel from the project at `source`, writing it into `wheel_dir`.
    ///
    /// Returns the file name of the built wheel inside `wheel_dir`.
    fn build_directory<'a>(
        &'a self,
        source: &'a Path,
        wheel_dir: &'a Path,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;

    /// Check out the repository at `url` into `target`, at `reference` if given (the
    /// remote default branch otherwise). Returns the working copy and the commit it
    /// points at.
    fn checkout<'a>(
        &'a self,
        url: &'a Url,
        reference: Option<&'a str>,
        target: &'a Path,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Fetch>> + Send + 'a>>;
}
