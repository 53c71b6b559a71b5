use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

/// The normalized name of a package.
///
/// Converts the name to lowercase and collapses any run of the characters `-`, `_` and `.`
/// down to a single `-`, e.g., `---`, `.`, and `__` all get converted to just `-`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    pub fn new(name: impl AsRef<str>) -> Self {
        let mut normalized = String::with_capacity(name.as_ref().len());
        let mut last = '-';
        for char in name.as_ref().chars() {
            match char {
                '-' | '_' | '.' => {
                    if last != '-' || normalized.is_empty() {
                        normalized.push('-');
                    }
                }
                _ => normalized.push(char.to_ascii_lowercase()),
            }
            last = normalized.chars().next_back().unwrap_or('-');
        }
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// The version of a package, as produced by the resolver.
///
/// The executor never compares or orders versions; it only reproduces them in output and
/// metadata paths, so the resolved string is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(version: &str) -> Self {
        Self::new(version)
    }
}

/// Where a package's content comes from.
///
/// A closed set: the artifact builder and the provenance writer both match over it
/// exhaustively, so adding a kind is a compile-time-visible change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Fetched through the standard index path.
    Registry,
    /// An archive at an absolute local path.
    File { path: PathBuf },
    /// A project directory at an absolute local path.
    Directory { path: PathBuf, develop: bool },
    /// A remote archive URL.
    Url { url: Url },
    /// A Git repository, checked out at `reference` (or `resolved_reference`, once known).
    Git {
        url: Url,
        reference: String,
        resolved_reference: Option<String>,
        develop: bool,
    },
}

impl Source {
    /// Whether this source is installed in place rather than from a built artifact.
    pub fn is_develop(&self) -> bool {
        match self {
            Self::Registry | Self::File { .. } | Self::Url { .. } => false,
            Self::Directory { develop, .. } | Self::Git { develop, .. } => *develop,
        }
    }
}

/// A resolved package: a name, a version, and a source descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    name: PackageName,
    version: Version,
    source: Source,
}

impl Package {
    /// A package fetched from the registry.
    pub fn registry(name: impl Into<PackageName>, version: impl Into<Version>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source: Source::Registry,
        }
    }

    /// A package backed by a local archive.
    pub fn file(
        name: impl Into<PackageName>,
        version: impl Into<Version>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source: Source::File { path: path.into() },
        }
    }

    /// A package backed by a local project directory.
    pub fn directory(
        name: impl Into<PackageName>,
        version: impl Into<Version>,
        path: impl Into<PathBuf>,
        develop: bool,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source: Source::Directory {
                path: path.into(),
                develop,
            },
        }
    }

    /// A package backed by a remote archive URL.
    pub fn url(name: impl Into<PackageName>, version: impl Into<Version>, url: Url) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source: Source::Url { url },
        }
    }

    /// A package backed by a Git repository.
    pub fn git(
        name: impl Into<PackageName>,
        version: impl Into<Version>,
        url: Url,
        reference: impl Into<String>,
        develop: bool,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source: Source::Git {
                url,
                reference: reference.into(),
                resolved_reference: None,
                develop,
            },
        }
    }

    /// Pin a Git package to the commit that was actually checked out.
    #[must_use]
    pub fn with_resolved_reference(mut self, commit: impl Into<String>) -> Self {
        if let Source::Git {
            resolved_reference, ..
        } = &mut self.source
        {
            *resolved_reference = Some(commit.into());
        }
        self
    }

    pub fn name(&self) -> &PackageName {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// The version as rendered in progress output: plain for registry packages, with the
    /// source path, URL, or Git reference appended otherwise.
    pub fn pretty_version(&self) -> String {
        match &self.source {
            Source::Registry => self.version.to_string(),
            Source::File { path } | Source::Directory { path, .. } => {
                format!("{} {}", self.version, path.display())
            }
            Source::Url { url } => format!("{} {}", self.version, url),
            Source::Git { reference, .. } => format!("{} {}", self.version, reference),
        }
    }
}

impl Display for Package {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.version)
    }
}
