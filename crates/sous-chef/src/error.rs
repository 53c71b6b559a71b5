use std::io;
use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use sous_types::PackageName;

use crate::index::IndexError;

#[derive(Debug, Error)]
pub enum ChefError {
    #[error("Failed to download `{url}`")]
    Download {
        url: Box<Url>,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to build `{}`", path.display())]
    Build {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to check out `{url}`")]
    Checkout {
        url: Box<Url>,
        #[source]
        source: anyhow::Error,
    },
    #[error("Archive not found at `{}`", path.display())]
    MissingArchive { path: PathBuf },
    #[error("`{0}` is installed in place and produces no installable artifact")]
    Develop(PackageName),
    #[error("`{0}` is not a version-control source")]
    NotVcs(PackageName),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
