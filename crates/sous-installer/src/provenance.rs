use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use url::Url;

use sous_types::{ArchiveInfo, DirInfo, DirectUrlReference, Package, Source, VcsInfo, VcsKind};

/// The file name PEP 610 reserves inside a distribution's metadata directory.
const DIRECT_URL_JSON: &str = "direct_url.json";

#[derive(Debug, Error)]
pub enum ProvenanceError {
    #[error("Failed to render `{}` as a file URI", path.display())]
    FileUri { path: PathBuf },
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Map a source descriptor to its canonical direct-URL record.
///
/// A pure function of the descriptor: the same input always produces the same record.
/// Registry sources carry no record (installs through the standard index path are not
/// stamped).
pub fn direct_url_reference(
    package: &Package,
) -> Result<Option<DirectUrlReference>, ProvenanceError> {
    let reference = match package.source() {
        Source::Registry => return Ok(None),
        Source::File { path } => DirectUrlReference::Archive {
            archive_info: ArchiveInfo::default(),
            url: file_uri(path)?,
        },
        Source::Url { url } => DirectUrlReference::Archive {
            archive_info: ArchiveInfo::default(),
            url: url.to_string(),
        },
        Source::Directory { path, develop } => DirectUrlReference::Directory {
            dir_info: DirInfo {
                editable: develop.then_some(true),
            },
            url: file_uri(path)?,
        },
        Source::Git {
            url,
            reference,
            resolved_reference,
            ..
        } => DirectUrlReference::Vcs {
            vcs_info: VcsInfo {
                vcs: VcsKind::Git,
                requested_revision: Some(reference.clone()),
                commit_id: resolved_reference.clone(),
            },
            url: url.to_string(),
        },
    };
    Ok(Some(reference))
}

/// Write the package's `direct_url.json` into the given metadata directory.
///
/// The file is always written whole: serialized in memory, then renamed into place, so a
/// reader never observes a partial record. Registry sources write nothing.
pub fn write_direct_url(metadata_dir: &Path, package: &Package) -> Result<(), ProvenanceError> {
    let Some(reference) = direct_url_reference(package)? else {
        return Ok(());
    };
    let contents = serde_json::to_string(&reference)?;

    let mut temp = NamedTempFile::new_in(metadata_dir)?;
    temp.write_all(contents.as_bytes())?;
    temp.persist(metadata_dir.join(DIRECT_URL_JSON))
        .map_err(|err| err.error)?;
    Ok(())
}

fn file_uri(path: &Path) -> Result<String, ProvenanceError> {
    let url = Url::from_file_path(path).map_err(|()| ProvenanceError::FileUri {
        path: path.to_path_buf(),
    })?;
    Ok(url.to_string())
}
