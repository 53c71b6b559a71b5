//! The PEP 610 `direct_url.json` schema, in the minimal shape the executor stamps.
//!
//! <https://packaging.python.org/en/latest/specifications/direct-url/>

use serde::{Deserialize, Serialize};

/// The provenance record for one installed distribution: a URL plus exactly one of
/// `archive_info`, `dir_info`, or `vcs_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DirectUrlReference {
    /// An archive source: a local file or a remote URL.
    Archive { archive_info: ArchiveInfo, url: String },
    /// A local directory source, installed in place when `editable` is set.
    Directory { dir_info: DirInfo, url: String },
    /// A version-control source.
    Vcs { vcs_info: VcsInfo, url: String },
}

/// Reserved for future hash fields; serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editable: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsInfo {
    pub vcs: VcsKind,
    pub requested_revision: Option<String>,
    pub commit_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsKind {
    Git,
}
