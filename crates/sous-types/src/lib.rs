pub use crate::direct_url::{ArchiveInfo, DirInfo, DirectUrlReference, VcsInfo, VcsKind};
pub use crate::package::{Package, PackageName, Source, Version};

mod direct_url;
mod package;
