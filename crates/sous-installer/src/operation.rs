use sous_types::Package;

use crate::error::ExecutorError;

/// One requested mutation against the target environment.
///
/// Operations are immutable once constructed; a skip reason marks them as no-ops that
/// are still counted and (in verbose mode) reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Install {
        package: Package,
        skip: Option<String>,
    },
    Update {
        from: Package,
        to: Package,
        skip: Option<String>,
    },
    Uninstall {
        package: Package,
        skip: Option<String>,
    },
}

impl Operation {
    pub fn install(package: Package) -> Self {
        Self::Install {
            package,
            skip: None,
        }
    }

    pub fn update(from: Package, to: Package) -> Self {
        Self::Update {
            from,
            to,
            skip: None,
        }
    }

    pub fn uninstall(package: Package) -> Self {
        Self::Uninstall {
            package,
            skip: None,
        }
    }

    /// Mark the operation as skipped for the given reason.
    #[must_use]
    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        let (Self::Install { skip, .. } | Self::Update { skip, .. } | Self::Uninstall { skip, .. }) =
            &mut self;
        *skip = Some(reason.into());
        self
    }

    pub fn skip_reason(&self) -> Option<&str> {
        let (Self::Install { skip, .. } | Self::Update { skip, .. } | Self::Uninstall { skip, .. }) =
            self;
        skip.as_deref()
    }

    /// The package the operation applies to (the new version, for updates).
    pub fn package(&self) -> &Package {
        match self {
            Self::Install { package, .. } | Self::Uninstall { package, .. } => package,
            Self::Update { to, .. } => to,
        }
    }
}

/// The terminal state of one executed operation.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Succeeded,
    Skipped(String),
    Failed(ExecutorError),
    Cancelled,
}

impl ExecutionOutcome {
    /// Whether the outcome counts against the batch's exit status.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Cancelled)
    }
}
