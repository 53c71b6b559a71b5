use thiserror::Error;

use sous_chef::ChefError;

use crate::environment::EnvironmentError;
use crate::output::OutputError;
use crate::provenance::ProvenanceError;

/// Everything that can fail inside an operation handler.
///
/// Handlers never let these escape [`crate::Executor::execute`]: each is caught at the
/// operation boundary, rendered under an `Exception` header, and folded into the batch
/// status.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Chef(#[from] ChefError),
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    #[error("The installer exited with status {0}")]
    Subprocess(i32),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Provenance(#[from] ProvenanceError),
}
