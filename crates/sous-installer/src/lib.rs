//! The operation executor: applies a resolved batch of install/update/uninstall
//! operations to a target environment, scheduling independent operations concurrently,
//! materializing artifacts through the chef, and stamping provenance metadata.

pub use crate::environment::{Environment, EnvironmentError, Virtualenv};
pub use crate::error::ExecutorError;
pub use crate::executor::Executor;
pub use crate::operation::{ExecutionOutcome, Operation};
pub use crate::output::{BufferedSink, OutputError, OutputSink, StdoutSink};
pub use crate::provenance::{ProvenanceError, direct_url_reference, write_direct_url};

mod environment;
mod error;
mod executor;
mod locks;
mod operation;
mod output;
mod provenance;
