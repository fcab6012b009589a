// Pipeline execution module
// Monolithic and stepped runners over the shared stages, plus the artifact sweeper

pub mod error;
pub mod monolithic;
pub mod stages;
pub mod stepped;
pub mod sweeper;
pub mod trace;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use monolithic::{transform, TransformSummary};
pub use stages::{FeatureStep, Stage};
pub use stepped::{check, step_1, step_2, Step1Checkpoint, Step2Output, Step2Request};
pub use sweeper::{sweep_once, SweepReport};
pub use trace::{read_trace_file, TraceEntry, TraceError, TraceWriter};
