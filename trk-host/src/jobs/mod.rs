//! Background jobs: registry, executor, log streams and artifacts

pub mod artifacts;
pub mod context;
pub mod executor;
pub mod registry;
pub mod stream;

pub use artifacts::{resolve_artifact_path, ArtifactScanner};
pub use context::{RunContext, SubJobOutcome};
pub use executor::JobExecutor;
pub use registry::{Job, JobRegistry};
pub use stream::drain;
