//! Run Styx tool wrappers inside Docker containers.
//!
//! [`DockerRunner`] turns an [`ExecutionRequest`] into a `docker run`
//! invocation, runs it synchronously and returns the captured output, or an
//! [`Error::ContainerExecution`] carrying both argument vectors when the
//! container exits non-zero.

pub mod config;
pub mod docker;
pub mod error;
pub mod runner;

pub use config::RunnerConfig;
pub use docker::{ExecutionRequest, ExecutionResult, Mount, UserSpec};
pub use error::{Error, Result};
pub use runner::{DockerRunner, Execution, Metadata, Runner};
