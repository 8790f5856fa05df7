// Execution sessions for tool wrappers, backed by Docker.

mod docker;
mod traits;

pub use docker::{DockerExecution, DockerRunner};
pub use traits::{Execution, Metadata, Runner};
