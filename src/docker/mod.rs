// Docker invocation: argument construction, process capture, host identity.

pub mod args;
pub mod engine;
pub mod run;
pub mod types;

pub use args::run_command;
pub use engine::{current_user, ensure_available, user_args};
pub use run::{CapturedOutput, capture};
pub use types::{
    DockerInvocation, ExecutionRequest, ExecutionResult, ImageOverrides, Mount, UserSpec,
};
