use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The container ran but did not exit cleanly.
    ///
    /// Carries both argument vectors so the exact invocation can be
    /// reproduced by hand.
    #[error("{}", failure_message(.exit_code, .docker_args, .command_args))]
    ContainerExecution {
        /// `None` when the process was terminated by a signal.
        exit_code: Option<i32>,
        command_args: Vec<String>,
        docker_args: Vec<String>,
        stdout: String,
        stderr: String,
    },
    #[error("failed to launch `{executable}`: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read container output: {source}")]
    Capture {
        #[source]
        source: std::io::Error,
    },
    #[error("no container image tag specified for `{name}`")]
    MissingImage { name: String },
    #[error("failed to prepare staging directory {}: {source}", .path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Exit code of a failed container run, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::ContainerExecution { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

fn failure_message(
    exit_code: &Option<i32>,
    docker_args: &[String],
    command_args: &[String],
) -> String {
    let mut message = String::from("Command failed.");
    match exit_code {
        Some(code) => message.push_str(&format!("\n- Return code: {code}")),
        None => message.push_str("\n- Terminated by signal"),
    }
    message.push_str(&format!("\n- Docker args: {}", shell_words::join(docker_args)));
    message.push_str(&format!("\n- Command args: {}", shell_words::join(command_args)));
    message
}
