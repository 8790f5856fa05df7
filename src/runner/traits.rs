use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::docker::ExecutionResult;
use crate::error::Result;

/// What a tool wrapper tells the runner about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub container_image_tag: Option<String>,
}

impl Metadata {
    pub fn new(name: impl Into<String>, container_image_tag: Option<&str>) -> Self {
        Self {
            name: name.into(),
            container_image_tag: container_image_tag.map(str::to_string),
        }
    }
}

/// Execution backend for tool wrappers. Wrapper code stays agnostic to
/// whether commands run on the host or in a container.
pub trait Runner {
    fn start_execution(&self, metadata: &Metadata) -> Result<Box<dyn Execution + '_>>;
}

/// A single tool call.
pub trait Execution {
    /// Make a host file available to the command; returns the path the
    /// command should use.
    fn input_file(&mut self, host_file: &Path) -> String;

    /// Host location of an output the command writes to `local_file`.
    fn output_file(&self, local_file: &str, optional: bool) -> PathBuf;

    fn run(&mut self, cargs: &[String]) -> Result<ExecutionResult>;
}
