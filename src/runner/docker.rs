use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tracing::{debug, info};

use super::traits::{Execution, Metadata, Runner};
use crate::config::RunnerConfig;
use crate::docker::{
    self, DockerInvocation, ExecutionRequest, ExecutionResult, ImageOverrides, Mount, UserSpec,
};
use crate::error::{Error, Result};

const INPUT_ROOT: &str = "/styx_input";
const OUTPUT_ROOT: &str = "/styx_output";

/// Runs commands in Docker containers.
///
/// Everything configurable is fixed at construction, including the user
/// identity, so repeated runs never consult ambient process state.
#[derive(Debug)]
pub struct DockerRunner {
    executable: String,
    overrides: ImageOverrides,
    user: Option<UserSpec>,
    environ: BTreeMap<String, String>,
    data_dir: PathBuf,
    session: String,
    executions: AtomicUsize,
}

impl DockerRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let user = config.resolve_user();
        let overrides = config.overrides();
        Self {
            executable: config.docker_executable,
            overrides,
            user,
            environ: config.environ,
            data_dir: config.data_dir,
            session: session_id(),
            executions: AtomicUsize::new(0),
        }
    }

    pub fn user(&self) -> Option<&UserSpec> {
        self.user.as_ref()
    }

    /// The docker invocation `execute` would run for `request`.
    pub fn invocation(&self, request: &ExecutionRequest) -> DockerInvocation {
        let image = self.overrides.resolve(&request.image);
        docker::run_command(
            &self.executable,
            image,
            request,
            &self.environ,
            self.user.as_ref(),
        )
    }

    /// Run `request` to completion. A non-zero exit becomes
    /// [`Error::ContainerExecution`].
    pub fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let invocation = self.invocation(request);
        debug!(command = %shell_words::join(&request.args), "running command");

        let output = docker::capture(&invocation)?;
        match output.status.code() {
            Some(0) => Ok(ExecutionResult {
                exit_code: 0,
                stdout: output.stdout,
                stderr: output.stderr,
            }),
            exit_code => Err(Error::ContainerExecution {
                exit_code,
                command_args: request.args.clone(),
                docker_args: invocation.argv(),
                stdout: output.stdout,
                stderr: output.stderr,
            }),
        }
    }
}

impl Runner for DockerRunner {
    fn start_execution(&self, metadata: &Metadata) -> Result<Box<dyn Execution + '_>> {
        let image = metadata
            .container_image_tag
            .as_deref()
            .ok_or_else(|| Error::MissingImage {
                name: metadata.name.clone(),
            })?;
        let image = self.overrides.resolve(image).to_string();

        let n = self.executions.fetch_add(1, Ordering::Relaxed);
        let output_dir = self.data_dir.join(format!(
            "{}_{n}_{}",
            self.session,
            filesafe_name(&metadata.name)
        ));

        Ok(Box::new(DockerExecution {
            runner: self,
            name: metadata.name.clone(),
            image,
            output_dir,
            inputs: Vec::new(),
        }))
    }
}

/// One tool call inside a [`DockerRunner`].
pub struct DockerExecution<'a> {
    runner: &'a DockerRunner,
    name: String,
    image: String,
    output_dir: PathBuf,
    inputs: Vec<Mount>,
}

impl DockerExecution<'_> {
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn request(&self, cargs: &[String]) -> Result<ExecutionRequest> {
        let output_dir = std::path::absolute(&self.output_dir).map_err(|source| Error::Staging {
            path: self.output_dir.clone(),
            source,
        })?;
        let mut request = ExecutionRequest::new(self.image.clone(), cargs.iter().cloned())
            .working_dir(OUTPUT_ROOT);
        request.mounts = self.inputs.clone();
        request.mounts.push(Mount::writable(output_dir, OUTPUT_ROOT));
        Ok(request)
    }
}

impl Execution for DockerExecution<'_> {
    fn input_file(&mut self, host_file: &Path) -> String {
        let file_name = host_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let local = format!("{INPUT_ROOT}/{}/{file_name}", self.inputs.len());
        let host = std::path::absolute(host_file).unwrap_or_else(|_| host_file.to_path_buf());
        self.inputs.push(Mount::read_only(host, local.clone()));
        local
    }

    fn output_file(&self, local_file: &str, _optional: bool) -> PathBuf {
        self.output_dir.join(local_file)
    }

    fn run(&mut self, cargs: &[String]) -> Result<ExecutionResult> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| Error::Staging {
            path: self.output_dir.clone(),
            source,
        })?;
        let request = self.request(cargs)?;

        let start = Instant::now();
        let result = self.runner.execute(&request);
        info!(
            tool = %self.name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "executed {}",
            self.name
        );
        result
    }
}

/// 16 random hex digits. A v4 UUID fixes the version nibble in its high
/// half and the variant bits in its low half; folding the halves together
/// leaves every bit random.
fn session_id() -> String {
    let (high, low) = uuid::Uuid::new_v4().as_u64_pair();
    format!("{:016x}", high ^ low)
}

/// Collapse every run of non-word characters into `_`.
fn filesafe_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_alphanumeric() || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn runner(config: RunnerConfig) -> DockerRunner {
        DockerRunner::new(config)
    }

    #[test]
    fn filesafe_name_collapses_runs() {
        assert_eq!(filesafe_name("fsl bet"), "fsl_bet");
        assert_eq!(filesafe_name("a--b..c"), "a_b_c");
        assert_eq!(filesafe_name("3dcalc"), "3dcalc");
    }

    #[test]
    fn session_ids_are_sixteen_hex_digits() {
        let ids: Vec<String> = (0..64).map(|_| session_id()).collect();
        for id in &ids {
            assert_eq!(id.len(), 16);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
        // The version nibble of a bare v4 UUID would sit at index 12.
        assert!(ids.iter().any(|id| &id[12..13] != "4"));
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn user_is_resolved_at_construction() {
        let explicit = runner(RunnerConfig {
            user_id: Some(1234),
            group_id: Some(56),
            ..RunnerConfig::default()
        });
        assert_eq!(explicit.user(), Some(&UserSpec { uid: 1234, gid: Some(56) }));

        let default = runner(RunnerConfig::default());
        assert_eq!(default.user().copied(), crate::docker::current_user());
    }

    #[test]
    fn image_override_replaces_requested_image() {
        let runner = runner(RunnerConfig {
            image_overrides: HashMap::from([("A".to_string(), "B".to_string())]),
            ..RunnerConfig::default()
        });
        let inv = runner.invocation(&ExecutionRequest::new("A", ["true"]));

        assert!(inv.args.contains(&"B".to_string()));
        assert!(!inv.argv().contains(&"A".to_string()));
    }

    #[test]
    fn invocation_uses_configured_executable() {
        let runner = runner(RunnerConfig {
            docker_executable: "/opt/bin/docker".into(),
            ..RunnerConfig::default()
        });
        let inv = runner.invocation(&ExecutionRequest::new("img", ["true"]));
        assert_eq!(inv.argv()[0], "/opt/bin/docker");
    }

    #[test]
    fn configured_environ_is_merged_under_request() {
        let runner = runner(RunnerConfig {
            environ: BTreeMap::from([("X".to_string(), "1".to_string())]),
            ..RunnerConfig::default()
        });
        let request = ExecutionRequest::new("img", ["env"]).env("X", "2").env("Y", "3");
        let inv = runner.invocation(&request);

        let envs: Vec<&str> = inv
            .args
            .windows(2)
            .filter(|w| w[0] == "--env")
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(envs, ["X=2", "Y=3"]);
    }

    #[cfg(unix)]
    #[test]
    fn unix_default_user_flag_is_current_uid() {
        let runner = runner(RunnerConfig::default());
        let inv = runner.invocation(&ExecutionRequest::new("img", ["id"]));

        // SAFETY: simple POSIX getters.
        let expected = format!("{}:{}", unsafe { libc::geteuid() }, unsafe {
            libc::getegid()
        });
        let idx = inv.args.iter().position(|a| a == "--user").unwrap();
        assert_eq!(inv.args[idx + 1], expected);
    }

    #[cfg(not(unix))]
    #[test]
    fn non_unix_default_has_no_user_flag() {
        let runner = runner(RunnerConfig::default());
        let inv = runner.invocation(&ExecutionRequest::new("img", ["id"]));
        assert!(!inv.args.contains(&"--user".to_string()));
    }

    #[test]
    fn explicit_user_id_is_used_verbatim() {
        let runner = runner(RunnerConfig {
            user_id: Some(0),
            ..RunnerConfig::default()
        });
        let inv = runner.invocation(&ExecutionRequest::new("img", ["id"]));
        let idx = inv.args.iter().position(|a| a == "--user").unwrap();
        assert_eq!(inv.args[idx + 1], "0");
    }

    #[test]
    fn start_execution_requires_image() {
        let runner = runner(RunnerConfig::default());
        let err = runner
            .start_execution(&Metadata::new("bet", None))
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingImage { ref name } if name == "bet"));
    }

    #[test]
    fn executions_get_distinct_output_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(RunnerConfig {
            data_dir: dir.path().to_path_buf(),
            ..RunnerConfig::default()
        });
        let meta = Metadata::new("fsl bet", Some("fsl:6"));

        let first = runner.start_execution(&meta).unwrap().output_file("out.nii", false);
        let second = runner.start_execution(&meta).unwrap().output_file("out.nii", false);

        assert_ne!(first, second);
        assert!(first.starts_with(dir.path()));
        let parent = first.parent().unwrap().file_name().unwrap().to_string_lossy();
        assert!(parent.ends_with("_0_fsl_bet"), "unexpected dir {parent}");
        assert_eq!(parent.len(), 16 + "_0_fsl_bet".len());
    }

    #[cfg(unix)]
    #[test]
    fn input_files_map_to_numbered_container_paths() {
        let runner = runner(RunnerConfig::default());
        let mut execution = DockerExecution {
            runner: &runner,
            name: "bet".into(),
            image: "fsl:6".into(),
            output_dir: PathBuf::from("/tmp/styx/out"),
            inputs: Vec::new(),
        };

        let input = Path::new("/data/t1.nii.gz");
        assert_eq!(execution.input_file(input), "/styx_input/0/t1.nii.gz");
        assert_eq!(execution.input_file(input), "/styx_input/1/t1.nii.gz");

        let request = execution.request(&["bet".to_string()]).unwrap();
        assert_eq!(request.working_dir.as_deref(), Some("/styx_output"));
        assert_eq!(
            request.mounts,
            vec![
                Mount::read_only("/data/t1.nii.gz", "/styx_input/0/t1.nii.gz"),
                Mount::read_only("/data/t1.nii.gz", "/styx_input/1/t1.nii.gz"),
                Mount::writable("/tmp/styx/out", "/styx_output"),
            ]
        );
        assert_eq!(execution.output_dir(), Path::new("/tmp/styx/out"));
    }
}
