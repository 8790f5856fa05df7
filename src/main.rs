use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use styx_docker::docker::{self, Mount, UserSpec};
use styx_docker::{DockerRunner, Error, ExecutionRequest, RunnerConfig, config};

/// Run commands inside Docker containers the way Styx tool wrappers do.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file; defaults to `styx-docker.yaml` in the current directory.
    #[arg(short, long, env = "STYX_DOCKER_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the docker executable.
    #[arg(long, env = "STYX_DOCKER_EXECUTABLE")]
    docker: Option<String>,

    /// Replace one image reference with another (FROM=TO).
    #[arg(long = "image-override", value_parser = parse_key_value)]
    image_overrides: Vec<(String, String)>,

    /// Staging directory for execution outputs.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Container identity (UID[:GID]).
    #[arg(long)]
    user: Option<UserSpec>,

    /// Environment passed to every container (KEY=VALUE).
    #[arg(long = "environ", value_parser = parse_key_value)]
    environ: Vec<(String, String)>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one command in a container.
    Run(RunArgs),
    /// Check that the Docker daemon is reachable.
    Check,
    /// Print the effective configuration.
    ShowConfig,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Image to run.
    #[arg(long)]
    image: String,

    /// Bind mount (HOST:CONTAINER[:ro|rw]); read-only unless marked rw.
    #[arg(short = 'v', long = "mount")]
    mounts: Vec<Mount>,

    /// Environment for this run (KEY=VALUE); overrides configured values.
    #[arg(short, long = "env", value_parser = parse_key_value)]
    env: Vec<(String, String)>,

    /// Working directory inside the container.
    #[arg(short, long)]
    workdir: Option<String>,

    #[arg(long)]
    entrypoint: Option<String>,

    /// Print the result as JSON instead of replaying the captured streams.
    #[arg(long)]
    json: bool,

    /// Command and arguments to run inside the container.
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Command::Check => {
            let version = docker::ensure_available(&config.docker_executable)?;
            println!("docker server {version}");
            Ok(ExitCode::SUCCESS)
        }
        Command::ShowConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(args) => run(config, args),
    }
}

/// Layer CLI flags over the config file (or defaults).
fn resolve_config(cli: &Cli) -> Result<RunnerConfig> {
    let mut cfg = match &cli.config {
        Some(path) => config::load_file(path)?,
        None => {
            let cwd = std::env::current_dir().context("failed to read current directory")?;
            config::load(&cwd)?.unwrap_or_default()
        }
    };

    if let Some(docker) = &cli.docker {
        cfg.docker_executable = docker.clone();
    }
    if let Some(dir) = &cli.data_dir {
        cfg.data_dir = dir.clone();
    }
    if let Some(user) = cli.user {
        cfg.user_id = Some(user.uid);
        cfg.group_id = user.gid;
    }
    cfg.image_overrides.extend(cli.image_overrides.iter().cloned());
    cfg.environ.extend(cli.environ.iter().cloned());
    Ok(cfg)
}

fn run(config: RunnerConfig, args: RunArgs) -> Result<ExitCode> {
    let runner = DockerRunner::new(config);

    let mut request = ExecutionRequest::new(args.image, args.command);
    request.mounts = args.mounts;
    request.env = args.env.into_iter().collect();
    request.working_dir = args.workdir;
    request.entrypoint = args.entrypoint;

    match runner.execute(&request) {
        Ok(result) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                replay(&result.stdout, &result.stderr)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err @ Error::ContainerExecution { .. }) => {
            if let Error::ContainerExecution { stdout, stderr, .. } = &err {
                replay(stdout, stderr)?;
            }
            eprintln!("{err}");
            Ok(ExitCode::from(failure_code(&err)))
        }
        Err(err) => Err(err.into()),
    }
}

/// Process exit code for a failed run. Signal terminations and codes that
/// do not fit a byte map to 1.
fn failure_code(err: &Error) -> u8 {
    err.exit_code()
        .and_then(|code| u8::try_from(code).ok())
        .filter(|code| *code != 0)
        .unwrap_or(1)
}

fn replay(stdout: &str, stderr: &str) -> Result<()> {
    std::io::stdout().write_all(stdout.as_bytes())?;
    std::io::stderr().write_all(stderr.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn run_collects_trailing_command() {
        let cli = Cli::parse_from([
            "styx-docker",
            "--image-override",
            "fsl:6=mirror/fsl:6",
            "run",
            "--image",
            "fsl:6",
            "-v",
            "/data:/styx_input:ro",
            "-e",
            "X=2",
            "--",
            "bet",
            "-f",
            "0.5",
        ]);
        assert_eq!(
            cli.image_overrides,
            vec![("fsl:6".to_string(), "mirror/fsl:6".to_string())]
        );
        let Command::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.command, vec!["bet", "-f", "0.5"]);
        assert_eq!(args.mounts, vec![Mount::read_only("/data", "/styx_input")]);
        assert_eq!(args.env, vec![("X".to_string(), "2".to_string())]);
    }

    fn container_failure(exit_code: Option<i32>) -> Error {
        Error::ContainerExecution {
            exit_code,
            command_args: vec!["bet".into()],
            docker_args: vec!["docker".into(), "run".into()],
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    #[test]
    fn failure_code_follows_container_exit() {
        assert_eq!(failure_code(&container_failure(Some(3))), 3);
        assert_eq!(failure_code(&container_failure(None)), 1);
        assert_eq!(failure_code(&container_failure(Some(-1))), 1);
        assert_eq!(failure_code(&container_failure(Some(256))), 1);
    }

    #[test]
    fn key_value_requires_key() {
        assert_eq!(
            parse_key_value("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert!(parse_key_value("=x").is_err());
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn flags_layer_over_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        std::fs::write(&path, "docker_executable: podman\nenviron:\n  A: \"1\"\n").unwrap();

        let cli = Cli::parse_from([
            "styx-docker",
            "--config",
            path.to_str().unwrap(),
            "--user",
            "0:0",
            "--environ",
            "A=2",
            "show-config",
        ]);
        let cfg = resolve_config(&cli).unwrap();
        assert_eq!(cfg.docker_executable, "podman");
        assert_eq!(cfg.user_id, Some(0));
        assert_eq!(cfg.group_id, Some(0));
        assert_eq!(cfg.environ["A"], "2");
    }
}
