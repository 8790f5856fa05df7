use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A host path bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    #[serde(default = "default_readonly")]
    pub readonly: bool,
}

fn default_readonly() -> bool {
    true
}

impl Mount {
    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            readonly: true,
        }
    }

    pub fn writable(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            readonly: false,
        }
    }

    /// Value for `docker run --mount`.
    pub fn to_arg(&self) -> String {
        let host = self.host.to_string_lossy();
        let source = if cfg!(windows) {
            posix_path(&host)
        } else {
            host.into_owned()
        };
        let readonly = if self.readonly { ",readonly" } else { "" };
        format!(
            "type=bind,{},{}{readonly}",
            csv_field("source", &source),
            csv_field("target", &self.container)
        )
    }
}

/// Docker reads Windows host paths with forward slashes.
fn posix_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// The `--mount` value is parsed as a CSV record: fields holding a comma or
/// a quote are wrapped in quotes, with inner quotes doubled.
fn csv_field(key: &str, value: &str) -> String {
    let field = format!("{key}={value}");
    if field.contains([',', '"']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field
    }
}

/// Parses `HOST:CONTAINER[:ro|rw]`. Splits from the right so Windows drive
/// letters in the host path are kept intact.
impl FromStr for Mount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, readonly) = match s.rsplit_once(':') {
            Some((rest, "ro")) => (rest, true),
            Some((rest, "rw")) => (rest, false),
            _ => (s, true),
        };
        let (host, container) = rest
            .rsplit_once(':')
            .ok_or_else(|| format!("expected HOST:CONTAINER[:ro|rw], got `{s}`"))?;
        if host.is_empty() || container.is_empty() {
            return Err(format!("mount `{s}` has an empty path"));
        }
        Ok(Self {
            host: PathBuf::from(host),
            container: container.to_string(),
            readonly,
        })
    }
}

/// Numeric identity the container process runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub uid: u32,
    pub gid: Option<u32>,
}

impl fmt::Display for UserSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gid {
            Some(gid) => write!(f, "{}:{gid}", self.uid),
            None => write!(f, "{}", self.uid),
        }
    }
}

impl FromStr for UserSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| format!("expected UID[:GID], got `{s}`"))
        };
        match s.split_once(':') {
            Some((uid, gid)) => Ok(Self {
                uid: parse(uid)?,
                gid: Some(parse(gid)?),
            }),
            None => Ok(Self {
                uid: parse(s)?,
                gid: None,
            }),
        }
    }
}

/// Immutable lookup table substituting one image reference for another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageOverrides(HashMap<String, String>);

impl ImageOverrides {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self(map)
    }

    pub fn resolve<'a>(&'a self, image: &'a str) -> &'a str {
        self.0.get(image).map(String::as_str).unwrap_or(image)
    }
}

/// One command to run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub image: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Overrides the runner's user for this request only.
    #[serde(default)]
    pub user: Option<UserSpec>,
    #[serde(default)]
    pub entrypoint: Option<String>,
}

impl ExecutionRequest {
    pub fn new<I, S>(image: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            image: image.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn user(mut self, user: UserSpec) -> Self {
        self.user = Some(user);
        self
    }

    pub fn entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }
}

/// The docker executable plus everything passed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerInvocation {
    pub executable: String,
    pub args: Vec<String>,
}

impl DockerInvocation {
    /// Full argument vector, executable first.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.executable.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Shell-quoted form, suitable for pasting into a terminal.
    pub fn command_line(&self) -> String {
        shell_words::join(self.argv())
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.executable);
        command.args(&self.args);
        command
    }
}

/// Outcome of a container run that exited with status zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}
