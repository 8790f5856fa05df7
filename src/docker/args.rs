use std::collections::BTreeMap;

use super::engine;
use super::types::{DockerInvocation, ExecutionRequest, UserSpec};

/// Build the `docker run` invocation for `request`.
///
/// `image` is the already-resolved image reference. `environ` is merged
/// under the request's own environment, so request entries win. The
/// request's user, when set, replaces `default_user`.
pub fn run_command(
    executable: &str,
    image: &str,
    request: &ExecutionRequest,
    environ: &BTreeMap<String, String>,
    default_user: Option<&UserSpec>,
) -> DockerInvocation {
    let mut args: Vec<String> = vec!["run".into(), "--rm".into()];

    for mount in &request.mounts {
        args.push("--mount".into());
        args.push(mount.to_arg());
    }

    if let Some(dir) = &request.working_dir {
        args.push("--workdir".into());
        args.push(dir.clone());
    }

    for (key, value) in merge_env(environ, &request.env) {
        args.push("--env".into());
        args.push(format!("{key}={value}"));
    }

    args.extend(engine::user_args(request.user.as_ref().or(default_user)));

    if let Some(entrypoint) = &request.entrypoint {
        args.push("--entrypoint".into());
        args.push(entrypoint.clone());
    }

    args.push(image.to_string());
    args.extend(request.args.iter().cloned());

    DockerInvocation {
        executable: executable.to_string(),
        args,
    }
}

/// Configured environment overlaid with request-specific entries.
pub fn merge_env<'a>(
    base: &'a BTreeMap<String, String>,
    overlay: &'a BTreeMap<String, String>,
) -> BTreeMap<&'a str, &'a str> {
    base.iter()
        .chain(overlay)
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}
