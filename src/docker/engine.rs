use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};

use super::types::UserSpec;

/// Verify that the Docker daemon is reachable through `executable`.
pub fn ensure_available(executable: &str) -> Result<String> {
    let output = Command::new(executable)
        .args(["version", "--format", "{{.Server.Version}}"])
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to invoke `{executable}`; is it installed and on PATH?"))?;

    if !output.status.success() {
        bail!(
            "docker daemon is not reachable ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Effective uid:gid of this process on Unix, so containers write files
/// as the invoking user. `None` on other platforms.
pub fn current_user() -> Option<UserSpec> {
    #[cfg(unix)]
    {
        // SAFETY: geteuid() and getegid() are simple POSIX getters that always succeed and have no side effects.
        let uid = unsafe { libc::geteuid() };
        let gid = unsafe { libc::getegid() };
        Some(UserSpec {
            uid,
            gid: Some(gid),
        })
    }

    #[cfg(not(unix))]
    {
        None
    }
}

/// Returns `["--user", "<id>"]` when a user is in effect.
pub fn user_args(user: Option<&UserSpec>) -> Vec<String> {
    match user {
        Some(user) => vec!["--user".into(), user.to_string()],
        None => Vec::new(),
    }
}
