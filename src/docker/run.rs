use std::io::{self, BufRead, BufReader, Read};
use std::process::{ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use super::types::DockerInvocation;
use crate::error::{Error, Result};

/// Raw outcome of a docker process, before exit-code interpretation.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Run `invocation` to completion, logging each output line as it arrives
/// and buffering both streams.
///
/// Launch failures (missing executable, permissions) surface as
/// [`Error::Spawn`]; the exit status is returned as-is.
pub fn capture(invocation: &DockerInvocation) -> Result<CapturedOutput> {
    debug!(command = %invocation.command_line(), "running docker");

    let mut child = invocation
        .command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| Error::Spawn {
            executable: invocation.executable.clone(),
            source,
        })?;

    // Both pipes are drained on their own threads so a chatty stream can
    // never fill up and stall the child.
    let stdout = child.stdout.take().map(|s| pump(s, Stream::Stdout));
    let stderr = child.stderr.take().map(|s| pump(s, Stream::Stderr));

    let stdout = join(stdout);
    let stderr = join(stderr);
    let status = child.wait().map_err(|source| Error::Capture { source })?;

    Ok(CapturedOutput {
        status,
        stdout: stdout?,
        stderr: stderr?,
    })
}

fn pump<R>(source: R, stream: Stream) -> JoinHandle<io::Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut captured = Vec::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);
            match stream {
                Stream::Stdout => info!(target: "styx_docker::container", "{text}"),
                Stream::Stderr => error!(target: "styx_docker::container", "{text}"),
            }
            captured.extend_from_slice(&line);
        }
        Ok(captured)
    })
}

fn join(handle: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Result<String> {
    let Some(handle) = handle else {
        return Ok(String::new());
    };
    let bytes = handle
        .join()
        .map_err(|_| Error::Capture {
            source: io::Error::other("output reader thread panicked"),
        })?
        .map_err(|source| Error::Capture { source })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
