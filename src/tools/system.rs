//! Process-spawning implementation of [`ExternalTool`].

use super::tool::{ExternalTool, Invocation, ToolError, ToolOutput};
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// How often a timed child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs tools found on the `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTool;

impl SystemTool {
    pub fn new() -> Self {
        Self
    }
}

impl ExternalTool for SystemTool {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        debug!(command = %invocation.command_line(), "running external tool");
        let program = invocation.program.clone();
        let io_err = |source: io::Error| ToolError::Io {
            program: program.clone(),
            source,
        };

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => ToolError::NotFound {
                    program: invocation.program.clone(),
                },
                _ => io_err(err),
            })?;

        match invocation.timeout {
            None => {
                let output = child.wait_with_output().map_err(io_err)?;
                Ok(ToolOutput {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            Some(timeout) => wait_with_timeout(child, &invocation.program, timeout),
        }
    }
}

/// Drain both pipes on helper threads so a chatty child cannot block on a
/// full pipe while we poll it, and kill it once `timeout` has elapsed.
fn wait_with_timeout(
    mut child: Child,
    program: &str,
    timeout: Duration,
) -> Result<ToolOutput, ToolError> {
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);
    let deadline = Instant::now() + timeout;

    let status = loop {
        let polled = child.try_wait().map_err(|source| ToolError::Io {
            program: program.to_string(),
            source,
        })?;
        if let Some(status) = polled {
            break status;
        }
        if Instant::now() >= deadline {
            // the child may exit between try_wait and kill
            let _ = child.kill();
            let _ = child.wait();
            return Err(ToolError::TimedOut {
                program: program.to_string(),
                timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(ToolOutput {
        success: status.success(),
        stdout: join_drain(stdout),
        stderr: join_drain(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_drain(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
