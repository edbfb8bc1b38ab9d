//! External tool trait and shared types.
//!
//! The [`ExternalTool`] trait is the single seam between the ingest pipeline
//! and the GDAL / MRF command line tools. The production implementation is
//! [`SystemTool`](super::system::SystemTool); tests use the recording
//! [`MockTool`](tests::MockTool).
//!
//! ## Diagnostic lines
//!
//! The tools report problems as free text on stderr. The only convention
//! relied upon is:
//!
//! | Line contains | Meaning |
//! |---|---|
//! | `Access window out of range` | warning, processing continues |
//! | `ERROR` | hard failure for the current command |
//! | anything else | informational |
//!
//! This is text scraping and breaks if a tool rewords its messages. Keep it
//! confined to [`Diagnostic::classify`].

use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{program} cannot be found on the PATH")]
    NotFound { program: String },
    #[error("IO error running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {}s and was killed", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
    #[error("{program} failed: {message}")]
    Failed { program: String, message: String },
}

impl ToolError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Demote a per-tile tool failure to `Ok(None)` (logged as a warning).
///
/// [`ToolError::NotFound`] stays an error: no later tile can succeed either.
pub fn recoverable<T>(result: Result<T, ToolError>, what: &str) -> Result<Option<T>, ToolError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Err(err),
        Err(err) => {
            warn!("{what} failed: {err}");
            Ok(None)
        }
    }
}

/// A fully specified command line for one external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Hard limit after which the child is killed. `None` runs to completion.
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The command as it would be typed in a shell, for logging.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(Diagnostic::classify)
            .collect()
    }

    /// Turn a non-zero exit or an `ERROR` line into [`ToolError::Failed`].
    pub fn check(self, program: &str) -> Result<Self, ToolError> {
        let first_error = self.diagnostics().into_iter().find_map(|d| match d {
            Diagnostic::Error(line) => Some(line),
            _ => None,
        });
        match first_error {
            Some(message) => Err(ToolError::Failed {
                program: program.to_string(),
                message,
            }),
            None if !self.success => Err(ToolError::Failed {
                program: program.to_string(),
                message: "non-zero exit status".to_string(),
            }),
            None => Ok(self),
        }
    }
}

/// One classified stderr line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    Error(String),
    WindowOutOfRange(String),
    Info(String),
}

impl Diagnostic {
    pub fn classify(line: &str) -> Self {
        // checked first: mrf_insert prefixes this warning with "ERROR 5:"
        if line.contains("Access window out of range") {
            Self::WindowOutOfRange(line.to_string())
        } else if line.contains("ERROR") {
            Self::Error(line.to_string())
        } else {
            Self::Info(line.to_string())
        }
    }
}

/// Runs external commands on behalf of the pipeline.
///
/// `Sync` so one tool can be shared by every rayon worker.
pub trait ExternalTool: Sync {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError>;

    /// [`run`](Self::run), then [`ToolOutput::check`].
    fn run_checked(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        self.run(invocation)?.check(&invocation.program)
    }
}

impl<T: ExternalTool + ?Sized> ExternalTool for &T {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        (**self).run(invocation)
    }
}
