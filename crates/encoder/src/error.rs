use std::fmt;
use std::path::PathBuf;

/// Result type alias for the encoder core.
pub type Result<T> = std::result::Result<T, EncodeError>;

/// Captured diagnostics of an external tool that exited unsuccessfully.
#[derive(Debug, Clone)]
pub struct ToolFailure {
    pub tool: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "{} failed with return code {}", self.tool, code)?,
            None => write!(f, "{} was terminated by a signal", self.tool)?,
        }
        write!(
            f,
            "\n[STDERR]\n{}\n[STDOUT]\n{}",
            self.stderr.trim(),
            self.stdout.trim()
        )
    }
}

/// Errors raised by the transcode orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// Dimension query failed or its output did not parse as `<w>x<h>`.
    #[error("failed to probe dimensions of {}: {reason}", path.display())]
    ProbeFailed { path: PathBuf, reason: String },

    /// The transcoder exited non-zero.
    #[error("encode failed for {}: {failure}", path.display())]
    EncodeFailed { path: PathBuf, failure: ToolFailure },

    /// The container tool exited non-zero.
    #[error("remux failed for {}: {failure}", path.display())]
    RemuxFailed { path: PathBuf, failure: ToolFailure },

    #[error("unknown codec: {0} (expected one of h264, h265, hevc, vp9, av1)")]
    UnknownCodec(String),

    #[error("invalid encode profile: {0}")]
    InvalidProfile(String),

    /// Two inputs normalize to the same output name, or the name is taken.
    #[error("output name collision: {}", target.display())]
    OutputCollision { target: PathBuf, sources: Vec<PathBuf> },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file's pipeline failed and the batch was stopped.
    #[error("batch aborted at {}: {source}", path.display())]
    Aborted {
        path: PathBuf,
        #[source]
        source: Box<EncodeError>,
    },
}

impl EncodeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn probe_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ProbeFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Tool diagnostics attached to this error, if any.
    pub fn tool_failure(&self) -> Option<&ToolFailure> {
        match self {
            Self::EncodeFailed { failure, .. } | Self::RemuxFailed { failure, .. } => Some(failure),
            Self::Aborted { source, .. } => source.tool_failure(),
            _ => None,
        }
    }
}
