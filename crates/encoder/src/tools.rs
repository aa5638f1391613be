use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{EncodeError, Result, ToolFailure};

/// Executables for the external collaborators the pipeline drives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolchain {
    /// Dimension probe (`ffprobe`)
    pub ffprobe: PathBuf,
    /// Transcoder (`ffmpeg`)
    pub ffmpeg: PathBuf,
    /// Crop-scan tool (`HandBrakeCLI`)
    pub handbrake: PathBuf,
    /// Container remuxer (`mkvmerge`)
    pub mkvmerge: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg: PathBuf::from("ffmpeg"),
            handbrake: PathBuf::from("HandBrakeCLI"),
            mkvmerge: PathBuf::from("mkvmerge"),
        }
    }
}

/// Exit status and captured streams of one tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn into_failure(self, tool: &str) -> ToolFailure {
        ToolFailure {
            tool: tool.to_string(),
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

/// Run an external tool to completion and capture its output.
///
/// A non-zero exit is not an error here; callers decide how to classify it.
/// Only a failure to spawn or wait on the process is returned as `Err`.
pub async fn run_tool(program: &Path, args: &[OsString]) -> Result<ToolOutput> {
    debug!(
        "Executing: '{} {}'",
        program.display(),
        args.iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| EncodeError::io(program, e))?;

    let result = ToolOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };

    debug!(
        "{} exit code: {:?}, stdout length: {}, stderr length: {}",
        program.display(),
        result.exit_code,
        result.stdout.len(),
        result.stderr.len()
    );

    Ok(result)
}
