//! External transcode collaborator
//!
//! Audio container/codec conversion is delegated to an external tool. The
//! contract is byte-oriented: the caller hands over the full input buffer, an
//! input/output extension pair and the tool arguments, and receives the
//! encoded bytes together with the tool's exit status.
//!
//! `FfmpegTranscoder` is the production implementation; tests substitute a
//! scripted implementation of [`Transcoder`].

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

/// Transcoder errors
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Failed to prepare transcode workspace: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("Failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    #[error("Transcoder exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },

    #[error("Transcoder produced no output")]
    EmptyOutput,

    #[error("Transcode worker failed: {0}")]
    Worker(String),
}

/// Tool arguments placed between the input and output file names
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TranscodeArgs(Vec<String>);

impl TranscodeArgs {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    /// Arguments for the exported audio deliverable: channel count, fixed
    /// bitrate, video stream stripped
    pub fn deliverable(channels: u16, bitrate_kbps: u32) -> Self {
        Self::new([
            "-ac".to_string(),
            channels.to_string(),
            "-b:a".to_string(),
            format!("{}k", bitrate_kbps),
            "-vn".to_string(),
        ])
    }

    /// Arguments converting an arbitrary upload to the standard audio
    /// stream. The codec follows from the output extension.
    pub fn normalize_upload() -> Self {
        Self::new(["-vn", "-ar", "44100"])
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// One transcode job
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: Vec<u8>,
    /// Extension of the input file, e.g. `wav`
    pub input_extension: String,
    /// Extension of the output file, e.g. `mp3`
    pub output_extension: String,
    pub args: TranscodeArgs,
}

/// Result of a transcode job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOutput {
    pub exit_status: i32,
    pub bytes: Vec<u8>,
}

impl TranscodeOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Output bytes when the tool succeeded and wrote something
    pub fn into_bytes(self) -> Result<Vec<u8>, TranscodeError> {
        if !self.success() {
            return Err(TranscodeError::NonZeroExit {
                status: self.exit_status,
                stderr: String::new(),
            });
        }
        if self.bytes.is_empty() {
            return Err(TranscodeError::EmptyOutput);
        }
        Ok(self.bytes)
    }
}

/// Capability interface of the transcode collaborator
///
/// Implementations block; callers run them on a blocking worker.
pub trait Transcoder: Send + Sync {
    fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeOutput, TranscodeError>;
}

/// Runs the `ffmpeg` command-line tool in a scratch directory
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeOutput, TranscodeError> {
        let workspace = tempfile::Builder::new().prefix("soundcharm_transcode_").tempdir()?;
        let input_path = workspace.path().join(format!("input.{}", request.input_extension));
        let output_path = workspace.path().join(format!("output.{}", request.output_extension));
        std::fs::write(&input_path, &request.input)?;

        log::info!(
            "transcode: {} bytes {} -> {} with {:?}",
            request.input.len(),
            request.input_extension,
            request.output_extension,
            request.args.as_slice()
        );

        let output = Command::new(&self.program)
            .arg("-hide_banner")
            .arg("-y")
            .arg("-i")
            .arg(&input_path)
            .args(request.args.as_slice())
            .arg(&output_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| TranscodeError::Launch {
                program: self.program.display().to_string(),
                message: e.to_string(),
            })?;

        // Killed by a signal reports no code
        let exit_status = output.status.code().unwrap_or(-1);
        if exit_status != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::warn!("transcode: exit status {}: {}", exit_status, stderr.trim());
            return Err(TranscodeError::NonZeroExit {
                status: exit_status,
                stderr: stderr.chars().take(500).collect(),
            });
        }

        let bytes = std::fs::read(&output_path)?;
        log::info!("transcode: produced {} bytes", bytes.len());
        Ok(TranscodeOutput { exit_status, bytes })
    }
}
