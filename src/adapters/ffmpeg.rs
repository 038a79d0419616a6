//! ffmpeg transcoder.
//!
//! Shells out to `ffprobe` to list audio streams, builds one argument set
//! for the whole file (scaled video, copied subtitles, per-stream audio
//! policy), then runs `ffmpeg` with machine-readable progress on stdout.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::process::{abort_tail, join_tail, spawn_tail_reader, wait_or_kill};
use super::{ProgressSink, Transcoder};
use crate::domain::{plan_audio_streams, AudioStreamPlan, EncodeProfile, ProbedStream};

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

/// Container used when the input has no extension to copy
const FALLBACK_EXTENSION: &str = "mkv";

/// Errors that can occur while encoding
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ffprobe failed on {path}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("ffmpeg exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("IO error reading encoder output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode cancelled")]
    Cancelled,
}

/// ffprobe `-of json` output
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbedStream>,
}

/// Transcoder backed by the ffmpeg CLI tools
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new(FFMPEG, FFPROBE)
    }
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// List the audio streams of `input` (read-only inspection)
    pub async fn probe_audio(&self, input: &Path) -> Result<Vec<ProbedStream>, EncodeError> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-select_streams", "a"])
            .args(["-show_entries", "stream=index,codec_name"])
            .args(["-of", "json"])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| EncodeError::Spawn {
                program: self.ffprobe_path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(EncodeError::Probe {
                path: input.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Self::parse_probe(&output.stdout).map_err(|reason| EncodeError::Probe {
            path: input.to_path_buf(),
            reason,
        })
    }

    /// Parse ffprobe JSON into stream records
    pub fn parse_probe(json: &[u8]) -> Result<Vec<ProbedStream>, String> {
        serde_json::from_slice::<ProbeOutput>(json)
            .map(|p| p.streams)
            .map_err(|e| format!("invalid probe JSON: {}", e))
    }

    /// Full ffmpeg argument list for one encode
    pub fn build_args(
        input: &Path,
        output: &Path,
        profile: &EncodeProfile,
        audio: &[AudioStreamPlan],
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-nostdin",
            "-y",
            "-loglevel",
            "error",
            "-progress",
            "pipe:1",
            "-nostats",
            "-i",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(input.as_os_str().to_os_string());

        let maps: &[&str] = if profile.copy_subtitles {
            &["0:v:0?", "0:a?", "0:s?"]
        } else {
            &["0:v:0?", "0:a?"]
        };
        for map in maps {
            args.push("-map".into());
            args.push((*map).into());
        }

        for (flag, value) in [
            ("-vf", format!("scale=-2:{}", profile.height)),
            ("-c:v", profile.video_codec.clone()),
            ("-preset", profile.preset.clone()),
            ("-crf", profile.crf.to_string()),
        ] {
            args.push(flag.into());
            args.push(value.into());
        }

        if profile.copy_subtitles {
            args.push("-c:s".into());
            args.push("copy".into());
        } else {
            args.push("-sn".into());
        }

        for plan in audio {
            args.extend(plan.args().into_iter().map(OsString::from));
        }

        args.push(output.as_os_str().to_os_string());
        args
    }

    /// Output path: `output_stem` plus the input's extension
    pub fn output_path(input: &Path, output_stem: &Path) -> PathBuf {
        let ext = input
            .extension()
            .filter(|e| !e.is_empty())
            .unwrap_or(OsStr::new(FALLBACK_EXTENSION));

        let mut name = output_stem
            .file_name()
            .map(OsStr::to_os_string)
            .unwrap_or_else(|| OsString::from("output"));
        name.push(".");
        name.push(ext);
        output_stem.with_file_name(name)
    }

    /// Whether an encoder output line carries a frame count or elapsed time
    pub fn is_progress_line(line: &str) -> bool {
        line.contains("frame=") || line.contains("time=")
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output_stem: &Path,
        profile: &EncodeProfile,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, EncodeError> {
        let streams = self.probe_audio(input).await?;
        let audio = plan_audio_streams(&streams, profile);
        for plan in &audio {
            debug!(
                stream = plan.stream_index,
                from = %plan.source_codec,
                to = %plan.target_codec,
                bitrate = plan.target_bitrate.as_deref().unwrap_or("lossless"),
                "Audio stream plan"
            );
        }

        let output = Self::output_path(input, output_stem);
        let args = Self::build_args(input, &output, profile, &audio);
        info!(input = %input.display(), output = %output.display(), "Encoding");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EncodeError::Spawn {
                program: self.ffmpeg_path.clone(),
                source,
            })?;

        let stderr = child.stderr.take().map(|s| spawn_tail_reader(s, "ffmpeg"));

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = tokio::select! {
                    line = lines.next_line() => line?,
                    _ = cancel.cancelled() => break,
                };
                match line {
                    Some(line) if Self::is_progress_line(&line) => progress.progress(line.trim()),
                    Some(_) => {}
                    None => break,
                }
            }
        }

        let Some(status) = wait_or_kill(&mut child, cancel).await? else {
            abort_tail(stderr);
            return Err(EncodeError::Cancelled);
        };
        let stderr = join_tail(stderr).await;

        if !status.success() {
            return Err(EncodeError::Failed { status, stderr });
        }
        Ok(output)
    }
}
