//! Encode profile and per-stream audio planning.
//!
//! The profile is fixed for the lifetime of the process: one target
//! height, one video codec/preset/quality tuple, one audio bitrate.
//! Audio streams keep their codec family where the policy table knows it
//! and fall back to AAC otherwise.

use serde::{Deserialize, Serialize};

/// Target encode parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeProfile {
    /// Output height in pixels; width follows the aspect ratio
    #[serde(default = "default_height")]
    pub height: u32,

    /// ffmpeg video encoder name
    #[serde(default = "default_video_codec")]
    pub video_codec: String,

    /// Encoder preset
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Constant rate factor
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Bitrate for lossy audio targets (ffmpeg syntax, e.g. "128k")
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// Copy subtitle streams verbatim
    #[serde(default = "default_copy_subtitles")]
    pub copy_subtitles: bool,
}

fn default_height() -> u32 {
    720
}
fn default_video_codec() -> String {
    "libx264".to_string()
}
fn default_preset() -> String {
    "fast".to_string()
}
fn default_crf() -> u8 {
    23
}
fn default_audio_bitrate() -> String {
    "128k".to_string()
}
fn default_copy_subtitles() -> bool {
    true
}

impl Default for EncodeProfile {
    fn default() -> Self {
        Self {
            height: default_height(),
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: default_crf(),
            audio_bitrate: default_audio_bitrate(),
            copy_subtitles: default_copy_subtitles(),
        }
    }
}

/// One audio stream as reported by the probe
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProbedStream {
    /// Absolute stream index in the container
    pub index: u32,

    /// Codec short name (e.g. "aac", "flac")
    #[serde(default)]
    pub codec_name: String,
}

impl ProbedStream {
    pub fn new(index: u32, codec_name: impl Into<String>) -> Self {
        Self {
            index,
            codec_name: codec_name.into(),
        }
    }
}

/// Encoding decision for a single audio stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStreamPlan {
    /// Absolute stream index from the probe
    pub stream_index: u32,

    /// Position among the audio streams; ffmpeg's `a:N` specifier
    pub audio_ordinal: usize,

    /// Source codec as probed (lowercased)
    pub source_codec: String,

    /// ffmpeg encoder to use
    pub target_codec: String,

    /// Bitrate, absent for lossless targets
    pub target_bitrate: Option<String>,
}

impl AudioStreamPlan {
    /// Encoder arguments for this stream
    pub fn args(&self) -> Vec<String> {
        let n = self.audio_ordinal;
        let mut args = vec![format!("-c:a:{}", n), self.target_codec.clone()];
        if let Some(ref rate) = self.target_bitrate {
            args.push(format!("-b:a:{}", n));
            args.push(rate.clone());
        }
        args
    }
}

/// Map a source codec to (encoder, is_lossless)
fn target_for(source_codec: &str) -> (&'static str, bool) {
    match source_codec {
        "aac" => ("aac", false),
        "opus" => ("libopus", false),
        "mp3" => ("libmp3lame", false),
        "flac" => ("flac", true),
        _ => ("aac", false),
    }
}

/// Build the audio plan for every probed stream, in probe order
pub fn plan_audio_streams(streams: &[ProbedStream], profile: &EncodeProfile) -> Vec<AudioStreamPlan> {
    streams
        .iter()
        .enumerate()
        .map(|(ordinal, stream)| {
            let source_codec = stream.codec_name.to_ascii_lowercase();
            let (target, lossless) = target_for(&source_codec);
            AudioStreamPlan {
                stream_index: stream.index,
                audio_ordinal: ordinal,
                source_codec,
                target_codec: target.to_string(),
                target_bitrate: (!lossless).then(|| profile.audio_bitrate.clone()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_mapping_with_fallback() {
        let streams = vec![
            ProbedStream::new(0, "aac"),
            ProbedStream::new(1, "flac"),
            ProbedStream::new(2, "unknown"),
        ];

        let plan = plan_audio_streams(&streams, &EncodeProfile::default());

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].target_codec, "aac");
        assert_eq!(plan[0].target_bitrate.as_deref(), Some("128k"));
        assert_eq!(plan[1].target_codec, "flac");
        assert_eq!(plan[1].target_bitrate, None);
        assert_eq!(plan[2].target_codec, "aac");
        assert_eq!(plan[2].target_bitrate.as_deref(), Some("128k"));
    }

    #[test]
    fn test_opus_and_mp3_keep_their_family() {
        let streams = vec![ProbedStream::new(1, "OPUS"), ProbedStream::new(2, "mp3")];
        let plan = plan_audio_streams(&streams, &EncodeProfile::default());

        assert_eq!(plan[0].source_codec, "opus");
        assert_eq!(plan[0].target_codec, "libopus");
        assert_eq!(plan[1].target_codec, "libmp3lame");
    }

    #[test]
    fn test_args_use_audio_ordinal_not_stream_index() {
        // Video at index 0, audio at 1 and 2
        let streams = vec![ProbedStream::new(1, "aac"), ProbedStream::new(2, "flac")];
        let plan = plan_audio_streams(&streams, &EncodeProfile::default());

        assert_eq!(plan[0].args(), vec!["-c:a:0", "aac", "-b:a:0", "128k"]);
        assert_eq!(plan[1].args(), vec!["-c:a:1", "flac"]);
        assert_eq!(plan[1].stream_index, 2);
    }

    #[test]
    fn test_profile_defaults_from_partial_yaml() {
        let profile: EncodeProfile = serde_yaml::from_str("height: 480\ncrf: 28\n").unwrap();
        assert_eq!(profile.height, 480);
        assert_eq!(profile.crf, 28);
        assert_eq!(profile.video_codec, "libx264");
        assert_eq!(profile.audio_bitrate, "128k");
        assert!(profile.copy_subtitles);
    }
}
