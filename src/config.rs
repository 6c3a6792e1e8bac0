use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use vvenc_bus::config::Settings;
use vvenc_bus::logging::HostLogLevel;

/// Where the encoder library's own messages go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryLog {
    /// Warnings and errors to stderr, the rest to stdout.
    Stdio,
    /// Through the `log` facade, target `vvenc`.
    #[default]
    Log,
}

/// How the input file is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Packed planar frames in the encoder's pixel format, back to back.
    #[default]
    Raw,
    /// Anything FFmpeg can demux and decode; needs the `ffmpeg` feature.
    Ffmpeg,
}

/// One encode job, read from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub input: PathBuf,
    #[serde(default)]
    pub input_format: InputFormat,
    // forced FFmpeg demuxer, e.g. "rawvideo"
    #[serde(default)]
    pub demuxer: Option<String>,
    #[serde(default)]
    pub demuxer_options: BTreeMap<String, String>,
    /// Elementary stream output.
    pub output: PathBuf,
    #[serde(default)]
    pub settings: Settings,
    // None = whole input
    #[serde(default)]
    pub max_frames: Option<u64>,
    // overrides settings.log_level when present
    #[serde(default)]
    pub log_level: Option<HostLogLevel>,
    #[serde(default)]
    pub library_log: LibraryLog,
}

impl JobConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read job {}: {}", path.display(), e))?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> anyhow::Result<Self> {
        let mut job: JobConfig = serde_json::from_str(data)?;
        if let Some(level) = job.log_level {
            job.settings.log_level = level;
        }
        Ok(job)
    }
}
