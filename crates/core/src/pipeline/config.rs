//! Configuration for the pipeline module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::extractor::AudioFormat;

/// Configuration for the operation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Where finished audio files are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Output format for jobs submitted without an explicit one.
    #[serde(default)]
    pub format: AudioFormat,

    /// Concurrent downloads.
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,

    /// Concurrent transcodes. 0 picks half the available cores (at least one).
    #[serde(default)]
    pub transcode_concurrency: usize,

    /// Directory for in-progress downloads.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Throughput sampling interval in milliseconds.
    #[serde(default = "default_throughput_interval")]
    pub throughput_interval_ms: u64,

    /// Capacity of the job event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_output_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join("Music").join("audiograb"),
        None => PathBuf::from("audiograb"),
    }
}

fn default_download_concurrency() -> usize {
    1
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("audiograb")
}

fn default_throughput_interval() -> u64 {
    1000
}

fn default_event_buffer() -> usize {
    256
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            format: AudioFormat::default(),
            download_concurrency: default_download_concurrency(),
            transcode_concurrency: 0,
            temp_dir: default_temp_dir(),
            throughput_interval_ms: default_throughput_interval(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl PipelineConfig {
    /// Config rooted in `dir`: output in `dir/out`, temp files in `dir/tmp`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            output_dir: dir.join("out"),
            temp_dir: dir.join("tmp"),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_concurrency(mut self, download: usize, transcode: usize) -> Self {
        self.download_concurrency = download;
        self.transcode_concurrency = transcode;
        self
    }

    /// Download stage capacity, at least one.
    pub fn effective_download_concurrency(&self) -> usize {
        self.download_concurrency.max(1)
    }

    /// Transcode stage capacity after resolving the automatic setting.
    pub fn effective_transcode_concurrency(&self) -> usize {
        if self.transcode_concurrency > 0 {
            return self.transcode_concurrency;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cores / 2).max(1)
    }
}
