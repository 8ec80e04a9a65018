//! FFmpeg-based audio extractor.

use async_trait::async_trait;
use regex_lite::Regex;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::ExtractorConfig;
use super::error::ExtractError;
use super::traits::AudioExtractor;
use super::types::{MediaInfo, TranscodeJob, TranscodeResult};
use crate::job::ProgressReporter;

/// Extractor that shells out to ffmpeg and ffprobe.
pub struct FfmpegExtractor {
    config: ExtractorConfig,
}

impl FfmpegExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ExtractorConfig::default())
    }

    /// Builds ffmpeg arguments for an audio-only transcode.
    fn build_args(&self, job: &TranscodeJob) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(), // The output is a placeholder we own
            "-i".to_string(),
            job.input.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-c:a".to_string(),
            job.format.ffmpeg_codec().to_string(),
        ];

        if !job.format.is_lossless() {
            args.extend(["-b:a".to_string(), format!("{}k", self.config.bitrate_kbps)]);
        }

        if let Some(title) = &job.title {
            args.extend(["-metadata".to_string(), format!("title={}", title)]);
        }

        args.extend([
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
            "-progress".to_string(),
            "pipe:2".to_string(),
        ]);

        args.extend(self.config.extra_ffmpeg_args.iter().cloned());
        args.push(job.output.to_string_lossy().to_string());

        args
    }

    /// Parses ffprobe JSON output.
    fn parse_probe_output(output: &str) -> Result<MediaInfo, ExtractError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            format_name: String,
            duration: Option<String>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            codec_name: Option<String>,
        }

        let probe: ProbeOutput =
            serde_json::from_str(output).map_err(|e| ExtractError::ParseError {
                reason: format!("Failed to parse ffprobe output: {}", e),
            })?;

        let audio_stream = probe.streams.iter().find(|s| s.codec_type == "audio");

        Ok(MediaInfo {
            duration_secs: probe
                .format
                .duration
                .as_deref()
                .and_then(|d| d.parse::<f64>().ok())
                .unwrap_or(0.0),
            format: probe
                .format
                .format_name
                .split(',')
                .next()
                .unwrap_or("unknown")
                .to_string(),
            audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
            has_audio: audio_stream.is_some(),
        })
    }

    /// Probes a media file with ffprobe.
    pub async fn probe(&self, path: &Path) -> Result<MediaInfo, ExtractError> {
        if !path.exists() {
            return Err(ExtractError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExtractError::FfprobeNotFound {
                        path: self.config.ffprobe_path.clone(),
                    }
                } else {
                    ExtractError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(ExtractError::probe_failed(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Self::parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    fn spawn_ffmpeg(&self, args: &[String]) -> Result<Child, ExtractError> {
        Command::new(&self.config.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExtractError::FfmpegNotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    ExtractError::Io(e)
                }
            })
    }

    async fn kill(child: &mut Child) {
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill ffmpeg");
        }
    }
}

/// Extracts the `out_time_ms` value (microseconds, despite the name) from an
/// ffmpeg `-progress` line.
fn parse_out_time_us(re: &Regex, line: &str) -> Option<u64> {
    re.captures(line)?.get(1)?.as_str().parse::<u64>().ok()
}

#[async_trait]
impl AudioExtractor for FfmpegExtractor {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn transcode(
        &self,
        job: &TranscodeJob,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<TranscodeResult, ExtractError> {
        let start = Instant::now();

        let duration_us = match self.probe(&job.input).await {
            Ok(info) if info.duration_secs > 0.0 => Some((info.duration_secs * 1_000_000.0) as u64),
            Ok(_) => None,
            Err(e @ ExtractError::InputNotFound { .. }) => return Err(e),
            Err(e) => {
                debug!(error = %e, "Probe failed, transcoding without a known duration");
                None
            }
        };
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        progress.report_position(0, duration_us);

        let args = self.build_args(job);
        debug!(args = ?args, "Running ffmpeg");
        let mut child = self.spawn_ffmpeg(&args)?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractError::conversion_failed("ffmpeg stderr not captured", None))?;
        let mut reader = BufReader::new(stderr).lines();

        let time_regex = Regex::new(r"out_time_ms=(\d+)").ok();
        let mut error_output = String::new();

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    Self::kill(&mut child).await;
                    return Err(ExtractError::Cancelled);
                }
                line = reader.next_line() => line?,
            };
            let Some(line) = line else { break };

            if line.contains("Error") || line.contains("error") {
                error_output.push_str(&line);
                error_output.push('\n');
            }

            if line == "progress=end" {
                if let Some(max) = duration_us {
                    progress.report_position(max, Some(max));
                }
            } else if let Some(us) = time_regex
                .as_ref()
                .and_then(|re| parse_out_time_us(re, &line))
            {
                progress.report_position(us, duration_us);
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Self::kill(&mut child).await;
                return Err(ExtractError::Cancelled);
            }
            status = child.wait() => status?,
        };

        if !status.success() {
            return Err(ExtractError::conversion_failed(
                format!("FFmpeg exited with code: {:?}", status.code()),
                (!error_output.is_empty()).then_some(error_output),
            ));
        }

        let output_meta = tokio::fs::metadata(&job.output).await?;
        if output_meta.len() == 0 {
            return Err(ExtractError::conversion_failed("Output file is empty", None));
        }

        Ok(TranscodeResult {
            output_path: job.output.clone(),
            output_size_bytes: output_meta.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn validate(&self) -> Result<(), ExtractError> {
        for (path, missing) in [
            (
                &self.config.ffmpeg_path,
                ExtractError::FfmpegNotFound {
                    path: self.config.ffmpeg_path.clone(),
                },
            ),
            (
                &self.config.ffprobe_path,
                ExtractError::FfprobeNotFound {
                    path: self.config.ffprobe_path.clone(),
                },
            ),
        ] {
            if let Err(e) = Command::new(path).arg("-version").output().await {
                if e.kind() == std::io::ErrorKind::NotFound {
                    return Err(missing);
                }
                return Err(ExtractError::Io(e));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::AudioFormat;
    use std::path::PathBuf;

    fn job(format: AudioFormat) -> TranscodeJob {
        TranscodeJob {
            input: PathBuf::from("/tmp/in.download"),
            output: PathBuf::from("/music/Song.out"),
            format,
            title: Some("Song".to_string()),
        }
    }

    #[test]
    fn test_build_args_lossy() {
        let extractor = FfmpegExtractor::new(ExtractorConfig::default().with_bitrate(256));
        let args = extractor.build_args(&job(AudioFormat::Mp3));

        assert_eq!(&args[..4], ["-y", "-i", "/tmp/in.download", "-vn"]);
        assert!(args.windows(2).any(|w| w == ["-c:a", "libmp3lame"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "256k"]));
        assert!(args.windows(2).any(|w| w == ["-metadata", "title=Song"]));
        assert!(args.windows(2).any(|w| w == ["-progress", "pipe:2"]));
        assert_eq!(args.last().map(String::as_str), Some("/music/Song.out"));
    }

    #[test]
    fn test_build_args_lossless_has_no_bitrate() {
        let extractor = FfmpegExtractor::with_defaults();
        let args = extractor.build_args(&job(AudioFormat::Flac));

        assert!(args.windows(2).any(|w| w == ["-c:a", "flac"]));
        assert!(!args.contains(&"-b:a".to_string()));
    }

    #[test]
    fn test_extra_args_precede_output() {
        let mut config = ExtractorConfig::default();
        config.extra_ffmpeg_args = vec!["-ac".to_string(), "2".to_string()];
        let args = FfmpegExtractor::new(config).build_args(&job(AudioFormat::Opus));

        let n = args.len();
        assert_eq!(&args[n - 3..], ["-ac", "2", "/music/Song.out"]);
    }

    #[test]
    fn test_parse_out_time() {
        let re = Regex::new(r"out_time_ms=(\d+)").unwrap();
        assert_eq!(parse_out_time_us(&re, "out_time_ms=1500000"), Some(1_500_000));
        assert_eq!(parse_out_time_us(&re, "out_time=00:00:01.500000"), None);
        assert_eq!(parse_out_time_us(&re, "speed=1.5x"), None);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{
            "format": {
                "filename": "clip.webm",
                "format_name": "matroska,webm",
                "duration": "212.4"
            },
            "streams": [
                { "codec_type": "video", "codec_name": "vp9" },
                { "codec_type": "audio", "codec_name": "opus" }
            ]
        }"#;

        let info = FfmpegExtractor::parse_probe_output(json).unwrap();
        assert_eq!(info.format, "matroska");
        assert!((info.duration_secs - 212.4).abs() < 0.01);
        assert_eq!(info.audio_codec.as_deref(), Some("opus"));
        assert!(info.has_audio);
    }

    #[test]
    fn test_parse_probe_output_rejects_garbage() {
        assert!(matches!(
            FfmpegExtractor::parse_probe_output("not json"),
            Err(ExtractError::ParseError { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_input_is_reported() {
        let extractor = FfmpegExtractor::with_defaults();
        let mut job = job(AudioFormat::Mp3);
        job.input = PathBuf::from("/nonexistent/audiograb/input.download");

        let result = extractor
            .transcode(&job, &ProgressReporter::noop(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ExtractError::InputNotFound { .. })));
    }
}
