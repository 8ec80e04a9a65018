//! Audio extraction stage.
//!
//! The [`AudioExtractor`] trait is the seam the pipeline's transcode stage
//! calls through. [`FfmpegExtractor`] is the production implementation: it
//! probes the downloaded media with ffprobe for its duration, then runs
//! ffmpeg with `-progress pipe:2` and turns `out_time_ms` lines into
//! progress positions.

mod config;
mod error;
mod ffmpeg;
mod traits;
mod types;

pub use config::ExtractorConfig;
pub use error::ExtractError;
pub use ffmpeg::FfmpegExtractor;
pub use traits::AudioExtractor;
pub use types::{AudioFormat, MediaInfo, TranscodeJob, TranscodeResult};
