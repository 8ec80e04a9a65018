use super::{types::Config, ConfigError};

/// Lowest and highest accepted `extractor.bitrate_kbps`.
const BITRATE_RANGE: std::ops::RangeInclusive<u32> = 8..=512;

/// Validate configuration
/// Currently validates:
/// - Download concurrency is at least 1 (transcode 0 means automatic)
/// - Throughput interval and event buffer are not 0
/// - Download buffer size is not 0
/// - Bitrate is within 8..=512 kbps
/// - The playlist URL pattern is a valid regex
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let pipeline = &config.pipeline;
    if pipeline.download_concurrency == 0 {
        return Err(invalid("pipeline.download_concurrency must be at least 1"));
    }
    if pipeline.throughput_interval_ms == 0 {
        return Err(invalid("pipeline.throughput_interval_ms cannot be 0"));
    }
    if pipeline.event_buffer == 0 {
        return Err(invalid("pipeline.event_buffer cannot be 0"));
    }

    if config.downloader.buffer_size == 0 {
        return Err(invalid("downloader.buffer_size cannot be 0"));
    }

    if !BITRATE_RANGE.contains(&config.extractor.bitrate_kbps) {
        return Err(ConfigError::ValidationError(format!(
            "extractor.bitrate_kbps must be between {} and {}, got {}",
            BITRATE_RANGE.start(),
            BITRATE_RANGE.end(),
            config.extractor.bitrate_kbps
        )));
    }

    let pattern = &config.resolver.playlist_url_pattern;
    if let Err(e) = regex_lite::Regex::new(pattern) {
        return Err(ConfigError::ValidationError(format!(
            "resolver.playlist_url_pattern is not a valid regex: {}",
            e
        )));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
