use serde::{Deserialize, Serialize};

use crate::downloader::DownloaderConfig;
use crate::extractor::ExtractorConfig;
use crate::pipeline::PipelineConfig;
use crate::resolver::ResolverConfig;

/// Root configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::AudioFormat;
    use crate::resolver::ResolverBackend;
    use std::path::PathBuf;

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.pipeline.download_concurrency, 1);
        assert_eq!(config.pipeline.format, AudioFormat::Mp3);
        assert_eq!(config.resolver.backend, ResolverBackend::YtDlp);
        assert_eq!(config.extractor.bitrate_kbps, 192);
    }

    #[test]
    fn test_deserialize_sections() {
        let toml = r#"
[pipeline]
output_dir = "/srv/audio"
format = "opus"
transcode_concurrency = 3

[resolver]
backend = "direct"

[downloader]
connect_timeout_secs = 5

[extractor]
ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
extra_ffmpeg_args = ["-ac", "2"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.pipeline.output_dir, PathBuf::from("/srv/audio"));
        assert_eq!(config.pipeline.format, AudioFormat::Opus);
        assert_eq!(config.pipeline.transcode_concurrency, 3);
        assert_eq!(config.pipeline.download_concurrency, 1);
        assert_eq!(config.resolver.backend, ResolverBackend::Direct);
        assert_eq!(config.downloader.connect_timeout_secs, 5);
        assert_eq!(
            config.extractor.ffmpeg_path,
            PathBuf::from("/opt/ffmpeg/bin/ffmpeg")
        );
        assert_eq!(config.extractor.extra_ffmpeg_args, vec!["-ac", "2"]);
    }

    #[test]
    fn test_unknown_format_fails() {
        let toml = r#"
[pipeline]
format = "midi"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }
}
