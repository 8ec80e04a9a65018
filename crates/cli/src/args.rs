use std::path::{Path, PathBuf};

use audiograb_core::AudioFormat;
use clap::Parser;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "AUDIOGRAB_CONFIG";

/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "audiograb.toml";

/// Download the audio track of one or more video URLs.
#[derive(Debug, Parser)]
#[command(name = "audiograb", version, about)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output format (mp3, aac, ogg_vorbis, opus, flac, wav).
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<AudioFormat>,

    /// Directory for finished audio files.
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Print Prometheus metrics after the summary.
    #[arg(long)]
    pub metrics: bool,

    /// Source URLs. Read from stdin, one per line, when none are given.
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,
}

impl Args {
    /// Config file to load: `--config`, then the environment, then
    /// `audiograb.toml` if it exists. `None` means defaults only.
    pub fn config_path(&self) -> Option<PathBuf> {
        self.resolve_config_path(std::env::var_os(CONFIG_ENV).map(PathBuf::from))
    }

    fn resolve_config_path(&self, from_env: Option<PathBuf>) -> Option<PathBuf> {
        if let Some(path) = &self.config {
            return Some(path.clone());
        }
        if from_env.is_some() {
            return from_env;
        }
        let default = Path::new(DEFAULT_CONFIG_FILE);
        default.exists().then(|| default.to_path_buf())
    }
}

/// Keeps non-empty lines that are not `#` comments.
pub fn parse_url_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    lines
        .into_iter()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "audiograb",
            "--format",
            "flac",
            "--metrics",
            "https://v.example/1",
            "https://v.example/2",
        ])
        .unwrap();
        assert_eq!(args.format, Some(AudioFormat::Flac));
        assert!(args.metrics);
        assert_eq!(args.urls.len(), 2);
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(Args::try_parse_from(["audiograb", "--format", "midi"]).is_err());
    }

    #[test]
    fn test_config_path_precedence() {
        let args = Args::try_parse_from(["audiograb", "--config", "/etc/ag.toml"]).unwrap();
        assert_eq!(
            args.resolve_config_path(Some(PathBuf::from("/env.toml"))),
            Some(PathBuf::from("/etc/ag.toml"))
        );

        let args = Args::try_parse_from(["audiograb"]).unwrap();
        assert_eq!(
            args.resolve_config_path(Some(PathBuf::from("/env.toml"))),
            Some(PathBuf::from("/env.toml"))
        );
    }

    #[test]
    fn test_parse_url_lines() {
        let urls = parse_url_lines("  https://a\n\n# skip\nhttps://b  \n".lines());
        assert_eq!(urls, vec!["https://a", "https://b"]);
    }
}
