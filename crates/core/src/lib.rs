pub mod config;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod job;
pub mod metrics;
pub mod naming;
pub mod pipeline;
pub mod resolver;
pub mod sync;
pub mod testing;

pub use config::{
    load_config, load_config_from_env, load_config_from_str, validate_config, Config,
    ConfigError,
};
pub use downloader::{DownloadError, Downloader, DownloaderConfig, HttpDownloader};
pub use error::JobError;
pub use extractor::{
    AudioExtractor, AudioFormat, ExtractError, ExtractorConfig, FfmpegExtractor, TranscodeJob,
    TranscodeResult,
};
pub use job::{
    Job, JobEvent, JobEventKind, JobId, JobSnapshot, JobState, Progress, ProgressReporter,
    ProgressUpdate,
};
pub use naming::{sanitize_title, NameAllocator};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineStatus, StageStatus};
pub use resolver::{
    create_resolver, DirectResolver, ResolveError, ResolvedVideo, ResolverBackend,
    ResolverConfig, StreamLocator, VideoResolver, YtDlpResolver,
};
pub use sync::{AcquireError, FairSemaphore, ScopedPermit};
