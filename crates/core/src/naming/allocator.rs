//! Collision-free output path reservation.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::sync::Mutex;
use tracing::debug;

use super::sanitize::sanitize_title;

/// Highest numeric suffix tried before giving up on a title.
const MAX_CANDIDATES: u32 = 10_000;

/// Reserves output paths by creating empty placeholder files.
///
/// All reservations made through one allocator are serialized, so two jobs
/// with the same title never probe the same candidate concurrently. The
/// placeholder is created before the lock is released, which makes a
/// reserved name visible to every later probe, including ones from other
/// processes.
#[derive(Debug, Default)]
pub struct NameAllocator {
    lock: Mutex<()>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `directory/<title>.<extension>`, or the first free
    /// `<title> (N).<extension>` for N = 2, 3, ...
    ///
    /// The directory is created if missing. The returned path exists as a
    /// zero-byte file owned by the caller, who must remove it if the real
    /// content never arrives.
    pub async fn reserve(
        &self,
        directory: &Path,
        title: &str,
        extension: &str,
    ) -> io::Result<PathBuf> {
        let stem = sanitize_title(title);
        let extension = extension.trim_start_matches('.');

        let _guard = self.lock.lock().await;
        fs::create_dir_all(directory).await?;

        for n in 1..=MAX_CANDIDATES {
            let path = directory.join(candidate_name(&stem, n, extension));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => {
                    debug!(path = %path.display(), "Reserved output path");
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!(
                "no free name for '{}' in {} after {} candidates",
                stem,
                directory.display(),
                MAX_CANDIDATES
            ),
        ))
    }
}

fn candidate_name(stem: &str, n: u32, extension: &str) -> String {
    match (n, extension.is_empty()) {
        (1, true) => stem.to_string(),
        (1, false) => format!("{}.{}", stem, extension),
        (n, true) => format!("{} ({})", stem, n),
        (n, false) => format!("{} ({}).{}", stem, n, extension),
    }
}
