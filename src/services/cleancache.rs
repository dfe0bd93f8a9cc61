//! Background sweep that deletes image cache files whose source is gone.

use regex::Regex;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::scanner::dir::FileIdentity;
use crate::services::imagecache::image_content_type;

/// `<dev>.<ino>` prefix of a cache file name
static RE_CACHE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{8,16}\.[0-9a-f]{16}$").unwrap());

/// Throttling between filesystem operations
#[derive(Debug, Clone, Copy, Default)]
pub struct Pauses {
    pub entry: Duration,
    pub dir: Duration,
}

fn pause(d: Duration) {
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}

/// Identities of every image under `roots`. Returns None if the walk did
/// not see everything, either because it was cancelled or because part of
/// a tree could not be read.
pub fn live_identities(
    roots: &[PathBuf],
    pauses: Pauses,
    cancel: &CancellationToken,
) -> Option<HashSet<String>> {
    let mut live = HashSet::new();

    for root in roots {
        for entry in walkdir::WalkDir::new(root).follow_links(true) {
            if cancel.is_cancelled() {
                return None;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Incomplete walk of {}: {}", root.display(), e);
                    return None;
                }
            };
            if entry.file_type().is_dir() {
                pause(pauses.dir);
                continue;
            }
            pause(pauses.entry);

            if image_content_type(entry.path()).is_none() {
                continue;
            }
            if let Some(id) = entry.metadata().ok().as_ref().and_then(FileIdentity::of) {
                live.insert(id.to_string());
            }
        }
    }

    Some(live)
}

/// Remove cache files whose identity prefix is not in `live`. Names that
/// don't look like cache files are left alone.
pub fn sweep_cache(
    cache_dir: &Path,
    live: &HashSet<String>,
    pauses: Pauses,
    cancel: &CancellationToken,
) -> io::Result<usize> {
    let mut removed = 0;

    for entry in std::fs::read_dir(cache_dir)? {
        if cancel.is_cancelled() {
            break;
        }
        pause(pauses.entry);

        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let prefix = name.split(':').next().unwrap_or(name);
        if !RE_CACHE_NAME.is_match(prefix) || live.contains(prefix) {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                tracing::debug!("Removed orphaned cache file {}", name);
                removed += 1;
            }
            Err(e) => tracing::warn!("Failed to remove cache file {}: {}", name, e),
        }
    }

    Ok(removed)
}

/// One full pass. Ok(None) means the pass was skipped because a root or
/// the cache dir is unavailable, or shutdown started mid-walk.
pub fn reconcile_once(
    roots: &[PathBuf],
    cache_dir: &Path,
    pauses: Pauses,
    cancel: &CancellationToken,
) -> io::Result<Option<usize>> {
    if !cache_dir.is_dir() {
        return Ok(None);
    }
    if let Some(missing) = roots.iter().find(|r| !r.is_dir()) {
        tracing::debug!("Source root {} unavailable", missing.display());
        return Ok(None);
    }

    let Some(live) = live_identities(roots, pauses, cancel) else {
        return Ok(None);
    };
    sweep_cache(cache_dir, &live, pauses, cancel).map(Some)
}

/// Reconcile every `interval` until cancelled.
pub async fn run(
    roots: Vec<PathBuf>,
    cache_dir: PathBuf,
    interval: Duration,
    pauses: Pauses,
    cancel: CancellationToken,
) {
    tracing::info!(
        "Cache reconciler started (interval: {} minutes)",
        interval.as_secs() / 60
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Cache reconciler received shutdown signal");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                let roots = roots.clone();
                let cache_dir = cache_dir.clone();
                let token = cancel.clone();
                let pass = tokio::task::spawn_blocking(move || {
                    reconcile_once(&roots, &cache_dir, pauses, &token)
                })
                .await;

                match pass {
                    Ok(Ok(Some(removed))) if removed > 0 => {
                        tracing::info!("Removed {} orphaned image cache files", removed);
                    }
                    Ok(Ok(Some(_))) => tracing::debug!("Image cache is clean"),
                    Ok(Ok(None)) => tracing::debug!("Skipped image cache reconcile"),
                    Ok(Err(e)) => tracing::warn!("Image cache reconcile failed: {}", e),
                    Err(e) => tracing::warn!("Image cache reconcile task panicked: {}", e),
                }
            }
        }
    }
}
