//! Merge freshly scanned items with their persisted records.

use uuid::Uuid;

use crate::db::{RecordStore, StoreError};
use crate::models::{Item, PersistedRecord};
use crate::scanner::dir::millis_since_epoch;
use crate::services::nfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to insert '{name}': {source}")]
    Insert {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to load '{name}': {source}")]
    Read {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to update '{name}': {source}")]
    Update {
        name: String,
        #[source]
        source: StoreError,
    },
}

impl SyncError {
    /// A new item that could not be persisted. Everything else only
    /// affects the one item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Insert { .. })
    }
}

/// Reconcile `item` with the store, filling in persisted metadata and
/// writing back only when something changed.
pub async fn sync_item<S: RecordStore>(store: &S, item: &mut Item) -> Result<SyncOutcome, SyncError> {
    let record = match store.get_by_name(&item.name).await {
        Ok(record) => record,
        Err(StoreError::NotFound) => {
            refresh_from_nfo(item).await;
            item.id = Uuid::new_v4().to_string();
            store
                .insert(&PersistedRecord::from_item(item))
                .await
                .map_err(|source| SyncError::Insert {
                    name: item.name.clone(),
                    source,
                })?;
            tracing::debug!("Added '{}' to the database", item.name);
            return Ok(SyncOutcome::Inserted);
        }
        Err(source) => {
            return Err(SyncError::Read {
                name: item.name.clone(),
                source,
            })
        }
    };

    let mut dirty = false;

    item.id = record.id.clone();
    item.genre = record.genres();
    item.rating = record.rating as f32;
    item.votes = record.votes;
    item.nfo_time = record.nfotime;

    if record.year == 0 && item.year > 0 {
        dirty = true;
    } else {
        item.year = record.year;
    }

    if item.first_video == 0 {
        item.first_video = record.firstvideo;
    }
    if item.last_video == 0 {
        item.last_video = record.lastvideo;
    }
    if item.first_video != record.firstvideo || item.last_video != record.lastvideo {
        dirty = true;
    }

    if refresh_from_nfo(item).await {
        dirty = true;
    }

    if !dirty {
        return Ok(SyncOutcome::Unchanged);
    }

    store
        .update(&PersistedRecord::from_item(item))
        .await
        .map_err(|source| SyncError::Update {
            name: item.name.clone(),
            source,
        })?;
    tracing::debug!("Updated '{}' in the database", item.name);
    Ok(SyncOutcome::Updated)
}

/// Re-read the item's NFO if it changed since `nfo_time`. Returns true if
/// the item's metadata was replaced.
async fn refresh_from_nfo(item: &mut Item) -> bool {
    let Some(path) = item.nfo_path.as_deref() else {
        return false;
    };

    let mtime = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.modified().ok().and_then(millis_since_epoch).unwrap_or(0),
        Err(e) => {
            tracing::debug!("stat {}: {}", path.display(), e);
            return false;
        }
    };
    if item.nfo_time != 0 && item.nfo_time == mtime {
        return false;
    }

    let nfo = match nfo::read_nfo(path).await {
        Ok(nfo) => nfo,
        Err(e) => {
            tracing::warn!("Ignoring NFO {}: {}", path.display(), e);
            return false;
        }
    };

    item.nfo_time = mtime;
    item.genre = nfo.genre;
    item.rating = nfo.rating;
    item.votes = nfo.votes;
    if nfo.year != 0 {
        item.year = nfo.year;
    }
    true
}
