//! The published catalog: one immutable snapshot per rebuild, swapped in
//! atomically, plus the read queries the API serves from it.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::CollectionConfig;
use crate::db::RecordStore;
use crate::models::{Collection, CollectionSummary, Item};
use crate::scanner;
use crate::services::nfo;
use crate::services::sync::{self, SyncError, SyncOutcome};

/// A complete, never mutated view of every collection.
#[derive(Debug, Default)]
pub struct Catalog {
    pub collections: Vec<Arc<Collection>>,
}

impl Catalog {
    pub fn summaries(&self) -> Vec<CollectionSummary> {
        self.collections.iter().map(|c| c.summary()).collect()
    }

    pub fn collection(&self, name: &str) -> Option<&Arc<Collection>> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Lookup by the numeric id used in `/data/<id>` urls
    pub fn by_source(&self, source_id: usize) -> Option<&Arc<Collection>> {
        self.collections.iter().find(|c| c.source_id == source_id)
    }
}

/// Item summaries of a collection and its last-modified watermark.
pub fn items(coll: &Collection) -> (Vec<Item>, i64) {
    (
        coll.items.iter().map(Item::summary).collect(),
        coll.last_modified(),
    )
}

/// Genre name -> number of items carrying it.
pub fn genres(coll: &Collection) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for genre in coll.items.iter().flat_map(|i| &i.genre) {
        *counts.entry(genre.clone()).or_insert(0) += 1;
    }
    counts
}

/// Full item detail. NFOs are decoded into a private copy; the snapshot
/// is left untouched.
pub async fn item_detail(coll: &Collection, name: &str, with_nfo: bool) -> Option<Item> {
    let mut item = coll.item(name)?.clone();
    if !with_nfo {
        return Some(item);
    }

    if let Some(path) = item.nfo_path.as_deref() {
        match nfo::read_nfo(path).await {
            Ok(record) => item.nfo = Some(record),
            Err(e) => tracing::debug!("NFO {}: {}", path.display(), e),
        }
    }
    for episode in item.seasons.iter_mut().flat_map(|s| s.episodes.iter_mut()) {
        let Some(path) = episode.nfo_path.as_deref() else {
            continue;
        };
        match nfo::read_nfo(path).await {
            Ok(record) => episode.nfo = Some(record),
            Err(e) => tracing::debug!("NFO {}: {}", path.display(), e),
        }
    }
    Some(item)
}

pub struct CatalogStore {
    snapshot: RwLock<Arc<Catalog>>,
}

impl CatalogStore {
    /// Start with every configured collection present but empty.
    pub fn new(configs: &[CollectionConfig]) -> Self {
        let collections = configs
            .iter()
            .enumerate()
            .map(|(id, c)| Arc::new(Collection::empty(&c.name, c.kind, c.directory.clone(), id)))
            .collect();
        Self {
            snapshot: RwLock::new(Arc::new(Catalog { collections })),
        }
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace one collection. Readers holding an older snapshot keep
    /// seeing it unchanged.
    pub fn publish(&self, coll: Collection) {
        let mut current = self.snapshot.write().unwrap_or_else(|e| e.into_inner());

        let mut collections = current.collections.clone();
        let coll = Arc::new(coll);
        match collections.iter().position(|c| c.source_id == coll.source_id) {
            Some(pos) => collections[pos] = coll,
            None => collections.push(coll),
        }
        *current = Arc::new(Catalog { collections });
    }
}

/// Rebuild every collection from disk, sync its items with the store and
/// publish it. Only a failed insert of a new record is returned as an
/// error; other sync failures are logged and skipped.
pub async fn rebuild_all<S: RecordStore>(
    catalog: &CatalogStore,
    configs: &[CollectionConfig],
    store: &S,
    pace: Duration,
) -> Result<(), SyncError> {
    for (source_id, config) in configs.iter().enumerate() {
        let cfg = config.clone();
        let built = tokio::task::spawn_blocking(move || {
            scanner::build_collection(source_id, &cfg, pace)
        })
        .await;
        let mut coll = match built {
            Ok(coll) => coll,
            Err(e) => {
                tracing::error!("Scan of '{}' panicked: {}", config.name, e);
                continue;
            }
        };

        let (mut inserted, mut updated) = (0, 0);
        for item in coll.items.iter_mut() {
            match sync::sync_item(store, item).await {
                Ok(SyncOutcome::Inserted) => inserted += 1,
                Ok(SyncOutcome::Updated) => updated += 1,
                Ok(SyncOutcome::Unchanged) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!("Skipping sync: {}", e),
            }
        }

        tracing::info!(
            "Collection '{}': {} items, {} new, {} updated",
            coll.name,
            coll.items.len(),
            inserted,
            updated
        );
        catalog.publish(coll);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, SqliteRecordStore};
    use crate::models::CollectionKind;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    async fn store() -> SqliteRecordStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::migrate(&pool).await.unwrap();
        SqliteRecordStore::new(pool)
    }

    fn touch(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn shows_config(dir: &Path) -> CollectionConfig {
        CollectionConfig {
            name: "TV".to_string(),
            kind: CollectionKind::Shows,
            directory: dir.to_path_buf(),
        }
    }

    fn movies_config(dir: &Path) -> CollectionConfig {
        CollectionConfig {
            name: "Movies".to_string(),
            kind: CollectionKind::Movies,
            directory: dir.to_path_buf(),
        }
    }

    const MOVIE_NFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<movie>
  <title>Alien</title>
  <plot>In space no one can hear you scream.</plot>
  <rating>8.5</rating>
  <votes>1,000</votes>
  <genre>Horror / Sci Fi</genre>
</movie>"#;

    #[tokio::test]
    async fn test_rebuild_publishes_and_syncs() {
        let tmp = TempDir::new().unwrap();
        let movies = tmp.path().join("movies");
        touch(&movies.join("Alien (1979)/Alien.mkv"), "");
        touch(&movies.join("Alien (1979)/Alien.nfo"), MOVIE_NFO);
        touch(&movies.join("Heat (1995)/Heat.mp4"), "");
        let configs = vec![movies_config(&movies)];

        let catalog = CatalogStore::new(&configs);
        let before = catalog.snapshot();
        assert_eq!(before.summaries()[0].item_count, 0);

        let store = store().await;
        rebuild_all(&catalog, &configs, &store, Duration::ZERO)
            .await
            .unwrap();

        // the old snapshot is unaffected
        assert!(before.collections[0].items.is_empty());

        let snap = catalog.snapshot();
        let coll = snap.collection("Movies").unwrap();
        assert_eq!(coll.items.len(), 2);
        assert!(Arc::ptr_eq(coll, snap.by_source(0).unwrap()));

        let alien = coll.item("Alien (1979)").unwrap();
        assert!(!alien.id.is_empty());
        assert_eq!(alien.year, 1979);
        assert_eq!(alien.votes, 1000);
        assert!(alien.nfo.is_none());

        let record = store.get_by_name("Alien (1979)").await.unwrap();
        assert_eq!(record.id, alien.id);

        // a second rebuild keeps the ids
        rebuild_all(&catalog, &configs, &store, Duration::ZERO)
            .await
            .unwrap();
        let again = catalog.snapshot();
        let alien_again = again.collection("Movies").unwrap().item("Alien (1979)").unwrap();
        assert_eq!(alien_again.id, alien.id);
    }

    #[tokio::test]
    async fn test_queries() {
        let tmp = TempDir::new().unwrap();
        let movies = tmp.path().join("movies");
        touch(&movies.join("Alien (1979)/Alien.mkv"), "");
        touch(&movies.join("Alien (1979)/Alien.nfo"), MOVIE_NFO);
        touch(&movies.join("Heat (1995)/Heat.mp4"), "");
        let configs = vec![movies_config(&movies)];

        let catalog = CatalogStore::new(&configs);
        let store = store().await;
        rebuild_all(&catalog, &configs, &store, Duration::ZERO)
            .await
            .unwrap();

        let snap = catalog.snapshot();
        let coll = snap.collection("Movies").unwrap();

        let (list, watermark) = items(coll);
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|i| i.nfo.is_none() && i.seasons.is_empty()));
        assert_eq!(watermark, list.iter().map(|i| i.last_video).max().unwrap());

        let histogram = genres(coll);
        assert_eq!(histogram.get("Horror"), Some(&1));
        assert_eq!(histogram.get("Sci-Fi"), Some(&1));

        let detail = item_detail(coll, "Alien (1979)", true).await.unwrap();
        assert_eq!(detail.nfo.as_ref().unwrap().title.as_deref(), Some("Alien"));
        assert!(coll.item("Alien (1979)").unwrap().nfo.is_none());

        let plain = item_detail(coll, "Alien (1979)", false).await.unwrap();
        assert!(plain.nfo.is_none());
        assert!(item_detail(coll, "Missing", true).await.is_none());
        assert!(snap.collection("Nope").is_none());
    }

    #[tokio::test]
    async fn test_episode_nfo_decoded_into_copy() {
        let tmp = TempDir::new().unwrap();
        let shows = tmp.path().join("shows");
        touch(&shows.join("Show/S01/Show.s01e01.mp4"), "");
        touch(
            &shows.join("Show/S01/Show.s01e01.nfo"),
            "<episodedetails><title>Pilot</title></episodedetails>",
        );
        let configs = vec![shows_config(&shows)];

        let catalog = CatalogStore::new(&configs);
        let store = store().await;
        rebuild_all(&catalog, &configs, &store, Duration::ZERO)
            .await
            .unwrap();

        let snap = catalog.snapshot();
        let coll = snap.collection("TV").unwrap();
        let detail = item_detail(coll, "Show", true).await.unwrap();
        let ep = &detail.seasons[0].episodes[0];
        assert_eq!(ep.nfo.as_ref().unwrap().title.as_deref(), Some("Pilot"));

        let shared = &coll.item("Show").unwrap().seasons[0].episodes[0];
        assert!(shared.nfo.is_none());
    }

    #[tokio::test]
    async fn test_failed_insert_aborts_rebuild() {
        let tmp = TempDir::new().unwrap();
        let movies = tmp.path().join("movies");
        touch(&movies.join("Alien (1979)/Alien.mkv"), "");
        let configs = vec![movies_config(&movies)];

        let catalog = CatalogStore::new(&configs);
        let store = store().await;
        sqlx::query(
            "CREATE TRIGGER no_inserts BEFORE INSERT ON items BEGIN SELECT RAISE(ABORT, 'read only'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let err = rebuild_all(&catalog, &configs, &store, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Insert { .. }));
        assert!(err.is_fatal());
        assert!(catalog.snapshot().collections[0].items.is_empty());
    }

    #[tokio::test]
    async fn test_failed_update_still_publishes() {
        let tmp = TempDir::new().unwrap();
        let movies = tmp.path().join("movies");
        touch(&movies.join("Alien (1979)/Alien.mkv"), "");
        let configs = vec![movies_config(&movies)];

        let catalog = CatalogStore::new(&configs);
        let store = store().await;
        rebuild_all(&catalog, &configs, &store, Duration::ZERO)
            .await
            .unwrap();
        let alien_id = store.get_by_name("Alien (1979)").await.unwrap().id;

        // Alien now needs a write-back that the store refuses
        sqlx::query("UPDATE items SET year = 0")
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query(
            "CREATE TRIGGER no_updates BEFORE UPDATE ON items BEGIN SELECT RAISE(ABORT, 'read only'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();
        touch(&movies.join("Heat (1995)/Heat.mp4"), "");

        rebuild_all(&catalog, &configs, &store, Duration::ZERO)
            .await
            .unwrap();

        let snap = catalog.snapshot();
        let coll = snap.collection("Movies").unwrap();
        assert_eq!(coll.items.len(), 2);
        assert_eq!(coll.item("Alien (1979)").unwrap().id, alien_id);
        assert!(!coll.item("Heat (1995)").unwrap().id.is_empty());
        assert_eq!(store.get_by_name("Alien (1979)").await.unwrap().year, 0);
    }

    #[tokio::test]
    async fn test_missing_root_publishes_empty_collection() {
        let tmp = TempDir::new().unwrap();
        let configs = vec![shows_config(&tmp.path().join("unmounted"))];

        let catalog = CatalogStore::new(&configs);
        let store = store().await;
        rebuild_all(&catalog, &configs, &store, Duration::ZERO)
            .await
            .unwrap();

        let snap = catalog.snapshot();
        assert_eq!(snap.collections.len(), 1);
        assert!(snap.collections[0].items.is_empty());
    }
}
