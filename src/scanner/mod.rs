pub mod classify;
pub mod dir;

use chrono::{DateTime, Datelike, Local};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::config::CollectionConfig;
use crate::models::{Collection, CollectionKind, Episode, Item, ItemKind, Season, SubtitleRef};
use classify::{AuxKind, AuxName};
use dir::{LazyDir, LazyEntry};

/// Build a collection from its root directory. Every first-level
/// directory is a candidate movie or show.
///
/// Blocking; run it on a blocking thread. `pace` is slept between items
/// to keep the disks quiet during background rebuilds.
pub fn build_collection(source_id: usize, config: &CollectionConfig, pace: Duration) -> Collection {
    let mut coll = Collection::empty(&config.name, config.kind, config.directory.clone(), source_id);

    let root = match LazyDir::open(&config.directory) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!("Collection '{}' unavailable: {}", config.name, e);
            return coll;
        }
    };
    let entries = match root.read_entries(0) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("Failed to list collection '{}': {}", config.name, e);
            return coll;
        }
    };

    for entry in &entries {
        let name = entry.name();
        if should_skip(name) {
            tracing::debug!("Skipping hidden entry: {}", name);
            continue;
        }
        if !entry.is_dir() {
            continue;
        }

        let item = match config.kind {
            CollectionKind::Movies => build_movie(&config.directory, name, &coll.base_url),
            CollectionKind::Shows => build_show(&config.directory, name, &coll.base_url),
        };
        match item {
            Some(item) => coll.items.push(item),
            None => tracing::debug!("No usable media in {}", entry.path().display()),
        }

        if !pace.is_zero() {
            std::thread::sleep(pace);
        }
    }

    tracing::info!(
        "Built collection '{}': {} items from {}",
        coll.name,
        coll.items.len(),
        config.directory.display()
    );
    coll
}

fn should_skip(name: &str) -> bool {
    name.starts_with('.') || name.starts_with("+ ")
}

/// Scan a movie directory. `None` if it holds no video with a usable
/// creation time.
pub fn build_movie(root: &Path, dir_name: &str, base_url: &str) -> Option<Item> {
    let dir = root.join(dir_name);
    let entries = read_dir_logged(&dir)?;

    // The last candidate in listing order wins.
    let mut canonical: Option<(&str, &str, i64)> = None;
    for entry in &entries {
        if let Some(base) = classify::video_base(entry.name()) {
            if let Some(created) = entry.created_ms() {
                canonical = Some((entry.name(), base, created));
            }
        }
    }
    let (video, base, created) = canonical?;

    let mut movie = Item::new(ItemKind::Movie, dir_name, escape_path(dir_name), base_url);
    movie.year = classify::year_suffix(dir_name)
        .or_else(|| year_of_millis(created))
        .unwrap_or_else(current_year);
    movie.video = Some(escape_path(video));
    movie.first_video = created;
    movie.last_video = created;

    for entry in &entries {
        let name = entry.name();
        let aux = match classify::aux_for(name, |b| b == base) {
            Some(aux) => aux,
            // standalone artwork and metadata: poster.jpg, movie.nfo
            None => match classify::aux_exact(name) {
                Some(aux) if !matches!(aux.kind, AuxKind::Srt | AuxKind::Vtt) => AuxName {
                    tag: aux.base,
                    ..aux
                },
                _ => continue,
            },
        };

        let path = escape_path(name);
        match aux.kind {
            AuxKind::Image { .. } => match aux.image_role("poster") {
                "banner" => movie.banner = Some(path),
                "fanart" => movie.fanart = Some(path),
                "folder" => movie.folder = Some(path),
                "poster" => movie.poster = Some(path),
                "thumb" => movie.thumb = Some(path),
                _ => {}
            },
            AuxKind::Srt => movie.srt_subs.push(subtitle(&aux, path)),
            AuxKind::Vtt => movie.vtt_subs.push(subtitle(&aux, path)),
            AuxKind::Nfo => movie.nfo_path = Some(dir.join(name)),
        }
    }

    add_vtt_siblings(&movie.srt_subs, &mut movie.vtt_subs);
    Some(movie)
}

/// Scan a show directory and its season subdirectories.
///
/// Returns `None` unless the show has at least one episode, or an NFO
/// plus some artwork.
pub fn build_show(root: &Path, dir_name: &str, base_url: &str) -> Option<Item> {
    let show_root = root.join(dir_name);
    let mut show = Item::new(ItemKind::Show, dir_name, escape_path(dir_name), base_url);

    scan_show_dir(&mut show, &show_root, "", None);

    for season in &mut show.seasons {
        season.episodes.retain(|ep| ep.video.is_some());
        season.episodes.sort_by_key(|ep| ep.episode);
        season.episodes.dedup_by_key(|ep| ep.episode);
        for ep in &mut season.episodes {
            add_vtt_siblings(&ep.srt_subs, &mut ep.vtt_subs);
        }
    }
    show.seasons.retain(|s| !s.episodes.is_empty());
    show.seasons.sort_by_key(|s| s.number);

    if let (Some(first), Some(last)) = (show.seasons.first(), show.seasons.last()) {
        show.first_video = first.episodes.first().map_or(0, |ep| ep.video_ts);
        show.last_video = last.episodes.last().map_or(0, |ep| ep.video_ts);
    }

    let has_art = show.fanart.is_some() || show.poster.is_some() || show.thumb.is_some();
    let accepted = (show.nfo_path.is_some() && has_art) || !show.seasons.is_empty();
    if !accepted {
        return None;
    }

    show.year = (show.first_video > 0)
        .then(|| year_of_millis(show.first_video))
        .flatten()
        .unwrap_or_else(current_year);
    Some(show)
}

/// One directory of a show. `rel` is the directory relative to the show
/// root ("" for the root itself), `season_hint` is set inside season
/// directories.
fn scan_show_dir(show: &mut Item, show_root: &Path, rel: &str, season_hint: Option<u32>) {
    let dir = if rel.is_empty() {
        show_root.to_path_buf()
    } else {
        show_root.join(rel)
    };
    let Some(entries) = read_dir_logged(&dir) else {
        return;
    };

    // video base name -> (season number, index into that season's episodes)
    let mut lookup: HashMap<&str, (u32, usize)> = HashMap::new();

    for entry in &entries {
        let name = entry.name();

        match season_hint {
            None => {
                if let Some(n) = classify::season_dir(name) {
                    if entry.is_dir() {
                        scan_show_dir(show, show_root, name, Some(n));
                        continue;
                    }
                }
                if name == "tvshow.nfo" {
                    show.nfo_path = Some(dir.join(name));
                    continue;
                }
                if let Some(stem) = classify::image_stem(name) {
                    let path = Some(escape_path(name));
                    match stem {
                        "season-all-banner" => show.season_all_banner = path,
                        "season-all-poster" => show.season_all_poster = path,
                        "banner" => show.banner = path,
                        "fanart" => show.fanart = path,
                        "folder" => show.folder = path,
                        "poster" => show.poster = path,
                        "thumb" => show.thumb = path,
                        _ => {}
                    }
                }
            }
            Some(hint) => {
                let path = Some(escape_path(&join_rel(rel, name)));
                match classify::image_stem(name) {
                    Some("banner") => {
                        season_mut(&mut show.seasons, hint).banner = path;
                        continue;
                    }
                    Some("poster") => {
                        season_mut(&mut show.seasons, hint).poster = path;
                        continue;
                    }
                    _ => {}
                }
            }
        }

        if let Some((number, role)) = classify::season_image(name) {
            let season = season_mut(&mut show.seasons, number);
            let path = Some(escape_path(&join_rel(rel, name)));
            match role {
                "banner" => season.banner = path,
                _ => season.poster = path,
            }
            continue;
        }

        if let Some(base) = classify::video_base(name) {
            let Some(info) = classify::parse_episode_name(base, season_hint) else {
                tracing::debug!("Could not parse episode info from: {}", name);
                continue;
            };
            let number = info.season.unwrap_or(0);
            let season = season_mut(&mut show.seasons, number);
            season.episodes.push(new_episode(entry, rel, base, number, info));
            lookup.insert(base, (number, season.episodes.len() - 1));
        }
    }

    if lookup.is_empty() {
        return;
    }

    // Second pass: companions of the episodes found above.
    for entry in &entries {
        let name = entry.name();
        let Some(aux) = classify::aux_for(name, |b| lookup.contains_key(b)) else {
            continue;
        };
        let Some(&(number, idx)) = lookup.get(aux.base) else {
            continue;
        };
        let Some(ep) = show
            .seasons
            .iter_mut()
            .find(|s| s.number == number)
            .and_then(|s| s.episodes.get_mut(idx))
        else {
            continue;
        };

        let path = escape_path(&join_rel(rel, name));
        match aux.kind {
            AuxKind::Image { .. } => {
                if aux.image_role("thumb") == "thumb" {
                    ep.thumb = Some(path);
                }
            }
            AuxKind::Srt => ep.srt_subs.push(subtitle(&aux, path)),
            AuxKind::Vtt => ep.vtt_subs.push(subtitle(&aux, path)),
            AuxKind::Nfo => ep.nfo_path = Some(dir.join(name)),
        }
    }
}

fn new_episode(
    entry: &LazyEntry,
    rel: &str,
    base: &str,
    season: u32,
    info: classify::EpisodeInfo,
) -> Episode {
    // A video we cannot stat (dangling link) is left unresolved and
    // dropped after the scan.
    let created = entry.created_ms();
    Episode {
        name: info.name,
        season,
        episode: info.episode,
        double: info.double,
        base_name: base.to_string(),
        nfo_path: None,
        video_ts: created.unwrap_or(0),
        nfo: None,
        video: created.map(|_| escape_path(&join_rel(rel, entry.name()))),
        thumb: None,
        srt_subs: Vec::new(),
        vtt_subs: Vec::new(),
    }
}

/// Find a season, inserting it at its sorted position if missing.
fn season_mut(seasons: &mut Vec<Season>, number: u32) -> &mut Season {
    let idx = match seasons.binary_search_by_key(&number, |s| s.number) {
        Ok(i) => i,
        Err(i) => {
            seasons.insert(i, Season::new(number));
            i
        }
    };
    &mut seasons[idx]
}

fn subtitle(aux: &AuxName<'_>, path: String) -> SubtitleRef {
    SubtitleRef {
        lang: aux.language().to_string(),
        path,
    }
}

/// Every `.srt` can also be served as `.vtt` by the file server.
fn add_vtt_siblings(srt: &[SubtitleRef], vtt: &mut Vec<SubtitleRef>) {
    for sub in srt {
        let Some((stem, _)) = sub.path.rsplit_once('.') else {
            continue;
        };
        let path = format!("{}.vtt", stem);
        if !vtt.iter().any(|v| v.path == path) {
            vtt.push(SubtitleRef {
                lang: sub.lang.clone(),
                path,
            });
        }
    }
}

fn read_dir_logged(dir: &Path) -> Option<Vec<LazyEntry>> {
    let entries = LazyDir::open(dir).and_then(|d| d.read_entries(0));
    match entries {
        Ok(entries) if !entries.is_empty() => Some(entries),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("Skipping directory: {}", e);
            None
        }
    }
}

fn join_rel(rel: &str, name: &str) -> String {
    if rel.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", rel, name)
    }
}

/// Percent-encode each segment of a relative path, keeping the slashes.
pub fn escape_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn year_of_millis(ms: i64) -> Option<i32> {
    DateTime::from_timestamp_millis(ms).map(|t| t.with_timezone(&Local).year())
}

fn current_year() -> i32 {
    Local::now().year()
}
