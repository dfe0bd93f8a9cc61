use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Movies,
    Shows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Movie,
    Show,
}

/// A named root directory and the items found below it.
///
/// A collection is never mutated once it has been published; a rebuild
/// produces a fresh value that replaces it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CollectionKind,
    pub base_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Item>,
    #[serde(skip)]
    pub source_id: usize,
    #[serde(skip)]
    pub directory: PathBuf,
}

impl Collection {
    pub fn empty(name: &str, kind: CollectionKind, directory: PathBuf, source_id: usize) -> Self {
        Self {
            name: name.to_string(),
            kind,
            base_url: format!("/data/{}", source_id),
            items: Vec::new(),
            source_id,
            directory,
        }
    }

    /// Collection without its items, for listings
    pub fn summary(&self) -> CollectionSummary {
        CollectionSummary {
            name: self.name.clone(),
            kind: self.kind,
            base_url: self.base_url.clone(),
            item_count: self.items.len(),
        }
    }

    pub fn item(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.name == name)
    }

    /// Collection-wide watermark: the newest `last_video` of any item
    pub fn last_modified(&self) -> i64 {
        self.items.iter().map(|i| i.last_video).max().unwrap_or(0)
    }

    /// Newest NFO modification time seen by any item
    pub fn nfo_modified(&self) -> i64 {
        self.items.iter().map(|i| i.nfo_time).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CollectionKind,
    pub base_url: String,
    pub item_count: usize,
}

/// A movie or a show.
///
/// Paths stored here are relative to the item directory and URL-escaped,
/// except `nfo_path` which is a filesystem path and never serialized.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    pub path: String,
    pub base_url: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    #[serde(skip_serializing_if = "is_zero")]
    pub first_video: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub last_video: i64,
    #[serde(skip)]
    pub nfo_path: Option<PathBuf>,
    #[serde(skip)]
    pub nfo_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nfo: Option<NfoRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fanart: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub rating: f32,
    #[serde(skip_serializing_if = "is_zero")]
    pub votes: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genre: Vec<String>,
    pub year: i32,

    // movie
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub srt_subs: Vec<SubtitleRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vtt_subs: Vec<SubtitleRef>,

    // show
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season_all_banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season_all_poster: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub seasons: Vec<Season>,
}

impl Item {
    pub fn new(kind: ItemKind, name: &str, path: String, base_url: &str) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            path,
            base_url: base_url.to_string(),
            kind,
            first_video: 0,
            last_video: 0,
            nfo_path: None,
            nfo_time: 0,
            nfo: None,
            banner: None,
            fanart: None,
            folder: None,
            poster: None,
            thumb: None,
            rating: 0.0,
            votes: 0,
            genre: Vec::new(),
            year: 0,
            video: None,
            srt_subs: Vec::new(),
            vtt_subs: Vec::new(),
            season_all_banner: None,
            season_all_poster: None,
            seasons: Vec::new(),
        }
    }

    /// Copy suitable for list views: no seasons, no decoded NFO
    pub fn summary(&self) -> Item {
        Item {
            id: self.id.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
            base_url: self.base_url.clone(),
            kind: self.kind,
            first_video: self.first_video,
            last_video: self.last_video,
            nfo_path: self.nfo_path.clone(),
            nfo_time: self.nfo_time,
            nfo: None,
            banner: self.banner.clone(),
            fanart: self.fanart.clone(),
            folder: self.folder.clone(),
            poster: self.poster.clone(),
            thumb: self.thumb.clone(),
            rating: self.rating,
            votes: self.votes,
            genre: self.genre.clone(),
            year: self.year,
            video: self.video.clone(),
            srt_subs: self.srt_subs.clone(),
            vtt_subs: self.vtt_subs.clone(),
            season_all_banner: self.season_all_banner.clone(),
            season_all_poster: self.season_all_poster.clone(),
            seasons: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Season {
    #[serde(rename = "seasonno")]
    pub number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    pub episodes: Vec<Episode>,
}

impl Season {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            banner: None,
            poster: None,
            episodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub name: String,
    #[serde(rename = "seasonno")]
    pub season: u32,
    #[serde(rename = "episodeno")]
    pub episode: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub double: bool,
    #[serde(skip)]
    pub base_name: String,
    #[serde(skip)]
    pub nfo_path: Option<PathBuf>,
    #[serde(skip)]
    pub video_ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nfo: Option<NfoRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub srt_subs: Vec<SubtitleRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vtt_subs: Vec<SubtitleRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtitleRef {
    pub lang: String,
    pub path: String,
}

/// Descriptive metadata decoded from an on-disk `.nfo` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NfoRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premiered: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aired: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpaa: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub studio: Option<String>,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub rating: f32,
    #[serde(skip_serializing_if = "is_zero")]
    pub votes: i64,
    #[serde(skip_serializing_if = "is_zero_i32")]
    pub year: i32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genre: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actors: Vec<Actor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_stream: Option<VideoStream>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Actor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoStream {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub aspect: f32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub width: u32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub height: u32,
}

/// Durable row, keyed by the unique item name.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PersistedRecord {
    pub id: String,
    pub name: String,
    pub votes: i64,
    pub genre: String,
    pub rating: f64,
    pub year: i32,
    pub nfotime: i64,
    pub firstvideo: i64,
    pub lastvideo: i64,
}

impl PersistedRecord {
    pub fn from_item(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            votes: item.votes,
            genre: item.genre.join(","),
            rating: f64::from(item.rating),
            year: item.year,
            nfotime: item.nfo_time,
            firstvideo: item.first_video,
            lastvideo: item.last_video,
        }
    }

    pub fn genres(&self) -> Vec<String> {
        self.genre
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}
