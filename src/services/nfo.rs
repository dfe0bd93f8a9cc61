//! Kodi style `.nfo` metadata files.
//!
//! The files are loosely XML: the root element name varies (`movie`,
//! `tvshow`, `episodedetails`), numbers are free text, and scrapers
//! sometimes append a URL after the closing tag.

use serde::Deserialize;
use std::path::Path;

use crate::models::{Actor, NfoRecord, VideoStream};

#[derive(Debug, thiserror::Error)]
pub enum NfoError {
    #[error("failed to read nfo: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode nfo: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("no root element found")]
    Malformed,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawNfo {
    title: Option<String>,
    originaltitle: Option<String>,
    plot: Option<String>,
    tagline: Option<String>,
    premiered: Option<String>,
    aired: Option<String>,
    mpaa: Option<String>,
    runtime: Option<String>,
    director: Option<String>,
    studio: Vec<String>,
    rating: Option<String>,
    votes: Option<String>,
    year: Option<String>,
    genre: Vec<String>,
    actor: Vec<RawActor>,
    fileinfo: Option<RawFileInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawActor {
    name: Option<String>,
    role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFileInfo {
    streamdetails: Option<RawStreamDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStreamDetails {
    video: Vec<RawVideo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVideo {
    codec: Option<String>,
    aspect: Option<String>,
    width: Option<String>,
    height: Option<String>,
}

/// `<xbmcmultiepisode>` holds several `<episodedetails>`; only the first
/// one is used.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MultiEpisode {
    episodedetails: Vec<RawNfo>,
}

pub async fn read_nfo(path: &Path) -> Result<NfoRecord, NfoError> {
    let bytes = tokio::fs::read(path).await?;
    decode_nfo(&String::from_utf8_lossy(&bytes))
}

pub fn decode_nfo(text: &str) -> Result<NfoRecord, NfoError> {
    let (root, xml) = root_element(text).ok_or(NfoError::Malformed)?;

    let raw = if root == "xbmcmultiepisode" {
        let multi: MultiEpisode = quick_xml::de::from_str(xml)?;
        multi.episodedetails.into_iter().next().unwrap_or_default()
    } else {
        quick_xml::de::from_str::<RawNfo>(xml)?
    };

    Ok(raw.into_record())
}

/// Name of the root element and the document cut off after its closing
/// tag, skipping any BOM, declaration or comments in front of it.
fn root_element(text: &str) -> Option<(&str, &str)> {
    let mut rest = text.trim_start_matches('\u{feff}').trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("<?") {
            rest = after.split_once("?>")?.1.trim_start();
        } else if let Some(after) = rest.strip_prefix("<!--") {
            rest = after.split_once("-->")?.1.trim_start();
        } else if rest.starts_with("<!") {
            rest = rest.split_once('>')?.1.trim_start();
        } else {
            break;
        }
    }

    let tag = rest.strip_prefix('<')?;
    let name = &tag[..tag.find(|c: char| c.is_whitespace() || c == '>' || c == '/')?];
    if name.is_empty() {
        return None;
    }

    let close = format!("</{}>", name);
    let end = rest.rfind(&close).map_or(rest.len(), |i| i + close.len());
    Some((name, &rest[..end]))
}

impl RawNfo {
    fn into_record(self) -> NfoRecord {
        let year = parse_num::<i32>(self.year.as_deref())
            .filter(|y| *y > 0)
            .or_else(|| premiered_year(self.premiered.as_deref()))
            .unwrap_or(0);

        let video_stream = self
            .fileinfo
            .and_then(|f| f.streamdetails)
            .and_then(|s| s.video.into_iter().next())
            .map(|v| VideoStream {
                codec: non_empty(v.codec),
                aspect: parse_num(v.aspect.as_deref()).unwrap_or(0.0),
                width: parse_num(v.width.as_deref()).unwrap_or(0),
                height: parse_num(v.height.as_deref()).unwrap_or(0),
            });

        NfoRecord {
            title: non_empty(self.title),
            original_title: non_empty(self.originaltitle),
            plot: non_empty(self.plot),
            tagline: non_empty(self.tagline),
            premiered: non_empty(self.premiered),
            aired: non_empty(self.aired),
            mpaa: non_empty(self.mpaa),
            runtime: non_empty(self.runtime),
            director: non_empty(self.director),
            studio: non_empty(self.studio.into_iter().next()),
            rating: parse_num(self.rating.as_deref()).unwrap_or(0.0),
            votes: parse_num(self.votes.map(|v| v.replace(',', "")).as_deref()).unwrap_or(0),
            year,
            genre: normalize_genres(&self.genre),
            actors: self
                .actor
                .into_iter()
                .filter_map(|a| {
                    Some(Actor {
                        name: non_empty(a.name)?,
                        role: non_empty(a.role),
                    })
                })
                .collect(),
            video_stream,
        }
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_num<T: std::str::FromStr>(s: Option<&str>) -> Option<T> {
    s.and_then(|s| s.trim().parse().ok())
}

/// `2015-03-08` -> 2015
fn premiered_year(premiered: Option<&str>) -> Option<i32> {
    premiered
        .and_then(|p| p.trim().get(..4))
        .and_then(|y| y.parse().ok())
        .filter(|y| *y > 0)
}

const GENRE_ALIASES: &[(&str, &str)] = &[
    ("absurdist", "Absurdist"),
    ("action", "Action"),
    ("adventure", "Adventure"),
    ("animation", "Animation"),
    ("biography", "Biography"),
    ("children", "Children"),
    ("comedy", "Comedy"),
    ("crime", "Crime"),
    ("disaster", "Disaster"),
    ("documentary", "Documentary"),
    ("drama", "Drama"),
    ("erotic", "Erotic"),
    ("family", "Family"),
    ("fantasy", "Fantasy"),
    ("film noir", "Film Noir"),
    ("film-noir", "Film Noir"),
    ("foreign", "Foreign"),
    ("game show", "Game Show"),
    ("game-show", "Game Show"),
    ("historical", "Historical"),
    ("history", "History"),
    ("holiday", "Holiday"),
    ("horror", "Horror"),
    ("indie", "Indie"),
    ("mini series", "Mini Series"),
    ("mini-series", "Mini Series"),
    ("music", "Music"),
    ("musical", "Musical"),
    ("mystery", "Mystery"),
    ("news", "News"),
    ("philosophical", "Philosophical"),
    ("political", "Political"),
    ("reality", "Reality"),
    ("romance", "Romance"),
    ("satire", "Satire"),
    ("sci fi", "Sci-Fi"),
    ("sci-fi", "Sci-Fi"),
    ("science fiction", "Sci-Fi"),
    ("science-fiction", "Sci-Fi"),
    ("short", "Short"),
    ("soap", "Soap"),
    ("sport", "Sports"),
    ("sports", "Sports"),
    ("sports film", "Sports"),
    ("sports-film", "Sports"),
    ("surreal", "Surreal"),
    ("suspense", "Suspense"),
    ("talk show", "Talk Show"),
    ("talk-show", "Talk Show"),
    ("telenovela", "Telenovela"),
    ("thriller", "Thriller"),
    ("tv movie", "TV Movie"),
    ("tv-movie", "TV Movie"),
    ("urban", "Urban"),
    ("war", "War"),
    ("western", "Western"),
];

fn normalize_genre(genre: &str) -> String {
    let lower = genre.to_lowercase();
    GENRE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map_or_else(|| genre.to_string(), |(_, canonical)| canonical.to_string())
}

/// Split combined entries ("Action / Drama", "Action,Drama"), map
/// aliases to canonical names, drop duplicates and one-letter noise.
pub fn normalize_genres(genres: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for g in genres
        .iter()
        .flat_map(|g| g.split(['/', ',']))
        .map(str::trim)
    {
        let g = normalize_genre(g);
        if g.chars().count() > 1 && !out.contains(&g) {
            out.push(g);
        }
    }
    out
}
