//! File name heuristics for Kodi style layouts.
//!
//! Everything here is pure: a name goes in, a classification comes out.

use regex::Regex;
use std::sync::LazyLock;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "m4u", "mov", "divx", "mkv", "webm"];

// ___.s03e04.___
static RE_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[ ._])[sS](\d+)[eE](\d+)(?:[ ._]|$)").unwrap());
// ___.s03e04e05.___ or ___.s03e04-e05.___
static RE_DOUBLE_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[ ._])[sS](\d+)[eE](\d+)-?[eE](\d+)(?:[ ._]|$)").unwrap());
// ___.2015.03.08.___
static RE_DATED_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[ .])(\d{4})[.-](\d{2})[.-](\d{2})(?:[ .]|$)").unwrap()
});
// ___.308.___ or ___.3x08.___
static RE_NUMERIC_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[ .])(\d{1,2})x?(\d{2})(?:[ .]|$)").unwrap());

static RE_SEASON_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[Ss](\d+)|Specials\d*)(?:$|[ ._-])").unwrap());
static RE_SEASON_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^season(\d+)-?([a-z]*)\.(?:jpg|jpeg|png|tbn)$").unwrap());
static RE_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)\.(?:jpg|jpeg|png|tbn)$").unwrap());
static RE_AUX_EXACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)\.(png|jpg|jpeg|tbn|nfo|srt|vtt)$").unwrap());
static RE_AUX_TAGGED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)[.-]([a-z]+)\.(png|jpg|jpeg|tbn|nfo|srt|vtt)$").unwrap());
static RE_DIR_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" \((\d{4})\)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeInfo {
    /// `None` when only a date was found and no season hint was given
    pub season: Option<u32>,
    pub episode: u32,
    pub name: String,
    pub double: bool,
}

/// Split a video file name into its base name, or `None` if the
/// extension is not a known video type.
pub fn video_base(file_name: &str) -> Option<&str> {
    let (base, ext) = file_name.rsplit_once('.')?;
    if base.is_empty() {
        return None;
    }
    VIDEO_EXTENSIONS
        .iter()
        .any(|v| v.eq_ignore_ascii_case(ext))
        .then_some(base)
}

/// Parse season/episode from a video base name.
///
/// Rules are tried in order, first match wins:
/// - `name.s03e04.x`
/// - `name.s03e04e05.x` / `name.s03e04-e05.x` (double episode)
/// - `name.2015.03.08.x` (season from the hint, episode is the date as a number)
/// - `name.308.x` / `name.3x08.x`, only if it agrees with the hint
pub fn parse_episode_name(base: &str, season_hint: Option<u32>) -> Option<EpisodeInfo> {
    if let Some(caps) = RE_EPISODE.captures(base) {
        let (s, e) = (caps.get(1)?.as_str(), caps.get(2)?.as_str());
        return Some(EpisodeInfo {
            season: Some(s.parse().ok()?),
            episode: e.parse().ok()?,
            name: format!("{}x{}", s, e),
            double: false,
        });
    }

    if let Some(caps) = RE_DOUBLE_EPISODE.captures(base) {
        let (s, e1, e2) = (
            caps.get(1)?.as_str(),
            caps.get(2)?.as_str(),
            caps.get(3)?.as_str(),
        );
        return Some(EpisodeInfo {
            season: Some(s.parse().ok()?),
            episode: e1.parse().ok()?,
            name: format!("{}x{}-{}", s, e1, e2),
            double: true,
        });
    }

    if let Some(caps) = RE_DATED_EPISODE.captures(base) {
        let (y, m, d) = (
            caps.get(1)?.as_str(),
            caps.get(2)?.as_str(),
            caps.get(3)?.as_str(),
        );
        return Some(EpisodeInfo {
            season: season_hint,
            episode: format!("{}{}{}", y, m, d).parse().ok()?,
            name: format!("{}.{}.{}", y, m, d),
            double: false,
        });
    }

    if let Some(caps) = RE_NUMERIC_EPISODE.captures(base) {
        let season: u32 = caps.get(1)?.as_str().parse().ok()?;
        let e = caps.get(2)?.as_str();
        if season_hint.is_none_or(|hint| hint == season) {
            return Some(EpisodeInfo {
                season: Some(season),
                episode: e.parse().ok()?,
                name: format!("{:02}x{}", season, e),
                double: false,
            });
        }
    }

    None
}

/// Season number for a season subdirectory (`S1`, `S01 Extra`, `Specials`).
/// Specials are season 0.
pub fn season_dir(name: &str) -> Option<u32> {
    let caps = RE_SEASON_DIR.captures(name)?;
    match caps.get(1) {
        Some(n) => n.as_str().parse().ok(),
        None => Some(0),
    }
}

/// `season01.jpg`, `season01-banner.jpg`, `season1poster.png`
pub fn season_image(name: &str) -> Option<(u32, &str)> {
    let caps = RE_SEASON_IMAGE.captures(name)?;
    let season = caps.get(1)?.as_str().parse().ok()?;
    let role = caps.get(2).map_or("", |m| m.as_str());
    Some((season, role))
}

/// Stem of an image file name
pub fn image_stem(name: &str) -> Option<&str> {
    RE_IMAGE
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// `Movie Title (1999)` -> 1999
pub fn year_suffix(dir_name: &str) -> Option<i32> {
    RE_DIR_YEAR
        .captures(dir_name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxKind {
    Image { tbn: bool },
    Nfo,
    Srt,
    Vtt,
}

impl AuxKind {
    fn from_ext(ext: &str) -> Option<Self> {
        match ext {
            "png" | "jpg" | "jpeg" => Some(AuxKind::Image { tbn: false }),
            "tbn" => Some(AuxKind::Image { tbn: true }),
            "nfo" => Some(AuxKind::Nfo),
            "srt" => Some(AuxKind::Srt),
            "vtt" => Some(AuxKind::Vtt),
            _ => None,
        }
    }
}

/// A companion file split as `<base>[.-]<tag>.<ext>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxName<'a> {
    pub base: &'a str,
    pub tag: &'a str,
    pub kind: AuxKind,
}

impl AuxName<'_> {
    /// Image role, with a bare `.tbn` defaulting to `tbn_role`
    pub fn image_role<'r>(&'r self, tbn_role: &'r str) -> &'r str {
        match self.kind {
            AuxKind::Image { tbn: true } if self.tag.is_empty() => tbn_role,
            _ => self.tag,
        }
    }

    /// Subtitle language, `zz` when untagged or undetermined
    pub fn language(&self) -> &str {
        match self.tag {
            "" | "und" => "zz",
            tag => tag,
        }
    }
}

/// Whole name minus extension, tag empty
pub fn aux_exact(name: &str) -> Option<AuxName<'_>> {
    let caps = RE_AUX_EXACT.captures(name)?;
    Some(AuxName {
        base: caps.get(1)?.as_str(),
        tag: "",
        kind: AuxKind::from_ext(caps.get(2)?.as_str())?,
    })
}

/// Name split into base and a trailing `.tag` / `-tag`
pub fn aux_tagged(name: &str) -> Option<AuxName<'_>> {
    let caps = RE_AUX_TAGGED.captures(name)?;
    Some(AuxName {
        base: caps.get(1)?.as_str(),
        tag: caps.get(2)?.as_str(),
        kind: AuxKind::from_ext(caps.get(3)?.as_str())?,
    })
}

/// Resolve a companion file against a video base name: exact match first,
/// then tagged.
pub fn aux_for<'a>(name: &'a str, mut is_known_base: impl FnMut(&str) -> bool) -> Option<AuxName<'a>> {
    aux_exact(name)
        .filter(|aux| is_known_base(aux.base))
        .or_else(|| aux_tagged(name).filter(|aux| is_known_base(aux.base)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_base() {
        assert_eq!(video_base("Show.s01e01.mp4"), Some("Show.s01e01"));
        assert_eq!(video_base("Movie.MP4"), Some("Movie"));
        assert_eq!(video_base("poster.jpg"), None);
        assert_eq!(video_base(".mp4"), None);
        assert_eq!(video_base("noext"), None);
    }

    #[test]
    fn test_standard_episode() {
        let ep = parse_episode_name("Show.s01e01", None).unwrap();
        assert_eq!(ep.season, Some(1));
        assert_eq!(ep.episode, 1);
        assert_eq!(ep.name, "01x01");
        assert!(!ep.double);

        let ep = parse_episode_name("The Show S2E13 Title", Some(5)).unwrap();
        assert_eq!(ep.season, Some(2));
        assert_eq!(ep.episode, 13);
        assert_eq!(ep.name, "2x13");
    }

    #[test]
    fn test_double_episode() {
        for name in ["Show.s03e04e05.720p", "Show.s03e04-e05", "Show s03e04-E05 x"] {
            let ep = parse_episode_name(name, None).unwrap();
            assert_eq!(ep.season, Some(3), "{}", name);
            assert_eq!(ep.episode, 4, "{}", name);
            assert!(ep.double, "{}", name);
            assert_eq!(ep.name, "03x04-05");
        }
    }

    #[test]
    fn test_dated_episode() {
        let ep = parse_episode_name("Daily.Show.2015.03.08.guest", Some(2015)).unwrap();
        assert_eq!(ep.season, Some(2015));
        assert_eq!(ep.episode, 20150308);
        assert_eq!(ep.name, "2015.03.08");

        let ep = parse_episode_name("Daily Show 2015-03-08", None).unwrap();
        assert_eq!(ep.season, None);
        assert_eq!(ep.episode, 20150308);
    }

    #[test]
    fn test_numeric_episode_respects_hint() {
        let ep = parse_episode_name("Show.308.hdtv", None).unwrap();
        assert_eq!(ep.season, Some(3));
        assert_eq!(ep.episode, 8);
        assert_eq!(ep.name, "03x08");

        let ep = parse_episode_name("Show 3x08", Some(3)).unwrap();
        assert_eq!(ep.episode, 8);

        // resolution tag inside a season 1 directory
        assert_eq!(parse_episode_name("Show.720.rip", Some(1)), None);
    }

    #[test]
    fn test_rule_priority() {
        // matches both the standard and the numeric rule
        let ep = parse_episode_name("Show.s02e05.720.x", None).unwrap();
        assert_eq!((ep.season, ep.episode), (Some(2), 5));
        assert_eq!(ep.name, "02x05");

        // standard rule beats the date rule
        let ep = parse_episode_name("Show.2015.03.08.s01e02", Some(9)).unwrap();
        assert_eq!((ep.season, ep.episode), (Some(1), 2));

        // double beats date and numeric
        let ep = parse_episode_name("Show.s01e01e02.2015.03.08.308", None).unwrap();
        assert!(ep.double);

        // date beats numeric
        let ep = parse_episode_name("Show.2015.03.08.308", Some(3)).unwrap();
        assert_eq!(ep.episode, 20150308);
    }

    #[test]
    fn test_not_an_episode() {
        assert_eq!(parse_episode_name("Behind the scenes", None), None);
        assert_eq!(parse_episode_name("Shows01e01", None), None);
    }

    #[test]
    fn test_season_dir() {
        assert_eq!(season_dir("S01"), Some(1));
        assert_eq!(season_dir("s3 extras"), Some(3));
        assert_eq!(season_dir("Specials"), Some(0));
        assert_eq!(season_dir("Specials2"), Some(0));
        assert_eq!(season_dir("Sample"), None);
        assert_eq!(season_dir("Extras"), None);
    }

    #[test]
    fn test_season_image() {
        assert_eq!(season_image("season01.jpg"), Some((1, "")));
        assert_eq!(season_image("season02-banner.png"), Some((2, "banner")));
        assert_eq!(season_image("season3poster.tbn"), Some((3, "poster")));
        assert_eq!(season_image("season-all-poster.jpg"), None);
    }

    #[test]
    fn test_image_and_year() {
        assert_eq!(image_stem("season-all-banner.jpg"), Some("season-all-banner"));
        assert_eq!(image_stem("tvshow.nfo"), None);
        assert_eq!(year_suffix("Alien (1979)"), Some(1979));
        assert_eq!(year_suffix("Alien(1979)"), None);
        assert_eq!(year_suffix("Alien"), None);
    }

    #[test]
    fn test_aux_resolution() {
        let known = |b: &str| b == "Show.s01e01";

        let srt = aux_for("Show.s01e01.en.srt", known).unwrap();
        assert_eq!(srt.kind, AuxKind::Srt);
        assert_eq!(srt.language(), "en");

        let bare = aux_for("Show.s01e01.srt", known).unwrap();
        assert_eq!(bare.tag, "");
        assert_eq!(bare.language(), "zz");

        let und = aux_for("Show.s01e01-und.vtt", known).unwrap();
        assert_eq!(und.kind, AuxKind::Vtt);
        assert_eq!(und.language(), "zz");

        let tbn = aux_for("Show.s01e01.tbn", known).unwrap();
        assert_eq!(tbn.image_role("thumb"), "thumb");
        let thumb = aux_for("Show.s01e01-thumb.jpg", known).unwrap();
        assert_eq!(thumb.image_role("thumb"), "thumb");

        let nfo = aux_for("Show.s01e01.nfo", known).unwrap();
        assert_eq!(nfo.kind, AuxKind::Nfo);

        assert_eq!(aux_for("Other.s01e02.en.srt", known), None);
        assert_eq!(aux_for("Show.s01e01.mp4", known), None);
    }
}
