//! Directory listing with lazily fetched per-entry metadata.
//!
//! Listing a directory only reads names. `stat` is performed the first
//! time any metadata accessor is called on an entry and the result is
//! memoized, so a scan that only looks at names never touches inodes.

use std::cell::OnceCell;
use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum DirError {
    #[error("{0}: not a directory")]
    NotADirectory(PathBuf),
    #[error("{0}: not found")]
    NotFound(PathBuf),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DirError {
    fn from_io(path: &Path, e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            DirError::NotFound(path.to_path_buf())
        } else {
            DirError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    }
}

/// Stable device + inode key of a physical file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    pub fn of(meta: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    pub fn of(_meta: &Metadata) -> Option<Self> {
        None
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}.{:016x}", self.dev, self.ino)
    }
}

/// An opened directory
#[derive(Debug)]
pub struct LazyDir {
    path: PathBuf,
}

impl LazyDir {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DirError> {
        let path = path.into();
        let meta = std::fs::metadata(&path).map_err(|e| DirError::from_io(&path, e))?;
        if !meta.is_dir() {
            return Err(DirError::NotADirectory(path));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read up to `limit` entries (0 = all), ordered by name.
    pub fn read_entries(&self, limit: usize) -> Result<Vec<LazyEntry>, DirError> {
        let rd = std::fs::read_dir(&self.path).map_err(|e| DirError::from_io(&self.path, e))?;

        let mut names = Vec::new();
        for entry in rd {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry in {}: {}", self.path.display(), e);
                    continue;
                }
            };
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    tracing::debug!(
                        "Skipping non UTF-8 name {:?} in {}",
                        raw,
                        self.path.display()
                    );
                }
            }
        }

        names.sort_unstable();
        if limit > 0 {
            names.truncate(limit);
        }

        Ok(names
            .into_iter()
            .map(|name| LazyEntry::new(self.path.join(&name), name))
            .collect())
    }
}

#[derive(Debug, Clone)]
struct StatInfo {
    size: u64,
    mode: u32,
    modified: Option<SystemTime>,
    created: Option<SystemTime>,
    is_dir: bool,
    identity: Option<FileIdentity>,
}

/// A directory entry. Only the name is known up front.
#[derive(Debug)]
pub struct LazyEntry {
    name: String,
    path: PathBuf,
    stat: OnceCell<Option<StatInfo>>,
}

impl LazyEntry {
    fn new(path: PathBuf, name: String) -> Self {
        Self {
            name,
            path,
            stat: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stat(&self) -> Option<&StatInfo> {
        self.stat
            .get_or_init(|| match std::fs::metadata(&self.path) {
                Ok(meta) => Some(StatInfo {
                    size: meta.len(),
                    mode: file_mode(&meta),
                    modified: meta.modified().ok(),
                    created: creation_time(&meta),
                    is_dir: meta.is_dir(),
                    identity: FileIdentity::of(&meta),
                }),
                Err(e) => {
                    tracing::debug!("stat {}: {}", self.path.display(), e);
                    None
                }
            })
            .as_ref()
    }

    pub fn size(&self) -> Option<u64> {
        self.stat().map(|s| s.size)
    }

    pub fn mode(&self) -> Option<u32> {
        self.stat().map(|s| s.mode)
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.stat().and_then(|s| s.modified)
    }

    /// False when the entry cannot be stat'ed
    pub fn is_dir(&self) -> bool {
        self.stat().is_some_and(|s| s.is_dir)
    }

    pub fn identity(&self) -> Option<FileIdentity> {
        self.stat().and_then(|s| s.identity)
    }

    /// Best guess of when this file first appeared. Used as a sort key,
    /// not as an exact timestamp.
    pub fn created(&self) -> Option<SystemTime> {
        self.stat().and_then(|s| s.created)
    }

    pub fn created_ms(&self) -> Option<i64> {
        self.created().and_then(millis_since_epoch)
    }
}

pub fn millis_since_epoch(t: SystemTime) -> Option<i64> {
    t.duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_millis()).ok())
}

#[cfg(unix)]
fn file_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Birth time where the platform records one, otherwise the earliest of
/// access/change/modify time, otherwise the modify time.
pub fn creation_time(meta: &Metadata) -> Option<SystemTime> {
    if let Ok(born) = meta.created() {
        return Some(born);
    }
    earliest_inode_time(meta).or_else(|| meta.modified().ok())
}

#[cfg(unix)]
fn earliest_inode_time(meta: &Metadata) -> Option<SystemTime> {
    use std::os::unix::fs::MetadataExt;
    [
        (meta.atime(), meta.atime_nsec()),
        (meta.ctime(), meta.ctime_nsec()),
        (meta.mtime(), meta.mtime_nsec()),
    ]
    .into_iter()
    .filter_map(|(secs, nsecs)| {
        let secs = u64::try_from(secs).ok()?;
        let nsecs = u32::try_from(nsecs).ok()?;
        Some(UNIX_EPOCH + Duration::new(secs, nsecs))
    })
    .min()
}

#[cfg(not(unix))]
fn earliest_inode_time(meta: &Metadata) -> Option<SystemTime> {
    [meta.accessed().ok(), meta.modified().ok()]
        .into_iter()
        .flatten()
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_and_not_a_directory() {
        let tmp = TempDir::new().unwrap();

        let missing = LazyDir::open(tmp.path().join("nope"));
        assert!(matches!(missing, Err(DirError::NotFound(_))));

        let file = tmp.path().join("file.txt");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            LazyDir::open(&file),
            Err(DirError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_entries_sorted_and_limited() {
        let tmp = TempDir::new().unwrap();
        for name in ["c.mp4", "a.mp4", "b.mp4"] {
            std::fs::write(tmp.path().join(name), b"").unwrap();
        }

        let dir = LazyDir::open(tmp.path()).unwrap();
        let names: Vec<String> = dir
            .read_entries(0)
            .unwrap()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.mp4", "c.mp4"]);

        assert_eq!(dir.read_entries(2).unwrap().len(), 2);
    }

    #[test]
    fn test_metadata_is_memoized() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("grow.bin");
        std::fs::write(&path, b"1234").unwrap();

        let dir = LazyDir::open(tmp.path()).unwrap();
        let entries = dir.read_entries(0).unwrap();
        let entry = &entries[0];
        assert_eq!(entry.size(), Some(4));

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"5678").unwrap();

        assert_eq!(entry.size(), Some(4));
        assert!(!entry.is_dir());
        assert!(entry.created_ms().is_some());
        assert!(entry.modified().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_has_no_metadata() {
        let tmp = TempDir::new().unwrap();
        std::os::unix::fs::symlink(tmp.path().join("gone"), tmp.path().join("link.mp4")).unwrap();

        let dir = LazyDir::open(tmp.path()).unwrap();
        let entries = dir.read_entries(0).unwrap();
        assert_eq!(entries[0].name(), "link.mp4");
        assert_eq!(entries[0].created_ms(), None);
        assert_eq!(entries[0].identity(), None);
        assert!(!entries[0].is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_identity_shared_by_hard_links() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.jpg");
        std::fs::write(&a, b"img").unwrap();
        std::fs::hard_link(&a, tmp.path().join("b.jpg")).unwrap();

        let dir = LazyDir::open(tmp.path()).unwrap();
        let entries = dir.read_entries(0).unwrap();
        assert_eq!(entries[0].identity(), entries[1].identity());

        let id = entries[0].identity().unwrap().to_string();
        let (dev, ino) = id.split_once('.').unwrap();
        assert!(dev.len() >= 8);
        assert_eq!(ino.len(), 16);
    }
}
