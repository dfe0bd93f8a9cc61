//! On-demand resized images with an on-disk cache.
//!
//! Cache files are named after the source file's device and inode, so
//! two paths to the same file share entries and replacing a file orphans
//! its old entries (removed later by the cache sweep):
//!
//! - `<dev>.<ino>` holds the natural size of the source as `WxH\n`
//! - `<dev>.<ino>:<w>x<h>q=<q>` holds one derived image

use axum::body::Body;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use crate::scanner::dir::FileIdentity;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("file not found")]
    NotFound,
    #[error("not an image")]
    NotAnImage,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("image task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Query parameters of an image request. Zero means "not given".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ImageParams {
    #[serde(rename = "w")]
    pub width: u32,
    #[serde(rename = "h")]
    pub height: u32,
    #[serde(rename = "mw")]
    pub max_width: u32,
    #[serde(rename = "mh")]
    pub max_height: u32,
    #[serde(rename = "q")]
    pub quality: u32,
}

impl ImageParams {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Target size for a source of `natural` size. Missing dimensions
    /// follow the source's aspect ratio, then both are clipped to the
    /// max bounds together.
    pub fn resolve_dimensions(&self, natural: (u32, u32)) -> (u32, u32) {
        let (ow, oh) = (f64::from(natural.0), f64::from(natural.1));
        let mut w = f64::from(self.width);
        let mut h = f64::from(self.height);
        let mut mw = f64::from(self.max_width);
        let mut mh = f64::from(self.max_height);

        if w == 0.0 || h == 0.0 {
            let ar = ow / oh;

            if w == 0.0 && h > 0.0 {
                w = h * ar;
            }
            if h == 0.0 && w > 0.0 {
                h = w / ar;
            }
            if w == 0.0 && h == 0.0 {
                w = ow;
                h = oh;
            }

            if mw != 0.0 || mh != 0.0 {
                if mh == 0.0 || (mw > 0.0 && mh * ar > mw) {
                    mh = mw / ar;
                }
                if mw == 0.0 || (mh > 0.0 && mw / ar > mh) {
                    mw = mh * ar;
                }
            }

            if (mh > 0.0 && h > mh) || (mw > 0.0 && w > mw) {
                h = mh;
                w = mw;
            }
        }

        ((w as u32).max(1), (h as u32).max(1))
    }
}

/// Image bytes ready to be served, either still on disk or in memory.
#[derive(Debug)]
pub enum Blob {
    File {
        file: File,
        size: u64,
        identity: Option<FileIdentity>,
    },
    Memory {
        bytes: Vec<u8>,
        identity: Option<FileIdentity>,
    },
}

impl Blob {
    pub fn size(&self) -> u64 {
        match self {
            Blob::File { size, .. } => *size,
            Blob::Memory { bytes, .. } => bytes.len() as u64,
        }
    }

    /// Identity of the source the bytes were derived from
    pub fn identity(&self) -> Option<FileIdentity> {
        match self {
            Blob::File { identity, .. } | Blob::Memory { identity, .. } => *identity,
        }
    }

    pub fn into_body(self) -> Body {
        match self {
            Blob::File { file, .. } => Body::from_stream(ReaderStream::new(file)),
            Blob::Memory { bytes, .. } => Body::from(bytes),
        }
    }

    pub async fn into_bytes(self) -> io::Result<Vec<u8>> {
        match self {
            Blob::File { mut file, size, .. } => {
                let mut buf = Vec::with_capacity(size as usize);
                file.read_to_end(&mut buf).await?;
                Ok(buf)
            }
            Blob::Memory { bytes, .. } => Ok(bytes),
        }
    }
}

#[derive(Debug)]
pub struct Artifact {
    pub content_type: &'static str,
    pub blob: Blob,
}

/// Content type of a servable image, by extension
pub fn image_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" | "tbn" => Some("image/jpeg"),
        _ => None,
    }
}

pub struct ImageCache {
    cache_dir: Option<PathBuf>,
    jpeg_quality: u8,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    transforms: AtomicUsize,
}

impl ImageCache {
    /// Without a cache dir every derived image is produced in memory.
    pub fn new(cache_dir: Option<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            cache_dir,
            jpeg_quality: jpeg_quality.clamp(1, 100),
            locks: Mutex::new(HashMap::new()),
            transforms: AtomicUsize::new(0),
        }
    }

    /// Number of decode/resize/encode runs since startup
    pub fn transforms_performed(&self) -> usize {
        self.transforms.load(Ordering::Relaxed)
    }

    /// Serve `path`, resized and/or re-encoded per `params`.
    pub async fn resolve(&self, path: &Path, params: &ImageParams) -> Result<Artifact, ArtifactError> {
        let content_type = image_content_type(path).ok_or(ArtifactError::NotAnImage)?;

        let file = File::open(path).await.map_err(not_found_or_io)?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(ArtifactError::NotFound);
        }
        let identity = FileIdentity::of(&meta);
        let original = |file| Artifact {
            content_type,
            blob: Blob::File {
                file,
                size: meta.len(),
                identity,
            },
        };

        if params.is_empty() {
            return Ok(original(file));
        }

        let natural = self.natural_dimensions(path, identity).await?;
        let (width, height) = params.resolve_dimensions(natural);
        let resize = (width, height) != natural;
        if !resize && params.quality == 0 {
            return Ok(original(file));
        }
        drop(file);

        let cache_file = match (&self.cache_dir, identity) {
            (Some(dir), Some(id)) => Some(dir.join(format!(
                "{}:{}x{}q={}",
                id, width, height, params.quality
            ))),
            _ => None,
        };

        if let Some(cached) = open_cached(cache_file.as_deref(), content_type, identity).await? {
            return Ok(cached);
        }

        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        // Someone else may have produced it while we waited.
        if let Some(cached) = open_cached(cache_file.as_deref(), content_type, identity).await? {
            return Ok(cached);
        }

        let quality = match params.quality {
            0 => self.jpeg_quality,
            q => q.clamp(1, 100) as u8,
        };
        let source = path.to_path_buf();
        let bytes = tokio::task::spawn_blocking(move || {
            render(&source, content_type, resize.then_some((width, height)), quality)
        })
        .await??;
        self.transforms.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Resized {} to {}x{} q={}",
            path.display(),
            width,
            height,
            params.quality
        );

        if let (Some(target), Some(dir)) = (cache_file, self.cache_dir.clone()) {
            let data = bytes.clone();
            let dest = target.clone();
            match tokio::task::spawn_blocking(move || write_atomic(&dir, &dest, &data)).await? {
                Ok(()) => {
                    if let Some(cached) =
                        open_cached(Some(target.as_path()), content_type, identity).await?
                    {
                        return Ok(cached);
                    }
                }
                Err(e) => tracing::warn!("Failed to cache {}: {}", target.display(), e),
            }
        }

        Ok(Artifact {
            content_type,
            blob: Blob::Memory { bytes, identity },
        })
    }

    /// Natural size of the source, from the side index or by probing
    /// the image header.
    async fn natural_dimensions(
        &self,
        path: &Path,
        identity: Option<FileIdentity>,
    ) -> Result<(u32, u32), ArtifactError> {
        let info_file = match (&self.cache_dir, identity) {
            (Some(dir), Some(id)) => Some(dir.join(id.to_string())),
            _ => None,
        };

        if let Some(info_file) = &info_file {
            if let Ok(text) = tokio::fs::read_to_string(info_file).await {
                if let Some(dims) = parse_dimensions(&text) {
                    return Ok(dims);
                }
            }
        }

        let source = path.to_path_buf();
        let dims = tokio::task::spawn_blocking(move || image::image_dimensions(&source)).await??;
        if dims.0 == 0 || dims.1 == 0 {
            return Err(ArtifactError::NotAnImage);
        }

        if let (Some(info_file), Some(dir)) = (info_file, self.cache_dir.clone()) {
            let text = format!("{}x{}\n", dims.0, dims.1);
            let written =
                tokio::task::spawn_blocking(move || write_atomic(&dir, &info_file, text.as_bytes()))
                    .await?;
            if let Err(e) = written {
                tracing::debug!("Failed to store image size: {}", e);
            }
        }
        Ok(dims)
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(path.to_path_buf()).or_default().clone()
    }
}

fn not_found_or_io(e: io::Error) -> ArtifactError {
    if e.kind() == io::ErrorKind::NotFound {
        ArtifactError::NotFound
    } else {
        ArtifactError::Io(e)
    }
}

fn parse_dimensions(text: &str) -> Option<(u32, u32)> {
    let (w, h) = text.trim().split_once('x')?;
    let dims = (w.parse().ok()?, h.parse().ok()?);
    (dims.0 > 0 && dims.1 > 0).then_some(dims)
}

async fn open_cached(
    cache_file: Option<&Path>,
    content_type: &'static str,
    identity: Option<FileIdentity>,
) -> Result<Option<Artifact>, ArtifactError> {
    let Some(cache_file) = cache_file else {
        return Ok(None);
    };
    let file = match File::open(cache_file).await {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let size = file.metadata().await?.len();
    Ok(Some(Artifact {
        content_type,
        blob: Blob::File {
            file,
            size,
            identity,
        },
    }))
}

/// Decode, optionally resize, and re-encode in the source's format.
fn render(
    path: &Path,
    content_type: &str,
    size: Option<(u32, u32)>,
    quality: u8,
) -> Result<Vec<u8>, ArtifactError> {
    use image::codecs::jpeg::JpegEncoder;
    use image::{ColorType, ImageFormat};

    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    let img = match size {
        Some((w, h)) => img.thumbnail_exact(w, h),
        None => img,
    };

    let mut out = Cursor::new(Vec::new());
    if content_type == "image/png" {
        img.write_to(&mut out, ImageFormat::Png)?;
    } else {
        let rgb = img.to_rgb8();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
        encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8.into())?;
    }
    Ok(out.into_inner())
}

/// Write through a temp file in `dir` and rename into place, so readers
/// never see a partial file.
fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn params(w: u32, h: u32, mw: u32, mh: u32, q: u32) -> ImageParams {
        ImageParams {
            width: w,
            height: h,
            max_width: mw,
            max_height: mh,
            quality: q,
        }
    }

    fn write_jpeg(path: &Path, w: u32, h: u32) {
        let img = ImageBuffer::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_resolve_dimensions() {
        assert_eq!(params(0, 0, 200, 0, 0).resolve_dimensions((1600, 900)), (200, 112));

        let natural = (1000, 500);
        assert_eq!(params(0, 0, 0, 100, 0).resolve_dimensions(natural), (200, 100));
        assert_eq!(params(300, 0, 0, 0, 0).resolve_dimensions(natural), (300, 150));
        assert_eq!(params(0, 250, 0, 0, 0).resolve_dimensions(natural), (500, 250));
        assert_eq!(params(100, 100, 0, 0, 0).resolve_dimensions(natural), (100, 100));
        assert_eq!(params(0, 0, 0, 0, 80).resolve_dimensions(natural), (1000, 500));
        // bounds larger than the image leave it alone
        assert_eq!(params(0, 0, 4000, 4000, 0).resolve_dimensions(natural), (1000, 500));
        // the tighter of two bounds wins
        assert_eq!(params(0, 0, 400, 100, 0).resolve_dimensions(natural), (200, 100));
        assert_eq!(params(0, 0, 100, 400, 0).resolve_dimensions(natural), (100, 50));
    }

    #[test]
    fn test_params_from_query() {
        let p: ImageParams = serde_json::from_str(r#"{"mw": 200, "q": 70}"#).unwrap();
        assert_eq!(p, params(0, 0, 200, 0, 70));
        assert!(ImageParams::default().is_empty());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(image_content_type(Path::new("a/poster.JPG")), Some("image/jpeg"));
        assert_eq!(image_content_type(Path::new("thumb.tbn")), Some("image/jpeg"));
        assert_eq!(image_content_type(Path::new("x.png")), Some("image/png"));
        assert_eq!(image_content_type(Path::new("movie.mp4")), None);
    }

    #[tokio::test]
    async fn test_passthrough_and_errors() {
        let src = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let path = src.path().join("poster.jpg");
        write_jpeg(&path, 64, 32);
        std::fs::write(src.path().join("notes.txt"), b"hi").unwrap();

        let images = ImageCache::new(Some(cache.path().to_path_buf()), 90);
        let artifact = images.resolve(&path, &ImageParams::default()).await.unwrap();
        assert_eq!(artifact.content_type, "image/jpeg");
        let bytes = artifact.blob.into_bytes().await.unwrap();
        assert_eq!(bytes, std::fs::read(&path).unwrap());

        // already the requested size
        let same = images.resolve(&path, &params(64, 32, 0, 0, 0)).await.unwrap();
        assert_eq!(same.blob.size(), std::fs::metadata(&path).unwrap().len());
        assert_eq!(images.transforms_performed(), 0);

        assert!(matches!(
            images.resolve(&src.path().join("notes.txt"), &ImageParams::default()).await,
            Err(ArtifactError::NotAnImage)
        ));
        assert!(matches!(
            images.resolve(&src.path().join("gone.jpg"), &ImageParams::default()).await,
            Err(ArtifactError::NotFound)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_max_width_is_cached_under_identity() {
        let src = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let path = src.path().join("fanart.jpg");
        write_jpeg(&path, 1600, 900);

        let images = ImageCache::new(Some(cache.path().to_path_buf()), 90);
        let artifact = images.resolve(&path, &params(0, 0, 200, 0, 0)).await.unwrap();
        let identity = artifact.blob.identity().unwrap();
        let bytes = artifact.blob.into_bytes().await.unwrap();

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 112));

        let cached = cache.path().join(format!("{}:200x112q=0", identity));
        assert_eq!(std::fs::read(&cached).unwrap(), bytes);
        let info = std::fs::read_to_string(cache.path().join(identity.to_string())).unwrap();
        assert_eq!(info, "1600x900\n");

        // a second request is a cache hit
        images.resolve(&path, &params(0, 0, 200, 0, 0)).await.unwrap();
        assert_eq!(images.transforms_performed(), 1);

        // a hard link shares the entry
        let link = src.path().join("link.jpg");
        std::fs::hard_link(&path, &link).unwrap();
        images.resolve(&link, &params(0, 0, 200, 0, 0)).await.unwrap();
        assert_eq!(images.transforms_performed(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_transform_once() {
        let src = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let path = src.path().join("poster.jpg");
        write_jpeg(&path, 800, 1200);

        let images = Arc::new(ImageCache::new(Some(cache.path().to_path_buf()), 90));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let images = images.clone();
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                let artifact = images.resolve(&path, &params(0, 300, 0, 0, 0)).await.unwrap();
                artifact.blob.into_bytes().await.unwrap()
            }));
        }

        let mut outputs = Vec::new();
        for handle in handles {
            outputs.push(handle.await.unwrap());
        }

        assert_eq!(images.transforms_performed(), 1);
        assert!(outputs.iter().all(|o| *o == outputs[0]));
        assert!(!outputs[0].is_empty());
    }

    #[tokio::test]
    async fn test_without_cache_dir_transforms_in_memory() {
        let src = TempDir::new().unwrap();
        let path = src.path().join("poster.png");
        ImageBuffer::from_pixel(40, 40, Rgb([10u8, 20, 30]))
            .save(&path)
            .unwrap();

        let images = ImageCache::new(None, 90);
        for _ in 0..2 {
            let artifact = images.resolve(&path, &params(20, 0, 0, 0, 0)).await.unwrap();
            assert_eq!(artifact.content_type, "image/png");
            assert!(matches!(artifact.blob, Blob::Memory { .. }));
            let bytes = artifact.blob.into_bytes().await.unwrap();
            let decoded = image::load_from_memory(&bytes).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (20, 20));
        }
        assert_eq!(images.transforms_performed(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_image_is_an_error() {
        let src = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let path = src.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let images = ImageCache::new(Some(cache.path().to_path_buf()), 90);
        let err = images.resolve(&path, &params(10, 0, 0, 0, 0)).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Image(_) | ArtifactError::Io(_)));

        let leftovers: Vec<_> = std::fs::read_dir(cache.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
