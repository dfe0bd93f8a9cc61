// Configuration module for mediashelf
// Handles XDG-compliant directory paths and TOML configuration file

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::CollectionKind;

const APP_NAME: &str = "mediashelf";
const CONFIG_FILENAME: &str = "config.toml";
const ENV_PREFIX: &str = "MEDIASHELF_";

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Server configuration
    pub server: ServerConfig,

    /// Directory paths (overrides XDG defaults)
    pub paths: PathsConfig,

    /// Catalog rebuild configuration
    pub scanner: ScannerConfig,

    /// Image cache configuration
    pub cache: CacheConfig,

    /// Media collections to serve
    pub collections: Vec<CollectionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server port (default: 8060)
    pub port: u16,

    /// Bind address (default: 127.0.0.1)
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8060,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Override data directory (database location)
    pub data_dir: Option<PathBuf>,

    /// Override cache directory (resized images)
    pub cache_dir: Option<PathBuf>,

    /// Override config directory
    pub config_dir: Option<PathBuf>,
}

/// A media collection
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    /// Display name, unique
    pub name: String,

    /// "movies" or "shows"
    #[serde(rename = "type")]
    pub kind: CollectionKind,

    /// Root directory of the collection
    pub directory: PathBuf,
}

/// Catalog rebuild configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Enable periodic background rebuilds (default: true)
    /// The first build always runs at startup.
    pub enabled: bool,

    /// Pause between the end of one rebuild and the start of the next (default: 300)
    pub rebuild_interval_seconds: u64,

    /// Pause between items during periodic rebuilds, in milliseconds (default: 0)
    /// The startup build never pauses.
    pub pace_millis: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rebuild_interval_seconds: 300,
            pace_millis: 0,
        }
    }
}

impl ScannerConfig {
    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_secs(self.rebuild_interval_seconds.max(1))
    }

    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_millis)
    }
}

/// Image cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Store resized images on disk (default: true)
    /// When disabled every request is transformed in memory.
    pub enabled: bool,

    /// Interval between orphan sweeps, in minutes (default: 60, 0 to disable)
    pub reconcile_interval_minutes: u64,

    /// Pause after each file visited during a sweep (default: 1)
    pub entry_pause_millis: u64,

    /// Pause after each directory visited during a sweep (default: 5)
    pub dir_pause_millis: u64,

    /// JPEG quality used when a resize is requested without a quality (default: 90)
    pub jpeg_quality: u8,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconcile_interval_minutes: 60,
            entry_pause_millis: 1,
            dir_pause_millis: 5,
            jpeg_quality: 90,
        }
    }
}

/// Application paths following XDG Base Directory Specification on Unix
/// On other platforms, falls back to the current directory or platform-specific locations
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for configuration files (config.toml)
    /// XDG: $XDG_CONFIG_HOME/mediashelf or ~/.config/mediashelf
    pub config_dir: PathBuf,

    /// Directory for persistent data (database)
    /// XDG: $XDG_DATA_HOME/mediashelf or ~/.local/share/mediashelf
    pub data_dir: PathBuf,

    /// Directory for cache files (resized images)
    /// XDG: $XDG_CACHE_HOME/mediashelf or ~/.cache/mediashelf
    pub cache_dir: PathBuf,
}

impl AppPaths {
    /// Create application paths using XDG directories (or fallbacks)
    ///
    /// Priority order:
    /// 1. Environment variables (MEDIASHELF_CONFIG_DIR, MEDIASHELF_DATA_DIR, MEDIASHELF_CACHE_DIR)
    /// 2. Config file overrides
    /// 3. XDG / platform directories
    /// 4. Current directory fallback
    pub fn new(config_overrides: &PathsConfig) -> Self {
        Self {
            config_dir: Self::resolve("CONFIG_DIR", &config_overrides.config_dir, dirs::config_dir),
            data_dir: Self::resolve("DATA_DIR", &config_overrides.data_dir, dirs::data_dir),
            cache_dir: Self::resolve_cache_dir(&config_overrides.cache_dir),
        }
    }

    /// Create application paths using current directory (portable mode)
    pub fn current_dir() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            config_dir: cwd.clone(),
            data_dir: cwd.clone(),
            cache_dir: cwd.join("cache"),
        }
    }

    fn resolve(
        env_suffix: &str,
        config_override: &Option<PathBuf>,
        platform_dir: fn() -> Option<PathBuf>,
    ) -> PathBuf {
        if let Some(path) = env_var(env_suffix) {
            return PathBuf::from(path);
        }
        if let Some(ref path) = config_override {
            return path.clone();
        }
        if let Some(dir) = platform_dir() {
            return dir.join(APP_NAME);
        }
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Like `resolve`, but falls back to a `cache` subdirectory
    fn resolve_cache_dir(config_override: &Option<PathBuf>) -> PathBuf {
        if let Some(path) = env_var("CACHE_DIR") {
            return PathBuf::from(path);
        }
        if let Some(ref path) = config_override {
            return path.clone();
        }
        if let Some(dir) = dirs::cache_dir() {
            return dir.join(APP_NAME);
        }
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("cache")
    }

    /// Get the database file path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("mediashelf.db")
    }

    /// Get the database URL for SQLite
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.database_path().display())
    }

    /// Get the image cache directory
    pub fn image_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("images")
    }

    /// Get the config file path
    pub fn config_file_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILENAME)
    }

    /// Ensure all directories exist
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.config_dir).await?;
        tokio::fs::create_dir_all(&self.data_dir).await?;
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tokio::fs::create_dir_all(self.image_cache_dir()).await?;
        Ok(())
    }

    /// Log the configured paths
    pub fn log_paths(&self) {
        tracing::info!("Configuration directory: {}", self.config_dir.display());
        tracing::info!("Data directory: {}", self.data_dir.display());
        tracing::info!("Cache directory: {}", self.cache_dir.display());
        tracing::debug!("Database path: {}", self.database_path().display());
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new(&PathsConfig::default())
    }
}

/// Application configuration - combines TOML file with environment overrides
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Application paths
    pub paths: AppPaths,

    /// Server port
    pub port: u16,

    /// Bind address
    pub bind_address: String,

    /// Collections, in configuration order. The index is the source id
    /// used in `/data/<id>` urls.
    pub collections: Vec<CollectionConfig>,

    /// Rebuild configuration
    pub scanner: ScannerConfig,

    /// Image cache configuration
    pub cache: CacheConfig,
}

impl AppConfig {
    /// Load configuration from TOML file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML config file
    /// 3. Default values
    pub fn load() -> Self {
        if env_flag("PORTABLE").unwrap_or(false) {
            tracing::info!("Running in portable mode (using current directory)");
            let paths = AppPaths::current_dir();
            let config_file = Self::load_config_file(&paths.config_dir);
            return Self::build(config_file, paths);
        }

        let config_dir = Self::find_config_dir();
        let config_file = Self::load_config_file(&config_dir);
        let paths = AppPaths::new(&config_file.paths);
        Self::build(config_file, paths)
    }

    /// Find the config directory (for locating config.toml)
    fn find_config_dir() -> PathBuf {
        if let Some(path) = env_var("CONFIG_DIR") {
            return PathBuf::from(path);
        }
        if let Some(dir) = dirs::config_dir() {
            return dir.join(APP_NAME);
        }
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Load and parse the TOML config file
    fn load_config_file(config_dir: &std::path::Path) -> ConfigFile {
        let config_path = config_dir.join(CONFIG_FILENAME);

        if !config_path.exists() {
            tracing::debug!(
                "No config file found at {}, using defaults",
                config_path.display()
            );
            return ConfigFile::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse config file {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    ConfigFile::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}. Using defaults.",
                    config_path.display(),
                    e
                );
                ConfigFile::default()
            }
        }
    }

    /// Build configuration from config file with environment overrides
    fn build(config_file: ConfigFile, paths: AppPaths) -> Self {
        let port = env_var("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(config_file.server.port);
        let bind_address = env_var("BIND_ADDRESS").unwrap_or(config_file.server.bind_address);

        let mut scanner = config_file.scanner;
        if let Some(enabled) = env_flag("SCANNER_ENABLED") {
            scanner.enabled = enabled;
        }
        if let Some(secs) = env_var("REBUILD_INTERVAL").and_then(|v| v.parse().ok()) {
            scanner.rebuild_interval_seconds = secs;
        }

        let mut cache = config_file.cache;
        if let Some(enabled) = env_flag("CACHE_ENABLED") {
            cache.enabled = enabled;
        }

        Self {
            paths,
            port,
            bind_address,
            collections: config_file.collections,
            scanner,
            cache,
        }
    }

    /// Get the database URL, with override from DATABASE_URL env var
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.paths.database_url())
    }

    /// Image cache directory, if disk caching is enabled
    pub fn image_cache_dir(&self) -> Option<PathBuf> {
        self.cache.enabled.then(|| self.paths.image_cache_dir())
    }

    /// Log configuration status
    pub fn log_config(&self) {
        self.paths.log_paths();
        tracing::info!("Server listening on {}:{}", self.bind_address, self.port);

        if self.collections.is_empty() {
            tracing::warn!(
                "No collections configured. Add [[collections]] to {}",
                self.paths.config_file_path().display()
            );
        }
        for (id, coll) in self.collections.iter().enumerate() {
            tracing::info!(
                "Collection {} '{}' ({:?}): {}",
                id,
                coll.name,
                coll.kind,
                coll.directory.display()
            );
        }

        if self.scanner.enabled {
            tracing::info!(
                "Catalog rebuild every {}s",
                self.scanner.rebuild_interval_seconds
            );
        } else {
            tracing::info!("Periodic catalog rebuild: disabled");
        }

        if self.cache.enabled {
            tracing::debug!(
                "Image cache sweep every {} minutes",
                self.cache.reconcile_interval_minutes
            );
        } else {
            tracing::info!("Image cache: disabled (resizing in memory)");
        }
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, suffix)).ok()
}

fn env_flag(suffix: &str) -> Option<bool> {
    env_var(suffix).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_dir_paths() {
        let paths = AppPaths::current_dir();
        assert!(paths.config_dir.is_absolute() || paths.config_dir == PathBuf::from("."));
        assert!(paths.cache_dir.ends_with("cache"));
        assert!(paths.image_cache_dir().ends_with("cache/images"));
    }

    #[test]
    fn test_database_url_format() {
        let paths = AppPaths::current_dir();
        let url = paths.database_url();
        assert!(url.starts_with("sqlite:"));
        assert!(url.ends_with("mediashelf.db?mode=rwc"));
    }

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();
        assert_eq!(config.server.port, 8060);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert!(config.scanner.enabled);
        assert_eq!(config.scanner.rebuild_interval_seconds, 300);
        assert_eq!(config.cache.jpeg_quality, 90);
        assert_eq!(config.cache.dir_pause_millis, 5);
        assert!(config.collections.is_empty());
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[server]
port = 9000
bind_address = "0.0.0.0"

[paths]
cache_dir = "/var/cache/shelf"

[scanner]
rebuild_interval_seconds = 60
pace_millis = 20

[cache]
jpeg_quality = 75

[[collections]]
name = "Movies"
type = "movies"
directory = "/media/movies"

[[collections]]
name = "TV"
type = "shows"
directory = "/media/tv"
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.paths.cache_dir, Some(PathBuf::from("/var/cache/shelf")));
        assert_eq!(config.scanner.pace(), Duration::from_millis(20));
        assert_eq!(config.scanner.rebuild_interval(), Duration::from_secs(60));
        assert_eq!(config.cache.jpeg_quality, 75);
        assert!(config.cache.enabled);

        assert_eq!(config.collections.len(), 2);
        assert_eq!(config.collections[0].kind, CollectionKind::Movies);
        assert_eq!(config.collections[1].kind, CollectionKind::Shows);
        assert_eq!(config.collections[1].directory, PathBuf::from("/media/tv"));
    }

    #[test]
    fn test_unknown_collection_type_rejected() {
        let toml_str = r#"
[[collections]]
name = "Music"
type = "albums"
directory = "/media/music"
"#;
        assert!(toml::from_str::<ConfigFile>(toml_str).is_err());
    }

    #[test]
    fn test_partial_config_toml() {
        let toml_str = r#"
[cache]
enabled = false
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 8060);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.reconcile_interval_minutes, 60);
    }
}
