//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Library layout and selection policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryConfig {
    /// Root of the media library (contains `movies/` and `tv/`)
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// Scratch directory the transcoder writes its output into
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// Directory holding one event log per host
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Only consider items under `tv/`
    #[serde(default)]
    pub tv_only: bool,
    /// Also transcode items that are not full HD
    #[serde(default)]
    pub include_non_hd: bool,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/home/srv-user/media")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/home/srv-user/logs/transcode")
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            staging_dir: default_staging_dir(),
            log_dir: default_log_dir(),
            tv_only: false,
            include_non_hd: false,
        }
    }
}

/// Run-level pacing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    /// Wall-clock budget in hours; negative means run until the scan is exhausted
    #[serde(default = "default_max_hours")]
    pub max_hours: i64,
    /// Pause between transcoded items, in minutes
    #[serde(default = "default_cooldown_mins")]
    pub cooldown_mins: u64,
}

fn default_max_hours() -> i64 {
    -1
}

fn default_cooldown_mins() -> u64 {
    5
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            max_hours: default_max_hours(),
            cooldown_mins: default_cooldown_mins(),
        }
    }
}

/// CPU allowance for the transcoding container, by time of day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpuConfig {
    /// Cores granted before `evening_start_hour`
    #[serde(default = "default_day_cores")]
    pub day_cores: u32,
    /// Cores granted from `evening_start_hour` until midnight
    #[serde(default = "default_evening_cores")]
    pub evening_cores: u32,
    /// Local hour (0-23) at which the evening allowance starts
    #[serde(default = "default_evening_start_hour")]
    pub evening_start_hour: u32,
}

fn default_day_cores() -> u32 {
    12
}

fn default_evening_cores() -> u32 {
    8
}

fn default_evening_start_hour() -> u32 {
    16
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            day_cores: default_day_cores(),
            evening_cores: default_evening_cores(),
            evening_start_hour: default_evening_start_hour(),
        }
    }
}

/// Containerised HandBrake invocation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscoderConfig {
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
    #[serde(default = "default_image")]
    pub image: String,
    /// `uid:gid` the container runs as
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_container_name")]
    pub container_name: String,
    /// Port published for the image's web UI
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    #[serde(default = "default_encoder")]
    pub encoder: String,
    /// Constant quality target (lower is better)
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default = "default_audio_languages")]
    pub audio_languages: Vec<String>,
    /// Audio codecs passed through untouched; everything else is re-encoded
    #[serde(default = "default_audio_copy_codecs")]
    pub audio_copy_codecs: Vec<String>,
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "jlesage/handbrake:latest".to_string()
}

fn default_user() -> String {
    "1000:1000".to_string()
}

fn default_container_name() -> String {
    "transcode".to_string()
}

fn default_web_port() -> u16 {
    5800
}

fn default_encoder() -> String {
    "x264".to_string()
}

fn default_quality() -> u32 {
    25
}

fn default_audio_languages() -> Vec<String> {
    vec!["eng".to_string(), "ger".to_string()]
}

fn default_audio_copy_codecs() -> Vec<String> {
    ["ac3", "aac", "dts", "dtshd"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_max_width() -> u32 {
    1920
}

fn default_max_height() -> u32 {
    1080
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            docker_bin: default_docker_bin(),
            image: default_image(),
            user: default_user(),
            container_name: default_container_name(),
            web_port: default_web_port(),
            encoder: default_encoder(),
            quality: default_quality(),
            audio_languages: default_audio_languages(),
            audio_copy_codecs: default_audio_copy_codecs(),
            max_width: default_max_width(),
            max_height: default_max_height(),
        }
    }
}

/// Retry behaviour when the transcoding process fails
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Fixed delay between attempts, in seconds
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    /// Maximum attempts per item (0 = retry forever)
    #[serde(default)]
    pub max_attempts: u32,
}

fn default_backoff_secs() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_secs: default_backoff_secs(),
            max_attempts: 0,
        }
    }
}

/// Radarr connection and post-transcode refresh settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RadarrConfig {
    #[serde(default = "default_radarr_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Host that owns the Radarr instance; refreshes only run there
    #[serde(default)]
    pub production_host: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_confirm_attempts")]
    pub confirm_attempts: u32,
}

fn default_radarr_url() -> String {
    "http://localhost:7878/api".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_confirm_attempts() -> u32 {
    5
}

impl Default for RadarrConfig {
    fn default() -> Self {
        Self {
            base_url: default_radarr_url(),
            api_key: None,
            production_host: None,
            poll_interval_secs: default_poll_interval_secs(),
            confirm_attempts: default_confirm_attempts(),
        }
    }
}

/// Sonarr connection settings (read-only queries)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SonarrConfig {
    #[serde(default = "default_sonarr_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_sonarr_url() -> String {
    "http://localhost:8989/api".to_string()
}

impl Default for SonarrConfig {
    fn default() -> Self {
        Self {
            base_url: default_sonarr_url(),
            api_key: None,
        }
    }
}

/// Chat webhook the status digest is posted to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyConfig {
    #[serde(default = "default_webhook_base")]
    pub webhook_base: String,
    /// Secret path appended to `webhook_base`
    #[serde(default)]
    pub service_path: Option<String>,
}

fn default_webhook_base() -> String {
    "https://hooks.slack.com/services/".to_string()
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_base: default_webhook_base(),
            service_path: None,
        }
    }
}

/// Status digest settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportConfig {
    /// Mount points listed in the disk section
    #[serde(default = "default_mounts")]
    pub mounts: Vec<PathBuf>,
}

fn default_mounts() -> Vec<PathBuf> {
    ["/home", "/", "/mnt/nas-backup"]
        .iter()
        .map(PathBuf::from)
        .collect()
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            mounts: default_mounts(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub cpu: CpuConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub radarr: RadarrConfig,
    #[serde(default)]
    pub sonarr: SonarrConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and fills missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - RADARR_API_KEY -> radarr.api_key
    /// - SONARR_API_KEY -> sonarr.api_key
    /// - SLACK_SERVICE_PATH -> notify.service_path
    /// - TRANSCODE_PRODUCTION_HOST -> radarr.production_host
    /// - TRANSCODE_LOG_DIR -> library.log_dir
    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = non_empty_var("RADARR_API_KEY") {
            self.radarr.api_key = Some(key);
        }

        if let Some(key) = non_empty_var("SONARR_API_KEY") {
            self.sonarr.api_key = Some(key);
        }

        if let Some(path) = non_empty_var("SLACK_SERVICE_PATH") {
            self.notify.service_path = Some(path);
        }

        if let Some(host) = non_empty_var("TRANSCODE_PRODUCTION_HOST") {
            self.radarr.production_host = Some(host);
        }

        if let Some(dir) = non_empty_var("TRANSCODE_LOG_DIR") {
            self.library.log_dir = PathBuf::from(dir);
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }
}

/// Empty values are treated as unset.
fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        env::remove_var("RADARR_API_KEY");
        env::remove_var("SONARR_API_KEY");
        env::remove_var("SLACK_SERVICE_PATH");
        env::remove_var("TRANSCODE_PRODUCTION_HOST");
        env::remove_var("TRANSCODE_LOG_DIR");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            max_hours in -1i64..48,
            cooldown in 0u64..60,
            day_cores in 1u32..64,
            evening_cores in 1u32..64,
            evening_hour in 0u32..24,
            backoff in 0u64..600,
            attempts in 0u32..10,
            tv_only in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
[library]
root_dir = "/srv/media"
tv_only = {}

[schedule]
max_hours = {}
cooldown_mins = {}

[cpu]
day_cores = {}
evening_cores = {}
evening_start_hour = {}

[retry]
backoff_secs = {}
max_attempts = {}
"#,
                tv_only, max_hours, cooldown, day_cores, evening_cores, evening_hour, backoff, attempts
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.library.root_dir, PathBuf::from("/srv/media"));
            prop_assert_eq!(config.library.tv_only, tv_only);
            prop_assert_eq!(config.schedule.max_hours, max_hours);
            prop_assert_eq!(config.schedule.cooldown_mins, cooldown);
            prop_assert_eq!(config.cpu.day_cores, day_cores);
            prop_assert_eq!(config.cpu.evening_cores, evening_cores);
            prop_assert_eq!(config.cpu.evening_start_hour, evening_hour);
            prop_assert_eq!(config.retry.backoff_secs, backoff);
            prop_assert_eq!(config.retry.max_attempts, attempts);
        }

        #[test]
        fn prop_env_overrides_radarr_api_key(
            initial in proptest::option::of("[a-f0-9]{32}"),
            override_key in "[a-f0-9]{32}",
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                "[radarr]\n{}\n",
                initial.as_ref().map(|k| format!("api_key = \"{}\"", k)).unwrap_or_default()
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("RADARR_API_KEY", &override_key);
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.radarr.api_key, Some(override_key));
        }
    }

    #[test]
    fn test_env_overrides_remaining_keys() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        env::set_var("SONARR_API_KEY", "sonarr-key");
        env::set_var("SLACK_SERVICE_PATH", "T000/B000/XXX");
        env::set_var("TRANSCODE_PRODUCTION_HOST", "srv.example.org");
        env::set_var("TRANSCODE_LOG_DIR", "/var/log/transcode");

        let mut config = Config::default();
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.sonarr.api_key.as_deref(), Some("sonarr-key"));
        assert_eq!(config.notify.service_path.as_deref(), Some("T000/B000/XXX"));
        assert_eq!(
            config.radarr.production_host.as_deref(),
            Some("srv.example.org")
        );
        assert_eq!(config.library.log_dir, PathBuf::from("/var/log/transcode"));
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        env::set_var("RADARR_API_KEY", "   ");
        let mut config = Config::default();
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.radarr.api_key, None);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.schedule.max_hours, -1);
        assert_eq!(config.schedule.cooldown_mins, 5);
        assert_eq!(config.cpu.day_cores, 12);
        assert_eq!(config.cpu.evening_cores, 8);
        assert_eq!(config.cpu.evening_start_hour, 16);
        assert_eq!(config.retry.backoff_secs, 60);
        assert_eq!(config.retry.max_attempts, 0);
        assert_eq!(config.radarr.confirm_attempts, 5);
        assert_eq!(config.radarr.poll_interval_secs, 10);
        assert_eq!(config.transcoder.max_width, 1920);
        assert_eq!(config.transcoder.max_height, 1080);
        assert!(!config.library.tv_only);
        assert!(!config.library.include_non_hd);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[transcoder]
quality = 22
audio_languages = ["eng"]
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.transcoder.quality, 22);
        assert_eq!(config.transcoder.audio_languages, vec!["eng".to_string()]);
        assert_eq!(config.transcoder.encoder, "x264"); // default
        assert_eq!(config.transcoder.image, "jlesage/handbrake:latest"); // default
        assert_eq!(config.cpu, CpuConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let result = Config::parse_toml("[schedule]\nmax_hours = \"soon\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
