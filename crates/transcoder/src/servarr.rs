//! Radarr and Sonarr clients
//!
//! Read-only queries for download counts, plus the Radarr refresh-and-confirm
//! sequence run after a movie has been renamed by a transcode.

use crate::report::Progress;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use library_transcoder_config::{RadarrConfig, SonarrConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type for download-manager requests
#[derive(Debug, Error)]
pub enum ServarrError {
    /// Transport failure, non-success status or undecodable body
    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// No API key configured
    #[error("{0} API key is not configured")]
    MissingApiKey(&'static str),
}

/// A movie as reported by Radarr
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "hasFile")]
    pub downloaded: bool,
    #[serde(default)]
    pub movie_file: Option<MovieFile>,
}

impl Movie {
    /// Recorded file name, if the movie has a file
    pub fn file_name(&self) -> Option<&str> {
        self.movie_file.as_ref().map(|f| f.relative_path.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieFile {
    pub relative_path: String,
}

/// An asynchronous Radarr command
#[derive(Debug, Clone, Deserialize)]
pub struct CommandStatus {
    pub id: u64,
    #[serde(default)]
    pub state: String,
}

impl CommandStatus {
    pub fn is_completed(&self) -> bool {
        self.state == "completed"
    }

    /// The command will not progress any further
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state.as_str(),
            "completed" | "failed" | "aborted" | "cancelled"
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshMovieCommand {
    name: &'static str,
    movie_id: u64,
}

/// A series as reported by Sonarr
#[derive(Debug, Clone, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub seasons: Vec<Season>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Season {
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub statistics: SeasonStatistics,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeasonStatistics {
    pub episode_file_count: u64,
    pub total_episode_count: u64,
    pub percent_of_episodes: f64,
}

/// Movies known to Radarr and how many have a file
pub fn movie_counts(movies: &[Movie]) -> Progress {
    Progress {
        done: movies.iter().filter(|m| m.downloaded).count() as u64,
        total: movies.len() as u64,
    }
}

/// Episode and series completion across Sonarr's library
///
/// Unmonitored seasons without any files are left out entirely. A series is
/// complete when every counted season is at 100%.
pub fn series_counts(series: &[Series]) -> (Progress, Progress) {
    let mut episodes = Progress::default();
    let mut shows = Progress {
        done: 0,
        total: series.len() as u64,
    };

    for serie in series {
        let mut complete = true;
        for season in &serie.seasons {
            let stats = &season.statistics;
            if !season.monitored && stats.episode_file_count == 0 {
                continue;
            }
            episodes.total += stats.total_episode_count;
            episodes.done += stats.episode_file_count;
            complete &= stats.percent_of_episodes.trunc() as i64 == 100;
        }
        if complete {
            shows.done += 1;
        }
    }

    (episodes, shows)
}

/// Thin JSON-over-HTTP client shared by both services
#[derive(Debug, Clone)]
struct ApiClient {
    service: &'static str,
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    fn new(service: &'static str, base_url: &str, api_key: Option<&str>) -> Result<Self, ServarrError> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or(ServarrError::MissingApiKey(service))?;
        Ok(Self {
            service,
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn wrap(&self, source: reqwest::Error) -> ServarrError {
        ServarrError::Http {
            service: self.service,
            source,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ServarrError> {
        let response = self
            .http
            .get(self.url(path))
            .query(&[("apikey", &self.api_key)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.wrap(e))?;
        response.json().await.map_err(|e| self.wrap(e))
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ServarrError> {
        let response = self
            .http
            .post(self.url(path))
            .query(&[("apikey", &self.api_key)])
            .json(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.wrap(e))?;
        response.json().await.map_err(|e| self.wrap(e))
    }
}

/// Radarr operations used by [`RadarrSync`]
#[async_trait]
pub trait RadarrApi: Send + Sync {
    async fn list_movies(&self) -> Result<Vec<Movie>, ServarrError>;
    async fn get_movie(&self, id: u64) -> Result<Movie, ServarrError>;
    async fn refresh_movie(&self, id: u64) -> Result<CommandStatus, ServarrError>;
    async fn command(&self, id: u64) -> Result<CommandStatus, ServarrError>;
}

/// HTTP client for Radarr
#[derive(Debug, Clone)]
pub struct RadarrClient {
    api: ApiClient,
}

impl RadarrClient {
    pub fn new(cfg: &RadarrConfig) -> Result<Self, ServarrError> {
        Ok(Self {
            api: ApiClient::new("Radarr", &cfg.base_url, cfg.api_key.as_deref())?,
        })
    }

    /// (downloaded, total) movies
    pub async fn download_counts(&self) -> Result<Progress, ServarrError> {
        Ok(movie_counts(&self.list_movies().await?))
    }
}

#[async_trait]
impl RadarrApi for RadarrClient {
    async fn list_movies(&self) -> Result<Vec<Movie>, ServarrError> {
        self.api.get("movie").await
    }

    async fn get_movie(&self, id: u64) -> Result<Movie, ServarrError> {
        self.api.get(&format!("movie/{}", id)).await
    }

    async fn refresh_movie(&self, id: u64) -> Result<CommandStatus, ServarrError> {
        let body = RefreshMovieCommand {
            name: "RefreshMovie",
            movie_id: id,
        };
        self.api.post("command", &body).await
    }

    async fn command(&self, id: u64) -> Result<CommandStatus, ServarrError> {
        self.api.get(&format!("command/{}", id)).await
    }
}

/// HTTP client for Sonarr
#[derive(Debug, Clone)]
pub struct SonarrClient {
    api: ApiClient,
}

impl SonarrClient {
    pub fn new(cfg: &SonarrConfig) -> Result<Self, ServarrError> {
        Ok(Self {
            api: ApiClient::new("Sonarr", &cfg.base_url, cfg.api_key.as_deref())?,
        })
    }

    pub async fn list_series(&self) -> Result<Vec<Series>, ServarrError> {
        self.api.get("series").await
    }

    /// (episodes, series) completion
    pub async fn download_counts(&self) -> Result<(Progress, Progress), ServarrError> {
        Ok(series_counts(&self.list_series().await?))
    }
}

/// Keeps an external library's record of a file in step with a rename
#[async_trait]
pub trait LibrarySync: Send + Sync {
    /// Returns `Ok(true)` once the library reports `new_name`, `Ok(false)` if
    /// the item is unknown or the attempts ran out.
    async fn confirm_rename(&self, old_name: &str, new_name: &str) -> Result<bool, ServarrError>;
}

/// [`LibrarySync`] for Radarr: refresh the movie until it reports the new file
pub struct RadarrSync<A: RadarrApi> {
    api: A,
    policy: RetryPolicy,
}

impl RadarrSync<RadarrClient> {
    pub fn from_config(cfg: &RadarrConfig) -> Result<Self, ServarrError> {
        Ok(Self::new(
            RadarrClient::new(cfg)?,
            RetryPolicy::bounded(cfg.confirm_attempts, Duration::from_secs(cfg.poll_interval_secs)),
        ))
    }
}

impl<A: RadarrApi> RadarrSync<A> {
    /// `policy.max_attempts` bounds the number of refreshes; `policy.backoff`
    /// is the command poll interval.
    pub fn new(api: A, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }

    async fn wait_for_command(&self, mut command: CommandStatus) -> Result<CommandStatus, ServarrError> {
        while !command.is_finished() {
            tokio::time::sleep(self.policy.backoff).await;
            command = self.api.command(command.id).await?;
        }
        Ok(command)
    }
}

#[async_trait]
impl<A: RadarrApi> LibrarySync for RadarrSync<A> {
    async fn confirm_rename(&self, old_name: &str, new_name: &str) -> Result<bool, ServarrError> {
        let movies = self.api.list_movies().await?;
        let Some(movie) = movies
            .iter()
            .find(|m| m.downloaded && m.file_name() == Some(old_name))
        else {
            debug!(file = old_name, "no Radarr movie records this file");
            return Ok(false);
        };

        let mut refreshes = 0;
        loop {
            let current = self.api.get_movie(movie.id).await?;
            if current.file_name() == Some(new_name) {
                info!(movie = %movie.title, file = new_name, "Radarr reports new file");
                return Ok(true);
            }

            if !self.policy.allows_retry(refreshes) {
                warn!(
                    movie = %movie.title,
                    refreshes,
                    "Radarr still reports the old file, giving up"
                );
                return Ok(false);
            }

            refreshes += 1;
            let command = self.api.refresh_movie(movie.id).await?;
            let command = self.wait_for_command(command).await?;
            if !command.is_completed() {
                warn!(movie = %movie.title, state = %command.state, "refresh command did not complete");
            }
        }
    }
}
