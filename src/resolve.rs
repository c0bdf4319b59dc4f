//! Audio source resolution: turn a search string or URL into a [`Track`]
//! by asking an external metadata extractor (`yt-dlp`).
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::errors::ResolutionError;
use crate::retry::RetryPolicy;
use crate::{Track, UNKNOWN_TITLE};

/// How long a single extractor run may take.
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(30);

/// A thumbnail entry as reported by the extractor.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Thumbnail {
    pub url: String,
}

/// The subset of `yt-dlp -J` output we care about. Search results and
/// playlists carry their items in `entries`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct MediaInfo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub thumbnails: Option<Vec<Thumbnail>>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub entries: Option<Vec<MediaInfo>>,
}

impl MediaInfo {
    fn best_thumbnail(&self) -> Option<String> {
        self.thumbnails
            .as_ref()
            .and_then(|thumbs| thumbs.first())
            .map(|thumb| thumb.url.clone())
            .or_else(|| self.thumbnail.clone())
    }
}

/// Source of media metadata for a query.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(&self, query: &str) -> Result<MediaInfo, ResolutionError>;
}

/// Runs the `yt-dlp` executable and parses its JSON dump.
#[derive(Clone, Debug)]
pub struct YtDlpExtractor {
    program: PathBuf,
    timeout: Duration,
}

impl YtDlpExtractor {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: EXTRACT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        YtDlpExtractor::new("yt-dlp")
    }
}

#[async_trait]
impl MetadataExtractor for YtDlpExtractor {
    async fn extract(&self, query: &str) -> Result<MediaInfo, ResolutionError> {
        let target = search_target(query);
        debug!("Running {} for {target}", self.program.display());
        let run = Command::new(&self.program)
            .args([
                "-J",
                "--no-playlist",
                "--no-warnings",
                "--quiet",
                "-f",
                "bestaudio/best",
            ])
            .arg(&target)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ResolutionError::Timeout(self.timeout))?
            .map_err(|e| {
                ResolutionError::Extraction(format!(
                    "could not run {}: {e}",
                    self.program.display()
                ))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolutionError::Extraction(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| ResolutionError::Extraction(format!("unreadable extractor output: {e}")))
    }
}

/// URLs go to the extractor untouched; anything else becomes a
/// single-result search.
#[must_use]
pub fn search_target(query: &str) -> String {
    let query = query.trim();
    match url::Url::parse(query) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url.to_string(),
        _ => format!("ytsearch1:{query}"),
    }
}

/// Pick the playable item out of extractor output. Lists resolve to their
/// first entry.
pub fn select_track(info: MediaInfo, query: &str) -> Result<Track, ResolutionError> {
    let media = match info.entries {
        Some(entries) => entries
            .into_iter()
            .next()
            .ok_or_else(|| ResolutionError::NoStream(query.to_string()))?,
        None => info,
    };
    let thumbnail = media.best_thumbnail();
    let stream_url = media
        .url
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ResolutionError::NoStream(query.to_string()))?;
    let mut track = Track::new(
        media.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        stream_url,
    );
    track.webpage_url = media.webpage_url;
    if let Some(thumbnail) = thumbnail {
        track = track.with_thumbnail(thumbnail);
    }
    let duration = media
        .duration
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64);
    if let Some(duration) = duration {
        track = track.with_duration(duration);
    }
    Ok(track)
}

/// Resolves queries into tracks with bounded retries.
#[derive(Clone)]
pub struct TrackResolver {
    extractor: Arc<dyn MetadataExtractor>,
    policy: RetryPolicy,
}

impl TrackResolver {
    #[must_use]
    pub fn new(extractor: Arc<dyn MetadataExtractor>) -> Self {
        Self {
            extractor,
            policy: RetryPolicy::RESOLVE,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve a query to a single playable track.
    ///
    /// # Errors
    /// [`ResolutionError::NoStream`] when nothing playable exists, otherwise
    /// the last extraction error once retries are exhausted.
    #[instrument(skip(self))]
    pub async fn resolve(&self, query: &str) -> Result<Track, ResolutionError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolutionError::NoStream(query.to_string()));
        }
        let extractor = &self.extractor;
        let track = self
            .policy
            .run(
                "resolve",
                |_| async move {
                    let info = extractor.extract(query).await?;
                    select_track(info, query)
                },
                ResolutionError::is_transient,
            )
            .await?;
        info!("Resolved `{query}` to {track}");
        Ok(track)
    }
}

impl std::fmt::Debug for TrackResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackResolver")
            .field("extractor", &"Arc<dyn MetadataExtractor>")
            .field("policy", &self.policy)
            .finish()
    }
}
