//! Video metadata lookup and import
//!
//! Fetches title, description and duration for a YouTube URL and turns the
//! result into a note.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use quill_core::store::LOCAL_OWNER;
use quill_core::{Block, BlockKind, Config, Note, Store, SyncResult};

/// YouTube Data API base URL
pub const DEFAULT_YOUTUBE_API: &str = "https://www.googleapis.com/youtube/v3";

/// Fetch timeout in seconds
const FETCH_TIMEOUT_SECS: u64 = 10;

/// Video lookup errors
#[derive(Error, Debug)]
pub enum VideoInfoError {
    #[error("Invalid YouTube URL format: {0}")]
    InvalidUrl(String),

    #[error("Video API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Video not found: {0}")]
    NotFound(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// What is known about a video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub title: String,
    pub description: String,
    pub duration: Duration,
}

/// Something that can describe a video URL
#[async_trait]
pub trait VideoInfoSource: Send + Sync {
    async fn video_info(&self, url: &str) -> Result<VideoInfo, VideoInfoError>;
}

fn is_video_id(id: &str) -> bool {
    id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extract the video id from a watch, short-link, shorts or embed URL
pub fn extract_video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let mut segments = parsed.path_segments()?;

    let id = match host {
        "youtu.be" => segments.next()?.to_string(),
        "youtube.com" | "youtube-nocookie.com" => match segments.next()? {
            "watch" => parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned())?,
            "embed" | "shorts" | "live" | "v" => segments.next()?.to_string(),
            _ => return None,
        },
        _ => return None,
    };

    is_video_id(&id).then_some(id)
}

/// Parse an ISO-8601 duration such as `PT1H2M3S` or `P1DT30M`
pub fn parse_iso8601_duration(value: &str) -> Option<Duration> {
    let rest = value.strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }

    let mut seconds = 0f64;
    let mut number = String::new();
    let mut in_time = false;

    for c in rest.chars() {
        match c {
            'T' if !in_time && number.is_empty() => in_time = true,
            '0'..='9' | '.' => number.push(c),
            unit => {
                let amount: f64 = number.parse().ok()?;
                number.clear();
                seconds += amount
                    * match (unit, in_time) {
                        ('W', false) => 604_800.0,
                        ('D', false) => 86_400.0,
                        ('H', true) => 3_600.0,
                        ('M', true) => 60.0,
                        ('S', true) => 1.0,
                        _ => return None,
                    };
            }
        }
    }

    if !number.is_empty() {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Format as `h:mm:ss`, or `m:ss` under an hour
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = total % 3600 / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    snippet: Snippet,
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// YouTube Data API v3 client
pub struct YouTubeClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl YouTubeClient {
    pub fn new(api_key: Option<String>) -> Result<Self, VideoInfoError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(VideoInfoError::Network)?;
        Ok(Self {
            client,
            base_url: DEFAULT_YOUTUBE_API.to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, VideoInfoError> {
        Self::new(config.video_api_key.clone())
    }

    /// Use a different API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl VideoInfoSource for YouTubeClient {
    async fn video_info(&self, url: &str) -> Result<VideoInfo, VideoInfoError> {
        let id = extract_video_id(url).ok_or_else(|| VideoInfoError::InvalidUrl(url.to_string()))?;
        let api_key = self.api_key.as_deref().ok_or(VideoInfoError::NoApiKey)?;

        debug!("Fetching video info for {}", id);
        let response = self
            .client
            .get(format!("{}/videos", self.base_url))
            .query(&[
                ("part", "snippet,contentDetails"),
                ("id", id.as_str()),
                ("key", api_key),
            ])
            .send()
            .await
            .map_err(VideoInfoError::Network)?;

        let status = response.status();
        let body = response.text().await.map_err(VideoInfoError::Network)?;
        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));
            return Err(VideoInfoError::Api(message));
        }

        let parsed: VideoListResponse =
            serde_json::from_str(&body).map_err(|e| VideoInfoError::Decode(e.to_string()))?;
        let item = parsed
            .items
            .into_iter()
            .next()
            .ok_or_else(|| VideoInfoError::NotFound(id.clone()))?;
        let duration = parse_iso8601_duration(&item.content_details.duration).ok_or_else(|| {
            VideoInfoError::Decode(format!("bad duration '{}'", item.content_details.duration))
        })?;

        Ok(VideoInfo {
            title: item.snippet.title,
            description: item.snippet.description,
            duration,
        })
    }
}

fn error_note(title: &str, message: String) -> Note {
    let mut note = Note::new(title, LOCAL_OWNER, None);
    note.blocks.push(Block::text(message));
    note
}

/// Create a note describing the video at `url`
///
/// A lookup failure still creates a note, holding the error and the URL.
pub async fn import_video(
    store: &Store,
    source: &dyn VideoInfoSource,
    url: &str,
) -> SyncResult<Note> {
    let note = match source.video_info(url).await {
        Ok(info) => {
            info!("Importing video '{}'", info.title);
            let content = format!(
                "YouTube Video: {}\n\nDuration: {}\n\nDescription: {}",
                info.title,
                format_duration(info.duration),
                info.description
            );
            let mut note = Note::new(info.title.clone(), LOCAL_OWNER, None);
            note.blocks.push(Block::new(
                BlockKind::Transcript {
                    source_url: Some(url.to_string()),
                    title: Some(info.title),
                },
                content,
            ));
            note
        }
        Err(e @ VideoInfoError::InvalidUrl(_)) => {
            warn!("Rejected video URL: {}", e);
            error_note("YouTube Error", format!("{}\n\nURL: {}", e, url))
        }
        Err(e) => {
            warn!("Video lookup failed: {}", e);
            error_note(
                "YouTube Video",
                format!("Failed to fetch video information: {}\n\nURL: {}", e, url),
            )
        }
    };

    store.add_note(note).await
}
