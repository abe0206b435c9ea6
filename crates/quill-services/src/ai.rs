//! AI text generation
//!
//! A single request/response operation: prompt in, text out. Generated
//! text is added to notes as an AI-generated block.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use quill_core::{Block, BlockKind, Config, Store, SyncError, SyncResult};

/// Default generation endpoint
pub const DEFAULT_GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent";

/// Timeout for generation requests (seconds)
const GENERATE_TIMEOUT_SECS: u64 = 60;

/// AI generation errors
#[derive(Error, Debug)]
pub enum AiError {
    #[error("AI API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("No content generated")]
    NoContent,
}

/// Something that turns a prompt into text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AiError>;
}

/// What to generate from a note's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationKind {
    Summary,
    Flashcards,
    Quiz,
    Cornell,
    QuestionsAnswers,
    /// Free-form instruction applied to the content
    Custom(String),
}

impl GenerationKind {
    /// Short label for menus
    pub fn description(&self) -> &str {
        match self {
            GenerationKind::Summary => "Generate a concise summary",
            GenerationKind::Flashcards => "Create study flashcards",
            GenerationKind::Quiz => "Generate quiz questions",
            GenerationKind::Cornell => "Format as Cornell notes",
            GenerationKind::QuestionsAnswers => "Create questions and answers",
            GenerationKind::Custom(_) => "Custom instruction",
        }
    }

    /// Full prompt for `content`
    pub fn prompt(&self, content: &str) -> String {
        match self {
            GenerationKind::Summary => format!(
                "Please create a concise summary of the following content. \
                 Focus on the main points and key takeaways:\n\n{}",
                content
            ),
            GenerationKind::Flashcards => format!(
                "Create flashcards from the following content. Format each flashcard as:\n\n\
                 **Q:** [Question]\n**A:** [Answer]\n\n\
                 Make sure to cover the most important concepts:\n\n{}",
                content
            ),
            GenerationKind::Quiz => format!(
                "Create a quiz with multiple choice questions based on the following content. \
                 Format as:\n\n**Question 1:** [Question]\nA) [Option A]\nB) [Option B]\n\
                 C) [Option C]\nD) [Option D]\n**Answer:** [Correct option]\n\nContent:\n{}",
                content
            ),
            GenerationKind::Cornell => format!(
                "Format the following content as Cornell Notes with these sections:\n\n\
                 **NOTES:**\n[Main notes and details]\n\n\
                 **CUES:**\n[Key terms, questions, and cues]\n\n\
                 **SUMMARY:**\n[Brief summary of main points]\n\nContent:\n{}",
                content
            ),
            GenerationKind::QuestionsAnswers => format!(
                "Create a Q&A format from the following content. \
                 Generate thoughtful questions and comprehensive answers:\n\n\
                 **Q:** [Question]\n**A:** [Detailed answer]\n\nContent:\n{}",
                content
            ),
            GenerationKind::Custom(instruction) => {
                format!("{}\n\nContent:\n{}", instruction, content)
            }
        }
    }
}

// ---- Wire types ----

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    top_k: u32,
    top_p: f64,
    max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 2048,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Gemini `generateContent` client
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GeminiClient {
    /// Create a client for the default endpoint
    pub fn new(api_key: Option<String>) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(GENERATE_TIMEOUT_SECS))
            .build()
            .map_err(AiError::Network)?;
        Ok(Self {
            client,
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    /// Create a client from the `ai_api_key` and `ai_endpoint` settings
    pub fn from_config(config: &Config) -> Result<Self, AiError> {
        let client = Self::new(config.ai_api_key.clone())?;
        Ok(match &config.ai_endpoint {
            Some(endpoint) => client.with_endpoint(endpoint.clone()),
            None => client,
        })
    }

    /// Use a different endpoint URL
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, AiError> {
        let api_key = self.api_key.as_deref().ok_or(AiError::NoApiKey)?;

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig::default(),
        };

        debug!(prompt_len = prompt.len(), "Sending generation request");
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await
            .map_err(AiError::Network)?;

        let status = response.status();
        let body = response.text().await.map_err(AiError::Network)?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));
            warn!(status = status.as_u16(), "Generation request rejected");
            return Err(AiError::Api(message));
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| AiError::Decode(e.to_string()))?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or(AiError::NoContent)?;

        debug!(response_len = text.len(), "Generation complete");
        Ok(text)
    }
}

/// Generate from a note's content and append the result as a block
///
/// Returns the new block's id, or `None` for a note with no content. A
/// failed generation appends a text block describing the failure instead.
pub async fn generate_into_note(
    store: &Store,
    generator: &dyn TextGenerator,
    note_id: Uuid,
    kind: &GenerationKind,
) -> SyncResult<Option<Uuid>> {
    let note = store.note(note_id).ok_or(SyncError::NotFound {
        kind: "note",
        id: note_id,
    })?;

    let content = note.plain_text();
    if content.is_empty() {
        debug!("Note {} has no content to generate from", note_id);
        return Ok(None);
    }

    let block = match generator.generate(&kind.prompt(&content)).await {
        Ok(text) => {
            info!("Generated {:?} for note {}", kind, note_id);
            Block::new(BlockKind::AiGenerated, text)
        }
        Err(e) => {
            warn!("AI generation failed for note {}: {}", note_id, e);
            Block::text(format!("AI generation failed: {}", e))
        }
    };

    store.add_block(note_id, block).await.map(Some)
}
