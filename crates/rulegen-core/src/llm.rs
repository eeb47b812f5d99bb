//! HTTP generation client.
//!
//! [`LlmClient`] talks to an OpenAI-compatible chat completions endpoint and
//! asks for a JSON object with the keys `name`, `glob_pattern`,
//! `description` and `content`. The parsed [`RuleDocument`] is rendered to
//! `.mdc` text: the first chunk of a job carries the frontmatter header, later
//! chunks carry content only, so joining chunk outputs yields one document.
//!
//! The client makes exactly one HTTP request per call. Retrying and rate
//! limiting belong to the scheduler.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ApiConfig;
use crate::generate::{GenerateError, GenerationRequest, Generator};
use crate::{Error, Result};

/// Longest error body kept in a failure reason.
const MAX_ERROR_BODY: usize = 500;

/// Structured rule returned by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDocument {
    /// Short rule name.
    pub name: String,
    /// Files the rule applies to.
    pub glob_pattern: String,
    /// One or two sentence summary.
    pub description: String,
    /// Markdown body.
    pub content: String,
}

impl RuleDocument {
    /// Frontmatter header.
    #[must_use]
    pub fn header(&self) -> String {
        format!(
            "---\ndescription: {}\nglobs: {}\n---\n",
            single_line(&self.description),
            single_line(&self.glob_pattern)
        )
    }

    /// Render as `.mdc` text; only the first chunk carries the header.
    #[must_use]
    pub fn render(&self, with_header: bool) -> String {
        let body = clean_content(&self.content);
        if with_header {
            format!("{}{body}", self.header())
        } else {
            body
        }
    }
}

/// Strip code-fence markers and a nested frontmatter block from model output.
#[must_use]
pub fn clean_content(content: &str) -> String {
    let stripped = content.trim().replace("```yaml", "").replace("```", "");
    let stripped = stripped.trim();

    if let Some(rest) = stripped.strip_prefix("---") {
        if let Some(end) = rest.find("---") {
            return rest[end + 3..].trim().to_string();
        }
    }
    stripped.to_string()
}

/// Remove a surrounding code fence from a JSON payload.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(inner) = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
    else {
        return text;
    };
    let inner = inner.trim_start();
    inner.strip_suffix("```").map_or(inner, str::trim)
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_ERROR_BODY {
        text.to_string()
    } else {
        let mut short: String = text.chars().take(MAX_ERROR_BODY).collect();
        short.push('…');
        short
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Chat completions client implementing [`Generator`].
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a client.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rulegen/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Network)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    /// Create a client from configuration, reading the API key from the
    /// environment.
    pub fn from_config(api: &ApiConfig) -> Result<Self> {
        Self::new(
            api.endpoint.clone(),
            api.model.clone(),
            api.api_key()?,
            api.request_timeout(),
        )
    }

    /// Send one prompt and return the raw message content.
    pub async fn complete(&self, prompt: &str) -> std::result::Result<String, GenerateError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GenerateError::Timeout(e.to_string())
            } else {
                GenerateError::InvalidResponse(format!("unreadable completion body: {e}"))
            }
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| GenerateError::InvalidResponse("completion has no content".into()))
    }
}

/// Failure for a non-success response, keeping the service's message.
pub(crate) async fn status_error(response: reqwest::Response) -> GenerateError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorEnvelope>(&text)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| {
            if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("no body").to_string()
            } else {
                truncate(text.trim())
            }
        });
    GenerateError::Status {
        status: status.as_u16(),
        message,
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> GenerateError {
    if err.is_timeout() {
        GenerateError::Timeout(err.to_string())
    } else if err.is_builder() {
        GenerateError::Rejected(err.to_string())
    } else {
        GenerateError::Network(err.to_string())
    }
}

/// Parse the model's JSON answer.
pub fn parse_rule(content: &str) -> std::result::Result<RuleDocument, GenerateError> {
    serde_json::from_str(strip_json_fences(content))
        .map_err(|e| GenerateError::InvalidResponse(format!("rule JSON: {e}")))
}

#[async_trait]
impl Generator for LlmClient {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> std::result::Result<String, GenerateError> {
        let content = self.complete(&request.prompt).await?;
        let rule = parse_rule(&content)?;
        debug!(
            job = %request.job_id,
            chunk = request.chunk_index,
            rule = %rule.name,
            "rule generated"
        );
        Ok(rule.render(request.is_first_chunk()))
    }
}
