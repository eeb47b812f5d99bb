//! Best-practice research fetched before generation.
//!
//! For every selected library without a cached result, a [`Researcher`] asks
//! an answer service for "`<library>` best practices coding standards" and the
//! [`ResearchCache`] stores the answer and its citations as
//! `<research_dir>/<slug>.json`. The [`PromptBuilder`](crate::PromptBuilder)
//! later turns a substantial cached result into the job payload; thin results
//! fall back to the model's own knowledge.
//!
//! Research is best effort. A library whose lookup fails is logged and
//! generated without research; the run itself never fails because of it.
//!
//! ```text
//! research/
//!   react.json        # fetched: {"answer": "...", "citations": [{"text": "..."}]}
//!   next-js.md        # hand-written notes take precedence over fetched ones
//! ```

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::LibraryEntry;
use crate::config::ResearchConfig;
use crate::generate::GenerateError;
use crate::llm::{status_error, transport_error};
use crate::retry::{Classifier, RetryError, RetryPolicy, run_with_retry};
use crate::{Error, Result};

/// Answers shorter than this (after trimming) do not count as material.
pub const MIN_ANSWER_CHARS: usize = 100;
/// Joined citation text shorter than this does not count as material.
pub const MIN_CITATION_CHARS: usize = 200;

/// Query sent for `library`.
#[must_use]
pub fn query_for(library: &str) -> String {
    format!("{library} best practices coding standards")
}

/// One source backing an answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Citation {
    /// Source URL.
    pub url: Option<String>,
    /// Page title.
    pub title: Option<String>,
    /// Extracted page text.
    pub text: Option<String>,
}

/// Research result for one library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Research {
    /// Synthesized answer.
    pub answer: String,
    /// Sources, with their text when requested.
    pub citations: Vec<Citation>,
}

impl Research {
    /// Citation texts joined by blank lines.
    #[must_use]
    pub fn citation_text(&self) -> String {
        self.citations
            .iter()
            .filter_map(|citation| citation.text.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Whether the answer or the citations carry enough text to build on.
    #[must_use]
    pub fn is_substantial(&self) -> bool {
        self.answer.trim().chars().count() >= MIN_ANSWER_CHARS
            || self.citation_text().chars().count() >= MIN_CITATION_CHARS
    }

    /// Prompt material, or `None` when the result is too thin.
    #[must_use]
    pub fn material(&self) -> Option<String> {
        if !self.is_substantial() {
            return None;
        }
        let mut out = format!("Search results:\n{}", self.answer.trim());
        let citations = self.citation_text();
        if !citations.is_empty() {
            let _ = write!(out, "\n\nAdditional information from citations:\n{citations}");
        }
        Some(out)
    }
}

/// Source of research results.
#[async_trait]
pub trait Researcher: Send + Sync {
    /// Look up best practices for `library`. One call is one request.
    async fn research(&self, library: &str) -> std::result::Result<Research, GenerateError>;
}

#[derive(Debug, Serialize)]
struct AnswerRequest<'a> {
    query: &'a str,
    text: bool,
}

/// HTTP client for an Exa-style `/answer` endpoint.
#[derive(Clone)]
pub struct ResearchClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl std::fmt::Debug for ResearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ResearchClient {
    /// Create a client.
    pub fn new(
        endpoint: impl Into<String>,
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
            api_key: api_key.into(),
        })
    }

    /// Client for `config`, or `None` when no API key is set.
    pub fn from_config(config: &ResearchConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key() else {
            return Ok(None);
        };
        Self::new(config.endpoint.clone(), api_key, config.request_timeout()).map(Some)
    }
}

#[async_trait]
impl Researcher for ResearchClient {
    async fn research(&self, library: &str) -> std::result::Result<Research, GenerateError> {
        let query = query_for(library);
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&AnswerRequest {
                query: &query,
                text: true,
            })
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        response.json::<Research>().await.map_err(|e| {
            if e.is_timeout() {
                GenerateError::Timeout(e.to_string())
            } else {
                GenerateError::InvalidResponse(format!("unreadable research body: {e}"))
            }
        })
    }
}

/// Counts from one [`ResearchCache::fill`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResearchSummary {
    /// Libraries that already had a cached result.
    pub cached: usize,
    /// Libraries fetched and cached by this call.
    pub fetched: usize,
    /// Libraries whose lookup failed.
    pub failed: usize,
    /// Libraries not looked up because of a shutdown.
    pub skipped: usize,
}

enum Lookup {
    Fetched,
    Failed,
    Skipped,
}

/// Research results on disk, one JSON file per library slug.
#[derive(Debug, Clone)]
pub struct ResearchCache {
    dir: PathBuf,
}

impl ResearchCache {
    /// Cache rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File holding the result for `entry`.
    #[must_use]
    pub fn path_for(&self, entry: &LibraryEntry) -> PathBuf {
        self.dir.join(format!("{}.json", entry.slug()))
    }

    /// Cached result for `entry`. Unreadable files are logged and ignored.
    #[must_use]
    pub fn load(&self, entry: &LibraryEntry) -> Option<Research> {
        let path = self.path_for(entry);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("could not read research {}: {err}", path.display());
                return None;
            },
        };
        match serde_json::from_str(&text) {
            Ok(research) => Some(research),
            Err(err) => {
                warn!("ignoring unreadable research {}: {err}", path.display());
                None
            },
        }
    }

    /// Atomically store `research` for `entry`.
    pub async fn save(&self, entry: &LibraryEntry, research: &Research) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::Storage(format!("Failed to create {}: {e}", self.dir.display()))
        })?;
        let path = self.path_for(entry);
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(research)?;
        fs::write(&tmp_path, body)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}: {e}", tmp_path.display())))?;

        #[cfg(target_os = "windows")]
        if fs::try_exists(&path).await.unwrap_or(false) {
            fs::remove_file(&path)
                .await
                .map_err(|e| Error::Storage(format!("Failed to replace research: {e}")))?;
        }

        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Storage(format!(
                "Failed to commit {}: {err}",
                path.display()
            )));
        }
        Ok(path)
    }

    /// Fetch and cache research for every entry that has none yet.
    ///
    /// Entries sharing a slug are looked up once. Each lookup runs under
    /// `retry`; failures are logged and counted, never returned.
    pub async fn fill(
        &self,
        researcher: &dyn Researcher,
        entries: &[LibraryEntry],
        concurrency: usize,
        retry: &RetryPolicy,
        classifier: &dyn Classifier,
        cancel: &CancellationToken,
    ) -> ResearchSummary {
        let mut summary = ResearchSummary::default();
        let mut seen = HashSet::new();
        let mut missing = Vec::new();
        for entry in entries {
            let slug = entry.slug();
            if slug.is_empty() || !seen.insert(slug) {
                continue;
            }
            if self.path_for(entry).exists() {
                summary.cached += 1;
            } else {
                missing.push(entry);
            }
        }

        if !missing.is_empty() {
            info!(libraries = missing.len(), "researching libraries");
        }

        let mut lookups = stream::iter(missing)
            .map(|entry| self.fetch_one(researcher, entry, retry, classifier, cancel))
            .buffer_unordered(concurrency.max(1));
        while let Some(lookup) = lookups.next().await {
            match lookup {
                Lookup::Fetched => summary.fetched += 1,
                Lookup::Failed => summary.failed += 1,
                Lookup::Skipped => summary.skipped += 1,
            }
        }

        info!(
            cached = summary.cached,
            fetched = summary.fetched,
            failed = summary.failed,
            skipped = summary.skipped,
            "research finished"
        );
        summary
    }

    async fn fetch_one(
        &self,
        researcher: &dyn Researcher,
        entry: &LibraryEntry,
        retry: &RetryPolicy,
        classifier: &dyn Classifier,
        cancel: &CancellationToken,
    ) -> Lookup {
        if cancel.is_cancelled() {
            return Lookup::Skipped;
        }

        let library = entry.name.as_str();
        let result = run_with_retry(retry, classifier, cancel, move |attempt| {
            debug!(library, attempt, "research attempt");
            researcher.research(library)
        })
        .await;

        let research = match result {
            Ok(done) => done.value,
            Err(RetryError::Cancelled { .. }) => return Lookup::Skipped,
            Err(err) => {
                warn!(library = %entry.id(), error = %err, "research failed, generating without it");
                return Lookup::Failed;
            },
        };

        if !research.is_substantial() {
            debug!(library = %entry.id(), "research result is thin, prompts will not use it");
        }
        match self.save(entry, &research).await {
            Ok(path) => {
                debug!(library = %entry.id(), path = %path.display(), "research cached");
                Lookup::Fetched
            },
            Err(err) => {
                warn!(library = %entry.id(), error = %err, "could not cache research");
                Lookup::Failed
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::retry::StatusClassifier;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn long_answer() -> String {
        "Use function components and hooks for state. ".repeat(4)
    }

    #[tokio::test]
    async fn test_client_sends_query_and_parses_citations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/answer"))
            .and(header("x-api-key", "exa-secret"))
            .and(body_partial_json(json!({
                "query": "react best practices coding standards",
                "text": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": long_answer(),
                "citations": [
                    { "id": "1", "url": "https://react.dev", "title": "React", "text": "Keep components pure." },
                    { "id": "2", "url": "https://example.com" }
                ],
                "requestId": "abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ResearchClient::new(
            format!("{}/answer", server.uri()),
            "exa-secret",
            Duration::from_secs(5),
        )
        .unwrap();
        let research = client.research("react").await.unwrap();

        assert_eq!(research.answer, long_answer());
        assert_eq!(research.citations.len(), 2);
        assert_eq!(research.citation_text(), "Keep components pure.");
        assert!(research.is_substantial());
    }

    #[tokio::test]
    async fn test_client_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({ "error": { "message": "invalid api key" } })),
            )
            .mount(&server)
            .await;

        let client =
            ResearchClient::new(format!("{}/answer", server.uri()), "bad", Duration::from_secs(5))
                .unwrap();
        let err = client.research("react").await.unwrap_err();
        assert_eq!(
            err,
            GenerateError::Status {
                status: 401,
                message: "invalid api key".into()
            }
        );
    }

    #[test]
    fn test_material_thresholds() {
        let thin = Research {
            answer: "Use hooks.".into(),
            citations: vec![Citation {
                text: Some("Short.".into()),
                ..Citation::default()
            }],
        };
        assert!(thin.material().is_none());

        let cited = Research {
            answer: "Use hooks.".into(),
            citations: vec![Citation {
                text: Some("Memoize expensive renders. ".repeat(10)),
                ..Citation::default()
            }],
        };
        let material = cited.material().unwrap();
        assert!(material.starts_with("Search results:\nUse hooks."));
        assert!(material.contains("Additional information from citations:\nMemoize"));

        let answered = Research {
            answer: long_answer(),
            citations: Vec::new(),
        };
        let material = answered.material().unwrap();
        assert!(!material.contains("citations"));
    }

    #[derive(Default)]
    struct FakeResearcher {
        fail: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Researcher for FakeResearcher {
        async fn research(&self, library: &str) -> std::result::Result<Research, GenerateError> {
            self.calls.lock().unwrap().push(library.to_string());
            if self.fail.contains(library) {
                return Err(GenerateError::Status {
                    status: 401,
                    message: "no".into(),
                });
            }
            Ok(Research {
                answer: format!("{library}: {}", long_answer()),
                citations: Vec::new(),
            })
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(2, Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_fill_fetches_missing_once_per_slug() {
        let dir = TempDir::new().unwrap();
        let cache = ResearchCache::new(dir.path());
        let cached = LibraryEntry::new("frontend_frameworks", "vue", "vue");
        cache.save(&cached, &Research::default()).await.unwrap();

        let entries = vec![
            LibraryEntry::new("frontend_frameworks", "react", "react"),
            LibraryEntry::new("frontend_frameworks", "react", "next.js"),
            LibraryEntry::new("meta_frameworks", "react", "Next.js"),
            cached.clone(),
            LibraryEntry::new("backend", "python", "django"),
        ];
        let researcher = FakeResearcher {
            fail: HashSet::from(["django".to_string()]),
            ..FakeResearcher::default()
        };

        let summary = cache
            .fill(
                &researcher,
                &entries,
                2,
                &policy(),
                &StatusClassifier::default(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            summary,
            ResearchSummary {
                cached: 1,
                fetched: 2,
                failed: 1,
                skipped: 0
            }
        );
        let mut calls = researcher.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, ["django", "next.js", "react"], "401 is not retried");

        let react = cache.load(&entries[0]).unwrap();
        assert!(react.answer.starts_with("react: "));
        assert!(cache.load(&entries[2]).is_some(), "shares the next-js slug");
        assert!(!cache.path_for(&entries[4]).exists());
    }

    #[tokio::test]
    async fn test_fill_after_shutdown_fetches_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = ResearchCache::new(dir.path().join("research"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let researcher = FakeResearcher::default();

        let summary = cache
            .fill(
                &researcher,
                &[LibraryEntry::new("a", "b", "react")],
                1,
                &policy(),
                &StatusClassifier::default(),
                &cancel,
            )
            .await;
        assert_eq!(summary.skipped, 1);
        assert!(researcher.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_cache_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let cache = ResearchCache::new(dir.path());
        let entry = LibraryEntry::new("a", "b", "react");
        std::fs::write(cache.path_for(&entry), "{not json").unwrap();
        assert!(cache.load(&entry).is_none());
    }
}
