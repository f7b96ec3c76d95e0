//! Public web knowledge sources.
//!
//! Each source is one HTTP GET against a JSON search API. The request shape
//! and the response parser live on `SourceKind`; `WebSource` adds the shared
//! client and the error mapping. Parsers are pure so they can be tested
//! against canned bodies.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use serde::Deserialize;
use tracing::debug;

use mender_contracts::{
    error::{MenderError, MenderResult},
    knowledge::SearchHit,
};
use mender_core::traits::KnowledgeSource;

pub const USER_AGENT: &str = concat!("mender/", env!("CARGO_PKG_VERSION"));

/// Results requested from each source.
pub const DEFAULT_MAX_RESULTS: usize = 3;

const SNIPPET_CHARS: usize = 300;

/// The closed set of built-in sources, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    FedoraBugzilla,
    AskFedora,
    ArchWiki,
    GithubIssues,
    DuckDuckGo,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::FedoraBugzilla,
        SourceKind::AskFedora,
        SourceKind::ArchWiki,
        SourceKind::GithubIssues,
        SourceKind::DuckDuckGo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SourceKind::FedoraBugzilla => "fedora-bugzilla",
            SourceKind::AskFedora => "ask-fedora",
            SourceKind::ArchWiki => "arch-wiki",
            SourceKind::GithubIssues => "github-issues",
            SourceKind::DuckDuckGo => "duckduckgo",
        }
    }

    /// Bug trackers and curated wikis end the fan-out; issue search and the
    /// general web fallback only fill in.
    pub fn is_definitive(self) -> bool {
        matches!(
            self,
            SourceKind::FedoraBugzilla | SourceKind::AskFedora | SourceKind::ArchWiki
        )
    }

    fn request(self, client: &Client, query: &str, limit: usize) -> RequestBuilder {
        let limit = limit.to_string();
        match self {
            SourceKind::FedoraBugzilla => client.get("https://bugzilla.redhat.com/rest/bug").query(&[
                ("summary", query),
                ("product", "Fedora"),
                ("status", "VERIFIED,CLOSED"),
                ("limit", limit.as_str()),
                ("include_fields", "id,summary,status,resolution"),
            ]),
            SourceKind::AskFedora => client
                .get("https://ask.fedoraproject.org/search.json")
                .query(&[("q", query), ("order", "latest"), ("page", "1")]),
            SourceKind::ArchWiki => client.get("https://wiki.archlinux.org/api.php").query(&[
                ("action", "opensearch"),
                ("search", query),
                ("limit", limit.as_str()),
                ("format", "json"),
            ]),
            SourceKind::GithubIssues => {
                let q = format!(
                    "{query} repo:thesofproject/linux repo:PipeWire/pipewire repo:alsa-project/alsa-lib is:issue"
                );
                client
                    .get("https://api.github.com/search/issues")
                    .header(header::ACCEPT, "application/vnd.github.v3+json")
                    .query(&[
                        ("q", q.as_str()),
                        ("sort", "reactions"),
                        ("order", "desc"),
                        ("per_page", limit.as_str()),
                    ])
            }
            SourceKind::DuckDuckGo => {
                let q = format!("fedora linux {query}");
                client.get("https://api.duckduckgo.com/").query(&[
                    ("q", q.as_str()),
                    ("format", "json"),
                    ("no_html", "1"),
                    ("skip_disambig", "1"),
                ])
            }
        }
    }

    /// Parse a response body into at most `limit` hits.
    pub fn parse(self, body: &str, limit: usize) -> MenderResult<Vec<SearchHit>> {
        let source = self.name();
        let bad_body = |e: serde_json::Error| MenderError::Knowledge {
            source_name: source.to_string(),
            reason: format!("unexpected response body: {e}"),
        };
        let hit = |title: String, url: String, snippet: String| SearchHit {
            source: source.to_string(),
            title,
            url,
            snippet: clip(&snippet),
        };

        let hits: Vec<SearchHit> = match self {
            SourceKind::FedoraBugzilla => {
                let body: BugzillaResponse = serde_json::from_str(body).map_err(bad_body)?;
                body.bugs
                    .into_iter()
                    .map(|bug| {
                        let state = match bug.resolution.as_deref() {
                            Some(r) if !r.is_empty() => format!("{} {}", bug.status, r),
                            _ => bug.status.clone(),
                        };
                        hit(
                            format!("[BUG #{}] {}", bug.id, bug.summary),
                            format!("https://bugzilla.redhat.com/show_bug.cgi?id={}", bug.id),
                            format!("status: {state}"),
                        )
                    })
                    .collect()
            }
            SourceKind::AskFedora => {
                let body: DiscourseResponse = serde_json::from_str(body).map_err(bad_body)?;
                body.topics
                    .into_iter()
                    .map(|t| {
                        hit(
                            t.title,
                            format!("https://ask.fedoraproject.org/t/{}/{}", t.slug, t.id),
                            format!("{} posts, {} views", t.posts_count, t.views),
                        )
                    })
                    .collect()
            }
            SourceKind::ArchWiki => {
                let (_, titles, descriptions, urls): (String, Vec<String>, Vec<String>, Vec<String>) =
                    serde_json::from_str(body).map_err(bad_body)?;
                titles
                    .into_iter()
                    .zip(urls)
                    .enumerate()
                    .map(|(i, (title, url))| {
                        let snippet = descriptions.get(i).cloned().unwrap_or_default();
                        hit(title, url, snippet)
                    })
                    .collect()
            }
            SourceKind::GithubIssues => {
                let body: GithubResponse = serde_json::from_str(body).map_err(bad_body)?;
                body.items
                    .into_iter()
                    .map(|issue| {
                        hit(
                            issue.title,
                            issue.html_url,
                            format!("{}, {} reactions", issue.state, issue.reactions.plus_one),
                        )
                    })
                    .collect()
            }
            SourceKind::DuckDuckGo => {
                let body: InstantAnswer = serde_json::from_str(body).map_err(bad_body)?;
                let mut hits = Vec::new();
                if !body.abstract_text.is_empty() {
                    hits.push(hit(body.heading, body.abstract_url, body.abstract_text));
                }
                hits.extend(
                    body.related_topics
                        .into_iter()
                        .filter(|t| !t.text.is_empty() && !t.first_url.is_empty())
                        .map(|t| {
                            let title = t.text.split(" - ").next().unwrap_or(&t.text).to_string();
                            hit(title, t.first_url, t.text)
                        }),
                );
                hits
            }
        };
        Ok(hits.into_iter().take(limit).collect())
    }
}

fn clip(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct BugzillaResponse {
    #[serde(default)]
    bugs: Vec<BugzillaBug>,
}

#[derive(Deserialize)]
struct BugzillaBug {
    id: u64,
    summary: String,
    #[serde(default)]
    status: String,
    resolution: Option<String>,
}

#[derive(Deserialize)]
struct DiscourseResponse {
    #[serde(default)]
    topics: Vec<DiscourseTopic>,
}

#[derive(Deserialize)]
struct DiscourseTopic {
    id: u64,
    title: String,
    slug: String,
    #[serde(default)]
    posts_count: u64,
    #[serde(default)]
    views: u64,
}

#[derive(Deserialize)]
struct GithubResponse {
    #[serde(default)]
    items: Vec<GithubIssue>,
}

#[derive(Deserialize)]
struct GithubIssue {
    title: String,
    html_url: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    reactions: GithubReactions,
}

#[derive(Deserialize, Default)]
struct GithubReactions {
    #[serde(rename = "+1", default)]
    plus_one: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

/// Disambiguation groups have no `Text`/`FirstURL` and are skipped.
#[derive(Deserialize)]
struct RelatedTopic {
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "FirstURL", default)]
    first_url: String,
}

// ── Source ────────────────────────────────────────────────────────────────────

/// One built-in source bound to an HTTP client.
pub struct WebSource {
    kind: SourceKind,
    client: Client,
    max_results: usize,
}

impl WebSource {
    pub fn new(kind: SourceKind, client: Client) -> Self {
        Self {
            kind,
            client,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    fn failure(&self, reason: impl Into<String>) -> MenderError {
        MenderError::Knowledge {
            source_name: self.kind.name().to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl KnowledgeSource for WebSource {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn is_definitive(&self) -> bool {
        self.kind.is_definitive()
    }

    async fn search(&self, query: &str) -> MenderResult<Vec<SearchHit>> {
        debug!(source = self.kind.name(), %query, "querying knowledge source");
        let response = self
            .kind
            .request(&self.client, query, self.max_results)
            .send()
            .await
            .map_err(|e| self.failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.failure(format!("HTTP {status}")));
        }
        let body = response.text().await.map_err(|e| self.failure(e.to_string()))?;
        self.kind.parse(&body, self.max_results)
    }
}

/// The HTTP client shared by every web source.
pub fn http_client(timeout: Duration) -> MenderResult<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| MenderError::ConfigError {
            reason: format!("cannot build HTTP client: {e}"),
        })
}

/// Every built-in source, in priority order.
pub fn default_sources(client: &Client) -> Vec<WebSource> {
    SourceKind::ALL
        .into_iter()
        .map(|kind| WebSource::new(kind, client.clone()))
        .collect()
}
