//! Research domain types: the request, sub-topics, per-unit results and the
//! digest the supervisor accumulates across rounds.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Message, Role};
use crate::search::SearchHit;

/// Unique identifier for one research run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Budgets and switches governing a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Width of each fan-out and size of the admission gate.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_research_units: usize,

    /// Maximum number of supervisor rounds.
    #[serde(default = "default_max_iterations")]
    pub max_researcher_iterations: u32,

    /// Maximum search calls per research unit.
    #[serde(default = "default_max_tool_calls")]
    pub max_react_tool_calls: usize,

    /// Attempts at parsing structured (JSON) model output.
    #[serde(default = "default_structured_retries")]
    pub max_structured_output_retries: u32,

    #[serde(default = "default_true")]
    pub allow_clarification: bool,

    /// Search backend: "tavily", "native" or "none".
    #[serde(default = "default_search_api")]
    pub search_api: String,

    /// Estimated-token budget of a unit's dialogue before old observations
    /// are evicted.
    #[serde(default = "default_dialogue_budget")]
    pub dialogue_token_budget: usize,
}

fn default_max_concurrent() -> usize {
    5
}
fn default_max_iterations() -> u32 {
    6
}
fn default_max_tool_calls() -> usize {
    10
}
fn default_structured_retries() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_search_api() -> String {
    "tavily".into()
}
fn default_dialogue_budget() -> usize {
    24_000
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_research_units: default_max_concurrent(),
            max_researcher_iterations: default_max_iterations(),
            max_react_tool_calls: default_max_tool_calls(),
            max_structured_output_retries: default_structured_retries(),
            allow_clarification: true,
            search_api: default_search_api(),
            dialogue_token_budget: default_dialogue_budget(),
        }
    }
}

impl ResearchConfig {
    /// Upper bound on sub-topics created over the whole run.
    pub fn subtopic_budget(&self) -> usize {
        self.max_concurrent_research_units * (self.max_researcher_iterations.max(1) as usize)
    }
}

/// An immutable research request.
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub id: RunId,
    pub question: String,
    /// Prior turns (clarifying question and the user's answer, if any).
    pub history: Vec<Message>,
    pub config: std::sync::Arc<ResearchConfig>,
}

impl ResearchRequest {
    pub fn new(question: impl Into<String>, config: ResearchConfig) -> Self {
        Self {
            id: RunId::new(),
            question: question.into(),
            history: Vec::new(),
            config: std::sync::Arc::new(config),
        }
    }

    /// Build the follow-up request once the user has answered a clarifying
    /// question. The question and config carry over; the run id is fresh.
    pub fn resume_after_clarification(
        original: &ResearchRequest,
        clarifying_question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        let mut history = original.history.clone();
        if history.is_empty() {
            history.push(Message::user(original.question.clone()));
        }
        history.push(Message::assistant(clarifying_question));
        history.push(Message::user(answer));
        Self {
            id: RunId::new(),
            question: original.question.clone(),
            history,
            config: original.config.clone(),
        }
    }

    /// True once an assistant question has been answered by the user.
    pub fn has_answered_clarification(&self) -> bool {
        self.history
            .windows(2)
            .any(|w| w[0].role == Role::Assistant && w[1].role == Role::User)
    }

    /// Question plus any clarification exchange, as one brief.
    pub fn brief(&self) -> String {
        let mut brief = self.question.clone();
        let exchange: Vec<&Message> = self
            .history
            .iter()
            .skip_while(|m| m.role != Role::Assistant)
            .collect();
        if !exchange.is_empty() {
            brief.push_str("\n\nClarification:");
            for m in exchange {
                let who = if m.role == Role::Assistant { "Q" } else { "A" };
                brief.push_str(&format!("\n{who}: {}", m.content));
            }
        }
        brief
    }
}

/// Identifier of a sub-topic within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubTopicId(pub usize);

impl std::fmt::Display for SubTopicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "topic-{}", self.0)
    }
}

/// A message history capped by an estimated-token budget.
///
/// The first `pinned` messages (system prompt and brief) are never evicted.
/// Past the budget, the oldest assistant turn is dropped together with the
/// tool results that answer it, so the history stays well-formed. The most
/// recent turn is always kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dialogue {
    messages: Vec<Message>,
    pinned: usize,
    token_budget: usize,
}

impl Dialogue {
    pub fn new(token_budget: usize) -> Self {
        Self {
            messages: Vec::new(),
            pinned: 0,
            token_budget,
        }
    }

    /// Append a message that must survive eviction.
    pub fn pin(&mut self, message: Message) {
        self.messages.insert(self.pinned, message);
        self.pinned += 1;
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.evict();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(Message::estimated_tokens).sum()
    }

    fn evict(&mut self) {
        if self.token_budget == 0 {
            return;
        }
        while self.estimated_tokens() > self.token_budget {
            let start = self.pinned;
            // Group = one message plus the tool results that follow it.
            let mut end = start + 1;
            while end < self.messages.len() && self.messages[end].role == Role::Tool {
                end += 1;
            }
            if end >= self.messages.len() {
                break;
            }
            self.messages.drain(start..end);
        }
    }
}

/// One planned unit of investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTopic {
    pub id: SubTopicId,
    /// Supervisor round that created this sub-topic (1-based).
    pub round: u32,
    pub description: String,
}

/// How a single search call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallOutcome {
    Success,
    Failure { reason: String },
}

/// Append-only log entry of one search call made by a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub timestamp: DateTime<Utc>,
    pub outcome: ToolCallOutcome,
}

impl ToolCallRecord {
    pub fn success(query: impl Into<String>, hits: Vec<SearchHit>) -> Self {
        Self {
            query: query.into(),
            hits,
            timestamp: Utc::now(),
            outcome: ToolCallOutcome::Success,
        }
    }

    pub fn failure(query: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            hits: Vec::new(),
            timestamp: Utc::now(),
            outcome: ToolCallOutcome::Failure {
                reason: reason.into(),
            },
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == ToolCallOutcome::Success
    }
}

/// Terminal status of a research unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Completed,
    BudgetExceeded,
    Failed,
}

/// A source backing a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: String,
}

/// Condensed findings for one sub-topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    pub text: String,
    pub citations: Vec<Citation>,
    /// Open questions the unit could not resolve.
    pub gaps: Vec<String>,
}

impl Digest {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// The outcome of one research unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchUnitResult {
    pub topic_id: SubTopicId,
    pub round: u32,
    pub topic: String,
    pub status: UnitStatus,
    pub digest: Digest,
    pub search_calls: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ResearchUnitResult {
    /// A failed result with an empty digest.
    pub fn failed(topic: &SubTopic, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            topic_id: topic.id,
            round: topic.round,
            topic: topic.description.clone(),
            status: UnitStatus::Failed,
            digest: Digest::default(),
            search_calls: 0,
            error: Some(error.into()),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn has_findings(&self) -> bool {
        !self.digest.is_empty()
    }
}

/// Everything learned so far, in round order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateDigest {
    pub results: Vec<ResearchUnitResult>,
    /// Plain-text rendering of all findings, regenerated on every append.
    pub summary: String,
}

impl AggregateDigest {
    pub fn append_round(&mut self, results: Vec<ResearchUnitResult>) {
        self.results.extend(results);
        self.summary = self.render();
    }

    pub fn has_findings(&self) -> bool {
        self.results.iter().any(ResearchUnitResult::has_findings)
    }

    /// All citations, deduplicated by normalized URL; first occurrence wins.
    pub fn citations(&self) -> Vec<Citation> {
        let mut seen = HashSet::new();
        self.results
            .iter()
            .flat_map(|r| r.digest.citations.iter())
            .filter(|c| seen.insert(normalize_url(&c.url)))
            .cloned()
            .collect()
    }

    /// Normalized URLs of every citation.
    pub fn citation_keys(&self) -> HashSet<String> {
        self.citations().iter().map(|c| normalize_url(&c.url)).collect()
    }

    /// Digest plus numbered sources, used as a degraded answer.
    pub fn fallback_text(&self) -> String {
        let mut out = self.summary.clone();
        let citations = self.citations();
        if !citations.is_empty() {
            out.push_str("\n\nSources:\n");
            for (i, c) in citations.iter().enumerate() {
                out.push_str(&format!("[{}] {}: {}\n", i + 1, c.title, c.url));
            }
        }
        out
    }

    /// Each unit numbers its sources from `[1]`; the rendering rewrites
    /// those markers to the run-wide numbering of [`citations`](Self::citations).
    fn render(&self) -> String {
        let global: HashMap<String, usize> = self
            .citations()
            .iter()
            .enumerate()
            .map(|(i, c)| (normalize_url(&c.url), i + 1))
            .collect();

        self.results
            .iter()
            .filter(|r| r.has_findings())
            .map(|r| {
                let text = renumber(r.digest.text.trim(), &r.digest.citations, &global);
                format!("## {}\n\n{}", r.topic, text.trim())
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

static CITATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("citation marker pattern is valid"));

/// Rewrite a unit's local `[k]` markers to run-wide indices. Markers that
/// point past the unit's own sources are dropped.
fn renumber(text: &str, local: &[Citation], global: &HashMap<String, usize>) -> String {
    CITATION_MARKER
        .replace_all(text, |caps: &Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|k| k.checked_sub(1))
                .and_then(|k| local.get(k))
                .and_then(|c| global.get(&normalize_url(&c.url)))
                .map(|n| format!("[{n}]"))
                .unwrap_or_default()
        })
        .into_owned()
}

/// Supervisor bookkeeping for a run in progress.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    /// Completed rounds.
    pub round: u32,
    pub digest: AggregateDigest,
    /// Descriptions of every sub-topic created so far, in creation order.
    pub planned: Vec<String>,
    pub terminated: bool,
    pub failure: Option<String>,
}

impl RunState {
    pub fn subtopics_created(&self) -> usize {
        self.planned.len()
    }

    /// Results produced in `round`.
    pub fn round_results(&self, round: u32) -> impl Iterator<Item = &ResearchUnitResult> {
        self.digest.results.iter().filter(move |r| r.round == round)
    }

    /// Mark the run terminal, keeping the invariant that a terminal run has
    /// either findings or a failure reason.
    pub fn terminate(&mut self) {
        self.terminated = true;
        if !self.digest.has_findings() && self.failure.is_none() {
            self.failure = Some("no research unit produced findings".into());
        }
    }
}

/// Canonical form of a URL for deduplication and citation checks.
///
/// Lowercases scheme and host, strips `www.`, the fragment, `utm_*` query
/// parameters and a trailing slash.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let url = url.split('#').next().unwrap_or(url);
    let (scheme, rest) = match url.split_once("://") {
        Some((s, r)) => (s.to_ascii_lowercase(), r),
        None => (String::from("https"), url),
    };
    let (authority, path_query) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    let host = authority.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let (path, query) = match path_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_query, None),
    };
    let path = path.trim_end_matches('/');
    let query: Vec<&str> = query
        .map(|q| {
            q.split('&')
                .filter(|kv| !kv.is_empty() && !kv.to_ascii_lowercase().starts_with("utm_"))
                .collect()
        })
        .unwrap_or_default();

    let scheme = if scheme == "http" { "https" } else { &scheme };
    let mut out = format!("{scheme}://{host}{path}");
    if !query.is_empty() {
        out.push('?');
        out.push_str(&query.join("&"));
    }
    out
}
