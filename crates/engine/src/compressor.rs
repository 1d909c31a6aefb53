//! Compressor: condenses a unit's search log into a bounded digest.
//!
//! Only sources that are new relative to the prior digest reach the model,
//! so compressing an already-compressed result is a no-op.

use std::collections::HashSet;

use delve_core::structured::parse_json;
use delve_core::{Citation, Digest, Message, SearchHit, ToolCallRecord, normalize_url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::context::ResearchContext;
use crate::prompts::COMPRESS_PROMPT;

/// Approximate characters per token, used to clamp digests.
const CHARS_PER_TOKEN: usize = 4;

/// Input to [`compress`].
#[derive(Debug, Clone)]
pub struct CompressionInput {
    pub topic: String,
    pub records: Vec<ToolCallRecord>,
    pub prior: Option<Digest>,
}

impl CompressionInput {
    pub fn new(topic: impl Into<String>, records: Vec<ToolCallRecord>) -> Self {
        Self {
            topic: topic.into(),
            records,
            prior: None,
        }
    }

    pub fn with_prior(mut self, prior: Digest) -> Self {
        self.prior = Some(prior);
        self
    }
}

#[derive(Debug, Deserialize)]
struct CompressedReply {
    #[serde(default)]
    digest: String,
    #[serde(default)]
    gaps: Vec<String>,
}

/// Compress `input` into a digest.
pub async fn compress(ctx: &ResearchContext, input: CompressionInput) -> Digest {
    let prior = input.prior.clone().unwrap_or_default();
    let fresh = new_hits(&input.records, &prior);

    if fresh.is_empty() {
        debug!(topic = %input.topic, "No new sources, keeping prior digest");
        return prior;
    }

    let model = &ctx.models.compression;
    let max_chars = model.max_tokens() as usize * CHARS_PER_TOKEN;
    let messages = vec![
        Message::system(COMPRESS_PROMPT),
        Message::user(render_notes(&input.topic, &prior, &fresh)),
    ];

    let reply = ctx
        .retry
        .run("compression", || model.complete(messages.clone(), Vec::new()))
        .await;

    let (text, gaps) = match reply {
        Ok(message) => match parse_json::<CompressedReply>(&message.content) {
            Ok(parsed) if !parsed.digest.trim().is_empty() => (parsed.digest, parsed.gaps),
            Ok(_) => (extractive(&prior, &fresh), prior.gaps.clone()),
            // Plain prose is accepted as the digest itself.
            Err(_) if !message.content.trim().is_empty() => {
                (message.content.trim().to_string(), Vec::new())
            }
            Err(_) => (extractive(&prior, &fresh), prior.gaps.clone()),
        },
        Err(e) => {
            warn!(topic = %input.topic, error = %e, "Compression failed, using extractive digest");
            (extractive(&prior, &fresh), prior.gaps.clone())
        }
    };

    let mut citations = prior.citations;
    citations.extend(fresh.iter().map(|h| Citation {
        url: h.url.clone(),
        title: h.title.clone(),
    }));

    Digest {
        text: clamp(&text, max_chars),
        citations,
        gaps,
    }
}

/// Hits from successful calls that are neither already cited nor repeats of
/// an earlier snippet, in record order.
fn new_hits<'a>(records: &'a [ToolCallRecord], prior: &Digest) -> Vec<&'a SearchHit> {
    let mut seen_urls: HashSet<String> =
        prior.citations.iter().map(|c| normalize_url(&c.url)).collect();
    let mut seen_snippets = HashSet::new();
    let mut kept = Vec::new();

    for hit in records
        .iter()
        .filter(|r| r.succeeded())
        .flat_map(|r| r.hits.iter())
    {
        if hit.url.trim().is_empty() {
            continue;
        }
        let url = normalize_url(&hit.url);
        let snippet = hit.snippet.split_whitespace().collect::<Vec<_>>().join(" ");
        if seen_urls.contains(&url) {
            // Remember the snippet so mirrors of a cited page are dropped too.
            seen_snippets.insert(snippet);
            continue;
        }
        if !snippet.is_empty() && !seen_snippets.insert(snippet) {
            continue;
        }
        seen_urls.insert(url);
        kept.push(hit);
    }
    kept
}

fn render_notes(topic: &str, prior: &Digest, fresh: &[&SearchHit]) -> String {
    let mut notes = format!("Sub-topic: {topic}\n");
    if !prior.is_empty() {
        notes.push_str(&format!("\nExisting digest (keep its facts):\n{}\n", prior.text));
    }
    notes.push_str("\nSources:\n");
    let offset = prior.citations.len();
    for (i, hit) in fresh.iter().enumerate() {
        notes.push_str(&format!(
            "\n[{}] {}\nURL: {}\n{}\n",
            offset + i + 1,
            hit.title,
            hit.url,
            hit.snippet
        ));
    }
    notes
}

/// Digest built from titles and snippets alone.
fn extractive(prior: &Digest, fresh: &[&SearchHit]) -> String {
    let offset = prior.citations.len();
    let mut lines: Vec<String> = Vec::new();
    if !prior.is_empty() {
        lines.push(prior.text.clone());
    }
    lines.extend(
        fresh
            .iter()
            .enumerate()
            .map(|(i, h)| format!("- {} [{}]: {}", h.title, offset + i + 1, h.snippet.trim())),
    );
    lines.join("\n")
}

pub(crate) fn clamp(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
