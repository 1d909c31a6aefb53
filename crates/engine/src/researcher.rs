//! Research unit: a bounded search loop over one sub-topic.
//!
//! The unit is an explicit state machine:
//!
//! ```text
//! Idle → Searching → Observing → Reflecting ─┬→ Searching
//!                                            └→ Compressing → Done
//! ```
//!
//! Every search is logged as a [`ToolCallRecord`]. The unit stops when the
//! model says it is done, when its search budget runs out, or when a model
//! or search failure survives the retry policy. Failures never escape the
//! unit; they end up in the result's `status` and `error`.

use std::sync::Arc;

use chrono::Utc;
use delve_core::{
    Dialogue, Digest, Message, ResearchConfig, ResearchEvent, ResearchUnitResult, SearchHit,
    SubTopic, ToolCallRecord, UnitStatus,
};
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::compressor::{CompressionInput, clamp, compress};
use crate::context::ResearchContext;
use crate::prompts::{
    RESEARCH_COMPLETE_TOOL, RESEARCHER_PROMPT, SUMMARIZE_PROMPT, WEB_SEARCH_TOOL,
    research_complete_tool, web_search_tool,
};

/// A search the model asked for but the unit has not run yet.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingQuery {
    call_id: String,
    query: String,
}

#[derive(Debug)]
enum UnitState {
    Idle,
    Searching { pending: Option<PendingQuery> },
    Observing { call_id: String, hits: Vec<SearchHit> },
    Reflecting,
    Compressing(UnitStatus),
    Done { status: UnitStatus, digest: Digest },
}

/// What the model wants next.
enum Decision {
    Search(PendingQuery),
    Finish,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    #[serde(default)]
    query: String,
}

/// Runs research units. Cheap to clone; every clone shares the context.
#[derive(Clone)]
pub struct ResearchUnit {
    ctx: Arc<ResearchContext>,
    config: Arc<ResearchConfig>,
}

impl ResearchUnit {
    pub fn new(ctx: Arc<ResearchContext>, config: Arc<ResearchConfig>) -> Self {
        Self { ctx, config }
    }

    /// Investigate `topic` until done, out of budget, or failed.
    pub async fn run(&self, topic: SubTopic) -> ResearchUnitResult {
        let started_at = Utc::now();
        let mut dialogue = Dialogue::new(self.config.dialogue_token_budget);
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut error: Option<String> = None;
        let mut state = UnitState::Idle;

        info!(topic = %topic.id, round = topic.round, "Research unit started");

        let (status, digest) = loop {
            state = match state {
                // ── Idle: seed the dialogue ──
                UnitState::Idle => {
                    dialogue.pin(Message::system(RESEARCHER_PROMPT));
                    dialogue.pin(Message::user(format!(
                        "Research this sub-topic:\n\n{}",
                        topic.description
                    )));
                    UnitState::Searching { pending: None }
                }

                // ── Searching: pick a query if needed, then run it ──
                UnitState::Searching { pending } => {
                    if records.len() >= self.config.max_react_tool_calls {
                        debug!(topic = %topic.id, calls = records.len(), "Search budget exhausted");
                        UnitState::Compressing(UnitStatus::BudgetExceeded)
                    } else {
                        match pending {
                            Some(query) => self.search(&topic, query, &mut records, &mut error).await,
                            None => match self.decide(&topic, &mut dialogue).await {
                                Ok(Decision::Search(query)) => UnitState::Searching {
                                    pending: Some(query),
                                },
                                Ok(Decision::Finish) => UnitState::Compressing(UnitStatus::Completed),
                                Err(e) => {
                                    error = Some(e);
                                    UnitState::Compressing(UnitStatus::Failed)
                                }
                            },
                        }
                    }
                }

                // ── Observing: feed results back to the model ──
                UnitState::Observing { call_id, hits } => {
                    let observation = self.observe(hits).await;
                    dialogue.push(Message::tool_result(call_id, observation));
                    UnitState::Reflecting
                }

                // ── Reflecting: search again or finish ──
                UnitState::Reflecting => match self.decide(&topic, &mut dialogue).await {
                    Ok(Decision::Search(query)) => UnitState::Searching {
                        pending: Some(query),
                    },
                    Ok(Decision::Finish) => UnitState::Compressing(UnitStatus::Completed),
                    Err(e) => {
                        error = Some(e);
                        UnitState::Compressing(UnitStatus::Failed)
                    }
                },

                // ── Compressing: condense the search log ──
                UnitState::Compressing(status) => {
                    let digest = match status {
                        UnitStatus::Failed => Digest::default(),
                        UnitStatus::Completed | UnitStatus::BudgetExceeded => {
                            let input = CompressionInput::new(topic.description.clone(), records.clone());
                            compress(&self.ctx, input).await
                        }
                    };
                    UnitState::Done { status, digest }
                }

                UnitState::Done { status, digest } => break (status, digest),
            };
        };

        info!(
            topic = %topic.id,
            status = ?status,
            search_calls = records.len(),
            citations = digest.citations.len(),
            "Research unit finished"
        );

        ResearchUnitResult {
            topic_id: topic.id,
            round: topic.round,
            topic: topic.description,
            status,
            digest,
            search_calls: records.len(),
            error,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// One research-role call over the dialogue, offering both tools.
    async fn decide(&self, topic: &SubTopic, dialogue: &mut Dialogue) -> Result<Decision, String> {
        let model = &self.ctx.models.research;
        let tools = vec![web_search_tool(), research_complete_tool()];
        let messages = dialogue.messages().to_vec();

        let mut reply = self
            .ctx
            .retry
            .run("research", || model.complete(messages.clone(), tools.clone()))
            .await
            .map_err(|e| e.to_string())?;

        // One search at a time: only the first tool call is honoured.
        reply.tool_calls.truncate(1);
        let call = reply.tool_calls.first().cloned();
        dialogue.push(reply);

        let Some(call) = call else {
            debug!(topic = %topic.id, "Model answered without a tool call");
            return Ok(Decision::Finish);
        };

        match call.name.as_str() {
            WEB_SEARCH_TOOL => {
                let query = serde_json::from_str::<SearchArgs>(&call.arguments)
                    .map(|a| a.query.trim().to_string())
                    .unwrap_or_default();
                let query = if query.is_empty() {
                    topic.description.clone()
                } else {
                    query
                };
                let call_id = if call.id.is_empty() {
                    format!("search_{}", dialogue.len())
                } else {
                    call.id
                };
                Ok(Decision::Search(PendingQuery { call_id, query }))
            }
            RESEARCH_COMPLETE_TOOL => Ok(Decision::Finish),
            other => {
                warn!(topic = %topic.id, tool = other, "Model called an unknown tool, finishing");
                Ok(Decision::Finish)
            }
        }
    }

    async fn search(
        &self,
        topic: &SubTopic,
        pending: PendingQuery,
        records: &mut Vec<ToolCallRecord>,
        error: &mut Option<String>,
    ) -> UnitState {
        let ctx = &self.ctx;
        let result = ctx
            .retry
            .run("search", || ctx.search.search(&pending.query))
            .await;

        let (record, next) = match result {
            Ok(hits) => {
                debug!(topic = %topic.id, query = %pending.query, hits = hits.len(), "Search finished");
                (
                    ToolCallRecord::success(pending.query.clone(), hits.clone()),
                    UnitState::Observing {
                        call_id: pending.call_id,
                        hits,
                    },
                )
            }
            Err(e) => {
                warn!(topic = %topic.id, query = %pending.query, error = %e, "Search failed");
                *error = Some(e.to_string());
                (
                    ToolCallRecord::failure(pending.query.clone(), e.to_string()),
                    UnitState::Compressing(UnitStatus::Failed),
                )
            }
        };

        ctx.publish(ResearchEvent::SearchExecuted {
            topic_id: topic.id,
            query: record.query.clone(),
            hits: record.hits.len(),
            success: record.succeeded(),
            timestamp: record.timestamp,
        });
        records.push(record);
        next
    }

    /// Render hits as a tool observation, summarizing long pages.
    async fn observe(&self, hits: Vec<SearchHit>) -> String {
        if hits.is_empty() {
            return "No results found for this query.".into();
        }
        let bodies = join_all(hits.iter().map(|hit| self.page_text(hit))).await;
        hits.iter()
            .zip(bodies)
            .enumerate()
            .map(|(i, (hit, body))| format!("[{}] {}\nURL: {}\n{}\n", i + 1, hit.title, hit.url, body))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn page_text(&self, hit: &SearchHit) -> String {
        let threshold = self.ctx.summarize_threshold_chars;
        let Some(raw) = hit.raw_content.as_deref().filter(|r| !r.trim().is_empty()) else {
            return hit.snippet.clone();
        };
        if raw.chars().count() <= threshold {
            return raw.to_string();
        }

        let model = &self.ctx.models.summarization;
        let messages = vec![Message::system(SUMMARIZE_PROMPT), Message::user(raw)];
        match self
            .ctx
            .retry
            .run("summarization", || model.complete(messages.clone(), Vec::new()))
            .await
        {
            Ok(summary) if !summary.content.trim().is_empty() => summary.content,
            Ok(_) => clamp(raw, threshold),
            Err(e) => {
                warn!(url = %hit.url, error = %e, "Summarization failed, truncating page");
                clamp(raw, threshold)
            }
        }
    }
}
