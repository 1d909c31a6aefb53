//! Supervisor: plans sub-topics and decides after each round whether to
//! research further.
//!
//! Both decisions are one structured call to the research model, guarded by
//! deterministic checks. The sub-topic budget
//! (`max_concurrent_research_units × max_researcher_iterations`) and the
//! round cap are enforced here, never left to the model.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use delve_core::{
    Message, ResearchConfig, ResearchEvent, ResearchRequest, RunState, SubTopic, SubTopicId,
    UnitStatus,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::context::ResearchContext;
use crate::prompts::{PLAN_PROMPT, REFLECT_PROMPT};
use crate::structured::complete_json;

/// Why the supervisor stopped researching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    IterationLimit,
    Covered,
    BudgetExhausted,
    ModelSatisfied,
    NoNewTopics,
    ReflectionFailed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IterationLimit => "iteration_limit",
            Self::Covered => "covered",
            Self::BudgetExhausted => "budget_exhausted",
            Self::ModelSatisfied => "model_satisfied",
            Self::NoNewTopics => "no_new_topics",
            Self::ReflectionFailed => "reflection_failed",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of reflecting on a finished round.
#[derive(Debug, Clone)]
pub enum Reflection {
    Continue(Vec<SubTopic>),
    Stop(StopReason),
}

/// A sub-topic as the model writes it: a bare string or `{"description"}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TopicEntry {
    Text(String),
    Object { description: String },
}

impl TopicEntry {
    fn into_description(self) -> String {
        match self {
            Self::Text(s) | Self::Object { description: s } => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlanReply {
    #[serde(default)]
    sub_topics: Vec<TopicEntry>,
}

#[derive(Debug, Deserialize)]
struct ReflectReply {
    #[serde(default)]
    research_complete: bool,
    #[serde(default)]
    sub_topics: Vec<TopicEntry>,
}

pub struct Supervisor {
    ctx: Arc<ResearchContext>,
    config: Arc<ResearchConfig>,
}

impl Supervisor {
    pub fn new(ctx: Arc<ResearchContext>, config: Arc<ResearchConfig>) -> Self {
        Self { ctx, config }
    }

    /// Plan the first round. Never returns an empty plan: if the model fails
    /// or proposes nothing usable, the question itself is the only topic.
    pub async fn plan(&self, request: &ResearchRequest, state: &mut RunState) -> Vec<SubTopic> {
        let limit = self.round_limit(state);
        let messages = vec![
            Message::system(PLAN_PROMPT),
            Message::user(format!(
                "Research request:\n{}\n\nPropose at most {limit} sub-topics.",
                request.brief()
            )),
        ];

        let proposed = match complete_json::<PlanReply>(
            &self.ctx.models.research,
            &self.ctx.retry,
            messages,
            self.config.max_structured_output_retries,
        )
        .await
        {
            Ok(reply) => reply
                .sub_topics
                .into_iter()
                .map(TopicEntry::into_description)
                .collect(),
            Err(e) => {
                warn!(error = %e, "Planning failed, researching the question directly");
                Vec::new()
            }
        };

        let mut topics = self.admit(proposed, state, 1);
        if topics.is_empty() {
            topics = self.admit(vec![request.question.clone()], state, 1);
        }

        info!(round = 1, sub_topics = topics.len(), "Research planned");
        self.publish_plan(1, &topics);
        topics
    }

    /// Decide whether to run another round after `state.round` rounds.
    pub async fn reflect(&self, request: &ResearchRequest, state: &mut RunState) -> Reflection {
        let reflection = self.decide(request, state).await;
        let (continue_research, reason) = match &reflection {
            Reflection::Continue(topics) => (true, format!("{} new sub-topics", topics.len())),
            Reflection::Stop(reason) => (false, reason.to_string()),
        };
        info!(round = state.round, continue_research, reason = %reason, "Reflection decided");
        self.ctx.publish(ResearchEvent::ReflectionDecided {
            round: state.round,
            continue_research,
            reason,
            timestamp: Utc::now(),
        });
        reflection
    }

    async fn decide(&self, request: &ResearchRequest, state: &mut RunState) -> Reflection {
        // ── Deterministic stops ──
        if state.round >= self.config.max_researcher_iterations {
            return Reflection::Stop(StopReason::IterationLimit);
        }
        if self.covered(state) {
            return Reflection::Stop(StopReason::Covered);
        }
        if self.remaining_budget(state) == 0 {
            return Reflection::Stop(StopReason::BudgetExhausted);
        }

        // ── Ask the model ──
        let limit = self.round_limit(state);
        let messages = vec![
            Message::system(REFLECT_PROMPT),
            Message::user(reflection_brief(request, state, limit)),
        ];
        let reply = match complete_json::<ReflectReply>(
            &self.ctx.models.research,
            &self.ctx.retry,
            messages,
            self.config.max_structured_output_retries,
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Reflection failed, stopping research");
                return Reflection::Stop(StopReason::ReflectionFailed);
            }
        };

        if reply.research_complete || reply.sub_topics.is_empty() {
            return Reflection::Stop(StopReason::ModelSatisfied);
        }

        let round = state.round + 1;
        let proposed = reply
            .sub_topics
            .into_iter()
            .map(TopicEntry::into_description)
            .collect();
        let topics = self.admit(proposed, state, round);
        if topics.is_empty() {
            return Reflection::Stop(StopReason::NoNewTopics);
        }
        self.publish_plan(round, &topics);
        Reflection::Continue(topics)
    }

    /// Every planned topic completed with findings and no open gaps.
    fn covered(&self, state: &RunState) -> bool {
        let results = &state.digest.results;
        (0..state.planned.len()).all(|i| {
            results.iter().any(|r| {
                r.topic_id == SubTopicId(i)
                    && r.status == UnitStatus::Completed
                    && r.has_findings()
                    && r.digest.gaps.is_empty()
            })
        })
    }

    fn remaining_budget(&self, state: &RunState) -> usize {
        self.config
            .subtopic_budget()
            .saturating_sub(state.subtopics_created())
    }

    fn round_limit(&self, state: &RunState) -> usize {
        self.config
            .max_concurrent_research_units
            .min(self.remaining_budget(state))
    }

    /// Turn proposed descriptions into sub-topics: trim, drop blanks and
    /// case-insensitive repeats of anything planned before, and keep the
    /// first `round_limit` in the order proposed.
    fn admit(&self, proposed: Vec<String>, state: &mut RunState, round: u32) -> Vec<SubTopic> {
        let limit = self.round_limit(state);
        let mut seen: HashSet<String> = state.planned.iter().map(|d| d.to_lowercase()).collect();
        let mut topics = Vec::new();

        for description in proposed {
            if topics.len() >= limit {
                break;
            }
            let description = description.trim().to_string();
            if description.is_empty() || !seen.insert(description.to_lowercase()) {
                debug!(description = %description, "Dropping duplicate or empty sub-topic");
                continue;
            }
            topics.push(SubTopic {
                id: SubTopicId(state.planned.len()),
                round,
                description: description.clone(),
            });
            state.planned.push(description);
        }
        topics
    }

    fn publish_plan(&self, round: u32, topics: &[SubTopic]) {
        self.ctx.publish(ResearchEvent::PlanCreated {
            round,
            sub_topics: topics.iter().map(|t| t.description.clone()).collect(),
            timestamp: Utc::now(),
        });
    }
}

fn reflection_brief(request: &ResearchRequest, state: &RunState, limit: usize) -> String {
    let mut brief = format!("Research request:\n{}\n", request.brief());

    brief.push_str("\nSub-topics already researched:\n");
    for description in &state.planned {
        brief.push_str(&format!("- {description}\n"));
    }

    brief.push_str("\nFindings so far:\n");
    if state.digest.summary.is_empty() {
        brief.push_str("(none)\n");
    } else {
        brief.push_str(&state.digest.summary);
        brief.push('\n');
    }

    let gaps: Vec<&String> = state
        .digest
        .results
        .iter()
        .flat_map(|r| r.digest.gaps.iter())
        .collect();
    if !gaps.is_empty() {
        brief.push_str("\nOpen questions reported by researchers:\n");
        for gap in gaps {
            brief.push_str(&format!("- {gap}\n"));
        }
    }

    let failed = state
        .digest
        .results
        .iter()
        .filter(|r| r.status == UnitStatus::Failed)
        .count();
    if failed > 0 {
        brief.push_str(&format!("\n{failed} sub-topic(s) failed and produced no findings.\n"));
    }

    brief.push_str(&format!("\nPropose at most {limit} new sub-topics."));
    brief
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RuleProvider, ScriptedProvider, ScriptedSearch, Stage, context, text};
    use delve_core::error::ProviderError;
    use delve_core::{Digest, ResearchUnitResult};

    fn config(concurrency: usize, iterations: u32) -> Arc<ResearchConfig> {
        Arc::new(ResearchConfig {
            max_concurrent_research_units: concurrency,
            max_researcher_iterations: iterations,
            ..ResearchConfig::default()
        })
    }

    fn supervisor(provider: Arc<dyn delve_core::Provider>, config: Arc<ResearchConfig>) -> Supervisor {
        let search = Arc::new(ScriptedSearch::new(|_| Ok(vec![])));
        Supervisor::new(context(provider, search), config)
    }

    fn request(config: &Arc<ResearchConfig>) -> ResearchRequest {
        ResearchRequest::new("How do heat pumps work?", (**config).clone())
    }

    fn result(id: usize, text: &str, gaps: &[&str]) -> ResearchUnitResult {
        let topic = SubTopic {
            id: SubTopicId(id),
            round: 1,
            description: format!("topic {id}"),
        };
        let mut r = ResearchUnitResult::failed(&topic, "unused");
        r.status = UnitStatus::Completed;
        r.error = None;
        r.digest = Digest {
            text: text.into(),
            citations: vec![],
            gaps: gaps.iter().map(|g| g.to_string()).collect(),
        };
        r
    }

    fn state_after_round(results: Vec<ResearchUnitResult>) -> RunState {
        let mut state = RunState::default();
        state.planned = (0..results.len()).map(|i| format!("topic {i}")).collect();
        state.digest.append_round(results);
        state.round = 1;
        state
    }

    #[tokio::test]
    async fn plan_dedups_and_truncates() {
        let provider = Arc::new(ScriptedProvider::new(vec![text(
            r#"{"sub_topics": [{"description": "Refrigerant cycle"}, {"description": "refrigerant cycle "}, "Efficiency (COP)", "Installation cost"]}"#,
        )]));
        let config = config(2, 3);
        let sup = supervisor(provider, config.clone());
        let mut state = RunState::default();

        let topics = sup.plan(&request(&config), &mut state).await;

        let descriptions: Vec<&str> = topics.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Refrigerant cycle", "Efficiency (COP)"]);
        assert_eq!(topics[1].id, SubTopicId(1));
        assert!(topics.iter().all(|t| t.round == 1));
        assert_eq!(state.subtopics_created(), 2);
    }

    #[tokio::test]
    async fn plan_falls_back_to_question() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let config = config(3, 2);
        let sup = supervisor(provider, config.clone());
        let mut state = RunState::default();

        let topics = sup.plan(&request(&config), &mut state).await;

        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].description, "How do heat pumps work?");
    }

    #[tokio::test]
    async fn iteration_limit_stops_without_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let config = config(2, 1);
        let sup = supervisor(provider.clone(), config.clone());
        let mut state = state_after_round(vec![result(0, "", &["gap"])]);

        let reflection = sup.reflect(&request(&config), &mut state).await;

        assert!(matches!(reflection, Reflection::Stop(StopReason::IterationLimit)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn zero_iterations_still_stops_after_first_round() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let config = config(2, 0);
        let sup = supervisor(provider, config.clone());
        let mut state = state_after_round(vec![result(0, "x", &["gap"])]);

        let reflection = sup.reflect(&request(&config), &mut state).await;
        assert!(matches!(reflection, Reflection::Stop(StopReason::IterationLimit)));
    }

    #[tokio::test]
    async fn covered_topics_stop_without_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let config = config(2, 4);
        let sup = supervisor(provider.clone(), config.clone());
        let mut state = state_after_round(vec![result(0, "a", &[]), result(1, "b", &[])]);

        let reflection = sup.reflect(&request(&config), &mut state).await;

        assert!(matches!(reflection, Reflection::Stop(StopReason::Covered)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn exhausted_budget_stops_without_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let config = config(1, 2);
        let sup = supervisor(provider.clone(), config.clone());
        let mut state = state_after_round(vec![result(0, "a", &["gap"]), result(1, "b", &[])]);

        let reflection = sup.reflect(&request(&config), &mut state).await;

        assert!(matches!(reflection, Reflection::Stop(StopReason::BudgetExhausted)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn continue_truncates_in_request_order() {
        let provider = Arc::new(RuleProvider::new(|stage, _| match stage {
            Stage::Reflect => text(
                r#"{"research_complete": false, "sub_topics": ["topic 0", "Cold climates", "Noise", "Maintenance"]}"#,
            ),
            _ => text("{}"),
        }));
        // Budget 2 × 2 = 4, one created already → 3 left, round limit 2.
        let config = config(2, 2);
        let sup = supervisor(provider, config.clone());
        let mut state = state_after_round(vec![result(0, "a", &["cold weather?"])]);

        let reflection = sup.reflect(&request(&config), &mut state).await;

        let Reflection::Continue(topics) = reflection else {
            panic!("expected Continue");
        };
        let descriptions: Vec<&str> = topics.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Cold climates", "Noise"]);
        assert!(topics.iter().all(|t| t.round == 2));
        assert_eq!(topics[0].id, SubTopicId(1));
        assert_eq!(state.subtopics_created(), 3);
    }

    #[tokio::test]
    async fn model_can_declare_completion() {
        let provider = Arc::new(ScriptedProvider::new(vec![text(
            r#"{"research_complete": true, "sub_topics": ["more"]}"#,
        )]));
        let config = config(2, 3);
        let sup = supervisor(provider, config.clone());
        let mut state = state_after_round(vec![result(0, "a", &["gap"])]);

        let reflection = sup.reflect(&request(&config), &mut state).await;
        assert!(matches!(reflection, Reflection::Stop(StopReason::ModelSatisfied)));
    }

    #[tokio::test]
    async fn only_duplicates_means_no_new_topics() {
        let provider = Arc::new(ScriptedProvider::new(vec![text(
            r#"{"research_complete": false, "sub_topics": ["TOPIC 0"]}"#,
        )]));
        let config = config(2, 3);
        let sup = supervisor(provider, config.clone());
        let mut state = state_after_round(vec![result(0, "a", &["gap"])]);

        let reflection = sup.reflect(&request(&config), &mut state).await;
        assert!(matches!(reflection, Reflection::Stop(StopReason::NoNewTopics)));
    }

    #[tokio::test]
    async fn reflection_failure_stops() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text("not json"),
            text("still not json"),
            text("nope"),
        ]));
        let config = config(2, 3);
        let sup = supervisor(provider.clone(), config.clone());
        let mut state = state_after_round(vec![result(0, "", &[])]);

        let reflection = sup.reflect(&request(&config), &mut state).await;

        assert!(matches!(reflection, Reflection::Stop(StopReason::ReflectionFailed)));
        assert_eq!(provider.call_count(), 3);
    }
}
