//! The research run: clarify → plan → rounds of research → report.

use std::sync::Arc;

use chrono::Utc;
use delve_config::AppConfig;
use delve_core::{
    Error, EventBus, ModelSet, ResearchEvent, ResearchRequest, RunState, SearchProvider,
    UnitStatus,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::clarifier::{ClarifyOutcome, clarify};
use crate::context::ResearchContext;
use crate::researcher::ResearchUnit;
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::supervisor::{Reflection, Supervisor};
use crate::synthesizer::{Report, synthesize};

/// How a run ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The request needs an answer from the user before research starts.
    Clarification { question: String },
    Report(Report),
    /// The report could not be written; `fallback` is the raw digest.
    Degraded { fallback: String, reason: String },
}

/// Entry point of the engine.
///
/// Holds the resolved models and search backend; every call to
/// [`run`](Self::run) is an independent research run.
pub struct DeepResearcher {
    models: ModelSet,
    search: Arc<dyn SearchProvider>,
    retry: RetryPolicy,
    events: Arc<EventBus>,
    summarize_threshold_chars: usize,
}

impl DeepResearcher {
    pub fn new(models: ModelSet, search: Arc<dyn SearchProvider>) -> Self {
        Self {
            models,
            search,
            retry: RetryPolicy::default(),
            events: Arc::new(EventBus::default()),
            summarize_threshold_chars: 6000,
        }
    }

    /// Build from configuration: resolve role models and the search backend.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let models = delve_providers::resolve_models(config)?;
        let search = delve_search::build_from_config(config, &models)?;
        Ok(Self::new(models, search)
            .with_retry(RetryPolicy::from_config(&config.retry))
            .with_summarize_threshold(config.search.summarize_threshold_chars))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_summarize_threshold(mut self, chars: usize) -> Self {
        self.summarize_threshold_chars = chars;
        self
    }

    /// The bus progress events are published on.
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Run one research request to completion.
    ///
    /// Only configuration problems are errors. Failed units, failed
    /// reflection and a failed final report all degrade the outcome instead.
    pub async fn run(&self, request: ResearchRequest) -> Result<RunOutcome, Error> {
        let config = request.config.clone();
        if config.max_concurrent_research_units == 0 {
            return Err(Error::configuration(
                "max_concurrent_research_units must be at least 1",
            ));
        }

        let ctx = Arc::new(ResearchContext {
            models: self.models.clone(),
            search: self.search.clone(),
            retry: self.retry.clone(),
            events: self.events.clone(),
            summarize_threshold_chars: self.summarize_threshold_chars,
        });

        info!(run_id = %request.id, search = ctx.search.name(), "Research run started");
        ctx.publish(ResearchEvent::RunStarted {
            run_id: request.id.to_string(),
            question: request.question.clone(),
            timestamp: Utc::now(),
        });

        // ── Clarify ──
        if let ClarifyOutcome::Clarification { question } = clarify(&ctx, &request).await {
            info!(run_id = %request.id, "Clarification needed");
            ctx.publish(ResearchEvent::ClarificationRequested {
                run_id: request.id.to_string(),
                question: question.clone(),
                timestamp: Utc::now(),
            });
            return Ok(RunOutcome::Clarification { question });
        }

        // ── Plan ──
        let supervisor = Supervisor::new(ctx.clone(), config.clone());
        let scheduler = Scheduler::new(config.max_concurrent_research_units, ctx.events.clone());
        let unit = ResearchUnit::new(ctx.clone(), config.clone());
        let mut state = RunState::default();
        let mut topics = supervisor.plan(&request, &mut state).await;

        // ── Research rounds ──
        loop {
            let round = state.round + 1;
            info!(run_id = %request.id, round, units = topics.len(), "Round started");

            let worker = unit.clone();
            let results = scheduler
                .run(topics, move |topic| {
                    let unit = worker.clone();
                    async move { unit.run(topic).await }
                })
                .await;

            let failed = results
                .iter()
                .filter(|r| r.status == UnitStatus::Failed)
                .count();
            let completed = results.len() - failed;
            state.digest.append_round(results);
            state.round = round;

            info!(run_id = %request.id, round, completed, failed, "Round completed");
            ctx.publish(ResearchEvent::RoundCompleted {
                round,
                completed,
                failed,
                timestamp: Utc::now(),
            });

            match supervisor.reflect(&request, &mut state).await {
                Reflection::Continue(next) => topics = next,
                Reflection::Stop(_) => break,
            }
        }
        state.terminate();

        // ── Report ──
        let outcome = match synthesize(&ctx, &request, &state).await {
            Ok(report) => RunOutcome::Report(report),
            Err(Error::SynthesisFailed { reason, fallback }) => {
                warn!(run_id = %request.id, reason = %reason, "Report synthesis failed, returning digest");
                RunOutcome::Degraded { fallback, reason }
            }
            Err(e) => return Err(e),
        };

        let degraded = matches!(outcome, RunOutcome::Degraded { .. });
        info!(run_id = %request.id, rounds = state.round, degraded, "Research run finished");
        ctx.publish(ResearchEvent::RunFinished {
            run_id: request.id.to_string(),
            rounds: state.round,
            degraded,
            timestamp: Utc::now(),
        });
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::{RESEARCH_COMPLETE_TOOL, WEB_SEARCH_TOOL};
    use crate::test_helpers::{RuleProvider, ScriptedSearch, Stage, hit, text, tool};
    use delve_core::ResearchConfig;
    use delve_core::error::ProviderError;
    use delve_core::message::Role;
    use serde_json::json;

    fn researcher(provider: Arc<RuleProvider>, search: Arc<ScriptedSearch>) -> DeepResearcher {
        DeepResearcher::new(ModelSet::uniform(provider, "mock-model", 1000), search)
            .with_retry(RetryPolicy::none())
    }

    fn search() -> Arc<ScriptedSearch> {
        Arc::new(ScriptedSearch::new(|_| {
            Ok(vec![hit("NIST", "https://nist.gov/water", "Water boils at 100 °C at 1 atm.")])
        }))
    }

    /// Plans two topics, searches once per unit, then reports.
    fn happy_rules(report: fn() -> Result<delve_core::ProviderResponse, ProviderError>) -> RuleProvider {
        RuleProvider::new(move |stage, req| match stage {
            Stage::Clarify => text(r#"{"need_clarification": false, "question": "", "verification": ""}"#),
            Stage::Plan => text(r#"{"sub_topics": ["Sea level", "Altitude"]}"#),
            Stage::Research if req.messages.iter().any(|m| m.role == Role::Tool) => {
                tool(RESEARCH_COMPLETE_TOOL, json!({}))
            }
            Stage::Research => tool(WEB_SEARCH_TOOL, json!({"query": "water boiling point"})),
            Stage::Compress => text(r#"{"digest": "Water boils at 100 °C [1].", "gaps": []}"#),
            Stage::Report => report(),
            _ => text(""),
        })
    }

    #[tokio::test]
    async fn full_run_produces_report() {
        let provider = Arc::new(happy_rules(|| {
            text("# Water\n\nWater boils at 100 °C [NIST](https://nist.gov/water).\n\n### Sources\n[1] NIST")
        }));
        let researcher = researcher(provider.clone(), search());
        let mut rx = researcher.events().subscribe();

        let outcome = researcher
            .run(ResearchRequest::new("Boiling point of water?", ResearchConfig::default()))
            .await
            .unwrap();

        let RunOutcome::Report(report) = outcome else {
            panic!("expected a report");
        };
        assert!(report.markdown.contains("100 °C"));
        assert_eq!(report.citations.len(), 1);
        // Both topics completed without gaps, so no reflection call is made.
        assert_eq!(provider.calls(Stage::Reflect), 0);

        let mut saw_finish = false;
        while let Ok(event) = rx.try_recv() {
            if let ResearchEvent::RunFinished { rounds, degraded, .. } = &*event {
                assert_eq!(*rounds, 1);
                assert!(!degraded);
                saw_finish = true;
            }
        }
        assert!(saw_finish);
    }

    #[tokio::test]
    async fn clarification_returns_early() {
        let provider = Arc::new(RuleProvider::new(|stage, _| match stage {
            Stage::Clarify => text(r#"{"need_clarification": true, "question": "Which MCP?", "verification": ""}"#),
            _ => text("unexpected"),
        }));
        let researcher = researcher(provider.clone(), search());

        let outcome = researcher
            .run(ResearchRequest::new("What is MCP?", ResearchConfig::default()))
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Clarification { ref question } if question == "Which MCP?"));
        assert_eq!(provider.calls(Stage::Plan), 0);
    }

    #[tokio::test]
    async fn zero_concurrency_is_a_configuration_error() {
        let provider = Arc::new(RuleProvider::new(|_, _| text("")));
        let search = search();
        let researcher = researcher(provider.clone(), search.clone());
        let config = ResearchConfig {
            max_concurrent_research_units: 0,
            ..ResearchConfig::default()
        };

        let err = researcher
            .run(ResearchRequest::new("q", config))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(provider.calls(Stage::Plan), 0);
        assert_eq!(search.calls(), 0);
    }

    #[tokio::test]
    async fn report_failure_degrades() {
        let provider = Arc::new(happy_rules(|| {
            Err(ProviderError::ApiError {
                status_code: 400,
                message: "context too long".into(),
            })
        }));
        let researcher = researcher(provider, search());

        let outcome = researcher
            .run(ResearchRequest::new("Boiling point of water?", ResearchConfig::default()))
            .await
            .unwrap();

        let RunOutcome::Degraded { fallback, reason } = outcome else {
            panic!("expected a degraded outcome");
        };
        assert!(fallback.contains("Water boils at 100 °C"));
        assert!(reason.contains("context too long"));
    }
}
