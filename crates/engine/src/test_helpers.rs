//! Shared test helpers: scripted model providers and search backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use delve_core::error::ProviderError;
use delve_core::message::{Message, MessageToolCall, Role};
use delve_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use delve_core::{EventBus, ModelSet, SearchError, SearchHit, SearchProvider};

use crate::context::ResearchContext;
use crate::prompts;
use crate::retry::RetryPolicy;

pub type Reply = Result<ProviderResponse, ProviderError>;

/// Create a simple text response (no tool calls).
pub fn text(content: &str) -> Reply {
    Ok(response(Message::assistant(content)))
}

/// Create a response carrying one tool call.
pub fn tool(name: &str, args: serde_json::Value) -> Reply {
    Ok(response(
        Message::assistant("").with_tool_calls(vec![make_tool_call(name, args)]),
    ))
}

pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

fn response(message: Message) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
        metadata: serde_json::Map::new(),
    }
}

/// Which engine stage sent a request, judged by its system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Clarify,
    Plan,
    Reflect,
    Research,
    Compress,
    Summarize,
    Report,
    Other,
}

pub fn stage_of(request: &ProviderRequest) -> Stage {
    let system = request
        .messages
        .iter()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    match system {
        prompts::CLARIFY_PROMPT => Stage::Clarify,
        prompts::PLAN_PROMPT => Stage::Plan,
        prompts::REFLECT_PROMPT => Stage::Reflect,
        prompts::RESEARCHER_PROMPT => Stage::Research,
        prompts::COMPRESS_PROMPT => Stage::Compress,
        prompts::SUMMARIZE_PROMPT => Stage::Summarize,
        prompts::REPORT_PROMPT => Stage::Report,
        _ => Stage::Other,
    }
}

/// A mock provider that returns a sequence of scripted replies.
///
/// Once the script runs out every call fails with `NotConfigured`.
pub struct ScriptedProvider {
    replies: Mutex<Vec<Reply>>,
    call_count: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: ProviderRequest) -> Reply {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst);
        let replies = self.replies.lock().unwrap();
        replies
            .get(n)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::NotConfigured(format!("script exhausted at call {n}"))))
    }
}

type Rule = dyn Fn(Stage, &ProviderRequest) -> Reply + Send + Sync;

/// A mock provider that answers by stage, so concurrent units can share it.
pub struct RuleProvider {
    rule: Box<Rule>,
    calls: Mutex<HashMap<Stage, usize>>,
}

impl RuleProvider {
    pub fn new(rule: impl Fn(Stage, &ProviderRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            rule: Box::new(rule),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self, stage: Stage) -> usize {
        self.calls.lock().unwrap().get(&stage).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Provider for RuleProvider {
    fn name(&self) -> &str {
        "rules"
    }

    async fn complete(&self, request: ProviderRequest) -> Reply {
        let stage = stage_of(&request);
        *self.calls.lock().unwrap().entry(stage).or_default() += 1;
        (self.rule)(stage, &request)
    }
}

type SearchRule = dyn Fn(&str) -> Result<Vec<SearchHit>, SearchError> + Send + Sync;

/// A mock search backend with optional per-query latency and in-flight
/// tracking.
pub struct ScriptedSearch {
    rule: Box<SearchRule>,
    delay: Box<dyn Fn(&str) -> Duration + Send + Sync>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSearch {
    pub fn new(
        rule: impl Fn(&str) -> Result<Vec<SearchHit>, SearchError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            rule: Box::new(rule),
            delay: Box::new(|_| Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = (self.delay)(query);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.rule)(query)
    }
}

/// A research context over `provider` and `search` with no retry delays.
pub fn context(
    provider: Arc<dyn Provider>,
    search: Arc<dyn SearchProvider>,
) -> Arc<ResearchContext> {
    Arc::new(ResearchContext {
        models: ModelSet::uniform(provider, "mock-model", 1000),
        search,
        retry: RetryPolicy::none(),
        events: Arc::new(EventBus::default()),
        summarize_threshold_chars: 6000,
    })
}

pub fn hit(title: &str, url: &str, snippet: &str) -> SearchHit {
    SearchHit::new(title, url, snippet)
}
