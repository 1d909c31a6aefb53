//! Role-bound language models.
//!
//! The engine talks to four logical models. Each role is resolved once at
//! configuration time to a provider, a model identity and an output ceiling.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ModelFailure;
use crate::message::Message;
use crate::provider::{Provider, ProviderRequest, ToolDefinition};

/// The logical job a model call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Condenses raw page content returned by search.
    Summarization,
    /// Plans, reflects and drives research units.
    Research,
    /// Turns a unit's observations into a digest.
    Compression,
    /// Writes the final cited report.
    FinalReport,
}

impl ModelRole {
    pub const ALL: [ModelRole; 4] = [
        ModelRole::Summarization,
        ModelRole::Research,
        ModelRole::Compression,
        ModelRole::FinalReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Summarization => "summarization",
            ModelRole::Research => "research",
            ModelRole::Compression => "compression",
            ModelRole::FinalReport => "final_report",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider bound to one role, model identity and token ceiling.
#[derive(Clone)]
pub struct LanguageModel {
    role: ModelRole,
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl LanguageModel {
    pub fn new(
        role: ModelRole,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            role,
            provider,
            model: model.into(),
            max_tokens,
            temperature: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn role(&self) -> ModelRole {
        self.role
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one completion. Every backend failure is surfaced as a
    /// role-tagged [`ModelFailure`].
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
    ) -> Result<Message, ModelFailure> {
        let mut request = ProviderRequest::new(self.model.clone(), messages);
        request.max_tokens = Some(self.max_tokens);
        request.temperature = self.temperature;
        request.tools = tools;

        debug!(
            role = %self.role,
            provider = self.provider.name(),
            model = %self.model,
            messages = request.messages.len(),
            "Model call"
        );

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| ModelFailure::from_provider(self.role, &e))?;

        if let Some(usage) = &response.usage {
            debug!(
                role = %self.role,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Model call finished"
            );
        }
        Ok(response.message)
    }
}

impl fmt::Debug for LanguageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanguageModel")
            .field("role", &self.role)
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// The four resolved role models for a run.
#[derive(Debug, Clone)]
pub struct ModelSet {
    pub summarization: LanguageModel,
    pub research: LanguageModel,
    pub compression: LanguageModel,
    pub final_report: LanguageModel,
}

impl ModelSet {
    /// Bind every role to the same provider and model (useful for tests and
    /// single-model setups).
    pub fn uniform(provider: Arc<dyn Provider>, model: &str, max_tokens: u32) -> Self {
        let bind = |role| LanguageModel::new(role, provider.clone(), model, max_tokens);
        Self {
            summarization: bind(ModelRole::Summarization),
            research: bind(ModelRole::Research),
            compression: bind(ModelRole::Compression),
            final_report: bind(ModelRole::FinalReport),
        }
    }

    pub fn get(&self, role: ModelRole) -> &LanguageModel {
        match role {
            ModelRole::Summarization => &self.summarization,
            ModelRole::Research => &self.research,
            ModelRole::Compression => &self.compression,
            ModelRole::FinalReport => &self.final_report,
        }
    }
}
