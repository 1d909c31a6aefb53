//! # Delve Core
//!
//! Domain types, traits, and error definitions for the Delve deep research
//! engine. This crate has **no HTTP or runtime dependencies** beyond
//! `tokio::sync`; it defines the model that every other crate implements
//! against.
//!
//! ## Layout
//!
//! - [`provider`]: the wire-level LLM abstraction (`Provider`)
//! - [`model`]: role-bound language models (`LanguageModel`, `ModelSet`)
//! - [`search`]: the search backend abstraction (`SearchProvider`)
//! - [`research`]: requests, sub-topics, unit results and the aggregate digest
//! - [`event`]: progress events published while a run executes
//! - [`structured`]: JSON extraction from model replies

pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod provider;
pub mod research;
pub mod search;
pub mod structured;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ModelFailure, ModelFailureKind, ProviderError, Result, SearchError};
pub use event::{EventBus, ResearchEvent};
pub use message::{Message, MessageToolCall, Role};
pub use model::{LanguageModel, ModelRole, ModelSet};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use research::{
    AggregateDigest, Citation, Dialogue, Digest, ResearchConfig, ResearchRequest,
    ResearchUnitResult, RunId, RunState, SubTopic, SubTopicId, ToolCallOutcome, ToolCallRecord,
    UnitStatus, normalize_url,
};
pub use search::{SearchHit, SearchProvider};
