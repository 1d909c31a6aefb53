//! Clarifier: asks at most one clarifying question before research starts.

use delve_core::{Message, ResearchRequest};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::context::ResearchContext;
use crate::prompts::CLARIFY_PROMPT;
use crate::structured::complete_json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClarifyOutcome {
    /// Stop and ask the user this question.
    Clarification { question: String },
    /// Go ahead. `verification` is the model's restatement of the task, if any.
    Proceed { verification: Option<String> },
}

#[derive(Debug, Deserialize)]
struct ClarifyReply {
    #[serde(default)]
    need_clarification: bool,
    #[serde(default)]
    question: String,
    #[serde(default)]
    verification: String,
}

/// Decide whether `request` needs a clarifying question.
///
/// Never fails: a model error or unusable reply means the run proceeds.
pub async fn clarify(ctx: &ResearchContext, request: &ResearchRequest) -> ClarifyOutcome {
    if !request.config.allow_clarification {
        return ClarifyOutcome::Proceed { verification: None };
    }
    if request.has_answered_clarification() {
        debug!(run_id = %request.id, "Clarification already answered");
        return ClarifyOutcome::Proceed { verification: None };
    }

    let messages = vec![
        Message::system(CLARIFY_PROMPT),
        Message::user(request.brief()),
    ];
    let reply = complete_json::<ClarifyReply>(
        &ctx.models.research,
        &ctx.retry,
        messages,
        request.config.max_structured_output_retries,
    )
    .await;

    match reply {
        Ok(reply) if reply.need_clarification && !reply.question.trim().is_empty() => {
            ClarifyOutcome::Clarification {
                question: reply.question.trim().to_string(),
            }
        }
        Ok(reply) => ClarifyOutcome::Proceed {
            verification: Some(reply.verification.trim().to_string()).filter(|v| !v.is_empty()),
        },
        Err(e) => {
            warn!(run_id = %request.id, error = %e, "Clarification check failed, proceeding");
            ClarifyOutcome::Proceed { verification: None }
        }
    }
}
