//! Structured model calls: retry transient failures, re-ask on malformed
//! JSON up to a bounded number of times.

use delve_core::structured::parse_json;
use delve_core::{LanguageModel, Message, ModelFailure};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::retry::RetryPolicy;

/// Call `model` and parse its reply as `T`.
///
/// Transient call failures are retried per `retry`. A reply that fails to
/// parse is asked for again, up to `attempts` replies in total.
pub async fn complete_json<T: DeserializeOwned>(
    model: &LanguageModel,
    retry: &RetryPolicy,
    messages: Vec<Message>,
    attempts: u32,
) -> Result<T, ModelFailure> {
    let role = model.role();
    let mut last_error = ModelFailure::malformed(role, "no reply");

    for attempt in 1..=attempts.max(1) {
        let reply = retry
            .run(role.as_str(), || model.complete(messages.clone(), Vec::new()))
            .await?;

        match parse_json::<T>(&reply.content) {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(role = %role, attempt, error = %e, "Malformed structured output");
                last_error = ModelFailure::malformed(role, e.to_string());
            }
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, text};
    use delve_core::{ModelFailureKind, ModelRole};
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Deserialize)]
    struct Answer {
        ok: bool,
    }

    fn model(provider: Arc<ScriptedProvider>) -> LanguageModel {
        LanguageModel::new(ModelRole::Research, provider, "mock", 100)
    }

    #[tokio::test]
    async fn reasks_after_malformed_reply() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text("not json"),
            text("```json\n{\"ok\": true}\n```"),
        ]));
        let answer: Answer = complete_json(
            &model(provider.clone()),
            &RetryPolicy::none(),
            vec![Message::user("q")],
            3,
        )
        .await
        .unwrap();
        assert!(answer.ok);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let provider = Arc::new(ScriptedProvider::new(vec![text("nope"), text("still nope")]));
        let err = complete_json::<Answer>(
            &model(provider.clone()),
            &RetryPolicy::none(),
            vec![Message::user("q")],
            2,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ModelFailureKind::MalformedOutput);
        assert_eq!(provider.call_count(), 2);
    }
}
