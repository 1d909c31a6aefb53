//! Progress events: observable milestones of a research run.
//!
//! The engine publishes events as stages complete. Hosts (the CLI, tests)
//! subscribe to render progress without coupling to engine internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::research::{SubTopicId, UnitStatus};

/// All progress events of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResearchEvent {
    RunStarted {
        run_id: String,
        question: String,
        timestamp: DateTime<Utc>,
    },

    ClarificationRequested {
        run_id: String,
        question: String,
        timestamp: DateTime<Utc>,
    },

    /// The supervisor produced sub-topics for a round.
    PlanCreated {
        round: u32,
        sub_topics: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    UnitStarted {
        topic_id: SubTopicId,
        topic: String,
        timestamp: DateTime<Utc>,
    },

    SearchExecuted {
        topic_id: SubTopicId,
        query: String,
        hits: usize,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    UnitFinished {
        topic_id: SubTopicId,
        status: UnitStatus,
        search_calls: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    RoundCompleted {
        round: u32,
        completed: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// The supervisor decided whether to continue.
    ReflectionDecided {
        round: u32,
        continue_research: bool,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    ReportSynthesized {
        citations: usize,
        stripped_citations: usize,
        timestamp: DateTime<Utc>,
    },

    RunFinished {
        run_id: String,
        rounds: u32,
        degraded: bool,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for progress events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow subscribers
/// lag and miss events rather than blocking the run.
pub struct EventBus {
    sender: broadcast::Sender<Arc<ResearchEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: ResearchEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ResearchEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(ResearchEvent::SearchExecuted {
            topic_id: SubTopicId(2),
            query: "water boiling point".into(),
            hits: 3,
            success: true,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            ResearchEvent::SearchExecuted { topic_id, hits, .. } => {
                assert_eq!(*topic_id, SubTopicId(2));
                assert_eq!(*hits, 3);
            }
            _ => panic!("Expected SearchExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(ResearchEvent::RoundCompleted {
            round: 1,
            completed: 0,
            failed: 0,
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_string(&ResearchEvent::ReflectionDecided {
            round: 2,
            continue_research: false,
            reason: "covered".into(),
            timestamp: Utc::now(),
        })
        .unwrap();
        assert!(json.contains(r#""event":"reflection_decided""#));
    }
}
