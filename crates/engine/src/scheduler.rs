//! Scheduler: fans a round's sub-topics out to concurrent research units.
//!
//! A semaphore with `max_concurrent_research_units` permits is the admission
//! gate. Every unit runs in its own task and holds an owned permit for its
//! whole lifetime, so at most that many units are ever in flight. Results
//! come back in input order regardless of completion order.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use delve_core::{EventBus, ResearchEvent, ResearchUnitResult, SubTopic};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub struct Scheduler {
    permits: Arc<Semaphore>,
    events: Arc<EventBus>,
}

impl Scheduler {
    /// A zero limit is raised to one; callers reject zero before getting here.
    pub fn new(max_concurrent: usize, events: Arc<EventBus>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            events,
        }
    }

    /// Run `worker` over every topic and return one result per topic, in
    /// input order. A unit that panics becomes a `Failed` result; it never
    /// affects its siblings.
    pub async fn run<F, Fut>(&self, topics: Vec<SubTopic>, worker: F) -> Vec<ResearchUnitResult>
    where
        F: Fn(SubTopic) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResearchUnitResult> + Send + 'static,
    {
        let worker = Arc::new(worker);
        let mut handles = Vec::with_capacity(topics.len());

        for topic in topics {
            let permits = self.permits.clone();
            let events = self.events.clone();
            let worker = worker.clone();
            let unit_topic = topic.clone();

            let handle = tokio::spawn(async move {
                let topic = unit_topic;
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return ResearchUnitResult::failed(&topic, "admission gate closed"),
                };

                let started_at = Utc::now();
                debug!(topic = %topic.id, "Unit admitted");
                events.publish(ResearchEvent::UnitStarted {
                    topic_id: topic.id,
                    topic: topic.description.clone(),
                    timestamp: started_at,
                });

                let mut result = worker(topic).await;
                result.started_at = started_at;
                result.finished_at = Utc::now();
                publish_finished(&events, &result);
                result
            });
            handles.push((topic, handle));
        }

        // ── Join in input order ──
        let mut results = Vec::with_capacity(handles.len());
        for (topic, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(topic = %topic.id, error = %e, "Research unit aborted");
                    let result = ResearchUnitResult::failed(&topic, format!("unit aborted: {e}"));
                    publish_finished(&self.events, &result);
                    result
                }
            };
            results.push(result);
        }
        results
    }
}

fn publish_finished(events: &EventBus, result: &ResearchUnitResult) {
    let duration_ms = (result.finished_at - result.started_at)
        .num_milliseconds()
        .max(0) as u64;
    events.publish(ResearchEvent::UnitFinished {
        topic_id: result.topic_id,
        status: result.status,
        search_calls: result.search_calls,
        duration_ms,
        timestamp: result.finished_at,
    });
}
