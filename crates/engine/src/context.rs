//! Read-only collaborators shared by every stage of a run.

use std::sync::Arc;

use delve_core::{EventBus, ModelSet, ResearchEvent, SearchProvider};

use crate::retry::RetryPolicy;

/// Everything a stage needs besides its own inputs. Shared behind an `Arc`
/// by all research units of a run.
pub struct ResearchContext {
    pub models: ModelSet,
    pub search: Arc<dyn SearchProvider>,
    pub retry: RetryPolicy,
    pub events: Arc<EventBus>,
    /// Raw page content longer than this is summarized before it enters a
    /// unit's dialogue.
    pub summarize_threshold_chars: usize,
}

impl ResearchContext {
    pub fn publish(&self, event: ResearchEvent) {
        self.events.publish(event);
    }
}
