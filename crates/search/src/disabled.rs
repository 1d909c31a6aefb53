//! Disabled search backend (`search_api = "none"`).

use async_trait::async_trait;
use delve_core::{SearchError, SearchHit, SearchProvider};

/// A backend that never finds anything. Research units still run their
/// loop and end with empty observations.
pub struct DisabledSearch;

#[async_trait]
impl SearchProvider for DisabledSearch {
    fn name(&self) -> &str {
        "none"
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, SearchError> {
        Ok(Vec::new())
    }
}
