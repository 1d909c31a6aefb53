//! # delve-engine
//!
//! Research orchestration for Delve.
//!
//! A run moves through five stages:
//!
//! 1. **Clarify**: optionally ask the user one clarifying question
//! 2. **Plan**: the supervisor splits the question into sub-topics
//! 3. **Research**: a scheduler fans sub-topics out to concurrent research
//!    units, each a bounded search loop that ends in a compressed digest
//! 4. **Reflect**: the supervisor decides whether another round is needed
//! 5. **Report**: the digest is written up and every cited URL is checked
//!    against what research actually returned
//!
//! Steps 3 and 4 repeat until the supervisor stops or the round cap is hit.
//! Progress is published on a [`delve_core::EventBus`].

pub mod citations;
pub mod clarifier;
pub mod compressor;
pub mod context;
pub mod prompts;
pub mod researcher;
pub mod retry;
pub mod run;
pub mod scheduler;
pub mod structured;
pub mod supervisor;
pub mod synthesizer;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use clarifier::ClarifyOutcome;
pub use compressor::{CompressionInput, compress};
pub use context::ResearchContext;
pub use researcher::ResearchUnit;
pub use retry::RetryPolicy;
pub use run::{DeepResearcher, RunOutcome};
pub use scheduler::Scheduler;
pub use supervisor::{Reflection, StopReason, Supervisor};
pub use synthesizer::{INSUFFICIENT_FINDINGS, Report};
