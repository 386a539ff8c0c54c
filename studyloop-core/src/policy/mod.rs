//! Adaptive teaching-mode policy
//!
//! Per-user Beta posteriors over teaching modes, Thompson sampling for
//! recommendations, and a survey-driven cold-start override.

mod bandit;
mod mode;
mod state;

pub use bandit::{
    BanditConfig, BanditPolicy, BetaSampler, DEFAULT_COLD_START_WINDOW, Recommendation,
    RecommendationSource, ThreadRngSampler,
};
pub use mode::{Feedback, ModeId};
pub use state::{HistoryEntry, PolicyState, Prior, RawPolicyState, Repair, Side};

pub(crate) use state::iso8601;
