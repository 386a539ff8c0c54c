//! Thompson sampling over per-mode Beta posteriors
//!
//! Every transform here is pure: it takes a borrowed [`PolicyState`] and
//! returns a new one. Loading and saving is the router's job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

use super::mode::{Feedback, ModeId};
use super::state::{HistoryEntry, PolicyState, Prior};

/// Sessions during which a surveyed preference overrides sampling
pub const DEFAULT_COLD_START_WINDOW: u64 = 3;

/// Configuration for the bandit policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    /// Completed sessions before the survey preference stops applying
    pub cold_start_window: u64,
    /// Initial alpha for every mode
    pub prior_success: f64,
    /// Initial beta for every mode
    pub prior_failure: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            cold_start_window: DEFAULT_COLD_START_WINDOW,
            prior_success: 1.0,
            prior_failure: 1.0,
        }
    }
}

impl BanditConfig {
    pub fn prior(&self) -> Prior {
        Prior {
            success: self.prior_success,
            failure: self.prior_failure,
        }
    }
}

/// Source of Beta draws, swappable for deterministic tests
pub trait BetaSampler: Send + Sync {
    fn sample(&self, alpha: f64, beta: f64) -> f64;
}

/// Draws from `rand_distr::Beta` using the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSampler;

impl BetaSampler for ThreadRngSampler {
    fn sample(&self, alpha: f64, beta: f64) -> f64 {
        let mut rng = rand::thread_rng();
        match Beta::new(alpha, beta) {
            Ok(dist) => dist.sample(&mut rng),
            // Beta(1, 1) is uniform
            Err(_) => rng.r#gen::<f64>(),
        }
    }
}

/// How a recommendation was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    ColdStart,
    Sampled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub mode: ModeId,
    pub source: RecommendationSource,
}

/// Mode-selection policy
#[derive(Clone)]
pub struct BanditPolicy {
    config: BanditConfig,
    sampler: Arc<dyn BetaSampler>,
}

impl std::fmt::Debug for BanditPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BanditPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for BanditPolicy {
    fn default() -> Self {
        Self::new(BanditConfig::default())
    }
}

impl BanditPolicy {
    pub fn new(config: BanditConfig) -> Self {
        Self::with_sampler(config, Arc::new(ThreadRngSampler))
    }

    pub fn with_sampler(config: BanditConfig, sampler: Arc<dyn BetaSampler>) -> Self {
        Self { config, sampler }
    }

    pub fn config(&self) -> &BanditConfig {
        &self.config
    }

    /// Surveyed preference, if the cold-start window is still open
    pub fn cold_start_preference(&self, state: &PolicyState) -> Option<ModeId> {
        if state.survey_completed && state.total_sessions < self.config.cold_start_window {
            state.initial_preference
        } else {
            None
        }
    }

    /// Pick the mode to present next
    pub fn recommend(&self, state: &PolicyState) -> Recommendation {
        if let Some(mode) = self.cold_start_preference(state) {
            return Recommendation {
                mode,
                source: RecommendationSource::ColdStart,
            };
        }

        // Strict `>` keeps the earlier mode on ties
        let mut best = ModeId::all()[0];
        let mut best_sample = f64::NEG_INFINITY;
        for mode in ModeId::all() {
            let sample = self
                .sampler
                .sample(state.success(*mode), state.failure(*mode));
            if sample > best_sample {
                best = *mode;
                best_sample = sample;
            }
        }

        Recommendation {
            mode: best,
            source: RecommendationSource::Sampled,
        }
    }

    /// Credit feedback to a mode, timestamped now
    pub fn update(
        &self,
        state: &PolicyState,
        mode: ModeId,
        feedback: Feedback,
    ) -> Result<PolicyState, PolicyError> {
        self.update_at(state, mode, feedback, Utc::now())
    }

    /// Credit feedback to a mode at an explicit time
    pub fn update_at(
        &self,
        state: &PolicyState,
        mode: ModeId,
        feedback: Feedback,
        at: DateTime<Utc>,
    ) -> Result<PolicyState, PolicyError> {
        let reward = feedback.reward()?;

        let mut next = state.clone();
        *next.mode_success.entry(mode).or_insert(self.config.prior_success) += reward;
        *next.mode_failure.entry(mode).or_insert(self.config.prior_failure) += 1.0 - reward;
        next.history.push(HistoryEntry {
            mode,
            feedback,
            timestamp: at,
        });
        next.last_updated = Some(at);
        Ok(next)
    }

    /// Record the one-time survey; calling again overwrites the preference
    pub fn record_survey(&self, state: &PolicyState, preference: Option<ModeId>) -> PolicyState {
        let mut next = state.clone();
        next.survey_completed = true;
        next.initial_preference = preference;
        next
    }

    pub fn increment_session(&self, state: &PolicyState) -> PolicyState {
        let mut next = state.clone();
        next.total_sessions += 1;
        next
    }
}
