//! Thompson-sampling bandit over the strategy arms
//!
//! Each arm carries a Beta(α, β) posterior. Selection samples every
//! eligible arm's posterior, adds a small exploration bonus for
//! lightly-tried arms, and picks the argmax. Rewards update the posterior
//! and persist the full state atomically; user feedback lands as a second,
//! additive update on the originally chosen arm.

use crate::state::StateStore;
use crate::strategy::StrategyKind;
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use smartrag_common::errors::Result;
use smartrag_common::metrics;
use std::collections::HashMap;
use std::sync::Mutex;

/// Posterior state of one arm
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ArmState {
    pub alpha: f64,
    pub beta: f64,
    pub trials: u64,
}

impl ArmState {
    pub fn uniform() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            trials: 0,
        }
    }

    /// Posterior mean α / (α + β)
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

impl Default for ArmState {
    fn default() -> Self {
        Self::uniform()
    }
}

/// Automatic reward, bounded to [0, 1]:
/// 0.4·confidence + 0.3·coverage + 0.3·max(0, 1 − latency/B)
pub fn auto_reward(confidence: f32, has_citations: bool, latency_ms: u64, budget_ms: u64) -> f64 {
    let coverage = if has_citations { 1.0 } else { 0.0 };
    let latency_term = (1.0 - latency_ms as f64 / budget_ms.max(1) as f64).max(0.0);
    let reward = 0.4 * confidence as f64 + 0.3 * coverage + 0.3 * latency_term;
    reward.clamp(0.0, 1.0)
}

/// Blend a user rating with the automatic reward: 0.7·u + 0.3·r_auto
pub fn blended_reward(user_rating: f64, auto: f64) -> f64 {
    (0.7 * user_rating + 0.3 * auto).clamp(0.0, 1.0)
}

/// Sample Beta(α, β) with the provided RNG; deterministic under a seeded RNG
pub fn sample_beta(alpha: f64, beta: f64, rng: &mut impl Rng) -> f64 {
    match Beta::new(alpha, beta) {
        Ok(dist) => dist.sample(rng),
        // α, β > 0 is a state-file invariant; a violation means the
        // validator was bypassed
        Err(_) => 0.5,
    }
}

/// Thompson-sampling bandit with persisted posteriors
pub struct Bandit {
    arms: Mutex<HashMap<StrategyKind, ArmState>>,
    store: StateStore,
    epsilon: f64,
}

impl Bandit {
    /// Create from an initial state (loaded by the caller via StateStore)
    pub fn new(initial: HashMap<StrategyKind, ArmState>, store: StateStore, epsilon: f64) -> Self {
        let mut arms = initial;
        for kind in StrategyKind::ALL {
            arms.entry(kind).or_insert_with(ArmState::uniform);
        }
        Self {
            arms: Mutex::new(arms),
            store,
            epsilon,
        }
    }

    /// Select an arm by Thompson sampling over the eligible set
    ///
    /// Each eligible arm's posterior is sampled and an exploration bonus
    /// ε·1/(α+β−2+1) is added; the argmax wins. An empty eligible set falls
    /// back to hybrid.
    pub fn select(&self, eligible: &[StrategyKind], rng: &mut impl Rng) -> StrategyKind {
        let arms = self.arms.lock().expect("bandit lock");

        let mut best = StrategyKind::Hybrid;
        let mut best_score = f64::NEG_INFINITY;

        for &kind in eligible {
            let state = arms.get(&kind).copied().unwrap_or_default();
            let sampled = sample_beta(state.alpha, state.beta, rng);
            let bonus = self.epsilon / (state.alpha + state.beta - 2.0 + 1.0);
            let score = sampled + bonus;
            if score > best_score {
                best_score = score;
                best = kind;
            }
        }

        best
    }

    /// Apply a reward to an arm and persist the new state
    ///
    /// The (update, persist) pair runs under the state lock so concurrent
    /// updates to the same arm serialize.
    pub fn update(&self, arm: StrategyKind, reward: f64, source: &str) -> Result<()> {
        let reward = reward.clamp(0.0, 1.0);
        let mut arms = self.arms.lock().expect("bandit lock");

        let state = arms.entry(arm).or_insert_with(ArmState::uniform);
        state.alpha += reward;
        state.beta += 1.0 - reward;
        state.trials += 1;
        let mean = state.mean();

        self.store.save(&arms)?;

        metrics::record_bandit_update(arm.as_str(), source, mean);
        tracing::info!(
            arm = arm.as_str(),
            reward,
            source,
            posterior_mean = mean,
            "Bandit updated"
        );
        Ok(())
    }

    /// Current posterior mean of an arm
    pub fn posterior_mean(&self, arm: StrategyKind) -> f64 {
        self.arms
            .lock()
            .expect("bandit lock")
            .get(&arm)
            .copied()
            .unwrap_or_default()
            .mean()
    }

    /// Snapshot of all arms
    pub fn snapshot(&self) -> HashMap<StrategyKind, ArmState> {
        self.arms.lock().expect("bandit lock").clone()
    }
}
