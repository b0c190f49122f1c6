use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::utils::clock::Clock;
use crate::utils::revision::Revision;

/// A score threshold that unlocks a one-time grant of uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardTier {
    pub label: String,
    pub score_threshold: u64,
    pub grant: u64,
    #[serde(default)]
    pub cooldown_ms: Option<u64>,
}

/// Streak length at which `multiplier` starts to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboBracket {
    pub streak: u32,
    pub multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct RewardRules {
    tiers: Vec<RewardTier>,
    combo: Vec<ComboBracket>,
    max_daily_unlocks: Option<u32>,
}

impl RewardRules {
    pub fn new(
        mut tiers: Vec<RewardTier>,
        mut combo: Vec<ComboBracket>,
        max_daily_unlocks: Option<u32>,
    ) -> Self {
        tiers.sort_by_key(|t| t.score_threshold);
        combo.sort_by(|a, b| b.streak.cmp(&a.streak));
        Self {
            tiers,
            combo,
            max_daily_unlocks,
        }
    }

    pub fn tiers(&self) -> &[RewardTier] {
        &self.tiers
    }

    /// Multiplier of the highest bracket the streak has reached, 1.0 below all of them.
    pub fn multiplier_for(&self, streak: u32) -> f64 {
        self.combo
            .iter()
            .find(|b| streak >= b.streak)
            .map(|b| b.multiplier)
            .unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreState {
    pub cumulative_score: u64,
    /// Highest single score submitted so far; drives the combo streak.
    pub best_score: u64,
    pub unlocked_tiers: BTreeSet<String>,
    pub combo_count: u32,
    #[serde(default)]
    pub last_reward_at_ms: Option<i64>,
    #[serde(default)]
    pub daily_unlocks: u32,
    #[serde(default)]
    pub daily_window: Option<NaiveDate>,
    /// Time of the last submitted score.
    #[serde(default)]
    pub last_activity_ms: Option<i64>,
}

impl ScoreState {
    fn roll_daily_window(&mut self, today: NaiveDate) -> bool {
        if self.daily_window == Some(today) {
            return false;
        }
        self.daily_window = Some(today);
        self.daily_unlocks = 0;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnlockedTier {
    pub label: String,
    pub score_threshold: u64,
    /// Uses to grant after the combo multiplier.
    pub grant: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardOutcome {
    pub newly_unlocked: Vec<UnlockedTier>,
    pub combo_multiplier: f64,
    pub cumulative_score: u64,
    pub daily_cap_reached: bool,
}

/// Fold one submitted score into `state` and report the tiers it unlocks.
///
/// Pure with respect to balances: granting the unlocked uses is the caller's job.
pub fn apply_score(
    state: &mut ScoreState,
    rules: &RewardRules,
    score: u64,
    now_ms: i64,
    today: NaiveDate,
) -> RewardOutcome {
    state.cumulative_score = state.cumulative_score.saturating_add(score);
    state.last_activity_ms = Some(now_ms);
    if score > state.best_score {
        state.combo_count = state.combo_count.saturating_add(1);
        state.best_score = score;
    } else {
        state.combo_count = 0;
    }
    let combo_multiplier = rules.multiplier_for(state.combo_count);
    state.roll_daily_window(today);

    let mut newly_unlocked = Vec::new();
    let mut daily_cap_reached = false;
    for tier in &rules.tiers {
        if state.unlocked_tiers.contains(&tier.label) {
            continue;
        }
        if state.cumulative_score < tier.score_threshold {
            // thresholds ascend, nothing further can qualify
            break;
        }
        if let (Some(cooldown), Some(last)) = (tier.cooldown_ms, state.last_reward_at_ms) {
            if now_ms.saturating_sub(last) < i64::try_from(cooldown).unwrap_or(i64::MAX) {
                // unlocks stay in threshold order
                break;
            }
        }
        if let Some(cap) = rules.max_daily_unlocks {
            if state.daily_unlocks >= cap {
                daily_cap_reached = true;
                break;
            }
        }
        state.unlocked_tiers.insert(tier.label.clone());
        state.last_reward_at_ms = Some(now_ms);
        state.daily_unlocks += 1;
        newly_unlocked.push(UnlockedTier {
            label: tier.label.clone(),
            score_threshold: tier.score_threshold,
            grant: (tier.grant as f64 * combo_multiplier).floor() as u64,
        });
    }

    RewardOutcome {
        newly_unlocked,
        combo_multiplier,
        cumulative_score: state.cumulative_score,
        daily_cap_reached,
    }
}

/// Owns every identity's [`ScoreState`].
pub struct RewardEngine {
    states: DashMap<String, ScoreState>,
    rules: RewardRules,
    clock: Arc<dyn Clock>,
    revision: Revision,
}

impl RewardEngine {
    pub fn new(rules: RewardRules, clock: Arc<dyn Clock>, revision: Revision) -> Self {
        Self {
            states: DashMap::new(),
            rules,
            clock,
            revision,
        }
    }

    pub fn rules(&self) -> &RewardRules {
        &self.rules
    }

    pub fn apply_score(&self, identity: &str, score: u64) -> RewardOutcome {
        let now = self.clock.now_ms();
        let today = self.clock.today();
        let mut state = self.states.entry(identity.to_string()).or_default();
        let outcome = apply_score(&mut state, &self.rules, score, now, today);
        self.revision.bump();
        for tier in &outcome.newly_unlocked {
            tracing::info!(identity, tier = %tier.label, grant = tier.grant, "reward tier unlocked");
        }
        outcome
    }

    pub fn score_state(&self, identity: &str) -> Option<ScoreState> {
        self.states.get(identity).map(|s| s.clone())
    }

    /// Time of the last score submission; older records fall back to their last reward.
    pub fn last_activity_ms(&self, identity: &str) -> Option<i64> {
        self.states
            .get(identity)
            .map(|s| s.last_activity_ms.or(s.last_reward_at_ms).unwrap_or(i64::MIN))
    }

    /// Zero the daily unlock counters of every identity whose window is not `today`.
    /// Each record is locked only for its own update.
    pub fn reset_daily_counters(&self, today: NaiveDate) -> usize {
        let mut reset = 0;
        for identity in self.identities() {
            if let Some(mut state) = self.states.get_mut(&identity) {
                if state.daily_window.is_some() && state.roll_daily_window(today) {
                    reset += 1;
                }
            }
        }
        if reset > 0 {
            self.revision.bump();
        }
        reset
    }

    pub fn identities(&self) -> Vec<String> {
        self.states.iter().map(|e| e.key().clone()).collect()
    }

    pub fn purge(&self, identity: &str) -> bool {
        let removed = self.states.remove(identity).is_some();
        if removed {
            self.revision.bump();
        }
        removed
    }

    pub fn snapshot(&self) -> BTreeMap<String, ScoreState> {
        self.states
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn restore(&self, states: BTreeMap<String, ScoreState>) {
        self.states.clear();
        for (identity, state) in states {
            self.states.insert(identity, state);
        }
    }
}
