//! "Fruity Fortune" wheel.
//!
//! Each round lands on one category. Selection order:
//! 1. Forced rules: the first rule whose interval divides the round index
//!    picks a category from its tier.
//! 2. Weighted table: the row for the current streak level (rounds since the
//!    last high-tier result, clamped to the last row) is walked in category
//!    order, subtracting each weight from a uniform draw; the first category
//!    that takes the draw below zero wins.
//! 3. Anything left over lands on the default category.
//!
//! The streak recurrence makes round `n` depend on every round before it, so
//! results are cached and streak checkpoints are kept every
//! `STREAK_CHECKPOINT_INTERVAL` rounds. Evaluation walks forward from the
//! nearest known point instead of recursing backward.

use std::collections::BTreeMap;

use fortune_types::{
    CategoryId, ConfigError, GameConfig, GameKind, OpenPosition, Outcome, Tier, VariantConfig,
    WheelConfig, Multiplier, OUTCOME_CACHE_LEN, STREAK_CHECKPOINT_INTERVAL,
};
use tracing::warn;

use super::OutcomeGenerator;
use crate::seed::{RoundCommitment, RoundRng};

#[derive(Clone, Debug)]
pub struct WheelGenerator {
    config: WheelConfig,
    /// Recently evaluated rounds with the streak level they were drawn at.
    recent: BTreeMap<u64, (Outcome, u64)>,
    /// Streak level at every checkpoint round evaluated so far.
    checkpoints: BTreeMap<u64, u64>,
}

impl WheelGenerator {
    pub fn new(config: WheelConfig) -> Self {
        for rule in &config.forced_rules {
            if !config.categories.iter().any(|spec| spec.tier == rule.tier) {
                warn!(
                    tier = ?rule.tier,
                    every = rule.every,
                    "forced rule targets a tier with no categories; rounds fall back to the default category"
                );
            }
        }
        Self {
            config,
            recent: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
        }
    }

    pub fn from_game_config(config: &GameConfig) -> Result<Self, ConfigError> {
        config.validate_for(GameKind::Wheel)?;
        match &config.variant {
            VariantConfig::Wheel(wheel) => Ok(Self::new(wheel.clone())),
            VariantConfig::Crash(_) => Err(ConfigError::WrongGame {
                expected: GameKind::Wheel,
                got: GameKind::Crash,
            }),
        }
    }

    pub fn config(&self) -> &WheelConfig {
        &self.config
    }

    /// Rounds since the last high-tier outcome, as seen by `round_index`.
    pub fn rounds_since_big_win(&mut self, round_index: u64) -> u64 {
        self.evaluate(round_index).1
    }

    fn evaluate(&mut self, round_index: u64) -> (Outcome, u64) {
        if let Some(hit) = self.recent.get(&round_index) {
            return *hit;
        }

        let genesis = self.config.genesis_round;
        if round_index <= genesis {
            let outcome = self.sample(round_index, 0);
            self.remember(round_index, outcome, 0);
            return (outcome, 0);
        }

        // Start from the latest round at or before the target whose streak is known.
        let mut start = (genesis, 0u64);
        if let Some((&round, &streak)) = self.checkpoints.range(..=round_index).next_back() {
            if round > start.0 {
                start = (round, streak);
            }
        }
        if let Some((&round, &(_, streak))) = self.recent.range(..=round_index).next_back() {
            if round > start.0 {
                start = (round, streak);
            }
        }

        let (mut round, mut streak) = start;
        loop {
            let outcome = match self.recent.get(&round) {
                Some((outcome, _)) => *outcome,
                None => self.sample(round, streak),
            };
            if round % STREAK_CHECKPOINT_INTERVAL == 0 {
                self.checkpoints.insert(round, streak);
            }
            if round_index - round < OUTCOME_CACHE_LEN as u64 {
                self.remember(round, outcome, streak);
            }
            if round == round_index {
                return (outcome, streak);
            }
            streak = if outcome.is_high_tier() {
                0
            } else {
                streak.saturating_add(1)
            };
            round += 1;
        }
    }

    fn remember(&mut self, round_index: u64, outcome: Outcome, streak: u64) {
        self.recent.insert(round_index, (outcome, streak));
        while self.recent.len() > OUTCOME_CACHE_LEN {
            self.recent.pop_first();
        }
    }

    /// Draw the outcome of `round_index` at the given streak level.
    fn sample(&self, round_index: u64, streak: u64) -> Outcome {
        let mut rng = RoundRng::new(&self.config.seed_salt, GameKind::Wheel, round_index);
        let draw = rng.next_unit();

        for rule in &self.config.forced_rules {
            if round_index.checked_rem(rule.every) == Some(0) {
                return self.pick_in_tier(rule.tier, draw);
            }
        }

        let tables = &self.config.streak_tables;
        let Some(last_level) = tables.len().checked_sub(1) else {
            return self.default_outcome();
        };
        let level = usize::try_from(streak).unwrap_or(usize::MAX).min(last_level);

        let mut remaining = draw;
        for (index, weight) in tables[level]
            .iter()
            .take(self.config.categories.len())
            .enumerate()
        {
            if !weight.is_finite() || *weight <= 0.0 {
                continue;
            }
            remaining -= weight;
            if remaining < 0.0 {
                return self.category_outcome(index);
            }
        }
        self.default_outcome()
    }

    fn pick_in_tier(&self, tier: Tier, draw: f64) -> Outcome {
        let members: Vec<usize> = self
            .config
            .categories
            .iter()
            .enumerate()
            .filter(|(_, spec)| spec.tier == tier)
            .map(|(index, _)| index)
            .collect();
        if members.is_empty() {
            return self.default_outcome();
        }
        let slot = ((draw * members.len() as f64) as usize).min(members.len() - 1);
        self.category_outcome(members[slot])
    }

    fn category_outcome(&self, index: usize) -> Outcome {
        match self.config.categories.get(index) {
            Some(spec) => Outcome::Category {
                id: CategoryId(index as u8),
                tier: spec.tier,
                multiplier: spec.multiplier,
            },
            None => self.default_outcome(),
        }
    }

    fn default_outcome(&self) -> Outcome {
        let id = self.config.default_category;
        let spec = self
            .config
            .category(id)
            .map(|spec| (id, spec))
            .or_else(|| self.config.categories.first().map(|spec| (CategoryId(0), spec)));
        match spec {
            Some((id, spec)) => Outcome::Category {
                id,
                tier: spec.tier,
                multiplier: spec.multiplier,
            },
            None => Outcome::Category {
                id: CategoryId(0),
                tier: Tier::Low,
                multiplier: Multiplier::ONE,
            },
        }
    }
}

impl OutcomeGenerator for WheelGenerator {
    fn kind(&self) -> GameKind {
        GameKind::Wheel
    }

    fn outcome(&mut self, round_index: u64) -> Outcome {
        self.evaluate(round_index).0
    }

    fn commitment(&self, round_index: u64) -> RoundCommitment {
        RoundCommitment::new(&self.config.seed_salt, GameKind::Wheel, round_index)
    }

    fn accepts_category(&self, category: CategoryId) -> bool {
        (category.0 as usize) < self.config.categories.len()
    }

    fn payout(&self, position: &OpenPosition, outcome: &Outcome) -> u64 {
        match outcome {
            Outcome::Category { id, multiplier, .. } => {
                multiplier.apply(position.staked_on(*id))
            }
            Outcome::Crash { .. } => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fortune_types::{CategorySpec, ForcedRule, StakeEntry};

    fn generator() -> WheelGenerator {
        WheelGenerator::new(WheelConfig::default())
    }

    fn category_of(outcome: Outcome) -> CategoryId {
        outcome.category().expect("wheel outcome")
    }

    #[test]
    fn test_outcomes_are_deterministic_across_instances() {
        let mut forward = generator();
        let mut backward = generator();
        let forward_results: Vec<Outcome> = (0..3_000).map(|r| forward.outcome(r)).collect();
        let mut backward_results: Vec<Outcome> =
            (0..3_000).rev().map(|r| backward.outcome(r)).collect();
        backward_results.reverse();
        assert_eq!(forward_results, backward_results);
    }

    #[test]
    fn test_cold_evaluation_matches_sequential() {
        let mut sequential = generator();
        for round in 0..10_000 {
            sequential.outcome(round);
        }
        let mut cold = generator();
        assert_eq!(cold.outcome(9_999), sequential.outcome(9_999));
        assert_eq!(
            cold.rounds_since_big_win(9_999),
            sequential.rounds_since_big_win(9_999)
        );
        // Far behind the cache window: recomputed from a checkpoint.
        assert_eq!(cold.outcome(1_500), sequential.outcome(1_500));
    }

    #[test]
    fn test_streak_recurrence() {
        let mut wheel = generator();
        assert_eq!(wheel.rounds_since_big_win(0), 0);
        for round in 1..3_000u64 {
            let previous_high = wheel.outcome(round - 1).is_high_tier();
            let expected = if previous_high {
                0
            } else {
                1 + wheel.rounds_since_big_win(round - 1)
            };
            assert_eq!(wheel.rounds_since_big_win(round), expected, "round {round}");
        }
    }

    #[test]
    fn test_forced_rules_take_precedence() {
        let mut wheel = generator();
        for round in 0..2_000u64 {
            let outcome = wheel.outcome(round);
            let Outcome::Category { tier, .. } = outcome else {
                panic!("wheel produced a crash outcome");
            };
            if round % 7 == 0 {
                assert_eq!(tier, Tier::Mid, "round {round}");
            } else if round % 3 == 0 {
                assert_eq!(tier, Tier::Low, "round {round}");
            }
        }
    }

    #[test]
    fn test_forced_rules_override_rigged_table() {
        let mut config = WheelConfig::default();
        let seven = config.categories.len() - 1;
        for row in config.streak_tables.iter_mut() {
            row.iter_mut().for_each(|w| *w = 0.0);
            row[seven] = 1.0;
        }
        let mut wheel = WheelGenerator::new(config);
        for round in 1..500u64 {
            let id = category_of(wheel.outcome(round));
            if round % 7 == 0 || round % 3 == 0 {
                assert_ne!(id.0 as usize, seven, "round {round}");
            } else {
                assert_eq!(id.0 as usize, seven, "round {round}");
            }
        }
    }

    #[test]
    fn test_sampling_always_yields_valid_category() {
        let mut wheel = generator();
        let categories = wheel.config().categories.len();
        let mut seen = vec![0u64; categories];
        for round in 0..100_000u64 {
            let id = category_of(wheel.outcome(round));
            assert!((id.0 as usize) < categories);
            seen[id.0 as usize] += 1;
        }
        for (index, count) in seen.iter().enumerate() {
            assert!(*count > 0, "category {index} never drawn");
        }
    }

    #[test]
    fn test_empty_forced_tier_degrades_to_default() {
        let mut config = WheelConfig::default();
        config.forced_rules = vec![ForcedRule {
            every: 1,
            tier: Tier::High,
        }];
        config.categories.retain(|spec| spec.tier != Tier::High);
        for row in config.streak_tables.iter_mut() {
            row.truncate(config.categories.len());
        }
        config.default_category = CategoryId(2);
        let mut wheel = WheelGenerator::new(config);
        for round in 0..50 {
            assert_eq!(category_of(wheel.outcome(round)), CategoryId(2));
        }
    }

    #[test]
    fn test_underweight_and_empty_tables_fall_back() {
        let mut config = WheelConfig::default();
        config.forced_rules.clear();
        for row in config.streak_tables.iter_mut() {
            row.iter_mut().for_each(|w| *w = 0.0);
        }
        let mut wheel = WheelGenerator::new(config.clone());
        for round in 0..50 {
            assert_eq!(category_of(wheel.outcome(round)), CategoryId(0));
        }

        config.streak_tables.clear();
        let mut wheel = WheelGenerator::new(config);
        assert_eq!(category_of(wheel.outcome(17)), CategoryId(0));
    }

    #[test]
    fn test_no_categories_never_panics() {
        let config = WheelConfig {
            categories: Vec::<CategorySpec>::new(),
            ..WheelConfig::default()
        };
        let mut wheel = WheelGenerator::new(config);
        let outcome = wheel.outcome(5);
        assert_eq!(outcome.multiplier(), Multiplier::ONE);
        assert!(!wheel.accepts_category(CategoryId(0)));
    }

    #[test]
    fn test_genesis_resets_streak() {
        let config = WheelConfig {
            genesis_round: 50_000_000,
            ..WheelConfig::default()
        };
        let mut wheel = WheelGenerator::new(config);
        assert_eq!(wheel.rounds_since_big_win(49_999_999), 0);
        assert_eq!(wheel.rounds_since_big_win(50_000_000), 0);
        // Only a handful of rounds are walked past genesis.
        let streak = wheel.rounds_since_big_win(50_000_010);
        assert!(streak <= 10);
    }

    #[test]
    fn test_settlement_example() {
        let wheel = generator();
        let position = OpenPosition {
            game: GameKind::Wheel,
            round_index: 1,
            stakes: vec![StakeEntry {
                category: CategoryId(0),
                amount: 100,
            }],
            cash_out: None,
            auto_cash_out: None,
        };
        let hit = Outcome::Category {
            id: CategoryId(0),
            tier: Tier::Low,
            multiplier: Multiplier::from_whole(5),
        };
        let miss = Outcome::Category {
            id: CategoryId(1),
            tier: Tier::Low,
            multiplier: Multiplier::from_whole(5),
        };
        assert_eq!(wheel.payout(&position, &hit), 500);
        assert_eq!(wheel.payout(&position, &miss), 0);
    }

    #[test]
    fn test_commitment_reveals_round_seed() {
        let wheel = generator();
        let commitment = wheel.commitment(77);
        assert!(commitment.verify());
        assert_eq!(commitment.round_index, 77);
    }

    #[test]
    fn test_from_game_config_checks_kind() {
        assert!(WheelGenerator::from_game_config(&GameConfig::wheel()).is_ok());
        assert!(matches!(
            WheelGenerator::from_game_config(&GameConfig::crash()),
            Err(ConfigError::WrongGame { .. })
        ));
    }
}
