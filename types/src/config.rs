//! Game configuration.
//!
//! Every option the engine recognizes lives here: phase durations, stake
//! limits, the wheel's category and streak tables, and the crash curve.
//! Configurations are plain data and can be loaded from JSON; call
//! [`GameConfig::validate`] before handing one to an engine.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::{
    CategoryId, GameKind, Multiplier, Phase, Tier, CRASH_BETTING_MS, CRASH_GROWTH_PER_MS,
    CRASH_HOUSE_EDGE_BPS, CRASH_MAX_FLIGHT_MS, CRASH_SETTLED_MS, DEFAULT_CLOSE_OUT_MS,
    DEFAULT_HISTORY_CAP, DEFAULT_MAX_CATEGORIES, DEFAULT_MAX_STAKE, DEFAULT_MIN_STAKE,
    MAX_LABEL_LENGTH, MAX_POSITION_STAKES, WHEEL_BETTING_MS, WHEEL_SETTLED_MS, WHEEL_SPIN_MS,
};

/// Tolerance when checking that a weight row sums to at most one.
const WEIGHT_EPSILON: f64 = 1e-9;

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("close-out margin ({close_out_ms}ms) must be shorter than the betting window ({betting_ms}ms)")]
    CloseOutTooLong { close_out_ms: u64, betting_ms: u64 },
    #[error("max_categories must be between 1 and {max} (got={got})")]
    CategoryCapOutOfRange { got: usize, max: usize },
    #[error("min_stake ({min}) must be positive and not exceed max_stake ({max})")]
    StakeBounds { min: u64, max: u64 },
    #[error("wheel has no categories")]
    NoCategories,
    #[error("wheel has too many categories (got={got}, max={max})")]
    TooManyCategories { got: usize, max: usize },
    #[error("category label invalid: {0:?}")]
    InvalidLabel(String),
    #[error("category {label:?} pays below 1.00x")]
    MultiplierBelowOne { label: String },
    #[error("default category {0} does not exist")]
    DefaultCategoryMissing(u8),
    #[error("wheel has no streak tables")]
    NoStreakTables,
    #[error("streak level {level} has {got} weights, expected {expected}")]
    RowLength {
        level: usize,
        expected: usize,
        got: usize,
    },
    #[error("streak level {level} weight {index} is negative or not finite")]
    InvalidWeight { level: usize, index: usize },
    #[error("streak level {level} weights sum to {sum}, above 1")]
    RowOverweight { level: usize, sum: f64 },
    #[error("forced rule interval must be greater than zero")]
    ForcedRuleInterval,
    #[error("crash modulus {0} must be greater than zero")]
    CrashModulus(&'static str),
    #[error("crash jackpot range is invalid ({min} > {max} or below 1.00x)")]
    JackpotRange { min: Multiplier, max: Multiplier },
    #[error("crash house edge {0}bps must be below 10000")]
    HouseEdge(u16),
    #[error("crash growth rate must be positive and finite")]
    GrowthRate,
    #[error("config is for {got:?}, expected {expected:?}")]
    WrongGame { expected: GameKind, got: GameKind },
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fixed phase durations of a round, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseConfig {
    /// Length of the betting window.
    pub betting_ms: u64,
    /// Length of the spin (wheel) or the maximum flight (crash).
    pub resolving_ms: u64,
    /// Result display / cooldown before the next round. May be zero.
    pub settled_ms: u64,
}

impl PhaseConfig {
    pub fn new(betting_ms: u64, resolving_ms: u64, settled_ms: u64) -> Self {
        Self {
            betting_ms,
            resolving_ms,
            settled_ms,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.betting_ms == 0 {
            return Err(ConfigError::ZeroDuration("betting_ms"));
        }
        if self.resolving_ms == 0 {
            return Err(ConfigError::ZeroDuration("resolving_ms"));
        }
        Ok(())
    }

    pub fn duration_for_phase(&self, phase: Phase) -> u64 {
        match phase {
            Phase::Betting => self.betting_ms,
            Phase::Resolving => self.resolving_ms,
            Phase::Settled => self.settled_ms,
        }
    }

    /// Length of one full round.
    pub fn total_cycle_ms(&self) -> u64 {
        self.betting_ms
            .saturating_add(self.resolving_ms)
            .saturating_add(self.settled_ms)
    }
}

/// Limits applied when a participant stakes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeLimits {
    pub max_categories: usize,
    pub close_out_ms: u64,
    pub min_stake: u64,
    pub max_stake: u64,
}

impl Default for StakeLimits {
    fn default() -> Self {
        Self {
            max_categories: DEFAULT_MAX_CATEGORIES,
            close_out_ms: DEFAULT_CLOSE_OUT_MS,
            min_stake: DEFAULT_MIN_STAKE,
            max_stake: DEFAULT_MAX_STAKE,
        }
    }
}

impl StakeLimits {
    pub fn validate(&self, phases: &PhaseConfig) -> Result<(), ConfigError> {
        if self.max_categories == 0 || self.max_categories > MAX_POSITION_STAKES {
            return Err(ConfigError::CategoryCapOutOfRange {
                got: self.max_categories,
                max: MAX_POSITION_STAKES,
            });
        }
        if self.close_out_ms >= phases.betting_ms {
            return Err(ConfigError::CloseOutTooLong {
                close_out_ms: self.close_out_ms,
                betting_ms: phases.betting_ms,
            });
        }
        if self.min_stake == 0 || self.min_stake > self.max_stake {
            return Err(ConfigError::StakeBounds {
                min: self.min_stake,
                max: self.max_stake,
            });
        }
        Ok(())
    }
}

/// One segment of the wheel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySpec {
    pub label: String,
    pub multiplier: Multiplier,
    pub tier: Tier,
    /// Angle of the segment on the wheel, in degrees.
    pub position: u16,
}

impl CategorySpec {
    pub fn new(label: &str, multiplier: u32, tier: Tier, position: u16) -> Self {
        Self {
            label: label.to_string(),
            multiplier: Multiplier::from_whole(multiplier),
            tier,
            position,
        }
    }
}

/// Forces every `every`-th round to land in `tier`, ahead of weighted sampling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForcedRule {
    pub every: u64,
    pub tier: Tier,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WheelConfig {
    /// Categories in sampling order.
    pub categories: Vec<CategorySpec>,
    /// Row `n` holds the probability of each category when `n` rounds have
    /// passed since the last big win. Levels beyond the last row use the last
    /// row.
    pub streak_tables: Vec<Vec<f64>>,
    /// Checked in order; the first matching rule wins.
    pub forced_rules: Vec<ForcedRule>,
    /// Receives the leftover probability mass and any degenerate draw.
    pub default_category: CategoryId,
    pub seed_salt: String,
    /// Rounds at or before this index have a streak of zero.
    pub genesis_round: u64,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            categories: vec![
                CategorySpec::new("apple", 5, Tier::Low, 0),
                CategorySpec::new("lemon", 5, Tier::Low, 45),
                CategorySpec::new("orange", 5, Tier::Low, 90),
                CategorySpec::new("grape", 5, Tier::Low, 135),
                CategorySpec::new("cherry", 10, Tier::Mid, 180),
                CategorySpec::new("melon", 15, Tier::Mid, 225),
                CategorySpec::new("strawberry", 25, Tier::High, 270),
                CategorySpec::new("seven", 45, Tier::High, 315),
            ],
            streak_tables: vec![
                vec![0.19, 0.19, 0.19, 0.19, 0.10, 0.06, 0.03, 0.01],
                vec![0.185, 0.185, 0.185, 0.185, 0.10, 0.06, 0.04, 0.015],
                vec![0.18, 0.18, 0.18, 0.18, 0.10, 0.06, 0.05, 0.02],
                vec![0.17, 0.17, 0.17, 0.17, 0.10, 0.06, 0.07, 0.03],
                vec![0.16, 0.16, 0.16, 0.16, 0.10, 0.06, 0.09, 0.04],
            ],
            forced_rules: vec![
                ForcedRule {
                    every: 7,
                    tier: Tier::Mid,
                },
                ForcedRule {
                    every: 3,
                    tier: Tier::Low,
                },
            ],
            default_category: CategoryId(0),
            seed_salt: "fruity-fortune".to_string(),
            genesis_round: 0,
        }
    }
}

impl WheelConfig {
    pub fn category(&self, id: CategoryId) -> Option<&CategorySpec> {
        self.categories.get(id.0 as usize)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.categories.is_empty() {
            return Err(ConfigError::NoCategories);
        }
        if self.categories.len() > u8::MAX as usize {
            return Err(ConfigError::TooManyCategories {
                got: self.categories.len(),
                max: u8::MAX as usize,
            });
        }
        for spec in &self.categories {
            if spec.label.is_empty() || spec.label.len() > MAX_LABEL_LENGTH {
                return Err(ConfigError::InvalidLabel(spec.label.clone()));
            }
            if spec.multiplier < Multiplier::ONE {
                return Err(ConfigError::MultiplierBelowOne {
                    label: spec.label.clone(),
                });
            }
        }
        if self.category(self.default_category).is_none() {
            return Err(ConfigError::DefaultCategoryMissing(self.default_category.0));
        }
        if self.streak_tables.is_empty() {
            return Err(ConfigError::NoStreakTables);
        }
        for (level, row) in self.streak_tables.iter().enumerate() {
            if row.len() != self.categories.len() {
                return Err(ConfigError::RowLength {
                    level,
                    expected: self.categories.len(),
                    got: row.len(),
                });
            }
            if let Some(index) = row.iter().position(|w| !w.is_finite() || *w < 0.0) {
                return Err(ConfigError::InvalidWeight { level, index });
            }
            let sum: f64 = row.iter().sum();
            if sum > 1.0 + WEIGHT_EPSILON {
                return Err(ConfigError::RowOverweight { level, sum });
            }
        }
        if self.forced_rules.iter().any(|rule| rule.every == 0) {
            return Err(ConfigError::ForcedRuleInterval);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashConfig {
    /// Every round divisible by this crashes instantly at 1.00x.
    pub zero_modulus: u64,
    /// Every round divisible by this (and not by `zero_modulus`) flies high.
    pub jackpot_modulus: u64,
    pub jackpot_min: Multiplier,
    pub jackpot_max: Multiplier,
    pub house_edge_bps: u16,
    /// Hard cap on the sampled crash point.
    pub max_point: Multiplier,
    /// Exponential growth rate of the multiplier per millisecond of flight.
    pub growth_per_ms: f64,
    /// Crash points at or above this count as big wins.
    pub big_win_threshold: Multiplier,
    pub seed_salt: String,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            zero_modulus: 33,
            jackpot_modulus: 101,
            jackpot_min: Multiplier::from_whole(10),
            jackpot_max: Multiplier::from_whole(30),
            house_edge_bps: CRASH_HOUSE_EDGE_BPS,
            max_point: Multiplier::from_whole(100),
            growth_per_ms: CRASH_GROWTH_PER_MS,
            big_win_threshold: Multiplier::from_whole(10),
            seed_salt: "crash".to_string(),
        }
    }
}

impl CrashConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zero_modulus == 0 {
            return Err(ConfigError::CrashModulus("zero_modulus"));
        }
        if self.jackpot_modulus == 0 {
            return Err(ConfigError::CrashModulus("jackpot_modulus"));
        }
        if self.jackpot_min < Multiplier::ONE
            || self.jackpot_min > self.jackpot_max
            || self.max_point < Multiplier::ONE
        {
            return Err(ConfigError::JackpotRange {
                min: self.jackpot_min,
                max: self.jackpot_max,
            });
        }
        if self.house_edge_bps >= 10_000 {
            return Err(ConfigError::HouseEdge(self.house_edge_bps));
        }
        if !self.growth_per_ms.is_finite() || self.growth_per_ms <= 0.0 {
            return Err(ConfigError::GrowthRate);
        }
        Ok(())
    }
}

/// Variant-specific half of a [`GameConfig`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum VariantConfig {
    Wheel(WheelConfig),
    Crash(CrashConfig),
}

impl VariantConfig {
    pub fn kind(&self) -> GameKind {
        match self {
            VariantConfig::Wheel(_) => GameKind::Wheel,
            VariantConfig::Crash(_) => GameKind::Crash,
        }
    }
}

/// Full configuration of one game.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    pub phases: PhaseConfig,
    pub limits: StakeLimits,
    pub history_cap: usize,
    pub variant: VariantConfig,
}

impl GameConfig {
    /// The shipped "Fruity Fortune" wheel.
    pub fn wheel() -> Self {
        Self {
            phases: PhaseConfig::new(WHEEL_BETTING_MS, WHEEL_SPIN_MS, WHEEL_SETTLED_MS),
            limits: StakeLimits::default(),
            history_cap: DEFAULT_HISTORY_CAP,
            variant: VariantConfig::Wheel(WheelConfig::default()),
        }
    }

    /// The shipped crash game. One stake per round.
    pub fn crash() -> Self {
        Self {
            phases: PhaseConfig::new(CRASH_BETTING_MS, CRASH_MAX_FLIGHT_MS, CRASH_SETTLED_MS),
            limits: StakeLimits {
                max_categories: 1,
                ..StakeLimits::default()
            },
            history_cap: DEFAULT_HISTORY_CAP,
            variant: VariantConfig::Crash(CrashConfig::default()),
        }
    }

    pub fn kind(&self) -> GameKind {
        self.variant.kind()
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.phases.validate()?;
        self.limits.validate(&self.phases)?;
        match &self.variant {
            VariantConfig::Wheel(wheel) => wheel.validate(),
            VariantConfig::Crash(crash) => crash.validate(),
        }
    }

    /// Validate and check that the config describes `expected`.
    pub fn validate_for(&self, expected: GameKind) -> Result<(), ConfigError> {
        if self.kind() != expected {
            return Err(ConfigError::WrongGame {
                expected,
                got: self.kind(),
            });
        }
        self.validate()
    }
}
