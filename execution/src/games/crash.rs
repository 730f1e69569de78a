//! Crash rocket.
//!
//! The multiplier climbs along `100 * e^(growth * t)` hundredths from the
//! start of resolution until it reaches the round's crash point or the flight
//! hits its maximum duration. Crash points are drawn per round:
//! - rounds divisible by `zero_modulus` crash instantly at 1.00x
//! - rounds divisible by `jackpot_modulus` fly to a uniform point inside the jackpot range
//! - everything else follows a house-edged `1 / (1 - u)` curve, so low points dominate
//!
//! A point the flight can never reach is capped to the multiplier shown at
//! maximum flight, which keeps the crash point and the visible curve in agreement.

use fortune_types::{
    CategoryId, ConfigError, CrashConfig, GameConfig, GameKind, Multiplier, OpenPosition,
    Outcome, VariantConfig,
};

use super::OutcomeGenerator;
use crate::seed::{RoundCommitment, RoundRng};

/// Basis points in one whole.
const BPS: u128 = 10_000;
/// Top of the normalized draw; keeps the denominator away from zero.
const NORMALIZED_CEILING: u128 = 9_900;

#[derive(Clone, Debug)]
pub struct CrashGenerator {
    config: CrashConfig,
    max_flight_ms: u64,
    /// Multiplier shown when the flight runs out.
    flight_cap: Multiplier,
}

impl CrashGenerator {
    pub fn new(config: CrashConfig, max_flight_ms: u64) -> Self {
        let flight_cap = curve(config.growth_per_ms, max_flight_ms);
        Self {
            config,
            max_flight_ms,
            flight_cap,
        }
    }

    /// Build from a crash game config; the resolving phase is the maximum flight.
    pub fn from_game_config(config: &GameConfig) -> Result<Self, ConfigError> {
        config.validate_for(GameKind::Crash)?;
        match &config.variant {
            VariantConfig::Crash(crash) => Ok(Self::new(crash.clone(), config.phases.resolving_ms)),
            VariantConfig::Wheel(_) => Err(ConfigError::WrongGame {
                expected: GameKind::Crash,
                got: GameKind::Wheel,
            }),
        }
    }

    pub fn config(&self) -> &CrashConfig {
        &self.config
    }

    pub fn max_flight_ms(&self) -> u64 {
        self.max_flight_ms
    }

    /// Highest multiplier the rocket can show.
    pub fn flight_cap(&self) -> Multiplier {
        self.flight_cap
    }

    /// Multiplier on the curve `elapsed_ms` into the flight, ignoring the crash.
    pub fn multiplier_at(&self, elapsed_ms: u64) -> Multiplier {
        curve(self.config.growth_per_ms, elapsed_ms.min(self.max_flight_ms))
    }

    fn crash_point(&self, round_index: u64) -> Multiplier {
        let config = &self.config;
        let point = if round_index.checked_rem(config.zero_modulus) == Some(0) {
            Multiplier::ONE
        } else if round_index.checked_rem(config.jackpot_modulus) == Some(0) {
            let mut rng = RoundRng::new(&config.seed_salt, GameKind::Crash, round_index);
            let value = rng.next_in_range(
                u64::from(config.jackpot_min.0),
                u64::from(config.jackpot_max.0),
            );
            Multiplier(u32::try_from(value).unwrap_or(u32::MAX))
        } else {
            let mut rng = RoundRng::new(&config.seed_salt, GameKind::Crash, round_index);
            Multiplier(skewed_point(rng.next_u32(), config.house_edge_bps))
        };
        point
            .min(config.max_point)
            .min(self.flight_cap)
            .max(Multiplier::ONE)
    }
}

/// Fixed-point crash curve: `(1 - edge) / (1 - u)` in hundredths, at least 1.00x.
fn skewed_point(raw: u32, house_edge_bps: u16) -> u32 {
    let normalized = u128::from(raw) * NORMALIZED_CEILING / u128::from(u32::MAX);
    let denominator = BPS - normalized;
    let edge_factor = BPS.saturating_sub(u128::from(house_edge_bps));
    let result = edge_factor * u128::from(Multiplier::SCALE) / denominator;
    result.clamp(u128::from(Multiplier::ONE.0), u128::from(u32::MAX)) as u32
}

fn curve(growth_per_ms: f64, elapsed_ms: u64) -> Multiplier {
    let value = f64::from(Multiplier::SCALE) * (growth_per_ms * elapsed_ms as f64).exp();
    if !value.is_finite() {
        return Multiplier(u32::MAX);
    }
    // Float-to-int casts saturate.
    Multiplier((value.floor() as u32).max(Multiplier::ONE.0))
}

impl OutcomeGenerator for CrashGenerator {
    fn kind(&self) -> GameKind {
        GameKind::Crash
    }

    fn outcome(&mut self, round_index: u64) -> Outcome {
        let point = self.crash_point(round_index);
        Outcome::Crash {
            point,
            high_tier: point >= self.config.big_win_threshold,
        }
    }

    fn commitment(&self, round_index: u64) -> RoundCommitment {
        RoundCommitment::new(&self.config.seed_salt, GameKind::Crash, round_index)
    }

    /// The rocket has a single stake slot.
    fn accepts_category(&self, category: CategoryId) -> bool {
        category == CategoryId(0)
    }

    fn payout(&self, position: &OpenPosition, outcome: &Outcome) -> u64 {
        let Some(point) = outcome.crash_point() else {
            return 0;
        };
        let stake = position.total_staked();
        if let Some(cash_out) = position.cash_out {
            return if cash_out < point {
                cash_out.apply(stake)
            } else {
                0
            };
        }
        match position.auto_cash_out {
            Some(target) if target < point => target.apply(stake),
            _ => 0,
        }
    }

    fn live_multiplier(&self, outcome: &Outcome, elapsed_ms: u64) -> Option<Multiplier> {
        let point = outcome.crash_point()?;
        if elapsed_ms >= self.max_flight_ms {
            return None;
        }
        let current = curve(self.config.growth_per_ms, elapsed_ms);
        (current < point).then_some(current)
    }

    /// The crash point stays hidden while the rocket is still climbing.
    fn outcome_visible(&self, outcome: &Outcome, elapsed_ms: u64) -> bool {
        self.live_multiplier(outcome, elapsed_ms).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fortune_types::{StakeEntry, CRASH_MAX_FLIGHT_MS};

    fn generator() -> CrashGenerator {
        CrashGenerator::new(CrashConfig::default(), CRASH_MAX_FLIGHT_MS)
    }

    fn position(cash_out: Option<Multiplier>, auto_cash_out: Option<Multiplier>) -> OpenPosition {
        OpenPosition {
            game: GameKind::Crash,
            round_index: 1,
            stakes: vec![StakeEntry {
                category: CategoryId(0),
                amount: 100,
            }],
            cash_out,
            auto_cash_out,
        }
    }

    fn crash_at(point: u32) -> Outcome {
        Outcome::Crash {
            point: Multiplier(point),
            high_tier: false,
        }
    }

    #[test]
    fn test_skewed_point_bounds() {
        // Lowest draw is floored to 1.00x, highest reaches the ceiling.
        assert_eq!(skewed_point(0, 100), 100);
        assert_eq!(skewed_point(u32::MAX, 100), 9_900);
        assert_eq!(skewed_point(u32::MAX, 0), 10_000);
        assert_eq!(skewed_point(u32::MAX / 2, 100), 196);
    }

    #[test]
    fn test_zero_modulus_crashes_instantly() {
        let mut crash = generator();
        for round in (0..5_000u64).step_by(33) {
            let outcome = crash.outcome(round);
            assert_eq!(outcome.crash_point(), Some(Multiplier::ONE), "round {round}");
            assert!(!outcome.is_high_tier());
        }
    }

    #[test]
    fn test_jackpot_modulus_flies_high() {
        let mut crash = generator();
        for round in (101..20_000u64).step_by(101).filter(|r| r % 33 != 0) {
            let outcome = crash.outcome(round);
            let point = outcome.crash_point().unwrap();
            assert!(point >= Multiplier::from_whole(10), "round {round}: {point}");
            assert!(point <= Multiplier::from_whole(30), "round {round}: {point}");
            assert!(outcome.is_high_tier());
        }
    }

    #[test]
    fn test_points_stay_on_the_curve() {
        let mut crash = generator();
        let cap = crash.flight_cap();
        assert!(cap > Multiplier::from_whole(30));
        for round in 0..20_000u64 {
            let point = crash.outcome(round).crash_point().unwrap();
            assert!(point >= Multiplier::ONE);
            assert!(point <= cap);
        }
    }

    #[test]
    fn test_distribution_biased_low() {
        let mut crash = generator();
        let rounds: Vec<u64> = (1..20_000u64)
            .filter(|r| r % 33 != 0 && r % 101 != 0)
            .collect();
        let below_two = rounds
            .iter()
            .filter(|r| crash.outcome(**r).crash_point().unwrap() < Multiplier::from_whole(2))
            .count();
        let share = below_two as f64 / rounds.len() as f64;
        assert!((0.45..0.56).contains(&share), "share below 2x: {share}");
    }

    #[test]
    fn test_outcomes_are_deterministic() {
        let mut a = generator();
        let mut b = generator();
        for round in (0..1_000u64).rev() {
            assert_eq!(a.outcome(round), b.outcome(round));
        }
    }

    #[test]
    fn test_live_multiplier_climbs_until_crash() {
        let crash = generator();
        let outcome = crash_at(250);
        assert_eq!(crash.live_multiplier(&outcome, 0), Some(Multiplier::ONE));
        let mut previous = Multiplier::ONE;
        let mut crashed_at = None;
        for elapsed in (0..CRASH_MAX_FLIGHT_MS).step_by(50) {
            match crash.live_multiplier(&outcome, elapsed) {
                Some(current) => {
                    assert!(crashed_at.is_none(), "rocket resumed after crashing");
                    assert!(current >= previous);
                    assert!(current < Multiplier(250));
                    assert!(!crash.outcome_visible(&outcome, elapsed));
                    previous = current;
                }
                None => {
                    crashed_at.get_or_insert(elapsed);
                    assert!(crash.outcome_visible(&outcome, elapsed));
                }
            }
        }
        assert!(crashed_at.is_some());
        assert_eq!(crash.live_multiplier(&outcome, CRASH_MAX_FLIGHT_MS), None);
    }

    #[test]
    fn test_instant_crash_never_flies() {
        let crash = generator();
        assert_eq!(crash.live_multiplier(&crash_at(100), 0), None);
        assert!(crash.outcome_visible(&crash_at(100), 0));
    }

    #[test]
    fn test_cash_out_example() {
        let crash = generator();
        let outcome = crash_at(250);
        let at_one_eighty = (0..CRASH_MAX_FLIGHT_MS)
            .find_map(|elapsed| {
                crash
                    .live_multiplier(&outcome, elapsed)
                    .filter(|m| *m == Multiplier(180))
            })
            .expect("curve passes 1.80x");
        assert_eq!(crash.payout(&position(Some(at_one_eighty), None), &outcome), 180);
        assert_eq!(crash.payout(&position(None, None), &outcome), 0);
    }

    #[test]
    fn test_auto_cash_out() {
        let crash = generator();
        let outcome = crash_at(250);
        assert_eq!(
            crash.payout(&position(None, Some(Multiplier(200))), &outcome),
            200
        );
        assert_eq!(
            crash.payout(&position(None, Some(Multiplier(300))), &outcome),
            0
        );
        // An explicit cash-out wins over the auto target.
        assert_eq!(
            crash.payout(
                &position(Some(Multiplier(150)), Some(Multiplier(200))),
                &outcome
            ),
            150
        );
        assert_eq!(
            crash.payout(&position(Some(Multiplier(250)), None), &outcome),
            0
        );
    }

    #[test]
    fn test_single_stake_slot() {
        let crash = generator();
        assert!(crash.accepts_category(CategoryId(0)));
        assert!(!crash.accepts_category(CategoryId(1)));
    }

    #[test]
    fn test_from_game_config_uses_resolving_window() {
        let crash = CrashGenerator::from_game_config(&GameConfig::crash()).unwrap();
        assert_eq!(crash.max_flight_ms(), CRASH_MAX_FLIGHT_MS);
        assert!(matches!(
            CrashGenerator::from_game_config(&GameConfig::wheel()),
            Err(ConfigError::WrongGame { .. })
        ));
    }
}
