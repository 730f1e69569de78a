//! Outcome generators for the round-based games.
//!
//! A generator turns a round index into that round's outcome and knows how the
//! game pays. The lifecycle engine is generic over [`OutcomeGenerator`], so the
//! wheel and the crash game share one state machine.
//!
//! ## Determinism requirements
//! - `outcome` must depend only on the round index and the configuration.
//! - Caches may speed up evaluation but must never change a result.
//! - Malformed configuration degrades to a default outcome; it never panics.

mod crash;
mod wheel;

pub use crash::CrashGenerator;
pub use wheel::WheelGenerator;

use fortune_types::{CategoryId, GameKind, Multiplier, OpenPosition, Outcome};

use crate::seed::RoundCommitment;

pub trait OutcomeGenerator {
    fn kind(&self) -> GameKind;

    /// Outcome of `round_index`.
    fn outcome(&mut self, round_index: u64) -> Outcome;

    /// Commitment to the randomness behind `round_index`.
    fn commitment(&self, round_index: u64) -> RoundCommitment;

    /// Whether participants may stake on `category`.
    fn accepts_category(&self, category: CategoryId) -> bool;

    /// Gross amount returned to `position` once its round realized `outcome`.
    fn payout(&self, position: &OpenPosition, outcome: &Outcome) -> u64;

    /// Multiplier on display `elapsed_ms` into resolution.
    ///
    /// `None` when the game has no live multiplier or the rocket has crashed.
    fn live_multiplier(&self, _outcome: &Outcome, _elapsed_ms: u64) -> Option<Multiplier> {
        None
    }

    /// Whether observers may see `outcome` `elapsed_ms` into resolution.
    fn outcome_visible(&self, _outcome: &Outcome, _elapsed_ms: u64) -> bool {
        true
    }
}
