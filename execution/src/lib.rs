//! Fortune round engine.
//!
//! This crate contains the deterministic round lifecycle shared by the
//! "Fruity Fortune" wheel and the crash game: the round clock, seeded outcome
//! generation with commit-reveal, per-round bet ledgers and the poll-driven
//! [`RoundEngine`] that settles stakes through a [`Persistence`] adapter.
//!
//! ## Determinism requirements
//! - Outcomes depend only on the round index and the game configuration.
//! - Time enters only through [`Clock`] or an explicit `now_ms`.
//! - Avoid iteration order of hash-based collections influencing outputs.
//!
//! ## Minimal round loop (example)
//! ```rust,ignore
//! use fortune_execution::{MemoryPersistence, RoundEngine, SystemClock, WheelGenerator};
//! use fortune_types::{CategoryId, GameConfig};
//!
//! let config = GameConfig::wheel();
//! let game = WheelGenerator::from_game_config(&config)?;
//! let store = MemoryPersistence::new();
//! store.open_account("alice", 1_000)?;
//! let mut engine = RoundEngine::new(&config, game, store, SystemClock)?;
//! engine.join("alice")?;
//! engine.place_stake("alice", CategoryId(0), 100)?;
//! loop {
//!     for event in engine.poll() {
//!         println!("{event:?}");
//!     }
//! #   break;
//! }
//! ```

pub mod engine;
pub mod games;
pub mod ledger;
pub mod persistence;
pub mod round_clock;
pub mod seed;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

mod error;

pub use engine::{
    CashOutReceipt, ParticipantView, RoundEngine, RoundEvent, RoundView, StakeReceipt,
};
pub use error::RejectedAction;
pub use games::{CrashGenerator, OutcomeGenerator, WheelGenerator};
pub use ledger::BetLedger;
pub use persistence::{
    merge_position, MemoryPersistence, Persistence, SettledStake, SettlementReceipt, StakeCommit,
};
pub use round_clock::{Clock, RoundClock, RoundSnapshot, SystemClock};
pub use seed::{
    compute_commit, verify_commit_reveal, verify_commit_reveal_slices, CommitRevealError,
    RoundCommitment, RoundRng, COMMIT_REVEAL_LEN,
};
