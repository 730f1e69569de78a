//! Common types used throughout fortune.
//!
//! Defines the round phases, outcomes, history, persisted positions and game
//! configuration shared by the execution engine and the round server.

pub mod config;
mod constants;
mod history;
mod outcome;
mod position;
mod round;

pub use config::{
    CategorySpec, ConfigError, CrashConfig, ForcedRule, GameConfig, PhaseConfig, StakeLimits,
    VariantConfig, WheelConfig,
};
pub use constants::*;
pub use history::{History, HistoryEntry};
pub use outcome::{CategoryId, Multiplier, Outcome, Tier};
pub use position::{OpenPosition, StakeEntry};
pub use round::{GameKind, Phase};

/// Identifier of a participant as issued by the profile service.
pub type ParticipantId = String;
