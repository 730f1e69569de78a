//! Round clock for time-partitioned games.
//!
//! Continuous wall-clock time is cut into fixed-length rounds. Every round is
//! the same sequence of phases:
//! 1. **Betting** - participants may stake (until the close-out margin)
//! 2. **Resolving** - the wheel spins / the rocket flies
//! 3. **Settled** - stakes are paid out, result is displayed
//!
//! ## Deterministic clock
//!
//! The round index is `now_ms / cycle_ms` and the phase is read from
//! `now_ms % cycle_ms`. Nothing is accumulated between calls, so the clock can
//! be polled at any frequency without drifting and every observer that agrees
//! on the time agrees on the round.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fortune_execution::round_clock::RoundClock;
//! use fortune_types::{Phase, PhaseConfig};
//!
//! let clock = RoundClock::new(PhaseConfig::new(20_000, 6_000, 4_000));
//! let snapshot = clock.classify(1_700_000_021_500);
//! assert_eq!(snapshot.phase, Phase::Resolving);
//! ```

use fortune_types::{Phase, PhaseConfig};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time in milliseconds since the unix epoch.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis().min(u128::from(u64::MAX)) as u64)
            .unwrap_or(0)
    }
}

/// Where a point in time falls within the round sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundSnapshot {
    pub now_ms: u64,
    pub round_index: u64,
    pub phase: Phase,
    /// Milliseconds since the current phase began.
    pub phase_elapsed_ms: u64,
    /// Milliseconds until the current phase ends.
    pub phase_remaining_ms: u64,
}

impl RoundSnapshot {
    /// Position in the total order of (round, phase) pairs.
    pub fn cursor(&self) -> (u64, Phase) {
        (self.round_index, self.phase)
    }
}

/// Pure mapping from time to round and phase.
#[derive(Clone, Debug)]
pub struct RoundClock {
    phases: PhaseConfig,
}

impl RoundClock {
    /// Create a clock for the given phase durations.
    ///
    /// The durations are expected to have passed [`PhaseConfig::validate`];
    /// a zero-length cycle is treated as one millisecond long.
    pub fn new(phases: PhaseConfig) -> Self {
        Self { phases }
    }

    pub fn phases(&self) -> &PhaseConfig {
        &self.phases
    }

    pub fn cycle_ms(&self) -> u64 {
        self.phases.total_cycle_ms().max(1)
    }

    /// The phase that follows `phase` within a round.
    ///
    /// Returns `None` for `Settled` (the next phase belongs to the next round).
    pub fn next_phase(phase: Phase) -> Option<Phase> {
        match phase {
            Phase::Betting => Some(Phase::Resolving),
            Phase::Resolving => Some(Phase::Settled),
            Phase::Settled => None,
        }
    }

    pub fn round_index(&self, now_ms: u64) -> u64 {
        now_ms / self.cycle_ms()
    }

    /// Classify `now_ms` into a round index and phase.
    pub fn classify(&self, now_ms: u64) -> RoundSnapshot {
        let cycle = self.cycle_ms();
        let round_index = now_ms / cycle;
        let position = now_ms % cycle;

        let betting_end = self.phases.betting_ms;
        let resolving_end = betting_end.saturating_add(self.phases.resolving_ms);

        let (phase, phase_start, phase_end) = if position < betting_end {
            (Phase::Betting, 0, betting_end)
        } else if position < resolving_end {
            (Phase::Resolving, betting_end, resolving_end)
        } else {
            (Phase::Settled, resolving_end, cycle)
        };

        RoundSnapshot {
            now_ms,
            round_index,
            phase,
            phase_elapsed_ms: position - phase_start,
            phase_remaining_ms: phase_end.saturating_sub(position),
        }
    }

    /// Millisecond timestamp at which `round_index` begins betting.
    pub fn round_start_ms(&self, round_index: u64) -> u64 {
        round_index.saturating_mul(self.cycle_ms())
    }

    /// Millisecond timestamp at which `phase` of `round_index` begins.
    pub fn phase_start_ms(&self, round_index: u64, phase: Phase) -> u64 {
        let offset = match phase {
            Phase::Betting => 0,
            Phase::Resolving => self.phases.betting_ms,
            Phase::Settled => self
                .phases
                .betting_ms
                .saturating_add(self.phases.resolving_ms),
        };
        self.round_start_ms(round_index).saturating_add(offset)
    }

    /// Whether a stake at `snapshot` clears the close-out margin.
    pub fn is_betting_open(&self, snapshot: &RoundSnapshot, close_out_ms: u64) -> bool {
        snapshot.phase == Phase::Betting && snapshot.phase_remaining_ms > close_out_ms
    }
}
