/// Number of past outcomes kept for display.
pub const DEFAULT_HISTORY_CAP: usize = 5;

/// Maximum number of distinct categories a participant may back in one round.
pub const DEFAULT_MAX_CATEGORIES: usize = 6;

/// Stakes are refused once this little betting time remains.
pub const DEFAULT_CLOSE_OUT_MS: u64 = 3_000;

/// Upper bound on stake entries in a persisted position.
pub const MAX_POSITION_STAKES: usize = 32;

/// Maximum length of a category label.
pub const MAX_LABEL_LENGTH: usize = 32;

/// Wheel round timing: 20s betting, 6s spin, 4s result display.
pub const WHEEL_BETTING_MS: u64 = 20_000;
pub const WHEEL_SPIN_MS: u64 = 6_000;
pub const WHEEL_SETTLED_MS: u64 = 4_000;

/// Crash round timing: 10s betting, up to 30s flight, 5s cooldown.
pub const CRASH_BETTING_MS: u64 = 10_000;
pub const CRASH_MAX_FLIGHT_MS: u64 = 30_000;
pub const CRASH_SETTLED_MS: u64 = 5_000;

/// Exponential growth rate of the rocket multiplier per millisecond of flight.
/// 30s of flight reaches roughly 36x.
pub const CRASH_GROWTH_PER_MS: f64 = 0.000_12;

/// House edge applied to the crash-point distribution (basis points).
pub const CRASH_HOUSE_EDGE_BPS: u16 = 100;

/// Smallest and largest stake accepted by default.
pub const DEFAULT_MIN_STAKE: u64 = 1;
pub const DEFAULT_MAX_STAKE: u64 = 1_000_000;

/// Rounds between cached streak checkpoints in the wheel generator.
pub const STREAK_CHECKPOINT_INTERVAL: u64 = 1_024;

/// Recently resolved outcomes kept per generator.
pub const OUTCOME_CACHE_LEN: usize = 2_048;
