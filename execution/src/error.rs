use fortune_types::{CategoryId, Phase};

/// Reason a participant action was refused.
///
/// Rejections are ordinary results: the round loop never stops because of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectedAction {
    /// The participant has not joined this engine.
    NotJoined,
    /// Stakes are only taken while the round is betting.
    BettingClosed { phase: Phase },
    /// Betting is still open but inside the close-out margin.
    CloseOut { remaining_ms: u64 },
    InsufficientBalance { available: u64, requested: u64 },
    /// A new category would exceed the concurrent-category cap.
    CategoryCap { max: usize },
    UnknownCategory(CategoryId),
    StakeOutOfBounds { min: u64, max: u64, got: u64 },
    /// An earlier round has not been settled yet.
    SettlementPending { round_index: u64 },
    /// Cash-out is not offered by this game.
    NotSupported,
    /// Cash-out is only legal while the rocket is in flight.
    NotInFlight { phase: Phase },
    Crashed,
    NoStake,
    AlreadyCashedOut,
    /// Auto cash-out targets must be above 1.00x.
    InvalidTarget,
    /// The persistence adapter failed; the local change was rolled back.
    Persistence(String),
}

impl RejectedAction {
    /// Stable reason code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotJoined => "NOT_JOINED",
            Self::BettingClosed { .. } => "BETTING_CLOSED",
            Self::CloseOut { .. } => "CLOSE_OUT",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::CategoryCap { .. } => "CATEGORY_CAP",
            Self::UnknownCategory(_) => "UNKNOWN_CATEGORY",
            Self::StakeOutOfBounds { .. } => "STAKE_OUT_OF_BOUNDS",
            Self::SettlementPending { .. } => "SETTLEMENT_PENDING",
            Self::NotSupported => "NOT_SUPPORTED",
            Self::NotInFlight { .. } => "NOT_IN_FLIGHT",
            Self::Crashed => "CRASHED",
            Self::NoStake => "NO_STAKE",
            Self::AlreadyCashedOut => "ALREADY_CASHED_OUT",
            Self::InvalidTarget => "INVALID_TARGET",
            Self::Persistence(_) => "PERSISTENCE_FAILURE",
        }
    }
}

impl std::fmt::Display for RejectedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotJoined => write!(f, "participant has not joined"),
            Self::BettingClosed { phase } => {
                write!(f, "betting is closed (phase {})", phase.as_str())
            }
            Self::CloseOut { remaining_ms } => {
                write!(f, "betting closes in {remaining_ms}ms; no new stakes")
            }
            Self::InsufficientBalance {
                available,
                requested,
            } => write!(
                f,
                "insufficient balance: requested {requested}, available {available}"
            ),
            Self::CategoryCap { max } => write!(f, "at most {max} categories per round"),
            Self::UnknownCategory(id) => write!(f, "unknown category {}", id.0),
            Self::StakeOutOfBounds { min, max, got } => {
                write!(f, "stake {got} outside [{min}, {max}]")
            }
            Self::SettlementPending { round_index } => {
                write!(f, "round {round_index} is still being settled")
            }
            Self::NotSupported => write!(f, "action not supported by this game"),
            Self::NotInFlight { phase } => {
                write!(f, "cash-out unavailable (phase {})", phase.as_str())
            }
            Self::Crashed => write!(f, "rocket already crashed"),
            Self::NoStake => write!(f, "no stake in this round"),
            Self::AlreadyCashedOut => write!(f, "already cashed out"),
            Self::InvalidTarget => write!(f, "auto cash-out target must exceed 1.00x"),
            Self::Persistence(msg) => write!(f, "persistence failure: {msg}"),
        }
    }
}

impl std::error::Error for RejectedAction {}
