//! Balance and position storage behind the round engine.
//!
//! The engine keeps an optimistic local view of each participant and pushes
//! every change through [`Persistence`]. Implementations must make each call
//! atomic: a stake debits and stores the position together, and a settlement
//! credits, marks the round settled and drops the position together. Balances
//! are shared by every game; positions and settlement marks are kept per game.
//!
//! Several engines may serve the same participant. The stored position is the
//! union of every stake taken for its round, so whichever engine settles the
//! round pays all of them.

use anyhow::{anyhow, Result};
use fortune_types::{GameKind, HistoryEntry, OpenPosition, StakeEntry};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Result of debiting a stake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StakeCommit {
    /// The stake was debited. `position` is the stored position for the round
    /// after merging, including stakes taken by other engines.
    Committed { balance: u64, position: OpenPosition },
    /// The stored balance cannot cover the stake; nothing changed.
    InsufficientBalance { balance: u64 },
}

/// The last settlement recorded for a participant in one game.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SettledStake {
    pub round_index: u64,
    pub staked: u64,
    pub payout: u64,
}

/// Result of recording a settlement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettlementReceipt {
    Credited { balance: u64 },
    /// Some engine already settled this round (or a later one); nothing
    /// changed. `previous` is what was recorded last.
    AlreadySettled { balance: u64, previous: SettledStake },
}

impl SettlementReceipt {
    pub fn balance(&self) -> u64 {
        match self {
            SettlementReceipt::Credited { balance }
            | SettlementReceipt::AlreadySettled { balance, .. } => *balance,
        }
    }
}

/// Fold a write for `position` into what is stored.
///
/// A stored position for the same round keeps its stakes and gains `stake`;
/// anything else is replaced by `position`.
pub fn merge_position(
    stored: Option<OpenPosition>,
    position: &OpenPosition,
    stake: Option<StakeEntry>,
) -> OpenPosition {
    match stored {
        Some(mut stored) if stored.same_round(position) => {
            if let Some(stake) = stake {
                stored.add_stake(stake);
            }
            stored.absorb_settings(position);
            stored
        }
        _ => position.clone(),
    }
}

pub trait Persistence {
    /// Stored balance, if the participant has an account.
    fn balance(&self, participant: &str) -> Result<Option<u64>>;

    /// Create the account with `initial` unless it exists; returns the balance.
    fn open_account(&self, participant: &str, initial: u64) -> Result<u64>;

    /// Debit `stake.amount` and fold `stake` into the stored position.
    ///
    /// `position` is the caller's view, already including `stake`; it is
    /// stored as is when nothing is stored for its round.
    fn commit_stake(
        &self,
        participant: &str,
        position: &OpenPosition,
        stake: StakeEntry,
    ) -> Result<StakeCommit>;

    /// Store the cash-out settings of `position` without touching the balance.
    /// Stakes already stored for the same round are kept.
    fn save_position(&self, participant: &str, position: &OpenPosition) -> Result<()>;

    fn load_position(&self, game: GameKind, participant: &str) -> Result<Option<OpenPosition>>;

    /// Most recent round settled for the participant in `game`.
    fn last_settled_round(&self, game: GameKind, participant: &str) -> Result<Option<u64>>;

    /// Credit `payout`, mark `position.round_index` settled and clear the position.
    ///
    /// Idempotent per round: a second call for a round at or before the last
    /// settled one returns [`SettlementReceipt::AlreadySettled`].
    fn record_settlement(
        &self,
        participant: &str,
        position: &OpenPosition,
        payout: u64,
    ) -> Result<SettlementReceipt>;

    /// Append a completed round. Entries at or before the latest stored round are ignored.
    fn append_history(&self, game: GameKind, entry: &HistoryEntry) -> Result<()>;

    /// Up to `limit` most recent entries, newest first.
    fn recent_history(&self, game: GameKind, limit: usize) -> Result<Vec<HistoryEntry>>;
}

#[derive(Default)]
struct MemoryState {
    balances: HashMap<String, u64>,
    positions: HashMap<(GameKind, String), OpenPosition>,
    settled: HashMap<(GameKind, String), SettledStake>,
    history: HashMap<GameKind, Vec<HistoryEntry>>,
}

/// In-process store. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryPersistence {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("memory persistence lock poisoned"))?;
        Ok(f(&mut state))
    }
}

impl Persistence for MemoryPersistence {
    fn balance(&self, participant: &str) -> Result<Option<u64>> {
        self.with_state(|state| state.balances.get(participant).copied())
    }

    fn open_account(&self, participant: &str, initial: u64) -> Result<u64> {
        self.with_state(|state| {
            *state
                .balances
                .entry(participant.to_string())
                .or_insert(initial)
        })
    }

    fn commit_stake(
        &self,
        participant: &str,
        position: &OpenPosition,
        stake: StakeEntry,
    ) -> Result<StakeCommit> {
        self.with_state(|state| {
            let balance = state.balances.get(participant).copied().unwrap_or(0);
            let Some(remaining) = balance.checked_sub(stake.amount) else {
                return StakeCommit::InsufficientBalance { balance };
            };
            state.balances.insert(participant.to_string(), remaining);
            let key = (position.game, participant.to_string());
            let merged = merge_position(state.positions.remove(&key), position, Some(stake));
            state.positions.insert(key, merged.clone());
            StakeCommit::Committed {
                balance: remaining,
                position: merged,
            }
        })
    }

    fn save_position(&self, participant: &str, position: &OpenPosition) -> Result<()> {
        self.with_state(|state| {
            let key = (position.game, participant.to_string());
            let merged = merge_position(state.positions.remove(&key), position, None);
            state.positions.insert(key, merged);
        })
    }

    fn load_position(&self, game: GameKind, participant: &str) -> Result<Option<OpenPosition>> {
        self.with_state(|state| {
            state
                .positions
                .get(&(game, participant.to_string()))
                .cloned()
        })
    }

    fn last_settled_round(&self, game: GameKind, participant: &str) -> Result<Option<u64>> {
        self.with_state(|state| {
            state
                .settled
                .get(&(game, participant.to_string()))
                .map(|settled| settled.round_index)
        })
    }

    fn record_settlement(
        &self,
        participant: &str,
        position: &OpenPosition,
        payout: u64,
    ) -> Result<SettlementReceipt> {
        self.with_state(|state| {
            let key = (position.game, participant.to_string());
            let balance = state.balances.get(participant).copied().unwrap_or(0);
            if let Some(previous) = state
                .settled
                .get(&key)
                .filter(|settled| settled.round_index >= position.round_index)
            {
                return SettlementReceipt::AlreadySettled {
                    balance,
                    previous: *previous,
                };
            }
            let balance = balance.saturating_add(payout);
            state.balances.insert(participant.to_string(), balance);
            state.settled.insert(
                key.clone(),
                SettledStake {
                    round_index: position.round_index,
                    staked: position.total_staked(),
                    payout,
                },
            );
            if state
                .positions
                .get(&key)
                .is_some_and(|stored| stored.round_index <= position.round_index)
            {
                state.positions.remove(&key);
            }
            SettlementReceipt::Credited { balance }
        })
    }

    fn append_history(&self, game: GameKind, entry: &HistoryEntry) -> Result<()> {
        self.with_state(|state| {
            let entries = state.history.entry(game).or_default();
            if entries
                .last()
                .is_some_and(|last| last.round_index >= entry.round_index)
            {
                return;
            }
            entries.push(*entry);
        })
    }

    fn recent_history(&self, game: GameKind, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.with_state(|state| {
            state
                .history
                .get(&game)
                .map(|entries| entries.iter().rev().take(limit).copied().collect())
                .unwrap_or_default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fortune_types::{CategoryId, Multiplier, Outcome, Tier};

    fn position(round_index: u64, amount: u64) -> OpenPosition {
        OpenPosition {
            game: GameKind::Wheel,
            round_index,
            stakes: vec![StakeEntry {
                category: CategoryId(0),
                amount,
            }],
            cash_out: None,
            auto_cash_out: None,
        }
    }

    #[test]
    fn test_open_account_is_idempotent() {
        let store = MemoryPersistence::new();
        assert_eq!(store.balance("alice").unwrap(), None);
        assert_eq!(store.open_account("alice", 1_000).unwrap(), 1_000);
        assert_eq!(store.open_account("alice", 5).unwrap(), 1_000);
    }

    fn stake(category: u8, amount: u64) -> StakeEntry {
        StakeEntry {
            category: CategoryId(category),
            amount,
        }
    }

    #[test]
    fn test_commit_stake_checks_balance() {
        let store = MemoryPersistence::new();
        store.open_account("alice", 100).unwrap();
        assert_eq!(
            store.commit_stake("alice", &position(3, 150), stake(0, 150)).unwrap(),
            StakeCommit::InsufficientBalance { balance: 100 }
        );
        assert_eq!(store.load_position(GameKind::Wheel, "alice").unwrap(), None);
        assert_eq!(
            store.commit_stake("alice", &position(3, 60), stake(0, 60)).unwrap(),
            StakeCommit::Committed {
                balance: 40,
                position: position(3, 60),
            }
        );
        assert_eq!(
            store.load_position(GameKind::Wheel, "alice").unwrap(),
            Some(position(3, 60))
        );
    }

    #[test]
    fn test_commit_stake_merges_writers() {
        let store = MemoryPersistence::new();
        store.open_account("alice", 1_000).unwrap();
        store.commit_stake("alice", &position(3, 100), stake(0, 100)).unwrap();

        // A second engine only knows about its own stake.
        let mut theirs = OpenPosition::new(GameKind::Wheel, 3);
        theirs.add_stake(stake(4, 100));
        let StakeCommit::Committed { balance, position: merged } =
            store.commit_stake("alice", &theirs, stake(4, 100)).unwrap()
        else {
            panic!("stake refused");
        };
        assert_eq!(balance, 800);
        assert_eq!(merged.total_staked(), 200);
        assert_eq!(merged.staked_on(CategoryId(0)), 100);
        assert_eq!(merged.staked_on(CategoryId(4)), 100);
        assert_eq!(
            store.load_position(GameKind::Wheel, "alice").unwrap(),
            Some(merged)
        );

        // A new round replaces what is left of an older one.
        let StakeCommit::Committed { position: next, .. } =
            store.commit_stake("alice", &position(4, 10), stake(0, 10)).unwrap()
        else {
            panic!("stake refused");
        };
        assert_eq!(next, position(4, 10));
    }

    #[test]
    fn test_save_position_keeps_stored_stakes() {
        let store = MemoryPersistence::new();
        store.open_account("bob", 500).unwrap();
        let mut stored = OpenPosition::new(GameKind::Crash, 8);
        stored.add_stake(stake(0, 50));
        store.commit_stake("bob", &stored, stake(0, 50)).unwrap();
        store.commit_stake("bob", &stored, stake(0, 50)).unwrap();

        // The cash-out comes from an engine that saw only the first stake.
        let mut cashed = stored.clone();
        cashed.cash_out = Some(Multiplier(150));
        store.save_position("bob", &cashed).unwrap();

        let loaded = store.load_position(GameKind::Crash, "bob").unwrap().unwrap();
        assert_eq!(loaded.total_staked(), 100);
        assert_eq!(loaded.cash_out, Some(Multiplier(150)));
    }

    #[test]
    fn test_settlement_is_idempotent() {
        let store = MemoryPersistence::new();
        store.open_account("alice", 100).unwrap();
        store.commit_stake("alice", &position(3, 100), stake(0, 100)).unwrap();
        assert_eq!(
            store.record_settlement("alice", &position(3, 100), 500).unwrap(),
            SettlementReceipt::Credited { balance: 500 }
        );
        assert_eq!(
            store.record_settlement("alice", &position(3, 100), 500).unwrap(),
            SettlementReceipt::AlreadySettled {
                balance: 500,
                previous: SettledStake {
                    round_index: 3,
                    staked: 100,
                    payout: 500,
                },
            }
        );
        assert_eq!(store.last_settled_round(GameKind::Wheel, "alice").unwrap(), Some(3));
        assert_eq!(store.load_position(GameKind::Wheel, "alice").unwrap(), None);
        // Settlement marks are per game.
        assert_eq!(store.last_settled_round(GameKind::Crash, "alice").unwrap(), None);
    }

    #[test]
    fn test_history_ignores_replays() {
        let store = MemoryPersistence::new();
        let entry = |round_index| HistoryEntry {
            round_index,
            outcome: Outcome::Category {
                id: CategoryId(1),
                tier: Tier::Low,
                multiplier: Multiplier::from_whole(5),
            },
        };
        store.append_history(GameKind::Wheel, &entry(4)).unwrap();
        store.append_history(GameKind::Wheel, &entry(5)).unwrap();
        store.append_history(GameKind::Wheel, &entry(5)).unwrap();
        store.append_history(GameKind::Wheel, &entry(2)).unwrap();
        let recent = store.recent_history(GameKind::Wheel, 10).unwrap();
        assert_eq!(recent, vec![entry(5), entry(4)]);
        assert_eq!(store.recent_history(GameKind::Wheel, 1).unwrap(), vec![entry(5)]);
        assert!(store.recent_history(GameKind::Crash, 10).unwrap().is_empty());
    }
}
