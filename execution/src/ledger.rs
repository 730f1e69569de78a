//! Per-round bet ledger.
//!
//! A ledger maps categories to staked amounts for exactly one round. It is
//! mutable while the round is betting, frozen once the round resolves, and
//! emptied when the participant's stake has been settled.

use std::collections::BTreeMap;

use fortune_types::{CategoryId, GameKind, Multiplier, OpenPosition, StakeEntry};

use crate::RejectedAction;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BetLedger {
    round_index: u64,
    stakes: BTreeMap<CategoryId, u64>,
    locked: bool,
}

impl BetLedger {
    pub fn new(round_index: u64) -> Self {
        Self {
            round_index,
            stakes: BTreeMap::new(),
            locked: false,
        }
    }

    /// Rebuild a ledger from a persisted position.
    pub fn from_position(position: &OpenPosition) -> Self {
        let mut ledger = Self::new(position.round_index);
        for entry in &position.stakes {
            let total = ledger.stakes.entry(entry.category).or_insert(0);
            *total = total.saturating_add(entry.amount);
        }
        ledger
    }

    pub fn round_index(&self) -> u64 {
        self.round_index
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }

    /// Add `amount` to `category`, returning the new total on that category.
    ///
    /// A category not yet backed is refused once `max_categories` distinct
    /// categories are staked; existing categories can always be topped up.
    pub fn stake(
        &mut self,
        category: CategoryId,
        amount: u64,
        max_categories: usize,
    ) -> Result<u64, RejectedAction> {
        if self.locked {
            return Err(RejectedAction::SettlementPending {
                round_index: self.round_index,
            });
        }
        if !self.stakes.contains_key(&category) && self.stakes.len() >= max_categories {
            return Err(RejectedAction::CategoryCap {
                max: max_categories,
            });
        }
        let total = self.stakes.entry(category).or_insert(0);
        *total = total.saturating_add(amount);
        Ok(*total)
    }

    /// Undo a stake that could not be persisted.
    pub fn unstake(&mut self, category: CategoryId, amount: u64) {
        if let Some(total) = self.stakes.get_mut(&category) {
            *total = total.saturating_sub(amount);
            if *total == 0 {
                self.stakes.remove(&category);
            }
        }
    }

    pub fn current_stakes(&self) -> &BTreeMap<CategoryId, u64> {
        &self.stakes
    }

    pub fn staked_on(&self, category: CategoryId) -> u64 {
        self.stakes.get(&category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.stakes
            .values()
            .fold(0u64, |acc, amount| acc.saturating_add(*amount))
    }

    pub fn distinct_categories(&self) -> usize {
        self.stakes.len()
    }

    /// Freeze the ledger; called when the round leaves betting.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Discard all stakes and start over for `round_index`.
    pub fn clear(&mut self, round_index: u64) {
        self.round_index = round_index;
        self.stakes.clear();
        self.locked = false;
    }

    pub fn to_position(
        &self,
        game: GameKind,
        cash_out: Option<Multiplier>,
        auto_cash_out: Option<Multiplier>,
    ) -> OpenPosition {
        OpenPosition {
            game,
            round_index: self.round_index,
            stakes: self
                .stakes
                .iter()
                .map(|(category, amount)| StakeEntry {
                    category: *category,
                    amount: *amount,
                })
                .collect(),
            cash_out,
            auto_cash_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stake_accumulates() {
        let mut ledger = BetLedger::new(4);
        assert_eq!(ledger.stake(CategoryId(1), 50, 6), Ok(50));
        assert_eq!(ledger.stake(CategoryId(1), 25, 6), Ok(75));
        assert_eq!(ledger.stake(CategoryId(2), 10, 6), Ok(10));
        assert_eq!(ledger.total(), 85);
        assert_eq!(ledger.staked_on(CategoryId(1)), 75);
        assert_eq!(ledger.distinct_categories(), 2);
    }

    #[test]
    fn test_category_cap_allows_top_up() {
        let mut ledger = BetLedger::new(0);
        for category in 0..6u8 {
            ledger.stake(CategoryId(category), 10, 6).unwrap();
        }
        assert_eq!(
            ledger.stake(CategoryId(6), 10, 6),
            Err(RejectedAction::CategoryCap { max: 6 })
        );
        assert_eq!(ledger.stake(CategoryId(3), 10, 6), Ok(20));
        assert_eq!(ledger.distinct_categories(), 6);
    }

    #[test]
    fn test_locked_ledger_refuses_stakes() {
        let mut ledger = BetLedger::new(9);
        ledger.stake(CategoryId(0), 10, 6).unwrap();
        ledger.lock();
        assert!(ledger.stake(CategoryId(0), 10, 6).is_err());
        assert_eq!(ledger.total(), 10);
    }

    #[test]
    fn test_clear_resets_for_next_round() {
        let mut ledger = BetLedger::new(9);
        ledger.stake(CategoryId(0), 10, 6).unwrap();
        ledger.lock();
        ledger.clear(10);
        assert!(ledger.is_empty());
        assert!(!ledger.is_locked());
        assert_eq!(ledger.round_index(), 10);
    }

    #[test]
    fn test_unstake_removes_empty_category() {
        let mut ledger = BetLedger::new(0);
        ledger.stake(CategoryId(5), 10, 6).unwrap();
        ledger.unstake(CategoryId(5), 10);
        assert!(ledger.is_empty());
        ledger.unstake(CategoryId(5), 10);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_position_roundtrip() {
        let mut ledger = BetLedger::new(12);
        ledger.stake(CategoryId(2), 30, 6).unwrap();
        ledger.stake(CategoryId(0), 70, 6).unwrap();
        let position = ledger.to_position(GameKind::Wheel, None, None);
        assert_eq!(position.round_index, 12);
        assert_eq!(position.total_staked(), 100);
        assert_eq!(BetLedger::from_position(&position).current_stakes(), ledger.current_stakes());
    }

    proptest::proptest! {
        #[test]
        fn test_cap_and_total_hold(stakes in proptest::collection::vec((0u8..12, 1u64..1_000), 0..64)) {
            let mut ledger = BetLedger::new(0);
            let mut accepted = 0u64;
            for (category, amount) in stakes {
                if ledger.stake(CategoryId(category), amount, 6).is_ok() {
                    accepted += amount;
                }
                proptest::prop_assert!(ledger.distinct_categories() <= 6);
            }
            proptest::prop_assert_eq!(ledger.total(), accepted);
            let position = ledger.to_position(GameKind::Wheel, None, None);
            proptest::prop_assert_eq!(position.total_staked(), accepted);
        }
    }
}
