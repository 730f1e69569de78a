//! Deterministic test doubles for the round engine.

use crate::{
    persistence::{Persistence, SettlementReceipt, StakeCommit},
    round_clock::Clock,
};
use anyhow::{bail, Result};
use fortune_types::{GameKind, HistoryEntry, OpenPosition, StakeEntry};
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

/// Clock that only moves when told to. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(now_ms)),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Wraps a store and fails the next `n` writes on request.
#[derive(Clone)]
pub struct FlakyPersistence<P> {
    inner: P,
    failures: Arc<AtomicUsize>,
}

impl<P: Persistence> FlakyPersistence<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the next `count` write calls.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn check(&self, operation: &str) -> Result<()> {
        let tripped = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if tripped {
            bail!("injected failure: {operation}");
        }
        Ok(())
    }
}

impl<P: Persistence> Persistence for FlakyPersistence<P> {
    fn balance(&self, participant: &str) -> Result<Option<u64>> {
        self.inner.balance(participant)
    }

    fn open_account(&self, participant: &str, initial: u64) -> Result<u64> {
        self.inner.open_account(participant, initial)
    }

    fn commit_stake(
        &self,
        participant: &str,
        position: &OpenPosition,
        stake: StakeEntry,
    ) -> Result<StakeCommit> {
        self.check("commit_stake")?;
        self.inner.commit_stake(participant, position, stake)
    }

    fn save_position(&self, participant: &str, position: &OpenPosition) -> Result<()> {
        self.check("save_position")?;
        self.inner.save_position(participant, position)
    }

    fn load_position(&self, game: GameKind, participant: &str) -> Result<Option<OpenPosition>> {
        self.inner.load_position(game, participant)
    }

    fn last_settled_round(&self, game: GameKind, participant: &str) -> Result<Option<u64>> {
        self.inner.last_settled_round(game, participant)
    }

    fn record_settlement(
        &self,
        participant: &str,
        position: &OpenPosition,
        payout: u64,
    ) -> Result<SettlementReceipt> {
        self.check("record_settlement")?;
        self.inner.record_settlement(participant, position, payout)
    }

    fn append_history(&self, game: GameKind, entry: &HistoryEntry) -> Result<()> {
        self.check("append_history")?;
        self.inner.append_history(game, entry)
    }

    fn recent_history(&self, game: GameKind, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.inner.recent_history(game, limit)
    }
}
