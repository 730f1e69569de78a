//! Round lifecycle engine.
//!
//! [`RoundEngine`] is a poll-driven reducer over the round clock: given the
//! current time it walks every `(round, phase)` transition it has not yet
//! processed, in order, and queues the resulting [`RoundEvent`]s. The caller
//! picks the polling cadence; nothing is scheduled internally.
//!
//! ## Transitions
//! - `Betting -> Resolving`: the round's outcome is computed once and every
//!   ledger for the round is locked.
//! - `Resolving -> Settled`: each participant's stake is paid from that same
//!   outcome and the result is appended to history.
//! - `Settled -> Betting`: ledgers are cleared for the new round and its
//!   fairness commitment is published.
//!
//! A poll that lands several rounds later finishes the round in progress, then
//! backfills history for at most `history_cap` of the missed rounds.
//!
//! ## Persistence
//! Local state is updated optimistically and pushed through [`Persistence`]. A
//! failed stake is rolled back and reported. A failed settlement is retried on
//! the next poll; until it lands the participant cannot stake again. History
//! writes are queued and retried the same way.
//!
//! Several engines may serve one participant. The store keeps the union of
//! their stakes for a round, and settlement pays from that stored position, so
//! the first engine to settle pays every stake and the others report what it
//! credited.

use std::collections::{BTreeMap, VecDeque};

use fortune_types::{
    CategoryId, ConfigError, GameConfig, GameKind, History, HistoryEntry, Multiplier,
    OpenPosition, Outcome, ParticipantId, Phase, StakeEntry, StakeLimits,
};
use tracing::{debug, info, warn};

use crate::{
    games::OutcomeGenerator,
    ledger::BetLedger,
    persistence::{Persistence, SettlementReceipt, StakeCommit},
    round_clock::{Clock, RoundClock, RoundSnapshot},
    seed::COMMIT_REVEAL_LEN,
    RejectedAction,
};

/// Completed rounds kept in memory while history writes are failing.
const MAX_UNSAVED_HISTORY: usize = 64;

/// Something observers should hear about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundEvent {
    /// A round opened for betting.
    RoundStarted {
        round_index: u64,
        commit: [u8; COMMIT_REVEAL_LEN],
    },
    /// The outcome became visible, along with the seed that produced it.
    Revealed {
        round_index: u64,
        outcome: Outcome,
        reveal: [u8; COMMIT_REVEAL_LEN],
    },
    /// A participant's stake was paid (or forfeited) and persisted.
    Settled {
        participant: ParticipantId,
        round_index: u64,
        staked: u64,
        payout: u64,
        balance: u64,
        /// The stake was settled after the participant or engine was away.
        caught_up: bool,
    },
    /// A settlement could not be persisted; it is retried on the next poll.
    SettlementDeferred {
        participant: ParticipantId,
        round_index: u64,
    },
    /// Every stake on the round has been processed.
    RoundSettled { round_index: u64, outcome: Outcome },
    /// Rounds that passed entirely unobserved.
    CaughtUp {
        from_round: u64,
        to_round: u64,
        missed: u64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakeReceipt {
    pub round_index: u64,
    pub category: CategoryId,
    pub amount: u64,
    /// Total now staked on `category` this round.
    pub category_total: u64,
    /// Total now staked across all categories this round.
    pub round_total: u64,
    pub balance: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CashOutReceipt {
    pub round_index: u64,
    pub multiplier: Multiplier,
    pub payout: u64,
}

/// Read-only view of the round as of the last poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundView {
    pub game: GameKind,
    pub round_index: u64,
    pub phase: Phase,
    pub phase_elapsed_ms: u64,
    pub phase_remaining_ms: u64,
    /// Present once the outcome is visible to observers.
    pub outcome: Option<Outcome>,
    /// Present while a crash round is in flight.
    pub live_multiplier: Option<Multiplier>,
    /// Most recent first.
    pub history: Vec<HistoryEntry>,
    pub commit: [u8; COMMIT_REVEAL_LEN],
    /// Present once the outcome is visible.
    pub reveal: Option<[u8; COMMIT_REVEAL_LEN]>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantView {
    pub participant: ParticipantId,
    pub balance: u64,
    pub round_index: u64,
    pub stakes: Vec<StakeEntry>,
    pub total_staked: u64,
    pub cash_out: Option<Multiplier>,
    pub auto_cash_out: Option<Multiplier>,
    pub settlement_pending: bool,
}

struct PendingSettlement {
    position: OpenPosition,
    outcome: Outcome,
    payout: u64,
    caught_up: bool,
    /// `SettlementDeferred` was already emitted.
    deferred: bool,
}

struct Book {
    /// Last balance seen from persistence, adjusted by local actions.
    balance: u64,
    ledger: BetLedger,
    cash_out: Option<Multiplier>,
    auto_cash_out: Option<Multiplier>,
    pending: Option<PendingSettlement>,
    /// Left while a stake was open; dropped once settled.
    departed: bool,
}

impl Book {
    fn new(balance: u64, round_index: u64) -> Self {
        Self {
            balance,
            ledger: BetLedger::new(round_index),
            cash_out: None,
            auto_cash_out: None,
            pending: None,
            departed: false,
        }
    }

    fn position(&self, game: GameKind) -> OpenPosition {
        self.ledger
            .to_position(game, self.cash_out, self.auto_cash_out)
    }

    fn is_idle(&self) -> bool {
        self.ledger.is_empty() && self.pending.is_none()
    }
}

struct Resolution {
    round_index: u64,
    outcome: Outcome,
    revealed: bool,
}

fn persistence_failure(err: anyhow::Error) -> RejectedAction {
    RejectedAction::Persistence(format!("{err:#}"))
}

pub struct RoundEngine<G, P, C> {
    game: G,
    persistence: P,
    clock: C,
    round_clock: RoundClock,
    limits: StakeLimits,
    history: History,
    /// Last processed `(round, phase)`; `None` until the first poll.
    cursor: Option<(u64, Phase)>,
    snapshot: RoundSnapshot,
    resolution: Option<Resolution>,
    books: BTreeMap<ParticipantId, Book>,
    unsaved_history: VecDeque<HistoryEntry>,
    outbox: Vec<RoundEvent>,
}

impl<G: OutcomeGenerator, P: Persistence, C: Clock> RoundEngine<G, P, C> {
    pub fn new(config: &GameConfig, game: G, persistence: P, clock: C) -> Result<Self, ConfigError> {
        config.validate_for(game.kind())?;
        let round_clock = RoundClock::new(config.phases);
        let snapshot = round_clock.classify(clock.now_ms());
        Ok(Self {
            game,
            persistence,
            clock,
            round_clock,
            limits: config.limits,
            history: History::new(config.history_cap),
            cursor: None,
            snapshot,
            resolution: None,
            books: BTreeMap::new(),
            unsaved_history: VecDeque::new(),
            outbox: Vec::new(),
        })
    }

    pub fn kind(&self) -> GameKind {
        self.game.kind()
    }

    pub fn game(&self) -> &G {
        &self.game
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    pub fn round_clock(&self) -> &RoundClock {
        &self.round_clock
    }

    pub fn limits(&self) -> &StakeLimits {
        &self.limits
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn snapshot(&self) -> &RoundSnapshot {
        &self.snapshot
    }

    /// Advance to the clock's current time and drain queued events.
    pub fn poll(&mut self) -> Vec<RoundEvent> {
        let now_ms = self.clock.now_ms();
        self.poll_at(now_ms)
    }

    /// Advance to `now_ms` and drain queued events.
    pub fn poll_at(&mut self, now_ms: u64) -> Vec<RoundEvent> {
        self.observe(now_ms);
        self.drain_events()
    }

    /// Events queued by actions since the last drain.
    pub fn drain_events(&mut self) -> Vec<RoundEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Start serving `participant`.
    ///
    /// A stake persisted by an earlier session is restored if its round is
    /// still running and settled immediately if the round has completed.
    pub fn join(&mut self, participant: &str) -> Result<ParticipantView, RejectedAction> {
        self.observe(self.clock.now_ms());
        if let Some(book) = self.books.get_mut(participant) {
            book.departed = false;
            return self
                .participant_view(participant)
                .ok_or(RejectedAction::NotJoined);
        }

        let kind = self.game.kind();
        let balance = self
            .persistence
            .balance(participant)
            .map_err(persistence_failure)?
            .unwrap_or(0);
        let last_settled = self
            .persistence
            .last_settled_round(kind, participant)
            .map_err(persistence_failure)?;
        let position = self
            .persistence
            .load_position(kind, participant)
            .map_err(persistence_failure)?
            .filter(|position| last_settled.map_or(true, |settled| position.round_index > settled))
            .filter(|position| !position.is_empty());

        let (round_index, phase) = self.snapshot.cursor();
        let mut book = Book::new(balance, round_index);
        let mut settle_now = false;
        if let Some(position) = position {
            let completed = position.round_index < round_index
                || (position.round_index == round_index && phase == Phase::Settled);
            if completed {
                let outcome = if position.round_index == round_index {
                    self.resolve(round_index)
                } else {
                    self.game.outcome(position.round_index)
                };
                let payout = self.game.payout(&position, &outcome);
                info!(
                    participant,
                    round = position.round_index,
                    payout,
                    "settling stake from an earlier session"
                );
                book.pending = Some(PendingSettlement {
                    position,
                    outcome,
                    payout,
                    caught_up: true,
                    deferred: false,
                });
                settle_now = true;
            } else if position.round_index == round_index {
                book.ledger = BetLedger::from_position(&position);
                book.cash_out = position.cash_out;
                book.auto_cash_out = position.auto_cash_out;
                if phase != Phase::Betting {
                    book.ledger.lock();
                }
            } else {
                warn!(
                    participant,
                    round = position.round_index,
                    current = round_index,
                    "ignoring position for a future round"
                );
            }
        }

        self.books.insert(participant.to_string(), book);
        if settle_now {
            self.try_settle(participant);
        }
        info!(game = kind.as_str(), participant, balance, "participant joined");
        self.participant_view(participant)
            .ok_or(RejectedAction::NotJoined)
    }

    /// Stop serving `participant`. Returns `false` if an open stake keeps the
    /// participant around until it settles.
    pub fn leave(&mut self, participant: &str) -> bool {
        let Some(book) = self.books.get_mut(participant) else {
            return true;
        };
        if book.is_idle() {
            self.books.remove(participant);
            info!(participant, "participant left");
            true
        } else {
            book.departed = true;
            info!(participant, "participant left with an open stake");
            false
        }
    }

    pub fn place_stake(
        &mut self,
        participant: &str,
        category: CategoryId,
        amount: u64,
    ) -> Result<StakeReceipt, RejectedAction> {
        self.observe(self.clock.now_ms());
        let snapshot = self.snapshot;
        let limits = self.limits;
        let kind = self.game.kind();

        let book = self
            .books
            .get_mut(participant)
            .ok_or(RejectedAction::NotJoined)?;
        if amount < limits.min_stake || amount > limits.max_stake {
            return Err(RejectedAction::StakeOutOfBounds {
                min: limits.min_stake,
                max: limits.max_stake,
                got: amount,
            });
        }
        if !self.game.accepts_category(category) {
            return Err(RejectedAction::UnknownCategory(category));
        }
        if snapshot.phase != Phase::Betting {
            return Err(RejectedAction::BettingClosed {
                phase: snapshot.phase,
            });
        }
        if !self.round_clock.is_betting_open(&snapshot, limits.close_out_ms) {
            return Err(RejectedAction::CloseOut {
                remaining_ms: snapshot.phase_remaining_ms,
            });
        }
        if let Some(pending) = &book.pending {
            return Err(RejectedAction::SettlementPending {
                round_index: pending.position.round_index,
            });
        }
        if book.balance < amount {
            // Another engine may have credited the shared account since.
            if let Some(stored) = self
                .persistence
                .balance(participant)
                .map_err(persistence_failure)?
            {
                book.balance = stored;
            }
        }
        if book.balance < amount {
            return Err(RejectedAction::InsufficientBalance {
                available: book.balance,
                requested: amount,
            });
        }
        if book.ledger.round_index() != snapshot.round_index {
            book.ledger.clear(snapshot.round_index);
        }

        book.ledger.stake(category, amount, limits.max_categories)?;
        book.balance -= amount;
        let position = book.position(kind);
        let stake = StakeEntry { category, amount };
        match self.persistence.commit_stake(participant, &position, stake) {
            Ok(StakeCommit::Committed {
                balance,
                position: stored,
            }) => {
                // The stored position also holds stakes taken by other engines.
                book.ledger = BetLedger::from_position(&stored);
                book.cash_out = stored.cash_out;
                book.auto_cash_out = stored.auto_cash_out;
                book.balance = balance;
                debug!(
                    participant,
                    round = snapshot.round_index,
                    category = category.0,
                    amount,
                    "stake placed"
                );
                Ok(StakeReceipt {
                    round_index: snapshot.round_index,
                    category,
                    amount,
                    category_total: book.ledger.staked_on(category),
                    round_total: book.ledger.total(),
                    balance,
                })
            }
            Ok(StakeCommit::InsufficientBalance { balance }) => {
                book.ledger.unstake(category, amount);
                book.balance = balance;
                Err(RejectedAction::InsufficientBalance {
                    available: balance,
                    requested: amount,
                })
            }
            Err(err) => {
                book.ledger.unstake(category, amount);
                book.balance = book.balance.saturating_add(amount);
                warn!(?err, participant, amount, "stake not persisted; rolled back");
                Err(persistence_failure(err))
            }
        }
    }

    /// Lock in the live multiplier for the participant's stake.
    pub fn cash_out(&mut self, participant: &str) -> Result<CashOutReceipt, RejectedAction> {
        self.observe(self.clock.now_ms());
        let kind = self.game.kind();
        if kind != GameKind::Crash {
            return Err(RejectedAction::NotSupported);
        }
        let snapshot = self.snapshot;
        let book = self
            .books
            .get_mut(participant)
            .ok_or(RejectedAction::NotJoined)?;
        if snapshot.phase != Phase::Resolving {
            return Err(RejectedAction::NotInFlight {
                phase: snapshot.phase,
            });
        }
        if book.ledger.is_empty() || book.ledger.round_index() != snapshot.round_index {
            return Err(RejectedAction::NoStake);
        }
        if book.cash_out.is_some() {
            return Err(RejectedAction::AlreadyCashedOut);
        }
        let outcome = match &self.resolution {
            Some(resolution) if resolution.round_index == snapshot.round_index => {
                resolution.outcome
            }
            _ => {
                return Err(RejectedAction::NotInFlight {
                    phase: snapshot.phase,
                })
            }
        };
        let Some(current) = self
            .game
            .live_multiplier(&outcome, snapshot.phase_elapsed_ms)
        else {
            return Err(RejectedAction::Crashed);
        };
        if book.auto_cash_out.is_some_and(|target| target <= current) {
            return Err(RejectedAction::AlreadyCashedOut);
        }

        book.cash_out = Some(current);
        let position = book.position(kind);
        if let Err(err) = self.persistence.save_position(participant, &position) {
            book.cash_out = None;
            warn!(?err, participant, "cash-out not persisted; rolled back");
            return Err(persistence_failure(err));
        }
        let payout = current.apply(book.ledger.total());
        info!(
            participant,
            round = snapshot.round_index,
            multiplier = %current,
            payout,
            "cashed out"
        );
        Ok(CashOutReceipt {
            round_index: snapshot.round_index,
            multiplier: current,
            payout,
        })
    }

    /// Set or clear the multiplier at which the stake cashes out on its own.
    pub fn set_auto_cash_out(
        &mut self,
        participant: &str,
        target: Option<Multiplier>,
    ) -> Result<(), RejectedAction> {
        self.observe(self.clock.now_ms());
        let kind = self.game.kind();
        if kind != GameKind::Crash {
            return Err(RejectedAction::NotSupported);
        }
        let phase = self.snapshot.phase;
        let book = self
            .books
            .get_mut(participant)
            .ok_or(RejectedAction::NotJoined)?;
        if phase != Phase::Betting {
            return Err(RejectedAction::BettingClosed { phase });
        }
        if target.is_some_and(|target| target <= Multiplier::ONE) {
            return Err(RejectedAction::InvalidTarget);
        }
        let previous = std::mem::replace(&mut book.auto_cash_out, target);
        if !book.ledger.is_empty() {
            let position = book.position(kind);
            if let Err(err) = self.persistence.save_position(participant, &position) {
                book.auto_cash_out = previous;
                warn!(?err, participant, "auto cash-out not persisted; rolled back");
                return Err(persistence_failure(err));
            }
        }
        Ok(())
    }

    /// State of the current round as of the last poll. Never mutates.
    pub fn current_state(&self) -> RoundView {
        let snapshot = self.snapshot;
        let resolution = self
            .resolution
            .as_ref()
            .filter(|resolution| resolution.round_index == snapshot.round_index);
        let outcome = resolution
            .filter(|resolution| resolution.revealed)
            .map(|resolution| resolution.outcome);
        let live_multiplier = match (snapshot.phase, resolution) {
            (Phase::Resolving, Some(resolution)) => self
                .game
                .live_multiplier(&resolution.outcome, snapshot.phase_elapsed_ms),
            _ => None,
        };
        let commitment = self.game.commitment(snapshot.round_index);
        RoundView {
            game: self.game.kind(),
            round_index: snapshot.round_index,
            phase: snapshot.phase,
            phase_elapsed_ms: snapshot.phase_elapsed_ms,
            phase_remaining_ms: snapshot.phase_remaining_ms,
            outcome,
            live_multiplier,
            history: self.history.to_vec(),
            commit: commitment.commit,
            reveal: outcome.map(|_| commitment.reveal),
        }
    }

    pub fn participant_view(&self, participant: &str) -> Option<ParticipantView> {
        let book = self.books.get(participant)?;
        let position = book.position(self.game.kind());
        Some(ParticipantView {
            participant: participant.to_string(),
            balance: book.balance,
            round_index: position.round_index,
            total_staked: position.total_staked(),
            stakes: position.stakes,
            cash_out: book.cash_out,
            auto_cash_out: book.auto_cash_out,
            settlement_pending: book.pending.is_some(),
        })
    }

    pub fn participants(&self) -> impl Iterator<Item = &ParticipantId> {
        self.books.keys()
    }

    fn observe(&mut self, now_ms: u64) {
        if self.cursor.is_some() && now_ms < self.snapshot.now_ms {
            debug!(
                now_ms,
                last_ms = self.snapshot.now_ms,
                "clock moved backwards; ignoring"
            );
            return;
        }

        // Settlements deferred by earlier polls get one retry per poll.
        self.retry_deferred();

        let snapshot = self.round_clock.classify(now_ms);
        match self.cursor {
            None => self.start_observing(&snapshot),
            Some(cursor) => self.advance(cursor, &snapshot),
        }
        self.snapshot = snapshot;
        self.cursor = Some(snapshot.cursor());

        self.reveal_if_visible();
        self.flush_history();
        self.books
            .retain(|_, book| !(book.departed && book.is_idle()));
    }

    fn start_observing(&mut self, snapshot: &RoundSnapshot) {
        let round_index = snapshot.round_index;
        let cap = self.history.cap() as u64;
        for past in round_index.saturating_sub(cap)..round_index {
            let outcome = self.game.outcome(past);
            self.record_history(past, outcome);
        }
        info!(
            game = self.game.kind().as_str(),
            round = round_index,
            phase = snapshot.phase.as_str(),
            "engine observing"
        );
        self.start_round(round_index);
        self.step_phases(round_index, Phase::Betting, snapshot.phase, false);
    }

    fn advance(&mut self, (round_index, phase): (u64, Phase), snapshot: &RoundSnapshot) {
        let target = snapshot.round_index;
        if target == round_index {
            self.step_phases(round_index, phase, snapshot.phase, false);
            return;
        }

        // Finish the round in progress before moving on.
        let first_missed = round_index + 1;
        let caught_up = target > first_missed;
        self.step_phases(round_index, phase, Phase::Settled, caught_up);

        if caught_up {
            let missed = target - first_missed;
            let cap = self.history.cap() as u64;
            for past in target.saturating_sub(cap).max(first_missed)..target {
                let outcome = self.game.outcome(past);
                self.record_history(past, outcome);
            }
            info!(
                game = self.game.kind().as_str(),
                from = first_missed,
                to = target - 1,
                missed,
                "caught up on missed rounds"
            );
            self.outbox.push(RoundEvent::CaughtUp {
                from_round: first_missed,
                to_round: target - 1,
                missed,
            });
        }

        self.start_round(target);
        self.step_phases(target, Phase::Betting, snapshot.phase, false);
    }

    fn step_phases(&mut self, round_index: u64, from: Phase, to: Phase, caught_up: bool) {
        let mut phase = from;
        while phase < to {
            let Some(next) = RoundClock::next_phase(phase) else {
                break;
            };
            self.enter_phase(round_index, next, caught_up);
            phase = next;
        }
    }

    fn enter_phase(&mut self, round_index: u64, phase: Phase, caught_up: bool) {
        match phase {
            Phase::Betting => {}
            Phase::Resolving => {
                self.resolve(round_index);
            }
            Phase::Settled => {
                let outcome = self.resolve(round_index);
                self.reveal();
                self.settle_round(round_index, outcome, caught_up);
                self.record_history(round_index, outcome);
                self.outbox.push(RoundEvent::RoundSettled {
                    round_index,
                    outcome,
                });
            }
        }
    }

    fn start_round(&mut self, round_index: u64) {
        self.resolution = None;
        for book in self.books.values_mut() {
            if book.ledger.round_index() != round_index {
                book.ledger.clear(round_index);
                book.cash_out = None;
                book.auto_cash_out = None;
            }
        }
        let commitment = self.game.commitment(round_index);
        debug!(game = self.game.kind().as_str(), round = round_index, "round started");
        self.outbox.push(RoundEvent::RoundStarted {
            round_index,
            commit: commitment.commit,
        });
    }

    /// Outcome of `round_index`, computed once and reused for settlement.
    fn resolve(&mut self, round_index: u64) -> Outcome {
        if let Some(resolution) = &self.resolution {
            if resolution.round_index == round_index {
                return resolution.outcome;
            }
        }
        let outcome = self.game.outcome(round_index);
        self.resolution = Some(Resolution {
            round_index,
            outcome,
            revealed: false,
        });
        for book in self.books.values_mut() {
            if book.ledger.round_index() == round_index {
                book.ledger.lock();
            }
        }
        info!(
            game = self.game.kind().as_str(),
            round = round_index,
            "round resolved"
        );
        outcome
    }

    fn reveal_if_visible(&mut self) {
        let snapshot = self.snapshot;
        let Some(resolution) = &self.resolution else {
            return;
        };
        if resolution.revealed || resolution.round_index != snapshot.round_index {
            return;
        }
        let elapsed_ms = match snapshot.phase {
            Phase::Betting => return,
            Phase::Resolving => snapshot.phase_elapsed_ms,
            Phase::Settled => u64::MAX,
        };
        if self.game.outcome_visible(&resolution.outcome, elapsed_ms) {
            self.reveal();
        }
    }

    fn reveal(&mut self) {
        let Some(resolution) = self.resolution.as_mut() else {
            return;
        };
        if resolution.revealed {
            return;
        }
        resolution.revealed = true;
        let commitment = self.game.commitment(resolution.round_index);
        self.outbox.push(RoundEvent::Revealed {
            round_index: resolution.round_index,
            outcome: resolution.outcome,
            reveal: commitment.reveal,
        });
    }

    fn settle_round(&mut self, round_index: u64, outcome: Outcome, caught_up: bool) {
        let kind = self.game.kind();
        let mut due = Vec::new();
        for (participant, book) in self.books.iter_mut() {
            if book.ledger.round_index() != round_index
                || book.ledger.is_empty()
                || book.pending.is_some()
            {
                continue;
            }
            let position = book.position(kind);
            let payout = self.game.payout(&position, &outcome);
            book.ledger.clear(round_index);
            book.pending = Some(PendingSettlement {
                position,
                outcome,
                payout,
                caught_up,
                deferred: false,
            });
            due.push(participant.clone());
        }
        for participant in due {
            self.try_settle(&participant);
        }
    }

    fn retry_deferred(&mut self) {
        let waiting: Vec<ParticipantId> = self
            .books
            .iter()
            .filter(|(_, book)| book.pending.is_some())
            .map(|(participant, _)| participant.clone())
            .collect();
        for participant in waiting {
            self.try_settle(&participant);
        }
    }

    fn try_settle(&mut self, participant: &str) {
        let kind = self.game.kind();
        let Some((round_index, outcome)) = self
            .books
            .get(participant)
            .and_then(|book| book.pending.as_ref())
            .map(|pending| (pending.position.round_index, pending.outcome))
        else {
            return;
        };

        // Pay from the stored position: it holds every engine's stakes.
        let stored = match self.persistence.load_position(kind, participant) {
            Ok(stored) => stored
                .filter(|stored| stored.round_index == round_index && !stored.is_empty())
                .map(|stored| {
                    let payout = self.game.payout(&stored, &outcome);
                    (stored, payout)
                }),
            Err(err) => {
                self.defer_settlement(participant, round_index, err);
                return;
            }
        };

        let Some(book) = self.books.get_mut(participant) else {
            return;
        };
        let Some(pending) = book.pending.as_mut() else {
            return;
        };
        if let Some((position, payout)) = stored {
            pending.position = position;
            pending.payout = payout;
        }
        let receipt = match self.persistence.record_settlement(
            participant,
            &pending.position,
            pending.payout,
        ) {
            Ok(receipt) => receipt,
            Err(err) => {
                self.defer_settlement(participant, round_index, err);
                return;
            }
        };

        let caught_up = pending.caught_up;
        let settled = match receipt {
            SettlementReceipt::Credited { .. } => {
                Some((pending.position.total_staked(), pending.payout))
            }
            SettlementReceipt::AlreadySettled { previous, .. }
                if previous.round_index == round_index =>
            {
                debug!(participant, round = round_index, "already settled elsewhere");
                Some((previous.staked, previous.payout))
            }
            SettlementReceipt::AlreadySettled { previous, .. } => {
                warn!(
                    participant,
                    round = round_index,
                    settled = previous.round_index,
                    "a later round is already settled; dropping stake"
                );
                None
            }
        };
        book.balance = receipt.balance();
        book.pending = None;
        let Some((staked, payout)) = settled else {
            return;
        };
        info!(
            participant,
            round = round_index,
            staked,
            payout,
            balance = book.balance,
            caught_up,
            "stake settled"
        );
        self.outbox.push(RoundEvent::Settled {
            participant: participant.to_string(),
            round_index,
            staked,
            payout,
            balance: book.balance,
            caught_up,
        });
    }

    fn defer_settlement(&mut self, participant: &str, round_index: u64, err: anyhow::Error) {
        warn!(
            ?err,
            participant,
            round = round_index,
            "settlement not persisted; will retry"
        );
        let Some(pending) = self
            .books
            .get_mut(participant)
            .and_then(|book| book.pending.as_mut())
        else {
            return;
        };
        if !pending.deferred {
            pending.deferred = true;
            self.outbox.push(RoundEvent::SettlementDeferred {
                participant: participant.to_string(),
                round_index,
            });
        }
    }

    fn record_history(&mut self, round_index: u64, outcome: Outcome) {
        let entry = HistoryEntry {
            round_index,
            outcome,
        };
        if !self.history.push(entry) {
            return;
        }
        self.unsaved_history.push_back(entry);
        while self.unsaved_history.len() > MAX_UNSAVED_HISTORY {
            if let Some(dropped) = self.unsaved_history.pop_front() {
                warn!(round = dropped.round_index, "dropping unsaved history entry");
            }
        }
    }

    fn flush_history(&mut self) {
        let kind = self.game.kind();
        while let Some(entry) = self.unsaved_history.front().copied() {
            if let Err(err) = self.persistence.append_history(kind, &entry) {
                warn!(?err, round = entry.round_index, "history not persisted; will retry");
                break;
            }
            self.unsaved_history.pop_front();
        }
    }
}
