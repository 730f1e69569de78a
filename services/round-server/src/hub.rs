use anyhow::Context;
use commonware_utils::hex;
use fortune_execution::{
    compute_commit, Clock, CrashGenerator, OutcomeGenerator, ParticipantView, Persistence,
    RejectedAction, RoundEngine, RoundEvent, RoundView, StakeReceipt, WheelGenerator,
};
use fortune_types::{CategoryId, GameConfig, GameKind, HistoryEntry};
use tracing::{debug, info, warn};

use crate::protocol::{
    InboundMessage, OutboundEvent, OutboundResponse, PlayerMessage, ResultMessage, StateMessage,
};

/// The calls the hub makes on an engine without caring which game it runs.
trait Table {
    fn poll(&mut self) -> Vec<RoundEvent>;
    fn drain_events(&mut self) -> Vec<RoundEvent>;
    fn join(&mut self, participant: &str) -> Result<ParticipantView, RejectedAction>;
    fn leave(&mut self, participant: &str) -> bool;
    fn place_stake(
        &mut self,
        participant: &str,
        category: CategoryId,
        amount: u64,
    ) -> Result<StakeReceipt, RejectedAction>;
    fn current_state(&self) -> RoundView;
    fn participant_view(&self, participant: &str) -> Option<ParticipantView>;
}

impl<G: OutcomeGenerator, P: Persistence, C: Clock> Table for RoundEngine<G, P, C> {
    fn poll(&mut self) -> Vec<RoundEvent> {
        RoundEngine::poll(self)
    }

    fn drain_events(&mut self) -> Vec<RoundEvent> {
        RoundEngine::drain_events(self)
    }

    fn join(&mut self, participant: &str) -> Result<ParticipantView, RejectedAction> {
        RoundEngine::join(self, participant)
    }

    fn leave(&mut self, participant: &str) -> bool {
        RoundEngine::leave(self, participant)
    }

    fn place_stake(
        &mut self,
        participant: &str,
        category: CategoryId,
        amount: u64,
    ) -> Result<StakeReceipt, RejectedAction> {
        RoundEngine::place_stake(self, participant, category, amount)
    }

    fn current_state(&self) -> RoundView {
        RoundEngine::current_state(self)
    }

    fn participant_view(&self, participant: &str) -> Option<ParticipantView> {
        RoundEngine::participant_view(self, participant)
    }
}

/// Both games, sharing one store and one clock.
pub struct GameHub<P, C> {
    wheel: RoundEngine<WheelGenerator, P, C>,
    crash: RoundEngine<CrashGenerator, P, C>,
    persistence: P,
    starting_balance: u64,
}

impl<P: Persistence + Clone, C: Clock + Clone> GameHub<P, C> {
    pub fn new(
        wheel: &GameConfig,
        crash: &GameConfig,
        persistence: P,
        clock: C,
        starting_balance: u64,
    ) -> anyhow::Result<Self> {
        let wheel_game = WheelGenerator::from_game_config(wheel).context("wheel config")?;
        let crash_game = CrashGenerator::from_game_config(crash).context("crash config")?;
        let wheel = RoundEngine::new(wheel, wheel_game, persistence.clone(), clock.clone())
            .context("wheel engine")?;
        let crash = RoundEngine::new(crash, crash_game, persistence.clone(), clock)
            .context("crash engine")?;
        Ok(Self {
            wheel,
            crash,
            persistence,
            starting_balance,
        })
    }

    fn table(&self, game: GameKind) -> &dyn Table {
        match game {
            GameKind::Wheel => &self.wheel,
            GameKind::Crash => &self.crash,
        }
    }

    fn table_mut(&mut self, game: GameKind) -> &mut dyn Table {
        match game {
            GameKind::Wheel => &mut self.wheel,
            GameKind::Crash => &mut self.crash,
        }
    }

    /// Advance both games to the current time. Always ends with a fresh
    /// state message per game.
    pub fn tick(&mut self) -> Vec<OutboundEvent> {
        let mut outbound = Vec::new();
        for game in [GameKind::Wheel, GameKind::Crash] {
            let events = self.table_mut(game).poll();
            outbound.extend(translate(game, events));
            outbound.push(OutboundEvent::State {
                payload: self.state(game),
            });
        }
        outbound
    }

    pub fn state(&self, game: GameKind) -> StateMessage {
        StateMessage::from(self.table(game).current_state())
    }

    /// Stored history, most recent first.
    pub fn history(&self, game: GameKind, limit: usize) -> anyhow::Result<Vec<HistoryEntry>> {
        self.persistence.recent_history(game, limit)
    }

    /// Apply one client request. Returns the reply (if the request wants one)
    /// and any events the request caused.
    pub fn handle(
        &mut self,
        inbound: InboundMessage,
    ) -> (Option<OutboundResponse>, Vec<OutboundEvent>) {
        match inbound {
            InboundMessage::Join {
                request_id,
                player_id,
                game,
            } => {
                if let Err(err) = self
                    .persistence
                    .open_account(&player_id, self.starting_balance)
                {
                    warn!(?err, player_id, "failed to open account");
                    let rejected = RejectedAction::Persistence(format!("{err:#}"));
                    return (Some(OutboundResponse::rejected(request_id, &rejected)), Vec::new());
                }
                let result = self.table_mut(game).join(&player_id);
                let response = match result {
                    Ok(view) => {
                        OutboundResponse::ack(request_id, Some(PlayerMessage::new(game, view)))
                    }
                    Err(err) => OutboundResponse::rejected(request_id, &err),
                };
                (Some(response), self.drain(game))
            }
            InboundMessage::Leave {
                request_id,
                player_id,
                game,
            } => {
                if !self.table_mut(game).leave(&player_id) {
                    debug!(player_id, game = game.as_str(), "left with an open stake");
                }
                (request_id.map(|id| OutboundResponse::ack(id, None)), Vec::new())
            }
            InboundMessage::Stake {
                request_id,
                player_id,
                game,
                category,
                amount,
            } => {
                let table = self.table_mut(game);
                let response = match table.place_stake(&player_id, category, amount) {
                    Ok(_) => OutboundResponse::ack(
                        request_id,
                        table
                            .participant_view(&player_id)
                            .map(|view| PlayerMessage::new(game, view)),
                    ),
                    Err(err) => OutboundResponse::rejected(request_id, &err),
                };
                (Some(response), self.drain(game))
            }
            InboundMessage::CashOut {
                request_id,
                player_id,
            } => {
                let response = match self.crash.cash_out(&player_id) {
                    Ok(receipt) => OutboundResponse::Ack {
                        request_id,
                        player: self
                            .crash
                            .participant_view(&player_id)
                            .map(|view| PlayerMessage::new(GameKind::Crash, view)),
                        payout: Some(receipt.payout),
                    },
                    Err(err) => OutboundResponse::rejected(request_id, &err),
                };
                (Some(response), self.drain(GameKind::Crash))
            }
            InboundMessage::AutoCashOut {
                request_id,
                player_id,
                target,
            } => {
                let response = match self.crash.set_auto_cash_out(&player_id, target) {
                    Ok(()) => OutboundResponse::ack(
                        request_id,
                        self.crash
                            .participant_view(&player_id)
                            .map(|view| PlayerMessage::new(GameKind::Crash, view)),
                    ),
                    Err(err) => OutboundResponse::rejected(request_id, &err),
                };
                (Some(response), self.drain(GameKind::Crash))
            }
        }
    }

    /// Stop serving `player_id` in both games after their last connection
    /// closed. An open stake keeps them until it settles.
    pub fn disconnect(&mut self, player_id: &str) {
        for game in [GameKind::Wheel, GameKind::Crash] {
            if !self.table_mut(game).leave(player_id) {
                debug!(player_id, game = game.as_str(), "disconnected with an open stake");
            }
        }
    }

    fn drain(&mut self, game: GameKind) -> Vec<OutboundEvent> {
        let events = self.table_mut(game).drain_events();
        translate(game, events)
    }
}

fn translate(game: GameKind, events: Vec<RoundEvent>) -> Vec<OutboundEvent> {
    let mut outbound = Vec::new();
    for event in events {
        match event {
            RoundEvent::RoundStarted { round_index, .. } => {
                debug!(game = game.as_str(), round = round_index, "round started");
            }
            RoundEvent::Revealed {
                round_index,
                outcome,
                reveal,
            } => outbound.push(OutboundEvent::Reveal {
                game: game.as_str(),
                round_id: round_index,
                outcome,
                commit: hex(&compute_commit(&reveal)),
                reveal: hex(&reveal),
            }),
            RoundEvent::Settled {
                participant,
                round_index,
                staked,
                payout,
                balance,
                caught_up,
            } => outbound.push(OutboundEvent::Result {
                player_id: participant,
                payload: ResultMessage {
                    game: game.as_str(),
                    round_id: round_index,
                    staked,
                    payout,
                    balance,
                    caught_up,
                },
            }),
            RoundEvent::SettlementDeferred {
                participant,
                round_index,
            } => outbound.push(OutboundEvent::Deferred {
                player_id: participant,
                game: game.as_str(),
                round_id: round_index,
            }),
            RoundEvent::RoundSettled { round_index, .. } => {
                debug!(game = game.as_str(), round = round_index, "round settled");
            }
            RoundEvent::CaughtUp {
                from_round,
                to_round,
                missed,
            } => {
                info!(
                    game = game.as_str(),
                    from_round, to_round, missed, "caught up on unobserved rounds"
                );
            }
        }
    }
    outbound
}
