use commonware_utils::hex;
use fortune_execution::{ParticipantView, RejectedAction, RoundView};
use fortune_types::{CategoryId, GameKind, HistoryEntry, Multiplier, Outcome, StakeEntry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "playerId")]
        player_id: String,
        game: GameKind,
    },
    #[serde(rename = "leave")]
    Leave {
        #[serde(rename = "requestId")]
        request_id: Option<String>,
        #[serde(rename = "playerId")]
        player_id: String,
        game: GameKind,
    },
    #[serde(rename = "stake")]
    Stake {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "playerId")]
        player_id: String,
        game: GameKind,
        category: CategoryId,
        amount: u64,
    },
    #[serde(rename = "cashOut")]
    CashOut {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "playerId")]
        player_id: String,
    },
    /// `target` is in hundredths (250 = 2.50x); `null` clears it.
    #[serde(rename = "autoCashOut")]
    AutoCashOut {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "playerId")]
        player_id: String,
        target: Option<Multiplier>,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct StateMessage {
    pub game: &'static str,
    #[serde(rename = "roundId")]
    pub round_id: u64,
    pub phase: &'static str,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: u64,
    #[serde(rename = "timeRemainingMs")]
    pub time_remaining_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(rename = "liveMultiplier", skip_serializing_if = "Option::is_none")]
    pub live_multiplier: Option<Multiplier>,
    pub history: Vec<HistoryEntry>,
    pub commit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reveal: Option<String>,
}

impl From<RoundView> for StateMessage {
    fn from(view: RoundView) -> Self {
        Self {
            game: view.game.as_str(),
            round_id: view.round_index,
            phase: view.phase.as_str(),
            elapsed_ms: view.phase_elapsed_ms,
            time_remaining_ms: view.phase_remaining_ms,
            outcome: view.outcome,
            live_multiplier: view.live_multiplier,
            history: view.history,
            commit: hex(&view.commit),
            reveal: view.reveal.map(|reveal| hex(&reveal)),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PlayerMessage {
    pub game: &'static str,
    pub balance: u64,
    #[serde(rename = "roundId")]
    pub round_id: u64,
    #[serde(rename = "myStakes", skip_serializing_if = "Vec::is_empty")]
    pub stakes: Vec<StakeEntry>,
    #[serde(rename = "totalStaked")]
    pub total_staked: u64,
    #[serde(rename = "cashOut", skip_serializing_if = "Option::is_none")]
    pub cash_out: Option<Multiplier>,
    #[serde(rename = "autoCashOut", skip_serializing_if = "Option::is_none")]
    pub auto_cash_out: Option<Multiplier>,
    #[serde(rename = "settlementPending")]
    pub settlement_pending: bool,
}

impl PlayerMessage {
    pub fn new(game: GameKind, view: ParticipantView) -> Self {
        Self {
            game: game.as_str(),
            balance: view.balance,
            round_id: view.round_index,
            stakes: view.stakes,
            total_staked: view.total_staked,
            cash_out: view.cash_out,
            auto_cash_out: view.auto_cash_out,
            settlement_pending: view.settlement_pending,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ResultMessage {
    pub game: &'static str,
    #[serde(rename = "roundId")]
    pub round_id: u64,
    pub staked: u64,
    pub payout: u64,
    pub balance: u64,
    /// Settled after the player or the server was away.
    #[serde(rename = "caughtUp")]
    pub caught_up: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "state")]
    State { payload: StateMessage },
    #[serde(rename = "reveal")]
    Reveal {
        game: &'static str,
        #[serde(rename = "roundId")]
        round_id: u64,
        outcome: Outcome,
        commit: String,
        reveal: String,
    },
    #[serde(rename = "result")]
    Result {
        #[serde(rename = "playerId")]
        player_id: String,
        payload: ResultMessage,
    },
    /// Settlement could not be stored yet and will be retried.
    #[serde(rename = "deferred")]
    Deferred {
        #[serde(rename = "playerId")]
        player_id: String,
        game: &'static str,
        #[serde(rename = "roundId")]
        round_id: u64,
    },
}

impl OutboundEvent {
    /// Player the event is addressed to; `None` for table-wide events.
    pub fn player_id(&self) -> Option<&str> {
        match self {
            OutboundEvent::Result { player_id, .. } | OutboundEvent::Deferred { player_id, .. } => {
                Some(player_id)
            }
            OutboundEvent::State { .. } | OutboundEvent::Reveal { .. } => None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutboundResponse {
    #[serde(rename = "ack")]
    Ack {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        player: Option<PlayerMessage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        payout: Option<u64>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "requestId")]
        request_id: String,
        code: String,
        message: String,
    },
}

impl OutboundResponse {
    pub fn ack(request_id: String, player: Option<PlayerMessage>) -> Self {
        OutboundResponse::Ack {
            request_id,
            player,
            payout: None,
        }
    }

    pub fn rejected(request_id: String, err: &RejectedAction) -> Self {
        OutboundResponse::Error {
            request_id,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stake() {
        let raw = r#"{"type":"stake","requestId":"r1","playerId":"alice","game":"wheel","category":3,"amount":250}"#;
        match serde_json::from_str::<InboundMessage>(raw).unwrap() {
            InboundMessage::Stake {
                request_id,
                player_id,
                game,
                category,
                amount,
            } => {
                assert_eq!(request_id, "r1");
                assert_eq!(player_id, "alice");
                assert_eq!(game, GameKind::Wheel);
                assert_eq!(category, CategoryId(3));
                assert_eq!(amount, 250);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_auto_cash_out_clear() {
        let raw = r#"{"type":"autoCashOut","requestId":"r2","playerId":"bob","target":null}"#;
        match serde_json::from_str::<InboundMessage>(raw).unwrap() {
            InboundMessage::AutoCashOut { target, .. } => assert_eq!(target, None),
            other => panic!("unexpected message: {other:?}"),
        }
        let raw = r#"{"type":"autoCashOut","requestId":"r2","playerId":"bob","target":250}"#;
        match serde_json::from_str::<InboundMessage>(raw).unwrap() {
            InboundMessage::AutoCashOut { target, .. } => {
                assert_eq!(target, Some(Multiplier(250)))
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_game_is_rejected() {
        let raw = r#"{"type":"join","requestId":"r3","playerId":"alice","game":"roulette"}"#;
        assert!(serde_json::from_str::<InboundMessage>(raw).is_err());
    }

    #[test]
    fn test_error_response_shape() {
        let response = OutboundResponse::rejected(
            "r4".to_string(),
            &RejectedAction::CloseOut { remaining_ms: 1_200 },
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["requestId"], "r4");
        assert_eq!(value["code"], "CLOSE_OUT");
    }

    #[test]
    fn test_result_is_addressed() {
        let event = OutboundEvent::Result {
            player_id: "alice".to_string(),
            payload: ResultMessage {
                game: "wheel",
                round_id: 5,
                staked: 100,
                payout: 500,
                balance: 1_400,
                caught_up: false,
            },
        };
        assert_eq!(event.player_id(), Some("alice"));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "result");
        assert_eq!(value["payload"]["payout"], 500);
    }
}
