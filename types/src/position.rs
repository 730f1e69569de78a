use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, ReadRangeExt, Write};
use serde::Serialize;

use crate::{CategoryId, GameKind, Multiplier, MAX_POSITION_STAKES};

/// Amount staked on one category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StakeEntry {
    pub category: CategoryId,
    pub amount: u64,
}

impl Write for StakeEntry {
    fn write(&self, writer: &mut impl BufMut) {
        self.category.write(writer);
        self.amount.write(writer);
    }
}

impl Read for StakeEntry {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            category: CategoryId::read(reader)?,
            amount: u64::read(reader)?,
        })
    }
}

impl EncodeSize for StakeEntry {
    fn encode_size(&self) -> usize {
        self.category.encode_size() + self.amount.encode_size()
    }
}

/// A participant's stakes for one round that have been debited but not yet
/// settled.
///
/// Positions are persisted so that a participant who leaves mid-round is still
/// settled when any engine next observes them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OpenPosition {
    pub game: GameKind,
    #[serde(rename = "roundIndex")]
    pub round_index: u64,
    pub stakes: Vec<StakeEntry>,
    /// Multiplier locked in by an explicit cash-out (crash only).
    #[serde(rename = "cashOut", skip_serializing_if = "Option::is_none")]
    pub cash_out: Option<Multiplier>,
    /// Target multiplier at which the stake cashes out on its own (crash only).
    #[serde(rename = "autoCashOut", skip_serializing_if = "Option::is_none")]
    pub auto_cash_out: Option<Multiplier>,
}

impl OpenPosition {
    pub fn new(game: GameKind, round_index: u64) -> Self {
        Self {
            game,
            round_index,
            stakes: Vec::new(),
            cash_out: None,
            auto_cash_out: None,
        }
    }

    pub fn total_staked(&self) -> u64 {
        self.stakes
            .iter()
            .fold(0u64, |acc, stake| acc.saturating_add(stake.amount))
    }

    pub fn staked_on(&self, category: CategoryId) -> u64 {
        self.stakes
            .iter()
            .filter(|stake| stake.category == category)
            .fold(0u64, |acc, stake| acc.saturating_add(stake.amount))
    }

    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }

    /// Fold `stake` into the entry for its category.
    pub fn add_stake(&mut self, stake: StakeEntry) {
        match self
            .stakes
            .iter_mut()
            .find(|entry| entry.category == stake.category)
        {
            Some(entry) => entry.amount = entry.amount.saturating_add(stake.amount),
            None => self.stakes.push(stake),
        }
    }

    /// Take the cash-out settings of `other`, a write for the same round.
    ///
    /// Stakes are left as stored and a recorded cash-out is never undone.
    pub fn absorb_settings(&mut self, other: &OpenPosition) {
        self.cash_out = self.cash_out.or(other.cash_out);
        self.auto_cash_out = other.auto_cash_out;
    }

    /// Whether `other` refers to the same game round as `self`.
    pub fn same_round(&self, other: &OpenPosition) -> bool {
        self.game == other.game && self.round_index == other.round_index
    }
}

impl Write for OpenPosition {
    fn write(&self, writer: &mut impl BufMut) {
        self.game.write(writer);
        self.round_index.write(writer);
        self.stakes.write(writer);
        self.cash_out.write(writer);
        self.auto_cash_out.write(writer);
    }
}

impl Read for OpenPosition {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let game = GameKind::read(reader)?;
        let round_index = u64::read(reader)?;
        let stakes = Vec::<StakeEntry>::read_range(reader, 0..=MAX_POSITION_STAKES)?;
        let cash_out = Option::<Multiplier>::read(reader)?;
        let auto_cash_out = Option::<Multiplier>::read(reader)?;
        if game == GameKind::Wheel && (cash_out.is_some() || auto_cash_out.is_some()) {
            return Err(Error::Invalid("OpenPosition", "cash-out on wheel position"));
        }
        Ok(Self {
            game,
            round_index,
            stakes,
            cash_out,
            auto_cash_out,
        })
    }
}

impl EncodeSize for OpenPosition {
    fn encode_size(&self) -> usize {
        self.game.encode_size()
            + self.round_index.encode_size()
            + self.stakes.encode_size()
            + self.cash_out.encode_size()
            + self.auto_cash_out.encode_size()
    }
}
