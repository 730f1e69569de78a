use bytes::{Buf, BufMut};
use commonware_codec::{Error, FixedSize, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};

/// The two round-based games served by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum GameKind {
    /// "Fruity Fortune": a weighted multi-outcome wheel.
    Wheel = 0,
    /// A rocket whose multiplier climbs until it crashes.
    Crash = 1,
}

impl GameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameKind::Wheel => "wheel",
            GameKind::Crash => "crash",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "wheel" => Some(GameKind::Wheel),
            "crash" => Some(GameKind::Crash),
            _ => None,
        }
    }
}

impl TryFrom<u8> for GameKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GameKind::Wheel),
            1 => Ok(GameKind::Crash),
            _ => Err(()),
        }
    }
}

impl Write for GameKind {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for GameKind {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = u8::read(reader)?;
        GameKind::try_from(value).map_err(|_| Error::InvalidEnum(value))
    }
}

impl FixedSize for GameKind {
    const SIZE: usize = 1;
}

/// Phase of a round as derived from the round clock.
///
/// Phases are ordered: a round always moves `Betting -> Resolving -> Settled`
/// before the next round's `Betting` begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Phase {
    Betting = 0,
    Resolving = 1,
    Settled = 2,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Betting, Phase::Resolving, Phase::Settled];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Betting => "betting",
            Phase::Resolving => "resolving",
            Phase::Settled => "settled",
        }
    }
}

impl TryFrom<u8> for Phase {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Phase::Betting),
            1 => Ok(Phase::Resolving),
            2 => Ok(Phase::Settled),
            _ => Err(()),
        }
    }
}

impl Write for Phase {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for Phase {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = u8::read(reader)?;
        Phase::try_from(value).map_err(|_| Error::InvalidEnum(value))
    }
}

impl FixedSize for Phase {
    const SIZE: usize = 1;
}
