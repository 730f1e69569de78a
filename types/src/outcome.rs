use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point payout multiplier in hundredths (`250` is 2.50x).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiplier(pub u32);

impl Multiplier {
    pub const SCALE: u32 = 100;
    pub const ONE: Multiplier = Multiplier(100);

    pub const fn from_whole(value: u32) -> Self {
        Multiplier(value.saturating_mul(Self::SCALE))
    }

    pub fn hundredths(&self) -> u32 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.0) / f64::from(Self::SCALE)
    }

    /// Gross return for `stake` at this multiplier, rounded down.
    pub fn apply(&self, stake: u64) -> u64 {
        let gross = u128::from(stake) * u128::from(self.0) / u128::from(Self::SCALE);
        gross.min(u128::from(u64::MAX)) as u64
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}x", self.0 / Self::SCALE, self.0 % Self::SCALE)
    }
}

impl Write for Multiplier {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for Multiplier {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Multiplier(u32::read(reader)?))
    }
}

impl FixedSize for Multiplier {
    const SIZE: usize = u32::SIZE;
}

/// Index of a wheel category in its configured (stable) order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub u8);

impl Write for CategoryId {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for CategoryId {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(CategoryId(u8::read(reader)?))
    }
}

impl FixedSize for CategoryId {
    const SIZE: usize = u8::SIZE;
}

/// Payout tier of a wheel category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Tier {
    Low = 0,
    Mid = 1,
    High = 2,
}

impl TryFrom<u8> for Tier {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Tier::Low),
            1 => Ok(Tier::Mid),
            2 => Ok(Tier::High),
            _ => Err(()),
        }
    }
}

impl Write for Tier {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for Tier {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = u8::read(reader)?;
        Tier::try_from(value).map_err(|_| Error::InvalidEnum(value))
    }
}

impl FixedSize for Tier {
    const SIZE: usize = 1;
}

/// Realized result of a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Outcome {
    /// The wheel stopped on `id`.
    Category {
        id: CategoryId,
        tier: Tier,
        multiplier: Multiplier,
    },
    /// The rocket crashed at `point`.
    Crash {
        point: Multiplier,
        #[serde(rename = "highTier")]
        high_tier: bool,
    },
}

impl Outcome {
    /// Whether this outcome is a "big win", which resets the wheel streak.
    pub fn is_high_tier(&self) -> bool {
        match self {
            Outcome::Category { tier, .. } => *tier == Tier::High,
            Outcome::Crash { high_tier, .. } => *high_tier,
        }
    }

    pub fn category(&self) -> Option<CategoryId> {
        match self {
            Outcome::Category { id, .. } => Some(*id),
            Outcome::Crash { .. } => None,
        }
    }

    pub fn crash_point(&self) -> Option<Multiplier> {
        match self {
            Outcome::Category { .. } => None,
            Outcome::Crash { point, .. } => Some(*point),
        }
    }

    /// Multiplier paid to a winning stake.
    pub fn multiplier(&self) -> Multiplier {
        match self {
            Outcome::Category { multiplier, .. } => *multiplier,
            Outcome::Crash { point, .. } => *point,
        }
    }
}

impl Write for Outcome {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Outcome::Category {
                id,
                tier,
                multiplier,
            } => {
                0u8.write(writer);
                id.write(writer);
                tier.write(writer);
                multiplier.write(writer);
            }
            Outcome::Crash { point, high_tier } => {
                1u8.write(writer);
                point.write(writer);
                high_tier.write(writer);
            }
        }
    }
}

impl Read for Outcome {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Outcome::Category {
                id: CategoryId::read(reader)?,
                tier: Tier::read(reader)?,
                multiplier: Multiplier::read(reader)?,
            }),
            1 => {
                let point = Multiplier::read(reader)?;
                if point < Multiplier::ONE {
                    return Err(Error::Invalid("Outcome", "crash point below 1.00x"));
                }
                Ok(Outcome::Crash {
                    point,
                    high_tier: bool::read(reader)?,
                })
            }
            _ => Err(Error::InvalidEnum(kind)),
        }
    }
}

impl EncodeSize for Outcome {
    fn encode_size(&self) -> usize {
        1 + match self {
            Outcome::Category { .. } => CategoryId::SIZE + Tier::SIZE + Multiplier::SIZE,
            Outcome::Crash { .. } => Multiplier::SIZE + 1,
        }
    }
}
