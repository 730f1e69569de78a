use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use serde::Serialize;
use std::collections::VecDeque;

use crate::Outcome;

/// A completed round and its realized outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    #[serde(rename = "roundIndex")]
    pub round_index: u64,
    pub outcome: Outcome,
}

impl Write for HistoryEntry {
    fn write(&self, writer: &mut impl BufMut) {
        self.round_index.write(writer);
        self.outcome.write(writer);
    }
}

impl Read for HistoryEntry {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            round_index: u64::read(reader)?,
            outcome: Outcome::read(reader)?,
        })
    }
}

impl EncodeSize for HistoryEntry {
    fn encode_size(&self) -> usize {
        self.round_index.encode_size() + self.outcome.encode_size()
    }
}

/// Bounded, most-recent-first display history.
///
/// History is a cache: every entry can be recomputed from the round index, so
/// entries older than `cap` are dropped rather than stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    cap: usize,
}

impl History {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a newly completed round.
    ///
    /// Returns `false` (and changes nothing) if the round is not newer than
    /// the most recent entry.
    pub fn push(&mut self, entry: HistoryEntry) -> bool {
        if let Some(latest) = self.entries.front() {
            if entry.round_index <= latest.round_index {
                return false;
            }
        }
        self.entries.push_front(entry);
        self.entries.truncate(self.cap);
        true
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    /// Entries, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<HistoryEntry> {
        self.entries.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
