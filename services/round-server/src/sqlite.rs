use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{anyhow, Context};
use commonware_codec::{DecodeExt, Encode};
use fortune_execution::{
    merge_position, Persistence, SettledStake, SettlementReceipt, StakeCommit,
};
use fortune_types::{GameKind, HistoryEntry, OpenPosition, StakeEntry};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

/// Balances, open positions and round history in one SQLite file.
///
/// Clones share the connection, so the wheel and crash engines settle against
/// the same balance.
#[derive(Clone)]
pub struct SqlitePersistence {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersistence {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("open round persistence db")?;
        init_schema_sqlite(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("round persistence connection poisoned"))
    }
}

fn init_schema_sqlite(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS balances (
             participant TEXT PRIMARY KEY,
             amount INTEGER NOT NULL CHECK (amount >= 0)
         );
         CREATE TABLE IF NOT EXISTS positions (
             game TEXT NOT NULL,
             participant TEXT NOT NULL,
             round_index INTEGER NOT NULL,
             position_bytes BLOB NOT NULL,
             PRIMARY KEY (game, participant)
         );
         CREATE TABLE IF NOT EXISTS settlements (
             game TEXT NOT NULL,
             participant TEXT NOT NULL,
             round_index INTEGER NOT NULL,
             staked INTEGER NOT NULL,
             payout INTEGER NOT NULL,
             PRIMARY KEY (game, participant)
         );
         CREATE TABLE IF NOT EXISTS history (
             game TEXT NOT NULL,
             round_index INTEGER NOT NULL,
             entry_bytes BLOB NOT NULL,
             PRIMARY KEY (game, round_index)
         );",
    )
    .context("init round persistence schema")?;
    Ok(())
}

fn to_sql(value: u64) -> anyhow::Result<i64> {
    i64::try_from(value).with_context(|| format!("{value} does not fit in sqlite integer"))
}

fn from_sql(value: i64) -> anyhow::Result<u64> {
    u64::try_from(value).with_context(|| format!("negative value {value} in sqlite"))
}

fn read_balance(conn: &Connection, participant: &str) -> anyhow::Result<Option<u64>> {
    let stored = conn
        .query_row(
            "SELECT amount FROM balances WHERE participant = ?1",
            params![participant],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    stored.map(from_sql).transpose()
}

fn read_position(
    conn: &Connection,
    game: GameKind,
    participant: &str,
) -> anyhow::Result<Option<OpenPosition>> {
    let bytes = conn
        .query_row(
            "SELECT position_bytes FROM positions WHERE game = ?1 AND participant = ?2",
            params![game.as_str(), participant],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?;
    let Some(bytes) = bytes else {
        return Ok(None);
    };
    match OpenPosition::decode(&mut bytes.as_slice()) {
        Ok(position) => Ok(Some(position)),
        Err(err) => {
            warn!(%err, participant, game = game.as_str(), "dropping undecodable position");
            Ok(None)
        }
    }
}

fn write_position(
    conn: &Connection,
    participant: &str,
    position: &OpenPosition,
) -> anyhow::Result<()> {
    let bytes = position.encode().to_vec();
    conn.execute(
        "INSERT OR REPLACE INTO positions (game, participant, round_index, position_bytes)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            position.game.as_str(),
            participant,
            to_sql(position.round_index)?,
            bytes
        ],
    )
    .context("write position")?;
    Ok(())
}

impl Persistence for SqlitePersistence {
    fn balance(&self, participant: &str) -> anyhow::Result<Option<u64>> {
        let conn = self.lock()?;
        read_balance(&conn, participant)
    }

    fn open_account(&self, participant: &str, initial: u64) -> anyhow::Result<u64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO balances (participant, amount) VALUES (?1, ?2)",
            params![participant, to_sql(initial)?],
        )
        .context("open account")?;
        Ok(read_balance(&conn, participant)?.unwrap_or(initial))
    }

    fn commit_stake(
        &self,
        participant: &str,
        position: &OpenPosition,
        stake: StakeEntry,
    ) -> anyhow::Result<StakeCommit> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let debited = tx.execute(
            "UPDATE balances SET amount = amount - ?1
             WHERE participant = ?2 AND amount >= ?1",
            params![to_sql(stake.amount)?, participant],
        )?;
        if debited == 0 {
            let balance = read_balance(&tx, participant)?.unwrap_or(0);
            return Ok(StakeCommit::InsufficientBalance { balance });
        }
        let stored = read_position(&tx, position.game, participant)?;
        let merged = merge_position(stored, position, Some(stake));
        write_position(&tx, participant, &merged)?;
        let balance = read_balance(&tx, participant)?.unwrap_or(0);
        tx.commit().context("commit stake")?;
        Ok(StakeCommit::Committed {
            balance,
            position: merged,
        })
    }

    fn save_position(&self, participant: &str, position: &OpenPosition) -> anyhow::Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let stored = read_position(&tx, position.game, participant)?;
        write_position(&tx, participant, &merge_position(stored, position, None))?;
        tx.commit().context("commit position")?;
        Ok(())
    }

    fn load_position(
        &self,
        game: GameKind,
        participant: &str,
    ) -> anyhow::Result<Option<OpenPosition>> {
        let conn = self.lock()?;
        read_position(&conn, game, participant)
    }

    fn last_settled_round(&self, game: GameKind, participant: &str) -> anyhow::Result<Option<u64>> {
        let conn = self.lock()?;
        let stored = conn
            .query_row(
                "SELECT round_index FROM settlements WHERE game = ?1 AND participant = ?2",
                params![game.as_str(), participant],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        stored.map(from_sql).transpose()
    }

    fn record_settlement(
        &self,
        participant: &str,
        position: &OpenPosition,
        payout: u64,
    ) -> anyhow::Result<SettlementReceipt> {
        let game = position.game.as_str();
        let round_index = to_sql(position.round_index)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let settled = tx
            .query_row(
                "SELECT round_index, staked, payout FROM settlements
                 WHERE game = ?1 AND participant = ?2",
                params![game, participant],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        if let Some((settled_round, staked, paid)) = settled {
            if settled_round >= round_index {
                let balance = read_balance(&tx, participant)?.unwrap_or(0);
                return Ok(SettlementReceipt::AlreadySettled {
                    balance,
                    previous: SettledStake {
                        round_index: from_sql(settled_round)?,
                        staked: from_sql(staked)?,
                        payout: from_sql(paid)?,
                    },
                });
            }
        }

        let balance = read_balance(&tx, participant)?
            .unwrap_or(0)
            .saturating_add(payout);
        tx.execute(
            "INSERT INTO balances (participant, amount) VALUES (?1, ?2)
             ON CONFLICT(participant) DO UPDATE SET amount = excluded.amount",
            params![participant, to_sql(balance)?],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO settlements (game, participant, round_index, staked, payout)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                game,
                participant,
                round_index,
                to_sql(position.total_staked())?,
                to_sql(payout)?
            ],
        )?;
        tx.execute(
            "DELETE FROM positions
             WHERE game = ?1 AND participant = ?2 AND round_index <= ?3",
            params![game, participant, round_index],
        )?;
        tx.commit().context("commit settlement")?;
        Ok(SettlementReceipt::Credited { balance })
    }

    fn append_history(&self, game: GameKind, entry: &HistoryEntry) -> anyhow::Result<()> {
        let bytes = entry.encode().to_vec();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO history (game, round_index, entry_bytes)
             SELECT ?1, ?2, ?3
             WHERE NOT EXISTS (
                 SELECT 1 FROM history WHERE game = ?1 AND round_index >= ?2
             )",
            params![game.as_str(), to_sql(entry.round_index)?, bytes],
        )
        .context("append history")?;
        Ok(())
    }

    fn recent_history(&self, game: GameKind, limit: usize) -> anyhow::Result<Vec<HistoryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT entry_bytes FROM history WHERE game = ?1
             ORDER BY round_index DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![game.as_str(), limit], |row| {
            row.get::<_, Vec<u8>>(0)
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let bytes = row?;
            let entry = HistoryEntry::decode(&mut bytes.as_slice())
                .context("decode history entry")?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fortune_types::{CategoryId, Multiplier, Outcome, Tier};

    fn open() -> (tempfile::TempDir, SqlitePersistence) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqlitePersistence::open(&dir.path().join("rounds.sqlite")).unwrap();
        (dir, store)
    }

    fn position(game: GameKind, round_index: u64, amount: u64) -> OpenPosition {
        OpenPosition {
            game,
            round_index,
            stakes: vec![StakeEntry {
                category: CategoryId(0),
                amount,
            }],
            cash_out: None,
            auto_cash_out: None,
        }
    }

    fn stake(amount: u64) -> StakeEntry {
        StakeEntry {
            category: CategoryId(0),
            amount,
        }
    }

    fn entry(round_index: u64) -> HistoryEntry {
        HistoryEntry {
            round_index,
            outcome: Outcome::Category {
                id: CategoryId(4),
                tier: Tier::Mid,
                multiplier: Multiplier::from_whole(10),
            },
        }
    }

    #[test]
    fn test_open_account_keeps_existing_balance() {
        let (_dir, store) = open();
        assert_eq!(store.balance("alice").unwrap(), None);
        assert_eq!(store.open_account("alice", 500).unwrap(), 500);
        assert_eq!(store.open_account("alice", 9_000).unwrap(), 500);
    }

    #[test]
    fn test_commit_stake_is_guarded() {
        let (_dir, store) = open();
        store.open_account("alice", 100).unwrap();
        let first = position(GameKind::Wheel, 3, 60);
        assert_eq!(
            store.commit_stake("alice", &first, stake(60)).unwrap(),
            StakeCommit::Committed {
                balance: 40,
                position: first.clone(),
            }
        );
        let second = position(GameKind::Wheel, 3, 110);
        assert_eq!(
            store.commit_stake("alice", &second, stake(50)).unwrap(),
            StakeCommit::InsufficientBalance { balance: 40 }
        );
        assert_eq!(
            store.load_position(GameKind::Wheel, "alice").unwrap(),
            Some(first)
        );
    }

    #[test]
    fn test_settlement_is_idempotent() {
        let (_dir, store) = open();
        store.open_account("alice", 100).unwrap();
        let staked = position(GameKind::Crash, 8, 100);
        store.commit_stake("alice", &staked, stake(100)).unwrap();

        let receipt = store.record_settlement("alice", &staked, 180).unwrap();
        assert_eq!(receipt, SettlementReceipt::Credited { balance: 180 });
        // A replay reports what was credited, not what it asked for.
        let again = store.record_settlement("alice", &staked, 999).unwrap();
        assert_eq!(
            again,
            SettlementReceipt::AlreadySettled {
                balance: 180,
                previous: SettledStake {
                    round_index: 8,
                    staked: 100,
                    payout: 180,
                },
            }
        );
        assert_eq!(store.last_settled_round(GameKind::Crash, "alice").unwrap(), Some(8));
        assert_eq!(store.load_position(GameKind::Crash, "alice").unwrap(), None);
        // The other game is tracked separately.
        assert_eq!(store.last_settled_round(GameKind::Wheel, "alice").unwrap(), None);
    }

    #[test]
    fn test_settlement_keeps_newer_position() {
        let (_dir, store) = open();
        store.open_account("alice", 100).unwrap();
        let newer = position(GameKind::Wheel, 9, 10);
        store.commit_stake("alice", &newer, stake(10)).unwrap();
        store
            .record_settlement("alice", &position(GameKind::Wheel, 8, 10), 0)
            .unwrap();
        assert_eq!(
            store.load_position(GameKind::Wheel, "alice").unwrap(),
            Some(newer)
        );
    }

    #[test]
    fn test_stakes_from_two_writers_are_merged() {
        let (_dir, store) = open();
        store.open_account("alice", 1_000).unwrap();
        store
            .commit_stake("alice", &position(GameKind::Crash, 5, 100), stake(100))
            .unwrap();
        let StakeCommit::Committed { balance, position: merged } = store
            .commit_stake("alice", &position(GameKind::Crash, 5, 40), stake(40))
            .unwrap()
        else {
            panic!("stake refused");
        };
        assert_eq!(balance, 860);
        assert_eq!(merged.total_staked(), 140);

        // A cash-out written from the second writer's view keeps both stakes.
        let mut cashed = position(GameKind::Crash, 5, 40);
        cashed.cash_out = Some(Multiplier(150));
        store.save_position("alice", &cashed).unwrap();
        let stored = store.load_position(GameKind::Crash, "alice").unwrap().unwrap();
        assert_eq!(stored.total_staked(), 140);
        assert_eq!(stored.cash_out, Some(Multiplier(150)));
    }

    #[test]
    fn test_history_is_ordered_and_ignores_replays() {
        let (_dir, store) = open();
        for round in [10, 11, 11, 9, 12] {
            store.append_history(GameKind::Wheel, &entry(round)).unwrap();
        }
        let recent = store.recent_history(GameKind::Wheel, 2).unwrap();
        assert_eq!(recent, vec![entry(12), entry(11)]);
        assert!(store.recent_history(GameKind::Crash, 5).unwrap().is_empty());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.sqlite");
        {
            let store = SqlitePersistence::open(&path).unwrap();
            store.open_account("bob", 250).unwrap();
            store
                .commit_stake("bob", &position(GameKind::Wheel, 4, 50), stake(50))
                .unwrap();
            store.append_history(GameKind::Wheel, &entry(3)).unwrap();
        }
        let store = SqlitePersistence::open(&path).unwrap();
        assert_eq!(store.balance("bob").unwrap(), Some(200));
        assert_eq!(
            store
                .load_position(GameKind::Wheel, "bob")
                .unwrap()
                .map(|position| position.round_index),
            Some(4)
        );
        assert_eq!(store.recent_history(GameKind::Wheel, 10).unwrap(), vec![entry(3)]);
    }
}
