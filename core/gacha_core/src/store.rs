use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path, sync::Arc, time::Duration};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    entry::{pull_sort_key, GachaEntry, GachaProfileId},
    error::StoreResult,
    game::Game,
    profiles,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Durable gacha entry storage plus the derived profile index.
///
/// Every operation on one instance runs under the same connection lock, so an
/// instance is a single writer. Separate instances over the same file (the
/// foreground/background pair) serialize through SQLite's own write lock:
/// WAL mode, a busy timeout and `BEGIN IMMEDIATE` for every write.
#[derive(Clone)]
pub struct GachaStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
    label: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchInsertReport {
    pub received: usize,
    pub inserted: usize,
    pub skipped_duplicates: usize,
    pub profiles: Vec<GachaProfileId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WipeReport {
    pub entries_deleted: i64,
    pub profiles_deleted: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryFilter {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub game: Option<Game>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl GachaStore {
    pub fn open(path: &Path, label: &'static str) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, label)
    }

    pub fn open_in_memory(label: &'static str) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, label)
    }

    fn from_connection(conn: Connection, label: &'static str) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        init_db(&conn)?;
        debug!(store = label, "gacha store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            label,
        })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Inserts every entry whose id is not stored yet, then rebuilds the
    /// profile index. Both happen in one transaction: on error nothing is
    /// applied.
    pub async fn batch_insert(&self, entries: &[GachaEntry]) -> StoreResult<BatchInsertReport> {
        let validated = entries
            .iter()
            .map(GachaEntry::validated_with_time)
            .collect::<StoreResult<Vec<_>>>()?;

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = insert_entries(&tx, &validated)?;
        let profiles = profiles::refresh_all_profiles_in(&tx)?;
        tx.commit()?;

        let report = BatchInsertReport {
            received: entries.len(),
            inserted,
            skipped_duplicates: entries.len() - inserted,
            profiles,
        };
        info!(
            store = self.label,
            received = report.received,
            inserted = report.inserted,
            profiles = report.profiles.len(),
            "batch insert committed"
        );
        Ok(report)
    }

    pub async fn list_entries(&self, filter: &EntryFilter) -> StoreResult<Vec<GachaEntry>> {
        let conn = self.conn.lock().await;
        Ok(list_entries(&conn, filter)?)
    }

    pub async fn count_entries(&self) -> StoreResult<u64> {
        let conn = self.conn.lock().await;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM gacha_entries", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Full data reset: drops every entry and every profile.
    pub async fn wipe_all(&self) -> StoreResult<WipeReport> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let entries_deleted = tx.execute("DELETE FROM gacha_entries", [])? as i64;
        let profiles_deleted = tx.execute("DELETE FROM gacha_profiles", [])? as i64;
        tx.commit()?;
        info!(store = self.label, entries_deleted, profiles_deleted, "gacha data wiped");
        Ok(WipeReport {
            entries_deleted,
            profiles_deleted,
        })
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS gacha_entries (
  id TEXT PRIMARY KEY,
  uid TEXT NOT NULL,
  game TEXT NOT NULL,
  gacha_type TEXT NOT NULL,
  item_id TEXT NOT NULL,
  name TEXT NOT NULL DEFAULT '',
  rank_type INTEGER NOT NULL,
  time TEXT NOT NULL,
  unix_ts INTEGER NOT NULL DEFAULT 0,
  unix_nanos INTEGER NOT NULL DEFAULT 0,
  inserted_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_gacha_entries_uid_game ON gacha_entries(uid, game);

CREATE TABLE IF NOT EXISTS gacha_profiles (
  uid_with_game TEXT PRIMARY KEY,
  uid TEXT NOT NULL,
  game TEXT NOT NULL,
  ord INTEGER NOT NULL
);
"#,
    )?;
    ensure_gacha_entries_columns(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_gacha_entries_pulled ON gacha_entries(unix_ts, unix_nanos)",
        [],
    )?;
    Ok(())
}

/// Older databases ordered pulls by the `time` text. Add the instant columns
/// and fill them from `time`.
fn ensure_gacha_entries_columns(conn: &Connection) -> rusqlite::Result<()> {
    let mut cols: HashSet<String> = HashSet::new();
    {
        let mut stmt = conn.prepare("PRAGMA table_info(gacha_entries)")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
        for r in rows {
            cols.insert(r?);
        }
    }
    if cols.contains("unix_ts") {
        return Ok(());
    }

    conn.execute(
        "ALTER TABLE gacha_entries ADD COLUMN unix_ts INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    conn.execute(
        "ALTER TABLE gacha_entries ADD COLUMN unix_nanos INTEGER NOT NULL DEFAULT 0",
        [],
    )?;

    let mut pending: Vec<(String, (i64, i64))> = Vec::new();
    {
        let mut select = conn.prepare("SELECT id, time FROM gacha_entries")?;
        let rows = select.query_map([], |row| {
            let id: String = row.get(0)?;
            let ts_s: String = row.get(1)?;
            let ts = OffsetDateTime::parse(&ts_s, &Rfc3339).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Ok((id, pull_sort_key(ts)))
        })?;
        for r in rows {
            pending.push(r?);
        }
    }
    let mut update =
        conn.prepare("UPDATE gacha_entries SET unix_ts = ?1, unix_nanos = ?2 WHERE id = ?3")?;
    for (id, (secs, nanos)) in &pending {
        update.execute((secs, nanos, id))?;
    }
    let backfilled = pending.len();
    info!(backfilled, "gacha_entries upgraded with pull instants");
    Ok(())
}

/// Returns how many rows were actually written. Ids already stored, or seen
/// earlier in the same batch, are skipped by the primary key.
fn insert_entries(
    conn: &Connection,
    entries: &[(GachaEntry, OffsetDateTime)],
) -> rusqlite::Result<usize> {
    let inserted_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    let mut stmt = conn.prepare(
        r#"
INSERT INTO gacha_entries (id, uid, game, gacha_type, item_id, name, rank_type, time, unix_ts, unix_nanos, inserted_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT(id) DO NOTHING
"#,
    )?;
    let mut inserted = 0;
    for (e, ts) in entries {
        let (unix_ts, unix_nanos) = pull_sort_key(*ts);
        inserted += stmt.execute((
            &e.id,
            &e.uid,
            e.game,
            &e.gacha_type,
            &e.item_id,
            &e.name,
            e.rank_type,
            &e.time,
            unix_ts,
            unix_nanos,
            &inserted_at,
        ))?;
    }
    Ok(inserted)
}

pub(crate) fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GachaEntry> {
    Ok(GachaEntry {
        id: row.get(0)?,
        uid: row.get(1)?,
        game: row.get(2)?,
        gacha_type: row.get(3)?,
        item_id: row.get(4)?,
        name: row.get(5)?,
        rank_type: row.get(6)?,
        time: row.get(7)?,
    })
}

fn list_entries(conn: &Connection, filter: &EntryFilter) -> rusqlite::Result<Vec<GachaEntry>> {
    let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let mut stmt = conn.prepare(
        r#"
SELECT id, uid, game, gacha_type, item_id, name, rank_type, time
FROM gacha_entries
WHERE (?1 IS NULL OR uid = ?1) AND (?2 IS NULL OR game = ?2)
ORDER BY unix_ts DESC, unix_nanos DESC, length(id) DESC, id DESC
LIMIT ?3
"#,
    )?;
    let rows = stmt.query_map(
        (filter.uid.as_deref(), filter.game, limit as i64),
        entry_from_row,
    )?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}
