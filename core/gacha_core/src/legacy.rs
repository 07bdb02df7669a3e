//! One-time migration from the legacy `gacha_items` store.

use rusqlite::{Connection, OpenFlags};
use std::{collections::BTreeSet, path::Path};
use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};
use tracing::info;

use crate::{
    entry::{GachaEntry, GachaProfileId},
    error::{StoreError, StoreResult},
    game::{Game, Server},
    store::{BatchInsertReport, GachaStore},
};

/// Read-only handle on a legacy gacha database.
pub struct LegacyStore {
    conn: Connection,
}

struct LegacyRow {
    id: String,
    uid: String,
    game: String,
    gacha_type: String,
    item_id: String,
    name: Option<String>,
    rank_type: String,
    time: String,
}

impl LegacyStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::LegacyRead(format!("open {}: {e}", path.display())))?;
        Ok(Self { conn })
    }

    /// Reads and converts every legacy row. Any row that cannot be converted
    /// fails the whole read.
    pub fn read_all(&self) -> StoreResult<Vec<GachaEntry>> {
        let rows = self
            .load_rows()
            .map_err(|e| StoreError::LegacyRead(e.to_string()))?;
        rows.into_iter().map(convert_row).collect()
    }

    fn load_rows(&self) -> rusqlite::Result<Vec<LegacyRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uid, game, gacha_type, item_id, name, rank_type, time FROM gacha_items ORDER BY time ASC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LegacyRow {
                id: row.get(0)?,
                uid: row.get(1)?,
                game: row.get(2)?,
                gacha_type: row.get(3)?,
                item_id: row.get(4)?,
                name: row.get(5)?,
                rank_type: row.get(6)?,
                time: row.get(7)?,
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

fn convert_row(row: LegacyRow) -> StoreResult<GachaEntry> {
    let fail = |what: &str| StoreError::LegacyRead(format!("row '{}': {what}", row.id));

    let game: Game = row
        .game
        .parse()
        .map_err(|_| fail(&format!("unknown game '{}'", row.game)))?;
    let uid = row.uid.trim().to_string();
    let server = Server::from_uid(&uid, game)
        .ok_or_else(|| fail(&format!("cannot resolve server for uid '{uid}'")))?;
    let rank_type: u8 = row
        .rank_type
        .trim()
        .parse()
        .map_err(|_| fail(&format!("bad rank_type '{}'", row.rank_type)))?;
    let time = parse_legacy_local_time(&row.time, server.utc_offset())
        .ok_or_else(|| fail(&format!("bad time '{}'", row.time)))?;
    let time = time.format(&Rfc3339).map_err(|_| fail("time out of range"))?;

    Ok(GachaEntry {
        id: row.id.clone(),
        uid,
        game,
        gacha_type: row.gacha_type,
        item_id: row.item_id,
        name: row.name.unwrap_or_default(),
        rank_type,
        time,
    })
}

/// `YYYY-MM-DD HH:MM:SS` in server-local time, returned in UTC.
fn parse_legacy_local_time(s: &str, offset: UtcOffset) -> Option<OffsetDateTime> {
    let (date, clock) = s.trim().split_once(' ')?;
    let parts: Vec<&str> = date.split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let y: i32 = parts[0].parse().ok()?;
    let m: u8 = parts[1].parse().ok()?;
    let d: u8 = parts[2].parse().ok()?;
    let month = time::Month::try_from(m).ok()?;
    let dt = time::Date::from_calendar_date(y, month, d).ok()?;

    let hms: Vec<&str> = clock.split(':').collect();
    if hms.len() != 3 {
        return None;
    }
    let hh: u8 = hms[0].parse().ok()?;
    let mm: u8 = hms[1].parse().ok()?;
    let ss: u8 = hms[2].parse().ok()?;
    Some(
        dt.with_hms(hh, mm, ss)
            .ok()?
            .assume_offset(offset)
            .to_offset(UtcOffset::UTC),
    )
}

/// Reads the whole legacy store, seeds the profile index with the legacy
/// profiles and hands the entries to `batch_insert`.
pub async fn migrate_old_gachas_into_profiles(
    legacy_path: &Path,
    store: &GachaStore,
) -> StoreResult<BatchInsertReport> {
    let entries = {
        let legacy = LegacyStore::open(legacy_path)?;
        legacy.read_all()?
    };
    let seeds: BTreeSet<GachaProfileId> = entries.iter().map(GachaEntry::profile).collect();
    info!(
        store = store.label(),
        entries = entries.len(),
        profiles = seeds.len(),
        "migrating legacy gacha records"
    );

    store.lazy_refresh_profiles(Some(seeds)).await?;
    store.batch_insert(&entries).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn make_legacy_db(dir: &Path, rows: &[[&str; 8]]) -> PathBuf {
        let path = dir.join("legacy.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
CREATE TABLE gacha_items (
  id TEXT, uid TEXT, game TEXT, gacha_type TEXT, item_id TEXT,
  name TEXT, rank_type TEXT, time TEXT, lang TEXT
);
"#,
        )
        .unwrap();
        for r in rows {
            conn.execute(
                "INSERT INTO gacha_items (id, uid, game, gacha_type, item_id, name, rank_type, time, lang) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'zh-cn')",
                (r[0], r[1], r[2], r[3], r[4], r[5], r[6], r[7]),
            )
            .unwrap();
        }
        path
    }

    #[test]
    fn parse_legacy_local_time_shifts_to_utc() {
        let eight = UtcOffset::from_hms(8, 0, 0).unwrap();
        let t = parse_legacy_local_time("2024-03-01 06:30:15", eight).unwrap();
        assert_eq!(t.format(&Rfc3339).unwrap(), "2024-02-29T22:30:15Z");

        let minus_five = UtcOffset::from_hms(-5, 0, 0).unwrap();
        let t = parse_legacy_local_time("2024-03-01 20:00:00", minus_five).unwrap();
        assert_eq!(t.format(&Rfc3339).unwrap(), "2024-03-02T01:00:00Z");

        assert!(parse_legacy_local_time("2024-03-01T06:30:15", eight).is_none());
        assert!(parse_legacy_local_time("2024-13-01 06:30:15", eight).is_none());
    }

    #[test]
    fn read_all_converts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_legacy_db(
            dir.path(),
            &[[
                "1700000000000000001",
                "612345678",
                "genshinImpact",
                "301",
                "10000002",
                "Kamisato Ayaka",
                "5",
                "2024-03-01 20:00:00",
            ]],
        );
        let entries = LegacyStore::open(&path).unwrap().read_all().unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.game, Game::GenshinImpact);
        assert_eq!(e.rank_type, 5);
        assert_eq!(e.time, "2024-03-02T01:00:00Z");
        assert_eq!(e.name, "Kamisato Ayaka");
    }

    #[test]
    fn bad_row_fails_whole_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_legacy_db(
            dir.path(),
            &[
                ["1", "100000001", "GI", "200", "1", "", "3", "2024-01-01 00:00:00"],
                ["2", "100000001", "GI", "200", "1", "", "three", "2024-01-01 00:00:00"],
            ],
        );
        let err = LegacyStore::open(&path).unwrap().read_all().unwrap_err();
        assert!(matches!(err, StoreError::LegacyRead(_)));
    }

    #[test]
    fn missing_file_is_legacy_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LegacyStore::open(&dir.path().join("nope.db")).err().unwrap();
        assert!(matches!(err, StoreError::LegacyRead(_)));
    }

    #[tokio::test]
    async fn migration_inserts_and_reconciles() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_legacy_db(
            dir.path(),
            &[
                ["1", "100000001", "GI", "301", "a", "", "4", "2024-01-01 00:00:00"],
                ["2", "100000001", "GI", "301", "b", "", "3", "2024-01-01 00:00:01"],
                ["3", "700000001", "starRail", "11", "c", "", "5", "2024-01-02 00:00:00"],
            ],
        );
        let store = GachaStore::open_in_memory("background").unwrap();
        store
            .batch_insert(&[GachaEntry {
                id: "2".to_string(),
                uid: "100000001".to_string(),
                game: Game::GenshinImpact,
                gacha_type: "301".to_string(),
                item_id: "b".to_string(),
                name: String::new(),
                rank_type: 3,
                time: "2023-12-31T16:00:01Z".to_string(),
            }])
            .await
            .unwrap();

        let report = migrate_old_gachas_into_profiles(&path, &store).await.unwrap();
        assert_eq!(report.received, 3);
        assert_eq!(report.inserted, 2);
        let keys: Vec<String> = report.profiles.iter().map(|p| p.uid_with_game()).collect();
        assert_eq!(keys, ["GI-100000001", "HSR-700000001"]);
        assert_eq!(store.count_entries().await.unwrap(), 3);

        let again = migrate_old_gachas_into_profiles(&path, &store).await.unwrap();
        assert_eq!(again.inserted, 0);
    }
}
