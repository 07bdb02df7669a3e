//! Profile index reconciliation.
//!
//! The `gacha_profiles` table has no lifecycle of its own: every pass deletes
//! all rows and re-inserts the full set, ordered by `uid_with_game`.

use rusqlite::{Connection, TransactionBehavior};
use std::collections::BTreeSet;
use tracing::debug;

use crate::{entry::GachaProfileId, error::StoreResult, store::GachaStore};

impl GachaStore {
    /// Unions the profiles already indexed with every (uid, game) pair found
    /// among stored entries and rewrites the index.
    pub async fn refresh_all_profiles(&self) -> StoreResult<Vec<GachaProfileId>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let profiles = refresh_all_profiles_in(&tx)?;
        tx.commit()?;
        Ok(profiles)
    }

    /// Merges `new_profiles` into the existing index without scanning
    /// entries. Used to seed profiles ahead of an import.
    pub async fn lazy_refresh_profiles(
        &self,
        new_profiles: Option<BTreeSet<GachaProfileId>>,
    ) -> StoreResult<Vec<GachaProfileId>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut profiles = new_profiles.unwrap_or_default();
        profiles.extend(load_profiles(&tx)?);
        let out = rewrite_profiles(&tx, &profiles)?;
        tx.commit()?;
        Ok(out)
    }

    pub async fn list_profiles(&self) -> StoreResult<Vec<GachaProfileId>> {
        let conn = self.conn.lock().await;
        Ok(load_profiles(&conn)?)
    }
}

pub(crate) fn refresh_all_profiles_in(conn: &Connection) -> rusqlite::Result<Vec<GachaProfileId>> {
    let mut profiles: BTreeSet<GachaProfileId> = load_profiles(conn)?.into_iter().collect();
    let existing = profiles.len();
    profiles.extend(derive_profiles_from_entries(conn)?);
    debug!(
        existing,
        derived_new = profiles.len() - existing,
        "rebuilding profile index"
    );
    rewrite_profiles(conn, &profiles)
}

fn load_profiles(conn: &Connection) -> rusqlite::Result<Vec<GachaProfileId>> {
    let mut stmt = conn.prepare("SELECT uid, game FROM gacha_profiles ORDER BY ord ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok(GachaProfileId {
            uid: row.get(0)?,
            game: row.get(1)?,
        })
    })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn derive_profiles_from_entries(conn: &Connection) -> rusqlite::Result<Vec<GachaProfileId>> {
    let mut stmt = conn.prepare("SELECT DISTINCT uid, game FROM gacha_entries")?;
    let rows = stmt.query_map([], |row| {
        Ok(GachaProfileId {
            uid: row.get(0)?,
            game: row.get(1)?,
        })
    })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn rewrite_profiles(
    conn: &Connection,
    profiles: &BTreeSet<GachaProfileId>,
) -> rusqlite::Result<Vec<GachaProfileId>> {
    conn.execute("DELETE FROM gacha_profiles", [])?;
    let mut stmt = conn.prepare(
        "INSERT INTO gacha_profiles (uid_with_game, uid, game, ord) VALUES (?1, ?2, ?3, ?4)",
    )?;
    // BTreeSet iterates in uid_with_game order.
    for (ord, p) in profiles.iter().enumerate() {
        stmt.execute((p.uid_with_game(), &p.uid, p.game, ord as i64))?;
    }
    Ok(profiles.iter().cloned().collect())
}
