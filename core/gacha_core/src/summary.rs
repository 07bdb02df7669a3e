use serde::Serialize;
use std::collections::BTreeMap;

use crate::{
    entry::{GachaEntry, GachaProfileId},
    error::StoreResult,
    store::{entry_from_row, GachaStore},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub total: u64,
    pub four_star: u64,
    pub five_star: u64,
    /// Pulls since the latest 5-star in this pool.
    pub pity: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileSummary {
    pub profile: GachaProfileId,
    pub uid_with_game: String,
    pub total: u64,
    pub three_star: u64,
    pub four_star: u64,
    pub five_star: u64,
    pub pools: BTreeMap<String, PoolSummary>,
}

impl GachaStore {
    /// `None` when the profile has no stored entries.
    pub async fn profile_summary(
        &self,
        profile: &GachaProfileId,
    ) -> StoreResult<Option<ProfileSummary>> {
        let entries = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(
                r#"
SELECT id, uid, game, gacha_type, item_id, name, rank_type, time
FROM gacha_entries
WHERE uid = ?1 AND game = ?2
ORDER BY unix_ts ASC, unix_nanos ASC, length(id) ASC, id ASC
"#,
            )?;
            let rows = stmt.query_map((&profile.uid, profile.game), entry_from_row)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            out
        };
        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(summarize(profile, &entries)))
    }
}

/// `entries` must be in chronological order.
fn summarize(profile: &GachaProfileId, entries: &[GachaEntry]) -> ProfileSummary {
    let mut s = ProfileSummary {
        profile: profile.clone(),
        uid_with_game: profile.uid_with_game(),
        total: 0,
        three_star: 0,
        four_star: 0,
        five_star: 0,
        pools: BTreeMap::new(),
    };

    for e in entries {
        s.total += 1;
        let pool = s.pools.entry(e.gacha_type.clone()).or_default();
        pool.total += 1;
        match e.rank_type {
            5 => {
                s.five_star += 1;
                pool.five_star += 1;
                pool.pity = 0;
            }
            4 => {
                s.four_star += 1;
                pool.four_star += 1;
                pool.pity += 1;
            }
            _ => {
                s.three_star += 1;
                pool.pity += 1;
            }
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entry::sample_entry, game::Game};

    fn pull(id: &str, pool: &str, rank: u8, minute: u32) -> GachaEntry {
        let mut e = sample_entry(id, "100", Game::GenshinImpact);
        e.gacha_type = pool.to_string();
        e.rank_type = rank;
        e.time = format!("2024-03-01T00:{minute:02}:00Z");
        e
    }

    #[test]
    fn summarize_counts_ranks_and_pity() {
        let p = GachaProfileId::new("100", Game::GenshinImpact);
        let entries = vec![
            pull("1", "301", 3, 0),
            pull("2", "301", 5, 1),
            pull("3", "301", 4, 2),
            pull("4", "301", 3, 3),
            pull("5", "200", 3, 4),
        ];
        let s = summarize(&p, &entries);
        assert_eq!(s.total, 5);
        assert_eq!((s.three_star, s.four_star, s.five_star), (3, 1, 1));
        assert_eq!(
            s.pools["301"],
            PoolSummary {
                total: 4,
                four_star: 1,
                five_star: 1,
                pity: 2,
            }
        );
        assert_eq!(s.pools["200"].pity, 1);
    }

    #[tokio::test]
    async fn profile_summary_reads_chronologically() {
        let store = GachaStore::open_in_memory("test").unwrap();
        // Inserted out of order; the pity must still follow pull time.
        store
            .batch_insert(&[
                pull("b", "301", 5, 10),
                pull("c", "301", 3, 20),
                pull("a", "301", 3, 5),
            ])
            .await
            .unwrap();
        let p = GachaProfileId::new("100", Game::GenshinImpact);
        let s = store.profile_summary(&p).await.unwrap().unwrap();
        assert_eq!(s.pools["301"].pity, 1);
        assert_eq!(s.uid_with_game, "GI-100");

        let missing = GachaProfileId::new("999", Game::StarRail);
        assert!(store.profile_summary(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pity_resets_on_a_fractional_second_pull() {
        let store = GachaStore::open_in_memory("test").unwrap();
        let mut five = pull("b", "301", 5, 0);
        five.time = "2024-03-01T00:00:00.5Z".to_string();
        store
            .batch_insert(&[five, pull("a", "301", 3, 0)])
            .await
            .unwrap();
        let p = GachaProfileId::new("100", Game::GenshinImpact);
        let s = store.profile_summary(&p).await.unwrap().unwrap();
        assert_eq!(s.pools["301"].pity, 0);
    }

    #[tokio::test]
    async fn same_second_pulls_follow_numeric_id_order() {
        let store = GachaStore::open_in_memory("test").unwrap();
        // "10" sorts before "9" as text but was pulled after it.
        store
            .batch_insert(&[pull("9", "301", 5, 0), pull("10", "301", 3, 0)])
            .await
            .unwrap();
        let p = GachaProfileId::new("100", Game::GenshinImpact);
        let s = store.profile_summary(&p).await.unwrap().unwrap();
        assert_eq!(s.pools["301"].pity, 1);
        assert_eq!(s.pools["301"].five_star, 1);
    }
}
