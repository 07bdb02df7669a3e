use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    error::{StoreError, StoreResult},
    game::Game,
};

/// One gacha pull. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct GachaEntry {
    pub id: String,
    pub uid: String,
    pub game: Game,
    pub gacha_type: String,
    pub item_id: String,
    #[serde(default)]
    pub name: String,
    pub rank_type: u8,
    /// RFC 3339.
    pub time: String,
}

impl GachaEntry {
    pub fn profile(&self) -> GachaProfileId {
        GachaProfileId::new(self.uid.clone(), self.game)
    }

    /// Checks the entry and returns a copy whose `time` is normalized to UTC.
    pub fn validated(&self) -> StoreResult<GachaEntry> {
        self.validated_with_time().map(|(entry, _)| entry)
    }

    pub(crate) fn validated_with_time(&self) -> StoreResult<(GachaEntry, OffsetDateTime)> {
        let invalid = |reason: &str| StoreError::InvalidEntry {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.id.trim().is_empty() {
            return Err(invalid("empty id"));
        }
        let uid = self.uid.trim();
        if uid.is_empty() || !uid.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("uid must be a non-empty digit string"));
        }
        if !(3..=5).contains(&self.rank_type) {
            return Err(invalid("rank_type must be 3, 4 or 5"));
        }
        let ts = OffsetDateTime::parse(&self.time, &Rfc3339)
            .map_err(|_| invalid("time is not RFC 3339"))?;
        let ts = ts.to_offset(time::UtcOffset::UTC);
        let time = ts
            .format(&Rfc3339)
            .map_err(|_| invalid("time is out of range"))?;

        let entry = GachaEntry {
            uid: uid.to_string(),
            time,
            ..self.clone()
        };
        Ok((entry, ts))
    }
}

/// `(unix_ts, unix_nanos)` columns for a pull instant.
pub(crate) fn pull_sort_key(ts: OffsetDateTime) -> (i64, i64) {
    (ts.unix_timestamp(), i64::from(ts.nanosecond()))
}

/// A distinct (uid, game) pairing derived from stored entries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct GachaProfileId {
    pub uid: String,
    pub game: Game,
}

impl GachaProfileId {
    pub fn new(uid: impl Into<String>, game: Game) -> Self {
        Self {
            uid: uid.into(),
            game,
        }
    }

    /// Composite sort key, e.g. `GI-100`.
    pub fn uid_with_game(&self) -> String {
        format!("{}-{}", self.game.uid_prefix(), self.uid)
    }

    pub fn parse_uid_with_game(s: &str) -> StoreResult<Self> {
        let (tag, uid) = s
            .split_once('-')
            .ok_or_else(|| StoreError::UnknownGame(s.to_string()))?;
        let game: Game = tag.parse()?;
        Ok(Self::new(uid, game))
    }
}

impl fmt::Display for GachaProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.game.uid_prefix(), self.uid)
    }
}

impl Ord for GachaProfileId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uid_with_game().cmp(&other.uid_with_game())
    }
}

impl PartialOrd for GachaProfileId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
pub(crate) fn sample_entry(id: &str, uid: &str, game: Game) -> GachaEntry {
    GachaEntry {
        id: id.to_string(),
        uid: uid.to_string(),
        game,
        gacha_type: "301".to_string(),
        item_id: "10000002".to_string(),
        name: String::new(),
        rank_type: 3,
        time: "2024-03-01T12:00:00+08:00".to_string(),
    }
}
