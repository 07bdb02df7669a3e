use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use time::UtcOffset;

use crate::error::StoreError;

#[derive(Debug, Error)]
#[error("unknown game tag '{0}'")]
pub struct UnknownGameTag(pub String);

impl From<UnknownGameTag> for StoreError {
    fn from(e: UnknownGameTag) -> Self {
        StoreError::UnknownGame(e.0)
    }
}

/// Supported titles. Stored and serialized as the short uid prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Game {
    GenshinImpact,
    StarRail,
    ZenlessZone,
}

impl Game {
    pub fn uid_prefix(self) -> &'static str {
        match self {
            Game::GenshinImpact => "GI",
            Game::StarRail => "HSR",
            Game::ZenlessZone => "ZZZ",
        }
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uid_prefix())
    }
}

impl FromStr for Game {
    type Err = UnknownGameTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gi" | "genshinimpact" | "genshin" => Ok(Game::GenshinImpact),
            "hsr" | "starrail" | "hkrpg" => Ok(Game::StarRail),
            "zzz" | "zenlesszone" | "nap" => Ok(Game::ZenlessZone),
            _ => Err(UnknownGameTag(s.to_string())),
        }
    }
}

impl TryFrom<String> for Game {
    type Error = UnknownGameTag;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Game> for String {
    fn from(g: Game) -> Self {
        g.uid_prefix().to_string()
    }
}

impl ToSql for Game {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.uid_prefix()))
    }
}

impl FromSql for Game {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Game server region, resolved from the shape of a uid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Server {
    MainlandChina,
    America,
    Europe,
    Asia,
    Cht,
}

impl Server {
    pub fn from_uid(uid: &str, game: Game) -> Option<Server> {
        let uid = uid.trim();
        if uid.is_empty() || !uid.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match game {
            Game::GenshinImpact | Game::StarRail => {
                if uid.len() < 9 {
                    return None;
                }
                match &uid[..uid.len() - 8] {
                    "1" | "2" | "3" | "5" => Some(Server::MainlandChina),
                    "6" => Some(Server::America),
                    "7" => Some(Server::Europe),
                    "8" | "18" => Some(Server::Asia),
                    "9" => Some(Server::Cht),
                    _ => None,
                }
            }
            Game::ZenlessZone => {
                if uid.len() < 10 {
                    return Some(Server::MainlandChina);
                }
                match &uid[..2] {
                    "10" => Some(Server::America),
                    "13" => Some(Server::Asia),
                    "15" => Some(Server::Europe),
                    "17" => Some(Server::Cht),
                    _ => None,
                }
            }
        }
    }

    /// Server-local time offset used by pull timestamps of this region.
    pub fn utc_offset(self) -> UtcOffset {
        let hours: i8 = match self {
            Server::America => -5,
            Server::Europe => 1,
            Server::MainlandChina | Server::Asia | Server::Cht => 8,
        };
        UtcOffset::from_hms(hours, 0, 0).unwrap_or(UtcOffset::UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_parses_tags_and_aliases() {
        assert_eq!("GI".parse::<Game>().unwrap(), Game::GenshinImpact);
        assert_eq!("hsr".parse::<Game>().unwrap(), Game::StarRail);
        assert_eq!("zenlessZone".parse::<Game>().unwrap(), Game::ZenlessZone);
        assert_eq!("genshinImpact".parse::<Game>().unwrap(), Game::GenshinImpact);
        assert!("wuwa".parse::<Game>().is_err());
    }

    #[test]
    fn game_serializes_as_short_tag() {
        let v = serde_json::to_value(Game::StarRail).unwrap();
        assert_eq!(v, serde_json::json!("HSR"));
        let g: Game = serde_json::from_value(serde_json::json!("starRail")).unwrap();
        assert_eq!(g, Game::StarRail);
        assert!(serde_json::from_value::<Game>(serde_json::json!("XX")).is_err());
    }

    #[test]
    fn server_from_uid_genshin_and_star_rail() {
        assert_eq!(
            Server::from_uid("114514810", Game::GenshinImpact),
            Some(Server::MainlandChina)
        );
        assert_eq!(Server::from_uid("612345678", Game::GenshinImpact), Some(Server::America));
        assert_eq!(Server::from_uid("700000001", Game::StarRail), Some(Server::Europe));
        assert_eq!(Server::from_uid("1800000001", Game::GenshinImpact), Some(Server::Asia));
        assert_eq!(Server::from_uid("900000001", Game::StarRail), Some(Server::Cht));
        assert_eq!(Server::from_uid("400000001", Game::GenshinImpact), None);
        assert_eq!(Server::from_uid("12345", Game::GenshinImpact), None);
        assert_eq!(Server::from_uid("6x2345678", Game::GenshinImpact), None);
    }

    #[test]
    fn server_from_uid_zenless() {
        assert_eq!(Server::from_uid("1012345678", Game::ZenlessZone), Some(Server::America));
        assert_eq!(Server::from_uid("1512345678", Game::ZenlessZone), Some(Server::Europe));
        assert_eq!(Server::from_uid("12345678", Game::ZenlessZone), Some(Server::MainlandChina));
        assert_eq!(Server::from_uid("1912345678", Game::ZenlessZone), None);
    }

    #[test]
    fn server_offsets() {
        assert_eq!(Server::America.utc_offset().whole_hours(), -5);
        assert_eq!(Server::Europe.utc_offset().whole_hours(), 1);
        assert_eq!(Server::Asia.utc_offset().whole_hours(), 8);
    }
}
