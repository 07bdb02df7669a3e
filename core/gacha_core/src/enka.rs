//! Enka character database freshness.
//!
//! A showcase profile that references a character, weapon or artifact set the
//! local database does not know means the database is out of date.

use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnkaError {
    #[error("enka db unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("enka db malformed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterMeta {
    #[serde(default)]
    pub name_text_map_hash: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnkaDb {
    #[serde(default)]
    pub loc_tag: String,
    /// Character id -> metadata.
    pub characters: HashMap<String, CharacterMeta>,
    /// Text hash -> localized text.
    pub loc_table: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipFlat {
    /// Set for artifacts, absent for weapons.
    #[serde(default)]
    pub equip_type: Option<String>,
    #[serde(default)]
    pub name_text_map_hash: Option<String>,
    #[serde(default)]
    pub set_name_text_map_hash: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Equip {
    pub flat: EquipFlat,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueriedAvatar {
    pub avatar_id: u64,
    #[serde(default)]
    pub equip_list: Vec<Equip>,
}

impl QueriedAvatar {
    pub fn id(&self) -> String {
        self.avatar_id.to_string()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueriedProfile {
    pub uid: u64,
    #[serde(default)]
    pub avatar_detail_list: Vec<QueriedAvatar>,
}

impl QueriedProfile {
    /// Keeps every avatar of `self` and appends the cached ones it lacks.
    pub fn merge(&self, old: Option<&QueriedProfile>) -> QueriedProfile {
        let mut merged = self.clone();
        if let Some(old) = old {
            let known: HashSet<u64> = self.avatar_detail_list.iter().map(|a| a.avatar_id).collect();
            merged.avatar_detail_list.extend(
                old.avatar_detail_list
                    .iter()
                    .filter(|a| !known.contains(&a.avatar_id))
                    .cloned(),
            );
        }
        merged
    }
}

/// Last merged showcase per uid. A fresh query only lists the avatars
/// currently on display, so earlier ones are carried forward from here.
#[derive(Debug, Default)]
pub struct ShowcaseCache {
    profiles: HashMap<u64, QueriedProfile>,
}

impl ShowcaseCache {
    /// Merges `fresh` with the cached profile for its uid, stores the result
    /// and returns it.
    pub fn absorb(&mut self, fresh: QueriedProfile) -> QueriedProfile {
        let merged = fresh.merge(self.profiles.get(&fresh.uid));
        self.profiles.insert(merged.uid, merged.clone());
        merged
    }

    pub fn get(&self, uid: u64) -> Option<&QueriedProfile> {
        self.profiles.get(&uid)
    }
}

impl EnkaDb {
    pub fn load(path: &Path) -> Result<Self, EnkaError> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn check_if_expired(&self, profile: &QueriedProfile) -> bool {
        let missing_character = profile
            .avatar_detail_list
            .iter()
            .any(|a| !self.characters.contains_key(&a.id()));
        if missing_character {
            return true;
        }

        // Weapons are checked by name hash, artifacts by set name hash.
        let mut hashes: HashSet<&str> = HashSet::new();
        for avatar in &profile.avatar_detail_list {
            for equip in &avatar.equip_list {
                let flat = &equip.flat;
                if flat.equip_type.is_none() {
                    if let Some(h) = flat.name_text_map_hash.as_deref() {
                        hashes.insert(h);
                    }
                }
                if let Some(h) = flat.set_name_text_map_hash.as_deref() {
                    hashes.insert(h);
                }
            }
        }
        hashes.iter().any(|h| !self.loc_table.contains_key(*h))
    }
}
