//! Local gacha record store for HoYoverse titles.
//!
//! Pull records are stored once per entry id; the per-(uid, game) profile
//! index is rebuilt from them after every write.

pub mod enka;
pub mod entry;
pub mod error;
pub mod game;
pub mod legacy;
pub mod profiles;
pub mod store;
pub mod summary;
pub mod widget;

pub use entry::{GachaEntry, GachaProfileId};
pub use error::{StoreError, StoreResult};
pub use game::{Game, Server};
pub use legacy::{migrate_old_gachas_into_profiles, LegacyStore};
pub use store::{BatchInsertReport, EntryFilter, GachaStore, WipeReport};
