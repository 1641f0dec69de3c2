use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::platform;

/// One saved station.  The preferences surface creates and edits these;
/// the daemon only ever touches `last_played`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub uuid: Uuid,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub last_played: Option<DateTime<Utc>>,
}

impl Station {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            url: url.into(),
            favicon: None,
            favorite: false,
            last_played: None,
        }
    }

    /// Name shown in menus; falls back to the stream URL when unnamed.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.url
        } else {
            &self.name
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("station storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("station list is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Whole-file JSON persistence for the ordered station list.  Lists are
/// user-curated (tens of entries), so every operation reads or writes the
/// file in full and lookup is a linear scan.
pub struct StationStore {
    path: PathBuf,
}

impl StationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        platform::data_dir().join("stations.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty backing file if none exists.  Idempotent.
    pub fn ensure_backing(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !self.path.exists() {
            std::fs::write(&self.path, "[]\n")?;
        }
        Ok(())
    }

    pub fn load(&self) -> Result<Vec<Station>, StoreError> {
        let content = std::fs::read_to_string(&self.path)?;
        let stations: Vec<Station> = serde_json::from_str(&content)?;
        Ok(stations)
    }

    pub fn save(&self, stations: &[Station]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(stations)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn find_by_uuid<'a>(stations: &'a [Station], uuid: &Uuid) -> Option<&'a Station> {
        stations.iter().find(|s| s.uuid == *uuid)
    }

    /// Stamp `last_played = now` on the matching record and persist the whole
    /// list back.  Returns `Ok(false)` when no record matches; the playing
    /// station may have been deleted concurrently, which is not an error.
    pub fn record_played(&self, uuid: &Uuid) -> Result<bool, StoreError> {
        let mut stations = self.load()?;
        let Some(station) = stations.iter_mut().find(|s| s.uuid == *uuid) else {
            return Ok(false);
        };
        station.last_played = Some(Utc::now());
        self.save(&stations)?;
        Ok(true)
    }
}

/// Display order: favorites first, each group alphabetical by display name
/// (case-insensitive).
pub fn sorted_for_display(stations: &[Station]) -> Vec<Station> {
    let mut favorites: Vec<Station> = stations.iter().filter(|s| s.favorite).cloned().collect();
    let mut regular: Vec<Station> = stations.iter().filter(|s| !s.favorite).cloned().collect();
    favorites.sort_by_key(|s| s.display_name().to_lowercase());
    regular.sort_by_key(|s| s.display_name().to_lowercase());
    favorites.extend(regular);
    favorites
}
