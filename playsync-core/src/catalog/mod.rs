//! Track Catalog
//!
//! The coordinator validates `Play` intents and resolves next/previous
//! against a [`TrackCatalog`]. [`Playlist`] is the in-memory implementation;
//! [`CatalogSource`] loads one from a music directory or an HTTP endpoint.

mod source;

pub use source::{CatalogError, CatalogSource};

use serde::{Deserialize, Serialize};

/// A playable track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Stable identifier (the file name for directory catalogs)
    pub id: String,
    /// Display name
    pub name: String,
    /// Where clients fetch the media from
    pub url: String,
    /// Length in seconds, when the catalog knows it
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Lookups the coordinator needs from the track catalog
pub trait TrackCatalog: Send + Sync {
    /// All tracks in play order
    fn list_tracks(&self) -> &[Track];

    /// Look up a track by ID
    fn get(&self, id: &str) -> Option<&Track> {
        self.list_tracks().iter().find(|t| t.id == id)
    }

    /// Check whether a track ID is known
    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Track that follows `current` (first track when nothing is selected)
    fn resolve_next(&self, current: Option<&str>) -> Option<&Track>;

    /// Track that precedes `current` (last track when nothing is selected)
    fn resolve_previous(&self, current: Option<&str>) -> Option<&Track>;
}

/// Ordered, in-memory catalog; next/previous wrap around
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    tracks: Vec<Track>,
}

impl Playlist {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }
}

impl TrackCatalog for Playlist {
    fn list_tracks(&self) -> &[Track] {
        &self.tracks
    }

    fn resolve_next(&self, current: Option<&str>) -> Option<&Track> {
        if self.tracks.is_empty() {
            return None;
        }
        let idx = match current.and_then(|id| self.index_of(id)) {
            Some(i) => (i + 1) % self.tracks.len(),
            None => 0,
        };
        self.tracks.get(idx)
    }

    fn resolve_previous(&self, current: Option<&str>) -> Option<&Track> {
        if self.tracks.is_empty() {
            return None;
        }
        let len = self.tracks.len();
        let idx = match current.and_then(|id| self.index_of(id)) {
            Some(i) => (i + len - 1) % len,
            None => len - 1,
        };
        self.tracks.get(idx)
    }
}

#[cfg(test)]
pub(crate) fn test_playlist(ids: &[&str]) -> Playlist {
    Playlist::new(
        ids.iter()
            .map(|id| Track {
                id: id.to_string(),
                name: id.to_string(),
                url: format!("/music/{}", id),
                duration: None,
            })
            .collect(),
    )
}
