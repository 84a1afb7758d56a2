//! Catalog loading from a music directory or a remote `/tracks` endpoint

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::{Playlist, Track};

/// Timeout for remote catalog requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur while loading a catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read music directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Where the coordinator loads its playlist from
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogSource {
    /// Every regular file in a directory is one track
    Directory {
        path: PathBuf,
        /// URL prefix clients fetch files from (e.g. `/music`)
        media_base_url: String,
    },
    /// A JSON endpoint listing tracks
    Http { url: String },
}

/// Accepted `/tracks` response shapes
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TrackListing {
    /// Bare file names
    Names(Vec<String>),
    /// Full track records
    Tracks(Vec<Track>),
}

impl CatalogSource {
    /// Load the current playlist from this source
    pub async fn load(&self) -> Result<Playlist, CatalogError> {
        let playlist = match self {
            CatalogSource::Directory { path, media_base_url } => {
                load_directory(path, media_base_url).await?
            }
            CatalogSource::Http { url } => load_http(url).await?,
        };
        debug!("Catalog loaded from {}: {} tracks", self, playlist.len());
        Ok(playlist)
    }
}

impl std::fmt::Display for CatalogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogSource::Directory { path, .. } => write!(f, "{}", path.display()),
            CatalogSource::Http { url } => write!(f, "{}", url),
        }
    }
}

async fn load_directory(path: &PathBuf, media_base_url: &str) -> Result<Playlist, CatalogError> {
    let io_err = |source| CatalogError::Io {
        path: path.clone(),
        source,
    };

    let mut entries = tokio::fs::read_dir(path).await.map_err(io_err)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let file_type = entry.file_type().await.map_err(io_err)?;
        if !file_type.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();

    Ok(playlist_from_names(names, media_base_url))
}

async fn load_http(url: &str) -> Result<Playlist, CatalogError> {
    let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let listing: TrackListing = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let playlist = match listing {
        TrackListing::Names(names) => {
            // Bare names are served next to the listing, under /music
            let base = media_base_for(url);
            playlist_from_names(names, &base)
        }
        TrackListing::Tracks(tracks) => Playlist::new(tracks),
    };
    info!("Fetched {} tracks from {}", playlist.len(), url);
    Ok(playlist)
}

/// `http://host:3000/tracks` -> `http://host:3000/music`
fn media_base_for(listing_url: &str) -> String {
    let root = listing_url
        .trim_end_matches('/')
        .rsplit_once('/')
        .map(|(root, _)| root)
        .unwrap_or(listing_url);
    format!("{}/music", root)
}

fn playlist_from_names(names: Vec<String>, media_base_url: &str) -> Playlist {
    let base = media_base_url.trim_end_matches('/');
    Playlist::new(
        names
            .into_iter()
            .map(|name| Track {
                url: format!("{}/{}", base, urlencoding::encode(&name)),
                id: name.clone(),
                name,
                duration: None,
            })
            .collect(),
    )
}
