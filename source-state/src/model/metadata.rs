//! Per-source metadata record

use serde::Serialize;

use source_api::MetadataPatch;

/// Consolidated metadata for one source
///
/// Built by folding [`MetadataPatch`]es with [`Metadata::merged`]; a field is
/// only ever replaced by a patch that carries it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_art_url: Option<String>,
    pub duration_ms: Option<u64>,
    pub position_ms: Option<u64>,
    pub is_playing: Option<bool>,
    pub device_name: Option<String>,
    pub host: Option<String>,
    pub connected: Option<bool>,
}

impl Metadata {
    /// Shallow merge: fields present in `patch` win, absent fields are kept
    pub fn merged(&self, patch: &MetadataPatch) -> Metadata {
        Metadata {
            title: patch.title.clone().or_else(|| self.title.clone()),
            artist: patch.artist.clone().or_else(|| self.artist.clone()),
            album: patch.album.clone().or_else(|| self.album.clone()),
            album_art_url: patch
                .album_art_url
                .clone()
                .or_else(|| self.album_art_url.clone()),
            duration_ms: patch.duration_ms.or(self.duration_ms),
            position_ms: patch.position_ms.or(self.position_ms),
            is_playing: patch.is_playing.or(self.is_playing),
            device_name: patch
                .device_name
                .clone()
                .or_else(|| self.device_name.clone()),
            host: patch.host.clone().or_else(|| self.host.clone()),
            connected: patch.connection_flag().or(self.connected),
        }
    }

    /// A record is valid when it describes something worth showing
    pub fn is_valid(&self) -> bool {
        filled(&self.title)
            || filled(&self.artist)
            || filled(&self.album_art_url)
            || self.duration_ms.is_some_and(|d| d > 0)
    }

    /// `self`'s non-empty fields laid over `base`
    pub fn overlay(&self, base: &Metadata) -> Metadata {
        fn pick(top: &Option<String>, base: &Option<String>) -> Option<String> {
            if filled(top) {
                top.clone()
            } else {
                base.clone()
            }
        }

        Metadata {
            title: pick(&self.title, &base.title),
            artist: pick(&self.artist, &base.artist),
            album: pick(&self.album, &base.album),
            album_art_url: pick(&self.album_art_url, &base.album_art_url),
            duration_ms: self
                .duration_ms
                .filter(|d| *d > 0)
                .or(base.duration_ms),
            position_ms: self.position_ms.or(base.position_ms),
            is_playing: self.is_playing.or(base.is_playing),
            device_name: pick(&self.device_name, &base.device_name),
            host: pick(&self.host, &base.host),
            connected: self.connected.or(base.connected),
        }
    }

    /// Title if it is non-empty
    pub fn track_title(&self) -> Option<&str> {
        self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}
