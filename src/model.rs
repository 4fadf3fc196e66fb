use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
    Error,
}

impl PlaybackStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub path: PathBuf,
    pub display_name: String,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_seconds: Option<f64>,
    pub metadata_pending: bool,
}

impl Track {
    /// Builds the "loading" row shown until the resolver reports back.
    pub fn placeholder(path: &Path) -> Self {
        let display_name = display_name_for(path);
        Self {
            path: path.to_path_buf(),
            title: display_name.clone(),
            display_name,
            artist: None,
            album: None,
            duration_seconds: None,
            metadata_pending: true,
        }
    }

    pub fn apply_metadata(&mut self, metadata: &TrackMetadata) {
        if let Some(title) = metadata.title.as_deref().filter(|t| !t.trim().is_empty()) {
            self.title = title.trim().to_string();
        }
        if metadata.artist.is_some() {
            self.artist = metadata.artist.clone();
        }
        if metadata.album.is_some() {
            self.album = metadata.album.clone();
        }
        if let Some(duration) = metadata.duration_seconds.filter(|d| d.is_finite() && *d > 0.0) {
            self.duration_seconds = Some(duration);
        }
        self.metadata_pending = false;
    }

    pub fn subtitle(&self) -> Option<String> {
        match (self.artist.as_deref(), self.album.as_deref()) {
            (Some(artist), Some(album)) => Some(format!("{artist} - {album}")),
            (Some(artist), None) => Some(artist.to_string()),
            (None, Some(album)) => Some(album.to_string()),
            (None, None) => None,
        }
    }
}

pub fn display_name_for(path: &Path) -> String {
    path.file_stem()
        .and_then(OsStr::to_str)
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Fields a resolver may fill in; anything left `None` keeps the placeholder value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default = "default_playlist_visible")]
    pub playlist_visible: bool,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

fn default_playlist_visible() -> bool {
    true
}

fn default_volume() -> f32 {
    1.0
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            playlist_visible: default_playlist_visible(),
            volume: default_volume(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_uses_file_stem_as_title() {
        let track = Track::placeholder(Path::new("/music/Some Song.flac"));
        assert_eq!(track.display_name, "Some Song");
        assert_eq!(track.title, "Some Song");
        assert!(track.metadata_pending);
        assert_eq!(track.duration_seconds, None);
    }

    #[test]
    fn metadata_patch_keeps_fallbacks_for_missing_fields() {
        let mut track = Track::placeholder(Path::new("a.mp3"));
        track.apply_metadata(&TrackMetadata {
            title: Some(String::from("  ")),
            artist: Some(String::from("Artist")),
            album: None,
            duration_seconds: Some(f64::NAN),
        });
        assert_eq!(track.title, "a");
        assert_eq!(track.artist.as_deref(), Some("Artist"));
        assert_eq!(track.duration_seconds, None);
        assert!(!track.metadata_pending);
    }

    #[test]
    fn partial_state_file_falls_back_to_defaults() {
        let state: PersistedState = serde_json::from_str(r#"{"volume":0.25}"#).expect("parse");
        assert!(state.playlist_visible);
        assert_eq!(state.volume, 0.25);
    }
}
