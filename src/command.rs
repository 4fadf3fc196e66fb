use crate::model::TrackMetadata;
use crate::selection::Modifiers;
use std::path::PathBuf;

/// Everything the engine accepts. The presenter and the background workers only
/// talk to `PlayerCore` through these.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddFiles {
        paths: Vec<PathBuf>,
        insert_at: Option<usize>,
        autoplay: bool,
    },
    OpenFile(PathBuf),
    RemoveTracks(Vec<usize>),
    RemoveSelected,
    MoveTrack {
        from: usize,
        to: usize,
    },
    MoveTrackTo {
        from: usize,
        index: usize,
    },
    Play(usize),
    PlayPause,
    Stop,
    Next,
    Prev,
    Seek(f64),
    FastForward(f64),
    SetVolume(f32),
    ToggleMute,
    ToggleShuffle,
    Select {
        index: usize,
        modifiers: Modifiers,
    },
    ContextSelect {
        index: usize,
        modifiers: Modifiers,
    },
    SelectAll,
    TogglePlaylist,
    Media(MediaEvent),
    Metadata(MetadataUpdate),
    Waveform(WaveformUpdate),
}

/// Callbacks from the audio output, synthesized by `PlayerCore::tick`.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    LoadedMetadata { path: PathBuf, duration_seconds: f64 },
    Ended,
    Error { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataUpdate {
    pub path: PathBuf,
    pub result: Result<TrackMetadata, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaveformUpdate {
    pub path: PathBuf,
    pub peaks: Option<Vec<u64>>,
}
