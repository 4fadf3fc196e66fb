use crate::audio::AudioEngine;
use crate::catalog::Catalog;
use crate::command::{Command, MediaEvent, MetadataUpdate, WaveformUpdate};
use crate::library;
use crate::model::{PersistedState, PlaybackStatus, Track};
use crate::selection::{Modifiers, Selection};
use crate::shuffle::Shuffle;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const PLACEHOLDER_TITLE: &str = "---";
/// `prev` restarts the current track instead of stepping back past this point.
pub const RESTART_THRESHOLD_SECONDS: f64 = 3.0;
pub const FAST_FORWARD_SECONDS: f64 = 10.0;
const MUTE_RESTORE_VOLUME: f32 = 0.1;
/// Upper bound on how long autoplay waits for the first track's metadata.
const AUTOPLAY_GRACE: Duration = Duration::from_secs(8);

/// Notifications for the presentation layer, drained once per loop turn.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    CatalogChanged,
    StatusChanged(PlaybackStatus),
    Progress {
        position_seconds: f64,
        duration_seconds: Option<f64>,
    },
    Error(String),
    PreferencesChanged,
}

/// Owned copy of everything a full playlist re-render needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistSnapshot {
    pub tracks: Vec<Track>,
    pub current_index: Option<usize>,
    pub selection: Vec<usize>,
    pub shuffle_active: bool,
    pub status: PlaybackStatus,
}

pub struct PlayerCore<A: AudioEngine> {
    audio: A,
    catalog: Catalog,
    shuffle: Shuffle,
    selection: Selection,
    status: PlaybackStatus,
    loaded: Option<Track>,
    volume: f32,
    muted: bool,
    playlist_visible: bool,
    pending_autoplay: Option<(PathBuf, Instant)>,
    autoplay_grace: Duration,
    metadata_requests: Vec<PathBuf>,
    waveform_requests: Vec<PathBuf>,
    waveform: Option<(PathBuf, Vec<u64>)>,
    last_progress_second: Option<u64>,
    events: Vec<CoreEvent>,
    pub message: String,
    pub dirty: bool,
}

impl<A: AudioEngine> PlayerCore<A> {
    pub fn from_persisted(mut audio: A, state: PersistedState) -> Self {
        let volume = if (0.0..=1.0).contains(&state.volume) {
            state.volume
        } else {
            log::warn!("ignoring saved volume {} outside 0..=1", state.volume);
            PersistedState::default().volume
        };
        audio.set_volume(volume);

        Self {
            audio,
            catalog: Catalog::new(),
            shuffle: Shuffle::new(),
            selection: Selection::new(),
            status: PlaybackStatus::Stopped,
            loaded: None,
            volume,
            muted: false,
            playlist_visible: state.playlist_visible,
            pending_autoplay: None,
            autoplay_grace: AUTOPLAY_GRACE,
            metadata_requests: Vec::new(),
            waveform_requests: Vec::new(),
            waveform: None,
            last_progress_second: None,
            events: Vec::new(),
            message: String::from("Ready"),
            dirty: true,
        }
    }

    pub fn with_shuffle(mut self, shuffle: Shuffle) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// How long an autoplay add waits for metadata before `tick` starts it anyway.
    pub fn with_autoplay_grace(mut self, grace: Duration) -> Self {
        self.autoplay_grace = grace;
        self
    }

    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            playlist_visible: self.playlist_visible,
            volume: self.volume,
        }
    }

    pub fn apply(&mut self, command: Command) {
        match command {
            Command::AddFiles {
                paths,
                insert_at,
                autoplay,
            } => {
                self.add_tracks(&paths, insert_at, autoplay);
            }
            Command::OpenFile(path) => self.open_file(&path),
            Command::RemoveTracks(indices) => self.remove_tracks(&indices),
            Command::RemoveSelected => {
                let indices = self.selection.indices();
                self.remove_tracks(&indices);
            }
            Command::MoveTrack { from, to } => self.move_track(from, to),
            Command::MoveTrackTo { from, index } => self.move_track_to(from, index),
            Command::Play(index) => self.play(index),
            Command::PlayPause => self.play_pause(),
            Command::Stop => self.stop(),
            Command::Next => self.next(),
            Command::Prev => self.prev(),
            Command::Seek(seconds) => self.seek(seconds),
            Command::FastForward(delta) => self.fast_forward(delta),
            Command::SetVolume(volume) => self.set_volume(volume),
            Command::ToggleMute => self.toggle_mute(),
            Command::ToggleShuffle => self.toggle_shuffle(),
            Command::Select { index, modifiers } => self.select(index, modifiers),
            Command::ContextSelect { index, modifiers } => self.context_select(index, modifiers),
            Command::SelectAll => self.select_all(),
            Command::TogglePlaylist => self.toggle_playlist(),
            Command::Media(event) => self.handle_media_event(event),
            Command::Metadata(update) => self.apply_metadata(update),
            Command::Waveform(update) => self.apply_waveform(update),
        }
    }

    /// Inserts the supported, not-yet-known paths as one block and returns how many
    /// were added. Metadata lookups are queued for `take_metadata_requests`.
    pub fn add_tracks(&mut self, paths: &[PathBuf], insert_at: Option<usize>, autoplay: bool) -> usize {
        let accepted: Vec<PathBuf> = paths
            .iter()
            .filter(|path| library::is_audio_path(path))
            .cloned()
            .collect();
        if accepted.len() < paths.len() {
            log::debug!("rejected {} unsupported input(s)", paths.len() - accepted.len());
        }

        let fresh = self.catalog.fresh_paths(&accepted);
        if fresh.is_empty() {
            if !paths.is_empty() {
                self.set_message("No new tracks to add");
            }
            return 0;
        }

        let tracks = fresh.iter().map(|path| Track::placeholder(path)).collect();
        let inserted = self.catalog.insert_block(tracks, insert_at);
        self.selection.shift_for_insert(inserted.start, inserted.len());
        self.shuffle.record_insert(&self.catalog, inserted.clone());
        self.metadata_requests.extend(fresh.iter().cloned());

        if autoplay {
            self.pending_autoplay = Some((fresh[0].clone(), Instant::now()));
        }

        log::info!("added {} track(s) at row {}", inserted.len(), inserted.start);
        self.set_message(&format!("Added {} track(s)", inserted.len()));
        self.emit(CoreEvent::CatalogChanged);
        inserted.len()
    }

    /// Plays `path` if it is already listed, otherwise appends it and plays it once
    /// its metadata arrives. Unlisted paths that are not existing files are dropped.
    pub fn open_file(&mut self, path: &Path) {
        match self.catalog.position_of(path) {
            Some(index) => self.play(index),
            None if !path.is_file() => {
                log::debug!("ignoring open of missing file {}", path.display());
            }
            None => {
                self.add_tracks(&[path.to_path_buf()], None, true);
            }
        }
    }

    pub fn remove_tracks(&mut self, indices: &[usize]) {
        let removed = self.catalog.remove_indices(indices);
        if removed.is_empty() {
            return;
        }

        self.shuffle.record_removal(&removed);
        let removed_loaded = self
            .loaded
            .as_ref()
            .is_some_and(|loaded| removed.iter().any(|track| track.path == loaded.path));
        if self
            .pending_autoplay
            .as_ref()
            .is_some_and(|(path, _)| removed.iter().any(|track| track.path == *path))
        {
            self.pending_autoplay = None;
        }
        self.selection.reset_to(self.catalog.current_index());

        log::info!("removed {} track(s)", removed.len());
        self.set_message(&format!("Removed {} track(s)", removed.len()));

        if self.catalog.is_empty() {
            self.reset_to_placeholder();
        } else if removed_loaded {
            self.on_track_removed();
        }
        self.emit(CoreEvent::CatalogChanged);
    }

    fn on_track_removed(&mut self) {
        match self.catalog.current_index() {
            Some(index) => self.play(index),
            None => self.reset_to_placeholder(),
        }
    }

    pub fn move_track(&mut self, from: usize, to: usize) {
        let Some(path) = self.catalog.get(from).map(|track| track.path.clone()) else {
            return;
        };
        if self.catalog.move_track(from, to) {
            self.after_move(&path);
        }
    }

    pub fn move_track_to(&mut self, from: usize, index: usize) {
        let Some(path) = self.catalog.get(from).map(|track| track.path.clone()) else {
            return;
        };
        if self.catalog.move_track_to(from, index) {
            self.after_move(&path);
        }
    }

    fn after_move(&mut self, moved: &Path) {
        self.selection.reset_to(self.catalog.position_of(moved));
        self.emit(CoreEvent::CatalogChanged);
    }

    pub fn play(&mut self, index: usize) {
        let Some(track) = self.catalog.get(index).cloned() else {
            log::warn!("play({index}) ignored, playlist has {} tracks", self.catalog.len());
            return;
        };

        self.catalog.set_current_index(Some(index));
        self.selection.reset_to(Some(index));

        if self.needs_load(&track.path) {
            self.load(track);
        } else {
            if self.audio.is_paused() {
                self.audio.resume();
            }
            self.set_message(&format!("Playing {}", track.title));
            self.set_status(PlaybackStatus::Playing);
        }
        self.emit(CoreEvent::CatalogChanged);
    }

    fn needs_load(&self, path: &Path) -> bool {
        matches!(self.status, PlaybackStatus::Stopped | PlaybackStatus::Error)
            || self.loaded.as_ref().is_none_or(|loaded| loaded.path != path)
            || self.audio.current_track() != Some(path)
            || self.audio.is_finished()
    }

    fn has_valid_source(&self) -> bool {
        self.loaded.as_ref().is_some_and(|loaded| {
            self.audio.current_track() == Some(loaded.path.as_path()) && !self.audio.is_finished()
        })
    }

    /// The only place a new source reaches the audio engine.
    fn load(&mut self, track: Track) {
        self.audio.stop();
        self.loaded = None;
        self.emit_progress(0.0, track.duration_seconds);

        match self.audio.play(&track.path) {
            Ok(()) => {
                log::info!("playing {}", track.path.display());
                self.set_message(&format!("Playing {}", track.title));
                if self.waveform.as_ref().is_none_or(|(path, _)| *path != track.path) {
                    self.waveform = None;
                    self.waveform_requests.push(track.path.clone());
                }
                self.loaded = Some(track);
                self.set_status(PlaybackStatus::Playing);
            }
            Err(err) => self.fail_playback(&track, &format!("{err:#}")),
        }
    }

    fn fail_playback(&mut self, track: &Track, reason: &str) {
        log::error!("could not play {}: {reason}", track.path.display());
        self.audio.stop();
        self.loaded = None;
        self.last_progress_second = None;
        self.set_status(PlaybackStatus::Error);

        let message = format!("Error: Could not play ({})", track.display_name);
        self.set_message(&message);
        self.emit(CoreEvent::Error(message));
    }

    pub fn play_pause(&mut self) {
        if self.status == PlaybackStatus::Playing {
            self.audio.pause();
            self.set_message("Paused");
            self.set_status(PlaybackStatus::Paused);
            return;
        }

        if self.catalog.is_empty() {
            self.reset_to_placeholder();
            return;
        }

        if self.has_valid_source() {
            self.audio.resume();
            self.set_message("Resumed");
            self.set_status(PlaybackStatus::Playing);
            return;
        }

        let index = self.catalog.current_index().unwrap_or(0);
        self.play(index);
    }

    /// Unloads the source. The cursor stays where it was for a quick restart.
    pub fn stop(&mut self) {
        self.audio.stop();
        self.loaded = None;
        self.pending_autoplay = None;
        self.last_progress_second = None;
        self.emit_progress(0.0, None);
        self.set_message("Stopped");
        self.set_status(PlaybackStatus::Stopped);
        self.emit(CoreEvent::CatalogChanged);
    }

    pub fn next(&mut self) {
        if self.catalog.is_empty() {
            self.reset_to_placeholder();
            return;
        }
        self.advance();
    }

    /// Steps forward, halting on the last track instead of wrapping.
    fn advance(&mut self) {
        match self.catalog.current_index() {
            None => self.play(0),
            Some(index) if index + 1 < self.catalog.len() => self.play(index + 1),
            Some(_) => {
                self.audio.stop();
                self.loaded = None;
                self.last_progress_second = None;
                self.emit_progress(0.0, None);
                self.set_message("End of playlist");
                self.set_status(PlaybackStatus::Stopped);
                self.emit(CoreEvent::CatalogChanged);
            }
        }
    }

    pub fn prev(&mut self) {
        if self.catalog.is_empty() {
            self.reset_to_placeholder();
            return;
        }

        if self.has_valid_source() && self.position_seconds() > RESTART_THRESHOLD_SECONDS {
            self.seek(0.0);
            return;
        }

        match self.catalog.current_index() {
            None => self.play(0),
            Some(0) if self.has_valid_source() => self.seek(0.0),
            Some(0) => self.play(0),
            Some(index) => self.play(index - 1),
        }
    }

    pub fn seek(&mut self, seconds: f64) {
        if !seconds.is_finite() || !self.has_valid_source() {
            return;
        }

        let duration = self.duration_seconds();
        let mut target = seconds.max(0.0);
        if let Some(duration) = duration {
            target = target.min(duration);
        }

        match self.audio.seek_to(Duration::from_secs_f64(target)) {
            Ok(()) => {
                self.last_progress_second = None;
                self.emit_progress(target, duration);
            }
            Err(err) => log::warn!("seek to {target:.1}s failed: {err:#}"),
        }
    }

    pub fn fast_forward(&mut self, delta_seconds: f64) {
        if !self.has_valid_source() {
            return;
        }
        self.seek(self.position_seconds() + delta_seconds);
    }

    /// Sets the volume (clamped to 0..=1). Moving the volume always unmutes.
    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        self.volume = volume.clamp(0.0, 1.0);
        self.muted = false;
        self.audio.set_volume(self.volume);
        self.set_message(&format!("Volume: {}%", (self.volume * 100.0).round() as u16));
        self.emit(CoreEvent::PreferencesChanged);
    }

    pub fn toggle_mute(&mut self) {
        if self.muted {
            if self.volume <= 0.0 {
                self.volume = MUTE_RESTORE_VOLUME;
            }
            self.muted = false;
            self.audio.set_volume(self.volume);
            self.set_message("Unmuted");
        } else {
            self.muted = true;
            self.audio.set_volume(0.0);
            self.set_message("Muted");
        }
        self.emit(CoreEvent::PreferencesChanged);
    }

    pub fn toggle_shuffle(&mut self) {
        let playing = self.loaded.as_ref().map(|track| track.path.clone());
        if self.shuffle.is_active() {
            self.shuffle.disable(&mut self.catalog, playing.as_deref());
            self.set_message("Shuffle off");
        } else {
            self.shuffle.enable(&mut self.catalog, playing.as_deref());
            self.set_message("Shuffle on");
        }
        self.selection.reset_to(self.catalog.current_index());
        self.emit(CoreEvent::CatalogChanged);
    }

    pub fn select(&mut self, index: usize, modifiers: Modifiers) {
        self.selection.click(index, modifiers, self.catalog.len());
        self.emit(CoreEvent::CatalogChanged);
    }

    pub fn context_select(&mut self, index: usize, modifiers: Modifiers) {
        self.selection.context_click(index, modifiers, self.catalog.len());
        if !self.selection.is_empty() {
            self.set_message(&format!("{} selected, Del removes", self.selection.len()));
        }
        self.emit(CoreEvent::CatalogChanged);
    }

    pub fn select_all(&mut self) {
        self.selection.select_all(self.catalog.len());
        self.emit(CoreEvent::CatalogChanged);
    }

    pub fn toggle_playlist(&mut self) {
        self.playlist_visible = !self.playlist_visible;
        self.emit(CoreEvent::PreferencesChanged);
    }

    pub fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::LoadedMetadata {
                path,
                duration_seconds,
            } => self.on_loaded_metadata(&path, duration_seconds),
            MediaEvent::Ended => self.on_ended(),
            MediaEvent::Error { path, reason } => self.on_error(&path, &reason),
        }
    }

    fn on_loaded_metadata(&mut self, path: &Path, duration_seconds: f64) {
        if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
            return;
        }
        let Some(loaded) = self.loaded.as_mut().filter(|loaded| loaded.path == path) else {
            return;
        };
        if loaded.duration_seconds.is_none() {
            loaded.duration_seconds = Some(duration_seconds);
        }
        if self
            .catalog
            .position_of(path)
            .and_then(|index| self.catalog.get(index))
            .is_some_and(|track| track.duration_seconds.is_none())
        {
            self.catalog.set_duration(path, duration_seconds);
            self.emit(CoreEvent::CatalogChanged);
        }
        self.emit_progress(self.position_seconds(), Some(duration_seconds));
    }

    pub fn on_ended(&mut self) {
        if self.loaded.is_none() {
            return;
        }
        log::debug!("track ended");
        self.loaded = None;
        self.audio.stop();
        self.set_status(PlaybackStatus::Stopped);
        self.advance();
    }

    pub fn on_error(&mut self, path: &Path, reason: &str) {
        let Some(track) = self.loaded.clone().filter(|loaded| loaded.path == path) else {
            log::debug!("ignoring error for unloaded source {}", path.display());
            return;
        };
        self.fail_playback(&track, reason);
    }

    /// Patches a resolver result by path. Results for tracks removed in the
    /// meantime are dropped.
    pub fn apply_metadata(&mut self, update: MetadataUpdate) {
        let MetadataUpdate { path, result } = update;
        let found = match &result {
            Ok(metadata) => self.catalog.patch_metadata(&path, metadata),
            Err(reason) => {
                log::warn!("metadata unavailable for {}: {reason}", path.display());
                self.catalog.mark_metadata_failed(&path)
            }
        };
        if !found {
            log::debug!("metadata for removed track {} dropped", path.display());
            return;
        }

        if let Ok(metadata) = &result
            && let Some(loaded) = self.loaded.as_mut().filter(|loaded| loaded.path == path)
        {
            loaded.apply_metadata(metadata);
        }
        self.emit(CoreEvent::CatalogChanged);

        if self
            .pending_autoplay
            .as_ref()
            .is_some_and(|(pending, _)| *pending == path)
        {
            self.pending_autoplay = None;
            if let Some(index) = self.catalog.position_of(&path) {
                self.play(index);
            }
        }
    }

    pub fn apply_waveform(&mut self, update: WaveformUpdate) {
        if self.loaded.as_ref().is_none_or(|loaded| loaded.path != update.path) {
            return;
        }
        self.waveform = update.peaks.map(|peaks| (update.path, peaks));
        self.dirty = true;
    }

    /// Polls the audio engine. Turns an output failure into `Error` and a drained
    /// source into `Ended`, reports a newly known duration, emits progress once per
    /// second, and fires overdue autoplay.
    pub fn tick(&mut self) {
        if let Some((path, requested_at)) = self.pending_autoplay.clone()
            && requested_at.elapsed() >= self.autoplay_grace
        {
            self.pending_autoplay = None;
            if let Some(index) = self.catalog.position_of(&path) {
                log::warn!("metadata for {} is late, starting playback anyway", path.display());
                self.play(index);
            }
        }

        let output_error = self.audio.take_error();
        let Some(loaded_path) = self.loaded.as_ref().map(|track| track.path.clone()) else {
            if let Some(reason) = output_error {
                log::warn!("audio output failed while idle: {reason}");
            }
            return;
        };

        if let Some(reason) = output_error {
            self.handle_media_event(MediaEvent::Error {
                path: loaded_path,
                reason,
            });
            return;
        }

        if self.status == PlaybackStatus::Playing && self.audio.is_finished() {
            self.handle_media_event(MediaEvent::Ended);
            return;
        }

        if self.loaded.as_ref().is_some_and(|track| track.duration_seconds.is_none())
            && let Some(duration) = self.audio.duration()
        {
            self.handle_media_event(MediaEvent::LoadedMetadata {
                path: loaded_path,
                duration_seconds: duration.as_secs_f64(),
            });
        }

        if self.status == PlaybackStatus::Playing {
            let position = self.position_seconds();
            let second = position.max(0.0) as u64;
            if self.last_progress_second != Some(second) {
                self.last_progress_second = Some(second);
                self.emit_progress(position, self.duration_seconds());
            }
        }
    }

    fn reset_to_placeholder(&mut self) {
        self.audio.stop();
        self.loaded = None;
        self.pending_autoplay = None;
        self.waveform = None;
        self.last_progress_second = None;
        self.catalog.set_current_index(None);
        self.selection.reset_to(None);
        self.emit_progress(0.0, None);
        self.set_message("Playlist is empty");
        self.set_status(PlaybackStatus::Stopped);
        self.emit(CoreEvent::CatalogChanged);
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn loaded_track(&self) -> Option<&Track> {
        self.loaded.as_ref()
    }

    pub fn now_playing_title(&self) -> &str {
        self.loaded
            .as_ref()
            .map_or(PLACEHOLDER_TITLE, |track| track.title.as_str())
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn shuffle_active(&self) -> bool {
        self.shuffle.is_active()
    }

    pub fn playlist_visible(&self) -> bool {
        self.playlist_visible
    }

    pub fn waveform(&self) -> Option<&[u64]> {
        self.waveform.as_ref().map(|(_, peaks)| peaks.as_slice())
    }

    pub fn audio(&self) -> &A {
        &self.audio
    }

    pub fn position_seconds(&self) -> f64 {
        if self.loaded.is_none() {
            return 0.0;
        }
        self.audio
            .position()
            .map_or(0.0, |position| position.as_secs_f64())
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.audio
            .duration()
            .map(|duration| duration.as_secs_f64())
            .or_else(|| self.loaded.as_ref().and_then(|track| track.duration_seconds))
    }

    pub fn snapshot(&self) -> PlaylistSnapshot {
        PlaylistSnapshot {
            tracks: self.catalog.tracks().to_vec(),
            current_index: self.catalog.current_index(),
            selection: self.selection.indices(),
            shuffle_active: self.shuffle.is_active(),
            status: self.status,
        }
    }

    pub fn drain_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn take_metadata_requests(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.metadata_requests)
    }

    pub fn take_waveform_requests(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.waveform_requests)
    }

    fn set_status(&mut self, status: PlaybackStatus) {
        if self.status != status {
            log::debug!("status {:?} -> {:?}", self.status, status);
            self.status = status;
            self.emit(CoreEvent::StatusChanged(status));
        }
    }

    fn set_message(&mut self, message: &str) {
        self.message = message.to_string();
        self.dirty = true;
    }

    fn emit_progress(&mut self, position_seconds: f64, duration_seconds: Option<f64>) {
        self.emit(CoreEvent::Progress {
            position_seconds,
            duration_seconds,
        });
    }

    fn emit(&mut self, event: CoreEvent) {
        self.events.push(event);
        self.dirty = true;
    }
}
