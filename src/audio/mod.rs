use anyhow::{Context, Result};
use rodio::Source;
use rodio::cpal::StreamError;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, DeviceSinkBuilder, MixerDeviceSink, Player};
#[cfg(unix)]
use std::ffi::CString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// The single playback element. Only `PlayerCore` drives it.
pub trait AudioEngine {
    /// Unloads whatever is playing, then loads and starts `path`.
    fn play(&mut self, path: &Path) -> Result<()>;
    fn pause(&mut self);
    fn resume(&mut self);
    /// Unloads the current source entirely.
    fn stop(&mut self);
    fn is_paused(&self) -> bool;
    fn current_track(&self) -> Option<&Path>;
    fn position(&self) -> Option<Duration>;
    fn duration(&self) -> Option<Duration>;
    fn seek_to(&mut self, position: Duration) -> Result<()>;
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    fn output_name(&self) -> Option<String>;
    fn is_finished(&self) -> bool;
    /// A fatal output failure raised since the last call, if any.
    fn take_error(&mut self) -> Option<String>;
}

impl<E: AudioEngine + ?Sized> AudioEngine for Box<E> {
    fn play(&mut self, path: &Path) -> Result<()> {
        (**self).play(path)
    }

    fn pause(&mut self) {
        (**self).pause();
    }

    fn resume(&mut self) {
        (**self).resume();
    }

    fn stop(&mut self) {
        (**self).stop();
    }

    fn is_paused(&self) -> bool {
        (**self).is_paused()
    }

    fn current_track(&self) -> Option<&Path> {
        (**self).current_track()
    }

    fn position(&self) -> Option<Duration> {
        (**self).position()
    }

    fn duration(&self) -> Option<Duration> {
        (**self).duration()
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        (**self).seek_to(position)
    }

    fn volume(&self) -> f32 {
        (**self).volume()
    }

    fn set_volume(&mut self, volume: f32) {
        (**self).set_volume(volume);
    }

    fn output_name(&self) -> Option<String> {
        (**self).output_name()
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }

    fn take_error(&mut self) -> Option<String> {
        (**self).take_error()
    }
}

pub struct RodioAudioEngine {
    device_sink: MixerDeviceSink,
    player: Player,
    device_name: String,
    stream_error: StreamErrorSlot,
    current: Option<PathBuf>,
    track_duration: Option<Duration>,
    volume: f32,
}

impl RodioAudioEngine {
    pub fn new() -> Result<Self> {
        let stream_error = StreamErrorSlot::default();
        let (device_sink, device_name) = open_device_sink(&stream_error)?;
        let player = Player::connect_new(device_sink.mixer());
        Ok(Self {
            device_sink,
            player,
            device_name,
            stream_error,
            current: None,
            track_duration: None,
            volume: 1.0,
        })
    }
}

const DEFAULT_OUTPUT_NAME: &str = "System default output";

/// Filled from the output thread, drained by `take_error`.
#[derive(Clone, Default)]
struct StreamErrorSlot(Arc<Mutex<Option<String>>>);

impl StreamErrorSlot {
    fn callback(&self) -> impl FnMut(StreamError) + Clone + Send + 'static {
        let slot = self.clone();
        move |err| slot.record(&err)
    }

    fn record(&self, err: &StreamError) {
        // Underruns are glitches, the stream keeps going.
        if matches!(err, StreamError::BufferUnderrun) {
            return;
        }
        if let Ok(mut pending) = self.0.lock() {
            pending.get_or_insert_with(|| err.to_string());
        }
    }

    fn take(&self) -> Option<String> {
        self.0.lock().ok().and_then(|mut pending| pending.take())
    }
}

fn open_device_sink(stream_error: &StreamErrorSlot) -> Result<(MixerDeviceSink, String)> {
    let (mut device_sink, name) = with_silenced_stderr(|| {
        let default = DeviceSinkBuilder::from_default_device()
            .context("failed to open default system output device")
            .and_then(|builder| {
                builder
                    .with_error_callback(stream_error.callback())
                    .open_sink_or_fallback()
                    .context("failed to start default output stream")
            });

        let default_err = match default {
            Ok(sink) => return Ok((sink, String::from(DEFAULT_OUTPUT_NAME))),
            Err(err) => err,
        };
        log::warn!("default output unavailable: {default_err:#}");

        let host = rodio::cpal::default_host();
        let devices = host
            .output_devices()
            .context("failed to enumerate output devices")?;
        for device in devices {
            let name = device
                .description()
                .map(|description| description.name().to_string())
                .unwrap_or_default();
            let opened = DeviceSinkBuilder::from_device(device)
                .context("failed to open fallback output device")
                .and_then(|builder| {
                    builder
                        .with_error_callback(stream_error.callback())
                        .open_sink_or_fallback()
                        .context("failed to start fallback output stream")
                });
            match opened {
                Ok(sink) => {
                    log::info!("using fallback output device {name}");
                    return Ok((sink, name));
                }
                Err(err) => log::debug!("output device {name} rejected: {err:#}"),
            }
        }

        Err(default_err.context("no audio output device could be started"))
    })?;
    device_sink.log_on_drop(false);
    Ok((device_sink, name))
}

impl AudioEngine for RodioAudioEngine {
    fn play(&mut self, path: &Path) -> Result<()> {
        self.stop();
        self.player = Player::connect_new(self.device_sink.mixer());

        let file =
            File::open(path).with_context(|| format!("failed to open track {}", path.display()))?;
        let source = Decoder::try_from(file)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        self.track_duration = source.total_duration().filter(|d| !d.is_zero());
        self.player.append(source);
        self.player.set_volume(self.volume);
        self.current = Some(path.to_path_buf());
        Ok(())
    }

    fn pause(&mut self) {
        self.player.pause();
    }

    fn resume(&mut self) {
        self.player.play();
    }

    fn stop(&mut self) {
        self.player.stop();
        self.current = None;
        self.track_duration = None;
    }

    fn is_paused(&self) -> bool {
        self.player.is_paused()
    }

    fn current_track(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    fn position(&self) -> Option<Duration> {
        self.current.as_ref()?;
        Some(self.player.get_pos())
    }

    fn duration(&self) -> Option<Duration> {
        self.track_duration
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        if self.current.is_none() {
            anyhow::bail!("no active track");
        }
        self.player
            .try_seek(position)
            .map_err(|err| anyhow::anyhow!("failed to seek current track: {err:?}"))
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.player.set_volume(self.volume);
    }

    fn output_name(&self) -> Option<String> {
        Some(self.device_name.clone())
    }

    fn is_finished(&self) -> bool {
        self.current.is_some() && !self.player.is_paused() && self.player.empty()
    }

    fn take_error(&mut self) -> Option<String> {
        self.stream_error.take()
    }
}

/// ALSA and friends print straight to stderr while opening devices, which would
/// scribble over the TUI.
#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);
    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }
    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}

/// Silent engine with a logical clock. Used with `--null-audio`, when no output
/// device opens, and in tests.
pub struct NullAudioEngine {
    paused: bool,
    current: Option<PathBuf>,
    volume: f32,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
}

impl NullAudioEngine {
    pub fn new() -> Self {
        Self {
            paused: false,
            current: None,
            volume: 1.0,
            started_at: None,
            position_offset: Duration::ZERO,
            track_duration: None,
        }
    }

    fn estimate_duration(path: &Path) -> Option<Duration> {
        let file = File::open(path).ok()?;
        let source = Decoder::try_from(file).ok()?;
        source.total_duration().filter(|duration| !duration.is_zero())
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if !self.paused
            && self.current.is_some()
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        match self.track_duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }
}

impl Default for NullAudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEngine for NullAudioEngine {
    fn play(&mut self, path: &Path) -> Result<()> {
        self.paused = false;
        self.current = Some(path.to_path_buf());
        self.started_at = Some(Instant::now());
        self.position_offset = Duration::ZERO;
        self.track_duration = Self::estimate_duration(path);
        Ok(())
    }

    fn pause(&mut self) {
        self.position_offset = self.current_position();
        self.started_at = None;
        self.paused = true;
    }

    fn resume(&mut self) {
        if self.current.is_some() {
            self.started_at = Some(Instant::now());
        }
        self.paused = false;
    }

    fn stop(&mut self) {
        self.current = None;
        self.paused = false;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = None;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn current_track(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    fn position(&self) -> Option<Duration> {
        self.current.as_ref()?;
        Some(self.current_position())
    }

    fn duration(&self) -> Option<Duration> {
        self.track_duration
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        if self.current.is_none() {
            anyhow::bail!("no active track");
        }
        self.position_offset = self
            .track_duration
            .map_or(position, |duration| position.min(duration));
        self.started_at = (!self.paused).then(Instant::now);
        Ok(())
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn output_name(&self) -> Option<String> {
        Some(String::from("Null audio engine"))
    }

    fn is_finished(&self) -> bool {
        let Some(duration) = self.track_duration else {
            return false;
        };
        self.current.is_some() && !self.paused && self.current_position() >= duration
    }

    fn take_error(&mut self) -> Option<String> {
        None
    }
}
