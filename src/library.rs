use crate::command::{Command, MetadataUpdate, WaveformUpdate};
use crate::config;
use crate::model::TrackMetadata;
use anyhow::{Context, Result};
use lofty::prelude::*;
use lofty::probe::Probe;
use rodio::{Decoder, Source};
use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use symphonia::core::codecs::CodecParameters;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag};
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;
use walkdir::WalkDir;

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "wav", "ogg", "flac", "opus"];
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(7);
pub const WAVEFORM_BUCKETS: usize = 160;
const WORKER_COUNT: usize = 4;
/// Peak blocks gathered per output bucket when the track length is known.
const BLOCKS_PER_BUCKET: usize = 8;

pub fn is_audio_path(path: &Path) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    AUDIO_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}

/// Recursively lists supported files under `root`, sorted by name within each
/// directory. Unreadable entries are skipped.
pub fn expand_folder(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::debug!("skipping unreadable entry under {}: {err}", root.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_audio_path(entry.path()))
        .map(|entry| entry.into_path())
        .collect()
}

/// Turns raw user inputs (files or folders) into a flat list of existing audio
/// files. Everything else is dropped here.
pub fn collect_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.as_os_str().is_empty() {
            continue;
        }
        let path = config::normalize_path(input);
        if path.is_dir() {
            files.extend(expand_folder(&path));
        } else if path.is_file() && is_audio_path(&path) {
            files.push(path);
        } else {
            log::debug!("ignoring input {}", input.display());
        }
    }
    files
}

/// Reads tags and duration. Symphonia is tried first; lofty fills whatever it
/// could not provide and takes over entirely for containers symphonia rejects.
pub fn resolve_metadata(path: &Path) -> Result<TrackMetadata> {
    match symphonia_metadata(path) {
        Ok(metadata) if metadata.title.is_some() && metadata.duration_seconds.is_some() => {
            Ok(metadata)
        }
        Ok(metadata) => match lofty_metadata(path) {
            Ok(extra) => Ok(merge_metadata(metadata, extra)),
            Err(err) => {
                log::debug!("lofty fallback failed for {}: {err:#}", path.display());
                Ok(metadata)
            }
        },
        Err(primary) => lofty_metadata(path)
            .with_context(|| format!("no reader understood {} ({primary:#})", path.display())),
    }
}

/// Runs `operation` on its own thread and gives up after `timeout`. A timed out
/// operation keeps running detached; its result is discarded.
pub fn run_with_timeout<T, F>(timeout: Duration, operation: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(String::from("playdeck-metadata"))
        .spawn(move || {
            let _ = tx.send(operation());
        })
        .context("failed to spawn metadata thread")?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            anyhow::bail!("metadata read timed out after {:.1}s", timeout.as_secs_f64())
        }
        Err(RecvTimeoutError::Disconnected) => anyhow::bail!("metadata thread exited without a result"),
    }
}

fn merge_metadata(primary: TrackMetadata, fallback: TrackMetadata) -> TrackMetadata {
    TrackMetadata {
        title: primary.title.or(fallback.title),
        artist: primary.artist.or(fallback.artist),
        album: primary.album.or(fallback.album),
        duration_seconds: primary.duration_seconds.or(fallback.duration_seconds),
    }
}

fn symphonia_metadata(path: &Path) -> Result<TrackMetadata> {
    let stripped = config::strip_windows_verbatim_prefix(path);
    let file = File::open(&stripped)
        .with_context(|| format!("failed to open {}", stripped.display()))?;
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = stripped.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let mut opened = get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("unrecognized audio container {}", stripped.display()))?;

    let duration_seconds = opened
        .format
        .default_track()
        .and_then(|track| codec_duration_seconds(&track.codec_params));

    // Container tags first, then tags found ahead of the stream (ID3v2).
    let mut tags: Vec<Tag> = opened
        .format
        .metadata()
        .current()
        .map(|revision| revision.tags().to_vec())
        .unwrap_or_default();
    if tags.is_empty()
        && let Some(metadata) = opened.metadata.get()
        && let Some(revision) = metadata.current()
    {
        tags = revision.tags().to_vec();
    }

    Ok(TrackMetadata {
        title: tag_value(&tags, StandardTagKey::TrackTitle, &["title"]),
        artist: tag_value(
            &tags,
            StandardTagKey::Artist,
            &["artist", "albumartist", "album_artist"],
        ),
        album: tag_value(&tags, StandardTagKey::Album, &["album"]),
        duration_seconds,
    })
}

fn codec_duration_seconds(codec_params: &CodecParameters) -> Option<f64> {
    if let (Some(time_base), Some(frame_count)) = (codec_params.time_base, codec_params.n_frames) {
        let time = time_base.calc_time(frame_count);
        return Some(time.seconds as f64 + time.frac).filter(|seconds| *seconds > 0.0);
    }

    let (frame_count, sample_rate) = codec_params
        .n_frames
        .zip(codec_params.sample_rate)
        .filter(|(_, sample_rate)| *sample_rate > 0)?;
    Some(frame_count as f64 / f64::from(sample_rate)).filter(|seconds| *seconds > 0.0)
}

fn tag_value(tags: &[Tag], standard_key: StandardTagKey, fallback_keys: &[&str]) -> Option<String> {
    let from_standard = tags
        .iter()
        .find(|tag| tag.std_key == Some(standard_key))
        .map(|tag| tag.value.to_string());

    let from_fallback = || {
        tags.iter()
            .find(|tag| {
                fallback_keys
                    .iter()
                    .any(|key| tag.key.eq_ignore_ascii_case(key))
            })
            .map(|tag| tag.value.to_string())
    };

    from_standard
        .or_else(from_fallback)
        .and_then(|value| clean_metadata_value(&value))
}

fn lofty_metadata(path: &Path) -> Result<TrackMetadata> {
    let tagged = Probe::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .read()
        .with_context(|| format!("failed to read tags from {}", path.display()))?;

    let duration = tagged.properties().duration().as_secs_f64();
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag());

    Ok(TrackMetadata {
        title: tag
            .and_then(|tag| tag.title())
            .and_then(|value| clean_metadata_value(&value)),
        artist: tag
            .and_then(|tag| tag.artist())
            .and_then(|value| clean_metadata_value(&value)),
        album: tag
            .and_then(|tag| tag.album())
            .and_then(|value| clean_metadata_value(&value)),
        duration_seconds: (duration > 0.0).then_some(duration),
    })
}

fn clean_metadata_value(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Decodes the whole file and reduces it to `buckets` peak levels in `0..=100`,
/// spread evenly over the track. Returns `None` for files rodio cannot decode.
pub fn waveform_peaks(path: &Path, buckets: usize) -> Option<Vec<u64>> {
    if buckets == 0 {
        return None;
    }
    let file = File::open(path).ok()?;
    let source = Decoder::try_from(file).ok()?;

    let channels = usize::from(source.channels().get());
    let sample_rate = usize::try_from(source.sample_rate().get().max(8_000)).unwrap_or(44_100);
    let block_frames = match source.total_duration().filter(|total| !total.is_zero()) {
        Some(total) => {
            let frames = (total.as_secs_f64() * sample_rate as f64) as usize;
            frames / (buckets * BLOCKS_PER_BUCKET)
        }
        // 50 ms blocks
        None => sample_rate / 20,
    };
    let block_len = block_frames.max(1) * channels;

    let mut blocks: Vec<f32> = Vec::new();
    let mut block_peak = 0.0_f32;
    let mut in_block = 0_usize;
    for sample in source {
        block_peak = block_peak.max(sample.abs());
        in_block += 1;
        if in_block == block_len {
            blocks.push(block_peak);
            block_peak = 0.0;
            in_block = 0;
        }
    }
    if in_block > 0 {
        blocks.push(block_peak);
    }
    if blocks.is_empty() {
        return None;
    }

    let len = blocks.len();
    let peaks = (0..buckets)
        .map(|bucket| {
            let start = bucket * len / buckets;
            let end = ((bucket + 1) * len / buckets).clamp(start + 1, len);
            let peak = blocks[start..end].iter().copied().fold(0.0_f32, f32::max);
            (peak.clamp(0.0, 1.0) * 100.0).round() as u64
        })
        .collect();
    Some(peaks)
}

#[derive(Debug)]
enum Job {
    Metadata(PathBuf),
    Waveform(PathBuf),
    Expand {
        inputs: Vec<PathBuf>,
        insert_at: Option<usize>,
        autoplay: bool,
    },
}

/// Background pool for slow library work. Results come back as engine
/// `Command`s in completion order.
pub struct LibraryWorkers {
    jobs: Sender<Job>,
    results: Receiver<Command>,
}

impl LibraryWorkers {
    pub fn spawn(worker_count: usize, metadata_timeout: Duration) -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (result_tx, result_rx) = mpsc::channel();
        let job_rx = Arc::new(Mutex::new(job_rx));

        for index in 0..worker_count.max(1) {
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            thread::Builder::new()
                .name(format!("playdeck-library-{index}"))
                .spawn(move || worker_loop(&jobs, &results, metadata_timeout))
                .context("failed to spawn library worker")?;
        }

        Ok(Self {
            jobs: job_tx,
            results: result_rx,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::spawn(WORKER_COUNT, METADATA_TIMEOUT)
    }

    pub fn request_metadata(&self, path: PathBuf) {
        self.submit(Job::Metadata(path));
    }

    pub fn request_waveform(&self, path: PathBuf) {
        self.submit(Job::Waveform(path));
    }

    /// Expands folders off the UI thread; the result arrives as `Command::AddFiles`.
    pub fn request_expand(&self, inputs: Vec<PathBuf>, insert_at: Option<usize>, autoplay: bool) {
        self.submit(Job::Expand {
            inputs,
            insert_at,
            autoplay,
        });
    }

    pub fn try_recv(&self) -> Option<Command> {
        self.results.try_recv().ok()
    }

    fn submit(&self, job: Job) {
        if let Err(err) = self.jobs.send(job) {
            log::error!("library workers are gone, dropping {:?}", err.0);
        }
    }
}

fn worker_loop(jobs: &Mutex<Receiver<Job>>, results: &Sender<Command>, metadata_timeout: Duration) {
    loop {
        let job = match jobs.lock() {
            Ok(receiver) => receiver.recv(),
            Err(_) => return,
        };
        let Ok(job) = job else {
            return;
        };

        let command = match job {
            Job::Metadata(path) => {
                let job_path = path.clone();
                let result = run_with_timeout(metadata_timeout, move || resolve_metadata(&job_path))
                    .map_err(|err| format!("{err:#}"));
                Command::Metadata(MetadataUpdate { path, result })
            }
            Job::Waveform(path) => Command::Waveform(WaveformUpdate {
                peaks: waveform_peaks(&path, WAVEFORM_BUCKETS),
                path,
            }),
            Job::Expand {
                inputs,
                insert_at,
                autoplay,
            } => Command::AddFiles {
                paths: collect_inputs(&inputs),
                insert_at,
                autoplay,
            },
        };

        if results.send(command).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tests::{write_test_wav, write_wav_samples};
    use std::fs;
    use std::time::Instant;
    use tempfile::tempdir;

    #[test]
    fn audio_extensions_match_case_insensitively() {
        assert!(is_audio_path(Path::new("a.MP3")));
        assert!(is_audio_path(Path::new("dir/b.Opus")));
        assert!(!is_audio_path(Path::new("c.txt")));
        assert!(!is_audio_path(Path::new("mp3")));
        assert!(!is_audio_path(Path::new("")));
    }

    #[test]
    fn expand_folder_recurses_and_filters() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("disc 2");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(dir.path().join("b.flac"), b"x").expect("write");
        fs::write(dir.path().join("a.mp3"), b"x").expect("write");
        fs::write(dir.path().join("cover.jpg"), b"x").expect("write");
        fs::write(nested.join("c.ogg"), b"x").expect("write");

        let files = expand_folder(dir.path());
        let names: Vec<String> = files
            .iter()
            .map(|path| path.file_name().expect("name").to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.mp3", "b.flac", "c.ogg"]);
    }

    #[test]
    fn expand_missing_folder_yields_nothing() {
        let dir = tempdir().expect("tempdir");
        assert!(expand_folder(&dir.path().join("nope")).is_empty());
    }

    #[test]
    fn collect_inputs_drops_missing_and_unsupported_paths() {
        let dir = tempdir().expect("tempdir");
        let song = dir.path().join("song.wav");
        let notes = dir.path().join("notes.txt");
        fs::write(&song, b"x").expect("write");
        fs::write(&notes, b"x").expect("write");

        let files = collect_inputs(&[
            PathBuf::new(),
            notes,
            dir.path().join("missing.mp3"),
            song.clone(),
        ]);
        assert_eq!(files, vec![config::normalize_path(&song)]);
    }

    #[test]
    fn wav_duration_is_resolved() {
        let dir = tempdir().expect("tempdir");
        let track = dir.path().join("tone.wav");
        write_test_wav(&track, 500);

        let metadata = resolve_metadata(&track).expect("metadata");
        let duration = metadata.duration_seconds.expect("duration");
        assert!((duration - 0.5).abs() < 0.05, "duration was {duration}");
        assert_eq!(metadata.title, None);
    }

    #[test]
    fn corrupt_file_is_a_failure_not_a_panic() {
        let dir = tempdir().expect("tempdir");
        let track = dir.path().join("broken.mp3");
        fs::write(&track, b"definitely not audio").expect("write");
        assert!(resolve_metadata(&track).is_err());
    }

    #[test]
    fn slow_reader_times_out() {
        let result = run_with_timeout(Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(300));
            Ok(1)
        });
        let err = result.expect_err("should time out");
        assert!(format!("{err:#}").contains("timed out"));
    }

    #[test]
    fn waveform_covers_the_end_of_the_track() {
        let dir = tempdir().expect("tempdir");
        let track = dir.path().join("late_drop.wav");
        let mut samples = vec![0_i16; 44_100 * 2];
        samples.extend(std::iter::repeat_n(i16::MAX, 44_100));
        write_wav_samples(&track, &samples);

        let peaks = waveform_peaks(&track, 12).expect("peaks");
        assert_eq!(peaks.len(), 12);
        assert!(peaks[..7].iter().all(|peak| *peak == 0), "{peaks:?}");
        assert!(peaks[9..].iter().all(|peak| *peak > 50), "{peaks:?}");
    }

    #[test]
    fn silent_wav_has_flat_waveform() {
        let dir = tempdir().expect("tempdir");
        let track = dir.path().join("quiet.wav");
        write_test_wav(&track, 300);

        let peaks = waveform_peaks(&track, 16).expect("peaks");
        assert_eq!(peaks.len(), 16);
        assert!(peaks.iter().all(|peak| *peak == 0));
        assert_eq!(waveform_peaks(&dir.path().join("missing.wav"), 16), None);
    }

    #[test]
    fn workers_report_results_as_commands() {
        let dir = tempdir().expect("tempdir");
        let track = dir.path().join("tone.wav");
        write_test_wav(&track, 200);

        let workers = LibraryWorkers::spawn(2, METADATA_TIMEOUT).expect("workers");
        workers.request_metadata(track.clone());
        workers.request_expand(vec![dir.path().to_path_buf()], Some(0), true);

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut received = Vec::new();
        while received.len() < 2 && Instant::now() < deadline {
            match workers.try_recv() {
                Some(command) => received.push(command),
                None => thread::sleep(Duration::from_millis(10)),
            }
        }

        assert!(received.iter().any(|command| matches!(
            command,
            Command::Metadata(MetadataUpdate { path, result: Ok(_) }) if *path == track
        )));
        assert!(received.iter().any(|command| matches!(
            command,
            Command::AddFiles { paths, insert_at: Some(0), autoplay: true } if paths.len() == 1
        )));
    }
}
