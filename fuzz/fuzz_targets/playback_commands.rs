#![no_main]

use libfuzzer_sys::fuzz_target;
use playdeck::audio::NullAudioEngine;
use playdeck::command::{Command, MediaEvent, MetadataUpdate};
use playdeck::core::PlayerCore;
use playdeck::model::{PersistedState, TrackMetadata};
use playdeck::selection::Modifiers;
use playdeck::shuffle::Shuffle;
use std::collections::HashSet;
use std::path::PathBuf;

fn track(byte: u8) -> PathBuf {
    PathBuf::from(format!("track_{}.mp3", byte % 12))
}

fuzz_target!(|data: &[u8]| {
    let mut core = PlayerCore::from_persisted(NullAudioEngine::new(), PersistedState::default())
        .with_shuffle(Shuffle::with_seed(u64::from(data.first().copied().unwrap_or(0))));

    for pair in data.chunks(2) {
        let op = pair[0];
        let arg = pair.get(1).copied().unwrap_or(0);
        let index = usize::from(arg % 16);
        let command = match op % 16 {
            0 => Command::AddFiles {
                paths: vec![track(arg), track(arg.wrapping_add(1))],
                insert_at: (arg & 1 == 1).then_some(index),
                autoplay: arg & 2 == 2,
            },
            1 => Command::RemoveTracks(vec![index, index / 2]),
            2 => Command::RemoveSelected,
            3 => Command::MoveTrack {
                from: index,
                to: usize::from(arg / 16),
            },
            4 => Command::Play(index),
            5 => Command::PlayPause,
            6 => Command::Stop,
            7 => Command::Next,
            8 => Command::Prev,
            9 => Command::ToggleShuffle,
            10 => Command::Select {
                index,
                modifiers: Modifiers {
                    shift: arg & 16 == 16,
                    ctrl: arg & 32 == 32,
                },
            },
            11 => Command::ContextSelect {
                index,
                modifiers: Modifiers::NONE,
            },
            12 if arg & 64 == 64 => Command::Media(MediaEvent::Error {
                path: track(arg & 15),
                reason: String::from("output lost"),
            }),
            12 => Command::Media(MediaEvent::Ended),
            13 => Command::Metadata(MetadataUpdate {
                path: track(arg),
                result: Ok(TrackMetadata {
                    title: Some(format!("title {arg}")),
                    ..TrackMetadata::default()
                }),
            }),
            14 => Command::MoveTrackTo {
                from: index,
                index: usize::from(arg / 16),
            },
            _ => Command::SetVolume(f32::from(arg) / 200.0),
        };
        core.apply(command);

        let len = core.catalog().len();
        let unique: HashSet<_> = core.catalog().tracks().iter().map(|t| &t.path).collect();
        assert_eq!(unique.len(), len);
        assert!(core.catalog().current_index().is_none_or(|current| current < len));
        assert!(core.selection().indices().iter().all(|selected| *selected < len));
        if let Some(loaded) = core.loaded_track() {
            assert_eq!(core.catalog().current_track().map(|t| &t.path), Some(&loaded.path));
        }
    }
});
