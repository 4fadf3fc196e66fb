use crate::catalog::Catalog;
use crate::model::Track;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::collections::HashSet;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Shuffle state plus the pre-shuffle order, kept as paths so that metadata
/// patched while shuffled survives a restore.
#[derive(Debug)]
pub struct Shuffle {
    active: bool,
    snapshot: Vec<PathBuf>,
    rng: SmallRng,
}

impl Default for Shuffle {
    fn default() -> Self {
        Self::new()
    }
}

impl Shuffle {
    pub fn new() -> Self {
        Self::from_rng(rand::make_rng::<SmallRng>())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(SmallRng::seed_from_u64(seed))
    }

    fn from_rng(rng: SmallRng) -> Self {
        Self {
            active: false,
            snapshot: Vec::new(),
            rng,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn snapshot(&self) -> &[PathBuf] {
        &self.snapshot
    }

    /// Shuffles the live order. Calling it again while active reshuffles and keeps
    /// the original snapshot.
    pub fn enable(&mut self, catalog: &mut Catalog, playing: Option<&Path>) {
        if self.snapshot.is_empty() || !self.snapshot_matches(catalog) {
            self.snapshot = catalog.paths();
        }
        catalog.shuffle_with(&mut self.rng);
        relocate_current(catalog, playing);
        self.active = true;
        log::debug!("shuffle enabled over {} tracks", catalog.len());
    }

    pub fn disable(&mut self, catalog: &mut Catalog, playing: Option<&Path>) {
        if !self.snapshot.is_empty() {
            catalog.reorder(&self.snapshot);
            self.snapshot.clear();
        }
        relocate_current(catalog, playing);
        self.active = false;
        log::debug!("shuffle disabled, original order restored");
    }

    /// Mirrors a live insertion (already applied to `catalog`) into the snapshot.
    pub fn record_insert(&mut self, catalog: &Catalog, inserted: Range<usize>) {
        if !self.active || inserted.is_empty() {
            return;
        }

        let new_paths = catalog.tracks()[inserted.clone()]
            .iter()
            .map(|track| track.path.clone());

        let at = if inserted.end == catalog.len() {
            self.snapshot.len()
        } else {
            inserted
                .start
                .checked_sub(1)
                .and_then(|before| catalog.get(before))
                .map_or(0, |predecessor| {
                    self.snapshot
                        .iter()
                        .position(|path| *path == predecessor.path)
                        .map_or(self.snapshot.len(), |position| position + 1)
                })
        };
        self.snapshot.splice(at..at, new_paths);
    }

    pub fn record_removal(&mut self, removed: &[Track]) {
        if !self.active || removed.is_empty() {
            return;
        }
        let gone: HashSet<&Path> = removed.iter().map(|track| track.path.as_path()).collect();
        self.snapshot.retain(|path| !gone.contains(path.as_path()));
    }

    fn snapshot_matches(&self, catalog: &Catalog) -> bool {
        if self.snapshot.len() != catalog.len() {
            return false;
        }
        let known: HashSet<&Path> = self.snapshot.iter().map(PathBuf::as_path).collect();
        catalog
            .tracks()
            .iter()
            .all(|track| known.contains(track.path.as_path()))
    }
}

/// Points the cursor at the loaded track, or the first row when nothing is loaded.
fn relocate_current(catalog: &mut Catalog, playing: Option<&Path>) {
    let index = match playing.and_then(|path| catalog.position_of(path)) {
        Some(index) => Some(index),
        None if catalog.is_empty() => None,
        None => Some(0),
    };
    catalog.set_current_index(index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert_eq;

    fn catalog_of(count: usize) -> Catalog {
        let mut catalog = Catalog::new();
        let tracks = (0..count)
            .map(|n| Track::placeholder(Path::new(&format!("song_{n}.mp3"))))
            .collect();
        catalog.insert_block(tracks, None);
        catalog
    }

    #[test]
    fn os_seeded_shuffle_restores_order() {
        let mut catalog = catalog_of(6);
        let before = catalog.paths();
        let mut shuffle = Shuffle::default();
        assert!(!shuffle.is_active());

        shuffle.enable(&mut catalog, None);
        let mut shuffled = catalog.paths();
        shuffled.sort();
        assert_eq!(shuffled, before);

        shuffle.disable(&mut catalog, None);
        assert_eq!(catalog.paths(), before);
    }

    #[test]
    fn round_trip_restores_order_and_follows_playing_track() {
        let mut catalog = catalog_of(12);
        let before = catalog.paths();
        let playing = PathBuf::from("song_4.mp3");
        catalog.set_current_index(Some(4));

        let mut shuffle = Shuffle::with_seed(11);
        shuffle.enable(&mut catalog, Some(&playing));
        assert!(shuffle.is_active());
        assert_eq!(catalog.current_track().map(|t| &t.path), Some(&playing));

        shuffle.disable(&mut catalog, Some(&playing));
        assert!(!shuffle.is_active());
        assert!(shuffle.snapshot().is_empty());
        assert_eq!(catalog.paths(), before);
        assert_eq!(catalog.current_index(), Some(4));
    }

    #[test]
    fn nothing_playing_defaults_cursor_to_first_row() {
        let mut catalog = catalog_of(3);
        let mut shuffle = Shuffle::with_seed(3);
        shuffle.enable(&mut catalog, None);
        assert_eq!(catalog.current_index(), Some(0));

        let mut empty = Catalog::new();
        shuffle.disable(&mut empty, None);
        assert_eq!(empty.current_index(), None);
    }

    #[test]
    fn reshuffle_keeps_the_original_snapshot() {
        let mut catalog = catalog_of(6);
        let before = catalog.paths();
        let mut shuffle = Shuffle::with_seed(5);
        shuffle.enable(&mut catalog, None);
        shuffle.enable(&mut catalog, None);
        assert_eq!(shuffle.snapshot(), before.as_slice());
    }

    #[test]
    fn appended_tracks_land_at_the_end_of_the_restored_order() {
        let mut catalog = catalog_of(4);
        let mut shuffle = Shuffle::with_seed(9);
        shuffle.enable(&mut catalog, None);

        let range = catalog.insert_block(vec![Track::placeholder(Path::new("new.mp3"))], None);
        shuffle.record_insert(&catalog, range);
        shuffle.disable(&mut catalog, None);

        let paths = catalog.paths();
        assert_eq!(paths.last(), Some(&PathBuf::from("new.mp3")));
        assert_eq!(paths[0], PathBuf::from("song_0.mp3"));
    }

    #[test]
    fn inserted_block_follows_its_live_predecessor() {
        let mut catalog = catalog_of(4);
        let mut shuffle = Shuffle::with_seed(1);
        shuffle.enable(&mut catalog, None);

        let predecessor = catalog.get(1).map(|t| t.path.clone()).expect("row");
        let range = catalog.insert_block(vec![Track::placeholder(Path::new("mid.mp3"))], Some(2));
        shuffle.record_insert(&catalog, range);

        let position = shuffle
            .snapshot()
            .iter()
            .position(|path| *path == predecessor)
            .expect("predecessor in snapshot");
        assert_eq!(shuffle.snapshot()[position + 1], PathBuf::from("mid.mp3"));
    }

    #[test]
    fn removed_tracks_leave_the_snapshot() {
        let mut catalog = catalog_of(4);
        let mut shuffle = Shuffle::with_seed(2);
        shuffle.enable(&mut catalog, None);

        let index = catalog.position_of(Path::new("song_2.mp3")).expect("present");
        let removed = catalog.remove_indices(&[index]);
        shuffle.record_removal(&removed);
        shuffle.disable(&mut catalog, None);

        let expected: Vec<PathBuf> = ["song_0.mp3", "song_1.mp3", "song_3.mp3"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(catalog.paths(), expected);
    }

    proptest::proptest! {
        #[test]
        fn shuffle_is_a_permutation(count in 0usize..40, seed in 0u64..1_000) {
            let mut catalog = catalog_of(count);
            let mut before = catalog.paths();
            let mut shuffle = Shuffle::with_seed(seed);
            shuffle.enable(&mut catalog, None);

            let mut after = catalog.paths();
            before.sort();
            after.sort();
            prop_assert_eq!(before, after);
        }
    }
}
