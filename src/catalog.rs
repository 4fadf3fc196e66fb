use crate::model::{Track, TrackMetadata};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Ordered playlist. Insertion order is playback order and `path` is identity.
#[derive(Debug, Default)]
pub struct Catalog {
    tracks: Vec<Track>,
    current_index: Option<usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.tracks.iter().map(|track| track.path.clone()).collect()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_index.and_then(|index| self.tracks.get(index))
    }

    /// Out-of-range indices clear the cursor rather than leaving it dangling.
    pub fn set_current_index(&mut self, index: Option<usize>) {
        self.current_index = index.filter(|index| *index < self.tracks.len());
    }

    pub fn position_of(&self, path: &Path) -> Option<usize> {
        self.tracks.iter().position(|track| track.path == path)
    }

    /// Drops paths already in the catalog and repeats within `paths`, keeping first-seen order.
    pub fn fresh_paths(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut seen: HashSet<&Path> = self.tracks.iter().map(|track| track.path.as_path()).collect();
        let mut fresh = Vec::new();
        for path in paths {
            if seen.insert(path.as_path()) {
                fresh.push(path.clone());
            }
        }
        fresh
    }

    /// Inserts `tracks` as one block at `at` (clamped, `None` appends) and returns the
    /// range they now occupy. The current index follows its track.
    pub fn insert_block(&mut self, tracks: Vec<Track>, at: Option<usize>) -> Range<usize> {
        let start = at.map_or(self.tracks.len(), |at| at.min(self.tracks.len()));
        let count = tracks.len();
        self.tracks.splice(start..start, tracks);

        if let Some(current) = self.current_index
            && current >= start
        {
            self.current_index = Some(current + count);
        }

        start..start + count
    }

    /// Removes the given indices, highest first. Returns the removed tracks in
    /// ascending index order; unknown and repeated indices are ignored.
    pub fn remove_indices(&mut self, indices: &[usize]) -> Vec<Track> {
        let mut ordered: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|index| *index < self.tracks.len())
            .collect();
        ordered.sort_unstable_by(|a, b| b.cmp(a));
        ordered.dedup();

        let mut current = self.current_index;
        let mut removed = Vec::with_capacity(ordered.len());
        for index in ordered {
            removed.push(self.tracks.remove(index));
            if let Some(cur) = current
                && index < cur
            {
                current = Some(cur - 1);
            }
        }

        // A removed current index keeps pointing at its successor.
        self.current_index = match current {
            Some(_) if self.tracks.is_empty() => None,
            Some(cur) => Some(cur.min(self.tracks.len() - 1)),
            None => None,
        };

        removed.reverse();
        removed
    }

    /// Drag-and-drop move: `slot` is the gap the row is dropped into, `0..=len`.
    /// Returns false when nothing moved.
    pub fn move_track(&mut self, from: usize, slot: usize) -> bool {
        let len = self.tracks.len();
        if from >= len || slot > len || from == slot || from + 1 == slot {
            return false;
        }

        let anchor = self.current_track().map(|track| track.path.clone());
        let track = self.tracks.remove(from);
        let target = if from < slot { slot - 1 } else { slot };
        self.tracks.insert(target, track);
        self.current_index = anchor.and_then(|path| self.position_of(&path));
        true
    }

    /// Moves the row at `from` so that it ends up at `final_index`.
    pub fn move_track_to(&mut self, from: usize, final_index: usize) -> bool {
        if final_index >= self.tracks.len() {
            return false;
        }
        let slot = if final_index > from {
            final_index + 1
        } else {
            final_index
        };
        self.move_track(from, slot)
    }

    /// Randomizes the live order in place. The caller relocates the current index.
    pub fn shuffle_with(&mut self, rng: &mut SmallRng) {
        self.tracks.shuffle(rng);
    }

    /// Rearranges tracks to follow `order`. Tracks missing from `order` keep their
    /// relative order after the listed ones; paths not in the catalog are skipped.
    pub fn reorder(&mut self, order: &[PathBuf]) {
        let lookup: HashMap<PathBuf, usize> = self
            .tracks
            .iter()
            .enumerate()
            .map(|(index, track)| (track.path.clone(), index))
            .collect();
        let mut slots: Vec<Option<Track>> =
            std::mem::take(&mut self.tracks).into_iter().map(Some).collect();

        let mut ordered = Vec::with_capacity(slots.len());
        for path in order {
            if let Some(track) = lookup.get(path).and_then(|index| slots[*index].take()) {
                ordered.push(track);
            }
        }
        ordered.extend(slots.into_iter().flatten());
        self.tracks = ordered;
    }

    /// Patches resolved metadata into the track at `path`. Returns false if the
    /// track is gone.
    pub fn patch_metadata(&mut self, path: &Path, metadata: &TrackMetadata) -> bool {
        let Some(index) = self.position_of(path) else {
            return false;
        };
        self.tracks[index].apply_metadata(metadata);
        true
    }

    pub fn mark_metadata_failed(&mut self, path: &Path) -> bool {
        let Some(index) = self.position_of(path) else {
            return false;
        };
        self.tracks[index].metadata_pending = false;
        true
    }

    pub fn set_duration(&mut self, path: &Path, seconds: f64) -> bool {
        let Some(index) = self.position_of(path) else {
            return false;
        };
        self.tracks[index].duration_seconds = Some(seconds);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert;
    use rand::SeedableRng;

    fn catalog_of(names: &[&str]) -> Catalog {
        let mut catalog = Catalog::new();
        let tracks = names
            .iter()
            .map(|name| Track::placeholder(Path::new(&format!("{name}.mp3"))))
            .collect();
        catalog.insert_block(tracks, None);
        catalog
    }

    fn names(catalog: &Catalog) -> Vec<String> {
        catalog
            .tracks()
            .iter()
            .map(|track| track.display_name.clone())
            .collect()
    }

    #[test]
    fn fresh_paths_drops_known_and_repeated_paths() {
        let catalog = catalog_of(&["a", "b"]);
        let fresh = catalog.fresh_paths(&[
            PathBuf::from("b.mp3"),
            PathBuf::from("c.mp3"),
            PathBuf::from("c.mp3"),
            PathBuf::from("a.mp3"),
        ]);
        assert_eq!(fresh, vec![PathBuf::from("c.mp3")]);
    }

    #[test]
    fn insert_before_current_shifts_it() {
        let mut catalog = catalog_of(&["a", "b"]);
        catalog.set_current_index(Some(1));
        let range = catalog.insert_block(
            vec![
                Track::placeholder(Path::new("x.mp3")),
                Track::placeholder(Path::new("y.mp3")),
            ],
            Some(0),
        );
        assert_eq!(range, 0..2);
        assert_eq!(names(&catalog), ["x", "y", "a", "b"]);
        assert_eq!(catalog.current_index(), Some(3));
    }

    #[test]
    fn insert_after_current_leaves_it() {
        let mut catalog = catalog_of(&["a", "b"]);
        catalog.set_current_index(Some(0));
        catalog.insert_block(vec![Track::placeholder(Path::new("x.mp3"))], Some(1));
        assert_eq!(catalog.current_index(), Some(0));
    }

    #[test]
    fn insert_point_past_end_appends() {
        let mut catalog = catalog_of(&["a"]);
        let range = catalog.insert_block(vec![Track::placeholder(Path::new("x.mp3"))], Some(9));
        assert_eq!(range, 1..2);
        assert_eq!(names(&catalog), ["a", "x"]);
    }

    #[test]
    fn removing_earlier_rows_decrements_current() {
        let mut catalog = catalog_of(&["a", "b", "c", "d"]);
        catalog.set_current_index(Some(2));
        let removed = catalog.remove_indices(&[3, 0]);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].display_name, "a");
        assert_eq!(names(&catalog), ["b", "c"]);
        assert_eq!(catalog.current_index(), Some(1));
    }

    #[test]
    fn removing_current_row_points_at_successor() {
        let mut catalog = catalog_of(&["a", "b", "c"]);
        catalog.set_current_index(Some(1));
        catalog.remove_indices(&[1]);
        assert_eq!(catalog.current_track().map(|t| t.display_name.as_str()), Some("c"));
    }

    #[test]
    fn removing_last_current_row_clamps() {
        let mut catalog = catalog_of(&["a", "b", "c"]);
        catalog.set_current_index(Some(2));
        catalog.remove_indices(&[2, 2, 7]);
        assert_eq!(catalog.current_index(), Some(1));
    }

    #[test]
    fn removing_everything_clears_current() {
        let mut catalog = catalog_of(&["a", "b"]);
        catalog.set_current_index(Some(0));
        catalog.remove_indices(&[0, 1]);
        assert!(catalog.is_empty());
        assert_eq!(catalog.current_index(), None);
    }

    #[test]
    fn drag_move_adjusts_for_removal_shift() {
        let mut catalog = catalog_of(&["a", "b", "c", "d"]);
        assert!(catalog.move_track(0, 3));
        assert_eq!(names(&catalog), ["b", "c", "a", "d"]);
        assert!(catalog.move_track(3, 0));
        assert_eq!(names(&catalog), ["d", "b", "c", "a"]);
    }

    #[test]
    fn drag_onto_itself_is_a_no_op() {
        let mut catalog = catalog_of(&["a", "b", "c"]);
        assert!(!catalog.move_track(1, 1));
        assert!(!catalog.move_track(1, 2));
        assert!(!catalog.move_track(5, 0));
        assert_eq!(names(&catalog), ["a", "b", "c"]);
    }

    #[test]
    fn move_to_final_position_relocates_current_by_path() {
        let mut catalog = catalog_of(&["a", "b", "c"]);
        catalog.set_current_index(Some(2));
        assert!(catalog.move_track_to(0, 2));
        assert_eq!(names(&catalog), ["b", "c", "a"]);
        assert_eq!(catalog.current_index(), Some(1));
    }

    #[test]
    fn reorder_keeps_unlisted_tracks_at_the_end() {
        let mut catalog = catalog_of(&["a", "b", "c"]);
        catalog.reorder(&[PathBuf::from("c.mp3"), PathBuf::from("gone.mp3"), PathBuf::from("a.mp3")]);
        assert_eq!(names(&catalog), ["c", "a", "b"]);
    }

    #[test]
    fn metadata_patch_for_missing_path_is_ignored() {
        let mut catalog = catalog_of(&["a"]);
        let patched = catalog.patch_metadata(Path::new("zzz.mp3"), &TrackMetadata::default());
        assert!(!patched);
        assert_eq!(catalog.len(), 1);
    }

    proptest::proptest! {
        #[test]
        fn structural_ops_keep_paths_unique_and_cursor_valid(
            ops in proptest::collection::vec((0u8..5, 0usize..12, 0usize..12), 1..120)
        ) {
            let mut catalog = Catalog::new();
            let mut rng = SmallRng::seed_from_u64(7);
            for (op, a, b) in ops {
                match op {
                    0 => {
                        let paths: Vec<PathBuf> =
                            (a..a + 3).map(|n| PathBuf::from(format!("{}.mp3", n % 10))).collect();
                        let fresh = catalog.fresh_paths(&paths);
                        let tracks = fresh.iter().map(|path| Track::placeholder(path)).collect();
                        catalog.insert_block(tracks, Some(b));
                    }
                    1 => {
                        catalog.remove_indices(&[a, b]);
                    }
                    2 => {
                        catalog.move_track(a, b);
                    }
                    3 => catalog.set_current_index(Some(a)),
                    _ => catalog.shuffle_with(&mut rng),
                }

                let unique: HashSet<&Path> =
                    catalog.tracks().iter().map(|track| track.path.as_path()).collect();
                prop_assert!(unique.len() == catalog.len());
                if let Some(current) = catalog.current_index() {
                    prop_assert!(current < catalog.len());
                }
            }
        }
    }
}
