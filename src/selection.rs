use std::collections::BTreeSet;

/// Modifier keys held during a click. `ctrl` also covers Cmd/Super.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        shift: false,
        ctrl: false,
    };

    pub fn any(self) -> bool {
        self.shift || self.ctrl
    }
}

/// Selected playlist rows. Independent of the playback cursor; only used as a
/// removal target.
#[derive(Debug, Default, Clone)]
pub struct Selection {
    indices: BTreeSet<usize>,
    anchor: Option<usize>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.indices.iter().copied().collect()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn anchor(&self) -> Option<usize> {
        self.anchor
    }

    pub fn click(&mut self, index: usize, modifiers: Modifiers, len: usize) {
        if index >= len {
            return;
        }

        if modifiers.shift
            && let Some(anchor) = self.anchor.filter(|anchor| *anchor < len)
        {
            let (low, high) = if anchor <= index {
                (anchor, index)
            } else {
                (index, anchor)
            };
            self.indices = (low..=high).collect();
        } else if modifiers.ctrl {
            if !self.indices.remove(&index) {
                self.indices.insert(index);
            }
        } else {
            self.indices.clear();
            self.indices.insert(index);
        }
        self.anchor = Some(index);
    }

    /// Right click: an unselected row collapses the selection to itself unless a
    /// modifier is held, in which case it joins the selection.
    pub fn context_click(&mut self, index: usize, modifiers: Modifiers, len: usize) {
        if index >= len || self.indices.contains(&index) {
            return;
        }
        if !modifiers.any() {
            self.indices.clear();
        }
        self.indices.insert(index);
        self.anchor = Some(index);
    }

    pub fn select_all(&mut self, len: usize) {
        self.indices = (0..len).collect();
    }

    pub fn reset_to(&mut self, index: Option<usize>) {
        self.indices.clear();
        self.indices.extend(index);
        self.anchor = index;
    }

    /// Shifts indices at or after `at` by `count` to follow an insertion.
    pub fn shift_for_insert(&mut self, at: usize, count: usize) {
        if count == 0 {
            return;
        }
        self.indices = self
            .indices
            .iter()
            .map(|index| if *index >= at { index + count } else { *index })
            .collect();
        if let Some(anchor) = self.anchor
            && anchor >= at
        {
            self.anchor = Some(anchor + count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert;

    const SHIFT: Modifiers = Modifiers {
        shift: true,
        ctrl: false,
    };
    const CTRL: Modifiers = Modifiers {
        shift: false,
        ctrl: true,
    };

    #[test]
    fn plain_click_replaces_selection() {
        let mut selection = Selection::new();
        selection.select_all(5);
        selection.click(3, Modifiers::NONE, 5);
        assert_eq!(selection.indices(), vec![3]);
    }

    #[test]
    fn shift_click_selects_range_from_anchor_in_either_direction() {
        let mut selection = Selection::new();
        selection.click(4, Modifiers::NONE, 8);
        selection.click(1, SHIFT, 8);
        assert_eq!(selection.indices(), vec![1, 2, 3, 4]);

        selection.click(6, SHIFT, 8);
        assert_eq!(selection.indices(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn shift_click_without_anchor_acts_like_click() {
        let mut selection = Selection::new();
        selection.click(2, SHIFT, 4);
        assert_eq!(selection.indices(), vec![2]);
    }

    #[test]
    fn ctrl_click_toggles() {
        let mut selection = Selection::new();
        selection.click(0, Modifiers::NONE, 4);
        selection.click(2, CTRL, 4);
        assert_eq!(selection.indices(), vec![0, 2]);
        selection.click(0, CTRL, 4);
        assert_eq!(selection.indices(), vec![2]);
    }

    #[test]
    fn context_click_collapses_only_for_unselected_rows() {
        let mut selection = Selection::new();
        selection.select_all(4);
        selection.context_click(1, Modifiers::NONE, 4);
        assert_eq!(selection.len(), 4);

        selection.reset_to(Some(0));
        selection.context_click(3, Modifiers::NONE, 4);
        assert_eq!(selection.indices(), vec![3]);

        selection.context_click(1, CTRL, 4);
        assert_eq!(selection.indices(), vec![1, 3]);
    }

    #[test]
    fn insertion_shifts_following_indices() {
        let mut selection = Selection::new();
        selection.select_all(3);
        selection.shift_for_insert(1, 2);
        assert_eq!(selection.indices(), vec![0, 3, 4]);
    }

    #[test]
    fn out_of_range_click_is_ignored() {
        let mut selection = Selection::new();
        selection.click(1, Modifiers::NONE, 3);
        selection.click(9, Modifiers::NONE, 3);
        assert_eq!(selection.indices(), vec![1]);
    }

    proptest::proptest! {
        #[test]
        fn clicks_stay_in_range_and_shift_selects_a_run(
            clicks in proptest::collection::vec((0usize..40, 0u8..3), 1..60),
            len in 1usize..30,
        ) {
            let mut selection = Selection::new();
            for (index, modifier) in clicks {
                let modifiers = match modifier {
                    0 => Modifiers::NONE,
                    1 => SHIFT,
                    _ => CTRL,
                };
                let anchored = selection.anchor().is_some();
                selection.click(index, modifiers, len);
                prop_assert!(selection.indices().iter().all(|row| *row < len));
                prop_assert!(selection.anchor().is_none_or(|anchor| anchor < len));

                if index < len && modifier == 1 && anchored {
                    let rows = selection.indices();
                    prop_assert!(rows.windows(2).all(|pair| pair[1] == pair[0] + 1));
                    prop_assert!(rows.contains(&index));
                }
            }
        }
    }
}
