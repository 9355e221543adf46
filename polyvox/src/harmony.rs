// Per-harmony pitch tables and scale-step arithmetic.
//
// A harmony is a scale plus a chord drawn from it, both as pitch classes
// modulo `tet`. The table caches the chord/non-chord partition of the scale
// (as pitch classes and as scale-degree indices, which the voice-leading
// session needs) and the foot pitch class anchoring the bass.
//
// Scale order matters: index 0 is the tonic, and scale-degree indices are
// positions in the configured list, not sorted order. Voice-leadings are
// expressed per scale degree, so two harmonies' scales correspond index by
// index.
//
// Used by constraints.rs (candidate pitches, generic intervals), initial.rs
// (loop snapping, forced parallel steps) and session.rs / applier.rs
// (scale-degree lookup during voice-leading).

use crate::score::Pitch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarmonyTable {
    pub tet: i32,
    /// Scale pitch classes, tonic first.
    pub scale: Vec<i32>,
    /// Chord pitch classes, root first.
    pub chord: Vec<i32>,
    /// Scale pitch classes outside the chord, in scale order.
    pub non_chord: Vec<i32>,
    /// Scale-degree indices of the chord tones, ascending.
    pub chord_indices: Vec<usize>,
    /// Scale-degree indices of the non-chord tones, ascending.
    pub non_chord_indices: Vec<usize>,
    pub foot: i32,
}

impl HarmonyTable {
    /// Build a table. `foot` defaults to the chord root.
    pub fn new(tet: i32, scale: &[i32], chord: &[i32], foot: Option<i32>) -> Self {
        let scale: Vec<i32> = scale.iter().map(|pc| pc.rem_euclid(tet)).collect();
        let chord: Vec<i32> = chord.iter().map(|pc| pc.rem_euclid(tet)).collect();
        let (chord_indices, non_chord_indices): (Vec<usize>, Vec<usize>) =
            (0..scale.len()).partition(|&i| chord.contains(&scale[i]));
        let non_chord = non_chord_indices.iter().map(|&i| scale[i]).collect();
        let foot = foot
            .or_else(|| chord.first().copied())
            .unwrap_or(0)
            .rem_euclid(tet);
        HarmonyTable {
            tet,
            scale,
            chord,
            non_chord,
            chord_indices,
            non_chord_indices,
            foot,
        }
    }

    pub fn pitch_class(&self, pitch: Pitch) -> i32 {
        pitch.rem_euclid(self.tet)
    }

    pub fn in_scale(&self, pitch: Pitch) -> bool {
        self.scale.contains(&self.pitch_class(pitch))
    }

    pub fn is_chord_tone(&self, pitch: Pitch) -> bool {
        self.chord.contains(&self.pitch_class(pitch))
    }

    /// Scale-degree index of a pitch, or `None` if it is out of scale.
    pub fn scale_index(&self, pitch: Pitch) -> Option<usize> {
        let pc = self.pitch_class(pitch);
        self.scale.iter().position(|&s| s == pc)
    }

    /// Scale-degree index of the nearest in-scale pitch.
    pub fn nearest_index(&self, pitch: Pitch) -> usize {
        self.scale_index(self.nearest_in_scale(pitch)).unwrap_or(0)
    }

    /// All pitches in `[low, high]` whose pitch class is in `pcs`, ascending.
    pub fn pitches_in_range(&self, pcs: &[i32], low: Pitch, high: Pitch) -> Vec<Pitch> {
        (low..=high)
            .filter(|&p| pcs.contains(&self.pitch_class(p)))
            .collect()
    }

    /// Snap a pitch to the nearest in-scale pitch; ties go down.
    pub fn nearest_in_scale(&self, pitch: Pitch) -> Pitch {
        if self.in_scale(pitch) {
            return pitch;
        }
        for offset in 1..=self.tet {
            if self.in_scale(pitch - offset) {
                return pitch - offset;
            }
            if self.in_scale(pitch + offset) {
                return pitch + offset;
            }
        }
        pitch
    }

    /// Signed distance in scale steps from `from` to `to`: the number of
    /// in-scale pitches in the half-open span above the lower of the two.
    pub fn generic_interval(&self, from: Pitch, to: Pitch) -> i32 {
        let (low, high) = if from <= to { (from, to) } else { (to, from) };
        let steps = ((low + 1)..=high).filter(|&p| self.in_scale(p)).count() as i32;
        if to < from { -steps } else { steps }
    }

    /// Move `steps` scale steps from `pitch` (snapped into the scale first).
    pub fn step(&self, pitch: Pitch, steps: i32) -> Pitch {
        let mut current = self.nearest_in_scale(pitch);
        let direction = steps.signum();
        for _ in 0..steps.abs() {
            current += direction;
            while !self.in_scale(current) {
                current += direction;
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c_major() -> HarmonyTable {
        HarmonyTable::new(12, &[0, 2, 4, 5, 7, 9, 11], &[0, 4, 7], None)
    }

    #[test]
    fn chord_partition_follows_scale_order() {
        let g_major = HarmonyTable::new(12, &[7, 9, 11, 0, 2, 4, 6], &[7, 11, 2], None);
        assert_eq!(g_major.chord_indices, vec![0, 2, 4]);
        assert_eq!(g_major.non_chord_indices, vec![1, 3, 5, 6]);
        assert_eq!(g_major.non_chord, vec![9, 0, 4, 6]);
        assert_eq!(g_major.foot, 7);
    }

    #[test]
    fn membership_and_indices() {
        let table = c_major();
        assert!(table.in_scale(62));
        assert!(!table.in_scale(61));
        assert!(table.is_chord_tone(55));
        assert!(!table.is_chord_tone(57));
        assert_eq!(table.scale_index(69), Some(5));
        assert_eq!(table.scale_index(70), None);
        assert_eq!(table.nearest_index(70), 5);
    }

    #[test]
    fn snapping_prefers_lower_neighbor_on_ties() {
        let table = c_major();
        assert_eq!(table.nearest_in_scale(60), 60);
        assert_eq!(table.nearest_in_scale(61), 60);
        assert_eq!(table.nearest_in_scale(66), 65);
        assert_eq!(table.nearest_in_scale(-1), -1);
    }

    #[test]
    fn generic_intervals_count_scale_steps() {
        let table = c_major();
        assert_eq!(table.generic_interval(60, 60), 0);
        assert_eq!(table.generic_interval(60, 62), 1);
        assert_eq!(table.generic_interval(60, 67), 4);
        assert_eq!(table.generic_interval(67, 60), -4);
        assert_eq!(table.generic_interval(60, 72), 7);
        assert_eq!(table.generic_interval(61, 62), 1);
    }

    #[test]
    fn stepping_through_the_scale() {
        let table = c_major();
        assert_eq!(table.step(60, 2), 64);
        assert_eq!(table.step(64, -3), 59);
        assert_eq!(table.step(61, 1), 62);
        assert_eq!(table.step(71, 0), 71);
    }

    #[test]
    fn pitches_in_range_filters_by_class() {
        let table = c_major();
        assert_eq!(table.pitches_in_range(&table.chord, 60, 72), vec![60, 64, 67, 72]);
        assert!(table.pitches_in_range(&table.chord, 61, 63).is_empty());
    }
}
