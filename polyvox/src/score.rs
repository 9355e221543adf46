// The score: the central representation for pattern generation.
//
// A score is a set of voices plus a harmony timeline. Each voice maps onset
// times to the notes that begin there (more than one note may share an
// onset). Time is exact rational arithmetic in quarter notes, so tuplets and
// odd harmony lengths never accumulate rounding error.
//
// The search in initial.rs and the applier in applier.rs both mutate the
// score in place while backtracking. `Voice::add_note` and
// `Voice::remove_note` are exact inverses: removing the note just added
// restores the previous state, including dropping an onset entry that became
// empty.
//
// The harmony timeline partitions [0, total) into contiguous intervals. The
// final interval is open-ended so trailing material (a held note, a repeat
// that overshoots) still resolves to a harmony.

use num_rational::Ratio;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Musical time in quarter notes.
pub type Time = Ratio<i64>;

/// A pitch in tuning-division units (MIDI note numbers in 12-tet).
pub type Pitch = i32;

/// Whole number of quarter notes as a `Time`.
pub fn beats(n: i64) -> Time {
    Time::from_integer(n)
}

/// Lossy conversion for probability math and display.
pub fn to_f64(t: Time) -> f64 {
    *t.numer() as f64 / *t.denom() as f64
}

/// A single note or rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// `None` is a rest.
    pub pitch: Option<Pitch>,
    pub onset: Time,
    pub duration: Time,
    pub velocity: u8,
    /// Instrument identifier; the MIDI writer maps it to a program number.
    pub timbre: u8,
}

impl Note {
    pub fn new(pitch: Pitch, onset: Time, duration: Time) -> Self {
        Note {
            pitch: Some(pitch),
            onset,
            duration,
            velocity: 80,
            timbre: 0,
        }
    }

    pub fn rest(onset: Time, duration: Time) -> Self {
        Note {
            pitch: None,
            onset,
            duration,
            velocity: 0,
            timbre: 0,
        }
    }

    pub fn with_voicing(mut self, velocity: u8, timbre: u8) -> Self {
        self.velocity = velocity;
        self.timbre = timbre;
        self
    }

    pub fn end(&self) -> Time {
        self.onset + self.duration
    }

    pub fn is_rest(&self) -> bool {
        self.pitch.is_none()
    }
}

/// One voice: notes keyed and ordered by onset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Voice {
    notes: BTreeMap<Time, Vec<Note>>,
}

impl Voice {
    pub fn new() -> Self {
        Voice::default()
    }

    pub fn add_note(&mut self, note: Note) {
        self.notes.entry(note.onset).or_default().push(note);
    }

    /// Remove the most recently added note at `onset` with the given pitch.
    pub fn remove_note(&mut self, onset: Time, pitch: Option<Pitch>) -> Option<Note> {
        let at_onset = self.notes.get_mut(&onset)?;
        let position = at_onset.iter().rposition(|n| n.pitch == pitch)?;
        let removed = at_onset.remove(position);
        if at_onset.is_empty() {
            self.notes.remove(&onset);
        }
        Some(removed)
    }

    /// Notes (and rests) beginning exactly at `onset`.
    pub fn notes_at(&self, onset: Time) -> &[Note] {
        self.notes.get(&onset).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All notes in onset order.
    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.notes.values().flatten()
    }

    /// Notes with onsets in `[start, end)`.
    pub fn notes_in(&self, start: Time, end: Time) -> impl Iterator<Item = &Note> {
        let range = if start < end {
            Some(self.notes.range(start..end))
        } else {
            None
        };
        range.into_iter().flatten().flat_map(|(_, notes)| notes.iter())
    }

    pub fn len(&self) -> usize {
        self.notes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// True if nothing (note or rest) begins before `onset`.
    pub fn is_empty_before(&self, onset: Time) -> bool {
        self.notes.range(..onset).next().is_none()
    }

    /// Pitches sounding at any point of the half-open window `[start, end)`.
    pub fn sounding_pitches(&self, start: Time, end: Time) -> Vec<Pitch> {
        self.notes
            .range(..end)
            .flat_map(|(_, notes)| notes.iter())
            .filter(|n| n.end() > start)
            .filter_map(|n| n.pitch)
            .collect()
    }

    /// The last pitched note beginning strictly before `onset`, skipping rests.
    pub fn previous_note(&self, onset: Time) -> Option<&Note> {
        self.notes
            .range(..onset)
            .rev()
            .flat_map(|(_, notes)| notes.iter().rev())
            .find(|n| !n.is_rest())
    }

    /// Up to `n` pitches before `onset`, oldest first, skipping rests.
    pub fn previous_pitches(&self, onset: Time, n: usize) -> Vec<Pitch> {
        let mut pitches: Vec<Pitch> = self
            .notes
            .range(..onset)
            .rev()
            .flat_map(|(_, notes)| notes.iter().rev())
            .filter_map(|note| note.pitch)
            .take(n)
            .collect();
        pitches.reverse();
        pitches
    }

    fn map_pitches(&mut self, f: impl Fn(Pitch) -> Pitch) {
        for note in self.notes.values_mut().flatten() {
            note.pitch = note.pitch.map(&f);
        }
    }
}

/// One harmony's span on the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarmonyInterval {
    pub start: Time,
    /// `None` for the final, open-ended interval.
    pub end: Option<Time>,
    /// Position on the timeline; harmony tables are looked up cyclically by it.
    pub index: usize,
}

impl HarmonyInterval {
    pub fn contains(&self, t: Time) -> bool {
        t >= self.start && self.end.is_none_or(|end| t < end)
    }
}

/// Contiguous, non-overlapping harmony intervals covering the piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarmonyTimeline {
    intervals: Vec<HarmonyInterval>,
    total: Time,
}

impl HarmonyTimeline {
    /// Build `count` intervals whose lengths cycle through `lengths`.
    ///
    /// Panics on an empty length list, a zero count, or a non-positive
    /// length; configuration validation rules these out beforehand.
    pub fn from_lengths(lengths: &[Time], count: usize) -> Self {
        assert!(count > 0, "timeline needs at least one harmony");
        assert!(!lengths.is_empty(), "timeline needs at least one length");
        let mut intervals = Vec::with_capacity(count);
        let mut start = beats(0);
        for index in 0..count {
            let len = lengths[index % lengths.len()];
            assert!(len > beats(0), "harmony lengths must be positive");
            let end = start + len;
            intervals.push(HarmonyInterval {
                start,
                end: Some(end),
                index,
            });
            start = end;
        }
        if let Some(last) = intervals.last_mut() {
            last.end = None;
        }
        HarmonyTimeline {
            intervals,
            total: start,
        }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Summed length of all intervals (where the open final interval nominally ends).
    pub fn total_len(&self) -> Time {
        self.total
    }

    pub fn intervals(&self) -> &[HarmonyInterval] {
        &self.intervals
    }

    pub fn interval(&self, index: usize) -> &HarmonyInterval {
        &self.intervals[index]
    }

    /// Index of the harmony sounding at `t`. Times before zero map to the
    /// first harmony, times past the last start to the open final one.
    pub fn index_at(&self, t: Time) -> usize {
        self.intervals
            .partition_point(|h| h.start <= t)
            .saturating_sub(1)
    }

    pub fn interval_at(&self, t: Time) -> &HarmonyInterval {
        &self.intervals[self.index_at(t)]
    }

    /// Nominal lengths of every interval, the final one measured to `total`.
    fn lengths(&self) -> Vec<Time> {
        self.intervals
            .iter()
            .map(|h| h.end.unwrap_or(self.total) - h.start)
            .collect()
    }

    /// The same timeline laid end to end `times` times.
    pub fn repeated(&self, times: usize) -> Self {
        let lengths = self.lengths();
        HarmonyTimeline::from_lengths(&lengths, lengths.len() * times.max(1))
    }
}

/// A multi-voice score over a harmony timeline. Voice 0 is the lowest.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    voices: Vec<Voice>,
    timeline: HarmonyTimeline,
}

impl Score {
    pub fn new(num_voices: usize, timeline: HarmonyTimeline) -> Self {
        Score {
            voices: vec![Voice::new(); num_voices],
            timeline,
        }
    }

    pub fn num_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voice(&self, index: usize) -> &Voice {
        &self.voices[index]
    }

    pub fn timeline(&self) -> &HarmonyTimeline {
        &self.timeline
    }

    pub fn harmony_index_at(&self, t: Time) -> usize {
        self.timeline.index_at(t)
    }

    pub fn add_note(&mut self, voice: usize, note: Note) {
        self.voices[voice].add_note(note);
    }

    pub fn remove_note(&mut self, voice: usize, onset: Time, pitch: Option<Pitch>) -> Option<Note> {
        self.voices[voice].remove_note(onset, pitch)
    }

    pub fn note_count(&self) -> usize {
        self.voices.iter().map(Voice::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.iter().all(Voice::is_empty)
    }

    /// Repeat the whole score `times` times, timeline included.
    pub fn repeat(&mut self, times: usize) {
        if times <= 1 {
            return;
        }
        let period = self.timeline.total_len();
        for voice in &mut self.voices {
            let originals: Vec<Note> = voice.iter().cloned().collect();
            for rep in 1..times {
                let shift = period * beats(rep as i64);
                for note in &originals {
                    let mut copy = note.clone();
                    copy.onset += shift;
                    voice.add_note(copy);
                }
            }
        }
        self.timeline = self.timeline.repeated(times);
    }

    /// Shift every sounding pitch by `interval`.
    pub fn transpose(&mut self, interval: Pitch) {
        if interval == 0 {
            return;
        }
        for voice in &mut self.voices {
            voice.map_pitches(|p| p + interval);
        }
    }

    /// Compact text rendering for logs: one row per voice, highest voice first.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (index, voice) in self.voices.iter().enumerate().rev() {
            out.push_str(&format!("{:>8}: ", format!("voice {index}")));
            let mut current_harmony = None;
            for note in voice.iter() {
                let harmony = self.timeline.index_at(note.onset);
                if current_harmony.is_some_and(|h| h != harmony) {
                    out.push_str("| ");
                }
                current_harmony = Some(harmony);
                match note.pitch {
                    Some(p) => out.push_str(&pitch_name(p)),
                    None => out.push('.'),
                }
                out.push(' ');
            }
            out.push('\n');
        }
        out
    }
}

/// Note name with octave for 12-tet pitches, e.g. "C4", "F#3".
pub fn pitch_name(pitch: Pitch) -> String {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
    ];
    let octave = pitch.div_euclid(12) - 1;
    format!("{}{}", NAMES[pitch.rem_euclid(12) as usize], octave)
}
