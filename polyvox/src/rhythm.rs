// Rhythm skeleton for the initial pattern.
//
// Each voice gets onsets on a fixed grid inside [0, pattern length). The
// first grid slot is always an onset so every voice starts with the piece;
// every later slot becomes an onset with the voice's configured density.
// Durations are legato: each note lasts until the voice's next onset, and the
// last note until the end of the cell.
//
// With `rhythm_len` set, one cell of that length is generated per voice and
// tiled across the pattern, which gives the search's repeated-note forcing a
// period to follow.

use crate::config::{Context, Cyclic};
use crate::score::{Time, beats};
use polyvox_prng::PatternRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RhythmNote {
    pub onset: Time,
    pub duration: Time,
}

/// Per-voice onset/duration lists, each sorted by onset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rhythm {
    voices: Vec<Vec<RhythmNote>>,
}

impl Rhythm {
    pub fn new(voices: Vec<Vec<RhythmNote>>) -> Self {
        Rhythm { voices }
    }

    pub fn num_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn voice(&self, index: usize) -> &[RhythmNote] {
        self.voices.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn note_count(&self) -> usize {
        self.voices.iter().map(Vec::len).sum()
    }
}

pub fn generate_rhythm(ctx: &Context, rng: &mut PatternRng) -> Rhythm {
    let params = &ctx.config.rhythm;
    let pattern_len = ctx.pattern_len();
    let cell_len = params
        .rhythm_len
        .map_or(pattern_len, |len| len.min(pattern_len));

    let voices = (0..ctx.num_voices())
        .map(|voice| {
            let density = *params.onset_density.cyc(voice);
            let mut onsets = Vec::new();
            let mut t = beats(0);
            while t < cell_len {
                if onsets.is_empty() || rng.random_bool(density) {
                    onsets.push(t);
                }
                t += params.grid;
            }
            let cell: Vec<RhythmNote> = onsets
                .iter()
                .enumerate()
                .map(|(i, &onset)| {
                    let end = onsets.get(i + 1).copied().unwrap_or(cell_len);
                    RhythmNote {
                        onset,
                        duration: end - onset,
                    }
                })
                .collect();
            tile(&cell, cell_len, pattern_len)
        })
        .collect();
    Rhythm::new(voices)
}

/// Repeat a cell end to end, truncating whatever crosses `total`.
fn tile(cell: &[RhythmNote], cell_len: Time, total: Time) -> Vec<RhythmNote> {
    let mut notes = Vec::new();
    let mut offset = beats(0);
    while offset < total {
        for note in cell {
            let onset = note.onset + offset;
            if onset >= total {
                break;
            }
            let end = (onset + note.duration).min(total);
            notes.push(RhythmNote {
                onset,
                duration: end - onset,
            });
        }
        offset += cell_len;
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn context(config: Config) -> Context {
        Context::new(config).unwrap()
    }

    #[test]
    fn voices_start_together_and_fill_the_pattern() {
        let ctx = context(Config::default());
        let mut rng = PatternRng::new(11);
        let rhythm = generate_rhythm(&ctx, &mut rng);
        assert_eq!(rhythm.num_voices(), 4);
        for v in 0..4 {
            let notes = rhythm.voice(v);
            assert_eq!(notes[0].onset, beats(0));
            let mut expected_onset = beats(0);
            for note in notes {
                assert_eq!(note.onset, expected_onset, "voice {v} has a gap");
                assert!(note.duration > beats(0));
                assert_eq!(
                    (note.onset / ctx.config.rhythm.grid).fract(),
                    Time::from_integer(0),
                    "voice {v} onset off the grid"
                );
                expected_onset = note.onset + note.duration;
            }
            assert_eq!(expected_onset, ctx.pattern_len());
        }
    }

    #[test]
    fn full_density_uses_every_slot() {
        let mut config = Config::default();
        config.rhythm.onset_density = vec![1.0];
        config.rhythm.grid = Time::new(1, 3);
        let ctx = context(config);
        let rhythm = generate_rhythm(&ctx, &mut PatternRng::new(1));
        assert_eq!(rhythm.voice(2).len(), 12);
        assert!(rhythm.voice(2).iter().all(|n| n.duration == Time::new(1, 3)));
    }

    #[test]
    fn rhythm_cells_tile_across_the_pattern() {
        let mut config = Config::default();
        config.rhythm.rhythm_len = Some(beats(1));
        config.rhythm.onset_density = vec![0.5];
        let ctx = context(config);
        let rhythm = generate_rhythm(&ctx, &mut PatternRng::new(5));
        for v in 0..4 {
            let notes = rhythm.voice(v);
            for note in notes {
                if note.onset >= beats(1) {
                    let earlier = note.onset - beats(1);
                    assert!(
                        notes.iter().any(|n| n.onset == earlier && n.duration == note.duration),
                        "voice {v}: onset {} does not repeat the cell",
                        note.onset
                    );
                }
            }
        }
    }
}
