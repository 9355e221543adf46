// Initial pattern: backtracking pitch assignment over a rhythm skeleton.
//
// The search walks every (voice, onset) slot of the rhythm in global time
// order. At equal onsets, leaders of forced parallel motion go before their
// followers, and otherwise voices go in index order (shuffled per attempt if
// configured). Each slot is decided in priority order:
//
//   1. A hard pitch loop commits the pitch one loop-length earlier (snapped
//      into the current scale). A soft loop only moves that pitch to the
//      front of the candidates.
//   2. A forced pitch is committed: the bass foot, a repeated note one
//      rhythm cell earlier, or a parallel-motion follower copying its
//      leader's last generic interval. A foot or follower that breaks an
//      alternation or repetition rule is a dead end.
//   3. Otherwise candidates come from constraints.rs and are tried in
//      weighted random order, favoring small melodic steps. The very first
//      note of a voice is chosen uniformly.
//
// A chosen pitch that breaks an alternation, repetition or loop-uniqueness
// rule is discarded and the next candidate tried. Anything else recurses to
// the next slot; on failure the note is removed again and the next candidate
// tried. Every frame removes exactly the note it inserted.
//
// Failure reasons are counted in `Diagnostics`. A global dead-end cap ends
// hopeless attempts early so the driver can start over with a new rhythm.

use crate::cancel::CancelToken;
use crate::config::{Context, Cyclic};
use crate::constraints::{self, Candidates, ChordToneChoice, Slot};
use crate::diagnostics::{Diagnostics, FilterStage, Rejection};
use crate::error::GenerationError;
use crate::harmony::HarmonyTable;
use crate::rhythm::Rhythm;
use crate::score::{Note, Pitch, Score, Time};
use polyvox_prng::PatternRng;
use std::collections::BTreeSet;

/// A successfully generated initial pattern.
#[derive(Debug, Clone)]
pub struct InitialPattern {
    pub score: Score,
    pub diagnostics: Diagnostics,
    /// Slots (voice, onset) whose pitch had to be a chord tone.
    pub forced_chord_tones: Vec<(usize, Time)>,
}

pub fn generate_initial_pattern(
    ctx: &Context,
    rhythm: &Rhythm,
    rng: &mut PatternRng,
    cancel: &CancelToken,
) -> Result<InitialPattern, GenerationError> {
    let slots = ordered_slots(ctx, rhythm, rng);
    let mut search = PatternSearch {
        ctx,
        rng,
        cancel,
        slots,
        score: Score::new(ctx.num_voices(), ctx.timeline().clone()),
        diagnostics: Diagnostics::default(),
        forced_chord_tones: BTreeSet::new(),
    };
    match search.place(0) {
        Ok(true) => Ok(InitialPattern {
            score: search.score,
            diagnostics: search.diagnostics,
            forced_chord_tones: search.forced_chord_tones.into_iter().collect(),
        }),
        Ok(false) | Err(Abort::DeadEnds) => Err(GenerationError::PitchMaterialsExhausted {
            attempts: 1,
            diagnostics: search.diagnostics,
        }),
        Err(Abort::Cancelled) => Err(GenerationError::Timeout),
    }
}

/// Every rhythm slot in the order the search fills them.
fn ordered_slots(ctx: &Context, rhythm: &Rhythm, rng: &mut PatternRng) -> Vec<Slot> {
    let mut order: Vec<usize> = (0..ctx.num_voices()).collect();
    if ctx.config.search.randomize_voice_order {
        rng.shuffle(&mut order);
    }
    let mut rank = vec![0; order.len()];
    for (position, &voice) in order.iter().enumerate() {
        rank[voice] = position;
    }
    let followers: BTreeSet<usize> = ctx
        .config
        .parallels
        .force_parallel_motion
        .iter()
        .map(|pair| pair.follower)
        .collect();

    let mut slots: Vec<Slot> = (0..ctx.num_voices())
        .flat_map(|voice| {
            rhythm.voice(voice).iter().map(move |note| Slot {
                voice,
                onset: note.onset,
                duration: note.duration,
            })
        })
        .collect();
    slots.sort_by_key(|slot| (slot.onset, followers.contains(&slot.voice), rank[slot.voice]));
    slots
}

enum Abort {
    Cancelled,
    DeadEnds,
}

/// Pitches fixed before candidate selection.
enum Forced {
    /// Copied from one rhythm cell earlier; repetition is the point.
    Repeated(Pitch),
    /// Bass foot octaves nearest first, or a parallel follower's one pitch.
    /// Each is still bound by the melodic rules.
    Checked(Vec<Pitch>),
}

struct PatternSearch<'a> {
    ctx: &'a Context,
    rng: &'a mut PatternRng,
    cancel: &'a CancelToken,
    slots: Vec<Slot>,
    score: Score,
    diagnostics: Diagnostics,
    forced_chord_tones: BTreeSet<(usize, Time)>,
}

impl PatternSearch<'_> {
    fn place(&mut self, k: usize) -> Result<bool, Abort> {
        if k == self.slots.len() {
            return Ok(true);
        }
        self.check_cancel()?;
        let ctx = self.ctx;
        let slot = self.slots[k];
        let table = ctx.harmony(self.score.harmony_index_at(slot.onset));

        let mut preferred = None;
        if let Some(looped) = self.looped_pitch(&slot, table) {
            if ctx.config.melody.hard_pitch_loop {
                return self.commit(k, &slot, looped);
            }
            preferred = Some(looped);
        }
        let previous = self
            .score
            .voice(slot.voice)
            .previous_pitches(slot.onset, self.history_len());
        match self.forced_pitch(&slot, table) {
            Some(Forced::Repeated(pitch)) => return self.commit(k, &slot, pitch),
            Some(Forced::Checked(pitches)) => {
                for pitch in pitches {
                    self.check_cancel()?;
                    if let Some(rejection) = self.rejection(&slot, &previous, pitch) {
                        self.diagnostics.record_rejection(rejection);
                        continue;
                    }
                    self.insert(&slot, pitch, false);
                    if self.place(k + 1)? {
                        return Ok(true);
                    }
                    self.remove(&slot, pitch, false);
                }
                return self.dead_end();
            }
            None => {}
        }

        let choice = constraints::decide_chord_tone(ctx, &self.score, &slot, self.rng);
        let mut candidates = match self.candidates(&slot, table, choice) {
            Ok(candidates) => candidates,
            Err(stage) => {
                self.diagnostics.record_stage(stage);
                return self.dead_end();
            }
        };
        if let Some(pitch) = preferred {
            candidates.prefer(pitch);
        }

        let last = self
            .score
            .voice(slot.voice)
            .previous_note(slot.onset)
            .and_then(|n| n.pitch);
        let forced_chord = choice == ChordToneChoice::Forced;
        while let Some(pitch) = self.choose(&mut candidates, table, last) {
            self.check_cancel()?;
            if let Some(rejection) = self.rejection(&slot, &previous, pitch) {
                self.diagnostics.record_rejection(rejection);
                continue;
            }
            self.insert(&slot, pitch, forced_chord);
            if self.place(k + 1)? {
                return Ok(true);
            }
            self.remove(&slot, pitch, forced_chord);
        }
        self.dead_end()
    }

    /// Place a pitch that bypasses candidate selection, then recurse.
    fn commit(&mut self, k: usize, slot: &Slot, pitch: Pitch) -> Result<bool, Abort> {
        self.insert(slot, pitch, false);
        if self.place(k + 1)? {
            return Ok(true);
        }
        self.remove(slot, pitch, false);
        self.dead_end()
    }

    fn insert(&mut self, slot: &Slot, pitch: Pitch, forced_chord: bool) {
        let note = Note::new(pitch, slot.onset, slot.duration)
            .with_voicing(self.ctx.velocity(), self.ctx.timbre(slot.voice));
        self.score.add_note(slot.voice, note);
        if forced_chord {
            self.forced_chord_tones.insert((slot.voice, slot.onset));
        }
    }

    fn remove(&mut self, slot: &Slot, pitch: Pitch, forced_chord: bool) {
        self.score.remove_note(slot.voice, slot.onset, Some(pitch));
        if forced_chord {
            self.forced_chord_tones.remove(&(slot.voice, slot.onset));
        }
    }

    fn check_cancel(&self) -> Result<(), Abort> {
        if self.cancel.is_cancelled() {
            Err(Abort::Cancelled)
        } else {
            Ok(())
        }
    }

    fn dead_end(&mut self) -> Result<bool, Abort> {
        self.diagnostics.dead_ends += 1;
        if self.diagnostics.dead_ends > self.ctx.config.search.max_dead_ends {
            log::debug!(
                "dead-end cap of {} reached",
                self.ctx.config.search.max_dead_ends
            );
            return Err(Abort::DeadEnds);
        }
        Ok(false)
    }

    fn loop_len(&self, voice: usize) -> Option<usize> {
        self.ctx
            .config
            .melody
            .pitch_loop
            .cyc(voice)
            .filter(|&len| len > 0)
    }

    /// How many previous pitches the rejection rules look at.
    fn history_len(&self) -> usize {
        let melody = &self.ctx.config.melody;
        let alternation = melody.max_alternations.map_or(0, |m| 2 * m + 1);
        let repetition = melody.max_repeated_notes.map_or(0, |m| m + 1);
        let looping = melody
            .pitch_loop
            .iter()
            .flatten()
            .copied()
            .max()
            .unwrap_or(0);
        alternation.max(repetition).max(looping)
    }

    fn looped_pitch(&self, slot: &Slot, table: &HarmonyTable) -> Option<Pitch> {
        let len = self.loop_len(slot.voice)?;
        let previous = self.score.voice(slot.voice).previous_pitches(slot.onset, len);
        if previous.len() < len {
            return None;
        }
        Some(table.nearest_in_scale(previous[0]))
    }

    fn forced_pitch(&self, slot: &Slot, table: &HarmonyTable) -> Option<Forced> {
        if let Some(feet) = self.foot_pitches(slot, table) {
            return Some(Forced::Checked(feet));
        }
        if let Some(repeated) = self.repeated_pitch(slot) {
            return Some(Forced::Repeated(repeated));
        }
        self.parallel_follower_pitch(slot, table)
            .map(|pitch| Forced::Checked(vec![pitch]))
    }

    /// The foot pitch class inside the optionally extended bass range, nearest
    /// the bass's previous pitch (or the middle of its range) first.
    fn foot_pitches(&self, slot: &Slot, table: &HarmonyTable) -> Option<Vec<Pitch>> {
        let foot = &self.ctx.config.foot;
        if slot.voice != 0 || !constraints::onset_rule_applies(foot.force, &self.score, slot) {
            return None;
        }
        let (low, high) = self.ctx.voice_range(0);
        let (hard_low, hard_high) = self.ctx.hard_bounds(0);
        let low = (low - foot.extend_bass_range).max(hard_low);
        let high = high.min(hard_high);
        let target = self
            .score
            .voice(0)
            .previous_note(slot.onset)
            .and_then(|n| n.pitch)
            .unwrap_or((low + high) / 2);
        let mut feet = table.pitches_in_range(&[table.foot], low, high);
        if feet.is_empty() {
            return None;
        }
        feet.sort_by_key(|&p| ((p - target).abs(), p));
        Some(feet)
    }

    /// The pitch one rhythm cell earlier, when the harmony has not changed.
    fn repeated_pitch(&self, slot: &Slot) -> Option<Pitch> {
        if !self.ctx.config.melody.force_repeated_notes {
            return None;
        }
        let cell = self.ctx.config.rhythm.rhythm_len?;
        if slot.onset < cell {
            return None;
        }
        let source = slot.onset - cell;
        if self.score.harmony_index_at(source) != self.score.harmony_index_at(slot.onset) {
            return None;
        }
        self.score
            .voice(slot.voice)
            .notes_at(source)
            .iter()
            .find_map(|n| n.pitch)
    }

    /// The follower's previous pitch moved by the leader's last generic interval.
    fn parallel_follower_pitch(&self, slot: &Slot, table: &HarmonyTable) -> Option<Pitch> {
        let pairs = &self.ctx.config.parallels.force_parallel_motion;
        for pair in pairs.iter().filter(|pair| pair.follower == slot.voice) {
            let leader = self.score.voice(pair.leader);
            let Some(now) = leader.notes_at(slot.onset).iter().find_map(|n| n.pitch) else {
                continue;
            };
            let Some(before) = leader.previous_note(slot.onset).and_then(|n| n.pitch) else {
                continue;
            };
            let Some(own) = self
                .score
                .voice(slot.voice)
                .previous_note(slot.onset)
                .and_then(|n| n.pitch)
            else {
                continue;
            };
            let pitch = table.step(own, table.generic_interval(before, now));
            let (low, high) = self.ctx.hard_bounds(slot.voice);
            if (low..=high).contains(&pitch) {
                return Some(pitch);
            }
        }
        None
    }

    fn candidates(
        &self,
        slot: &Slot,
        table: &HarmonyTable,
        choice: ChordToneChoice,
    ) -> Result<Candidates, FilterStage> {
        let ctx = self.ctx;
        let mut candidates = constraints::harmonic_candidates(ctx, &self.score, slot, table, choice)?;
        let previous = self
            .score
            .voice(slot.voice)
            .previous_note(slot.onset)
            .and_then(|n| n.pitch);
        candidates.retain(|p| constraints::within_interval_bounds(ctx, table, slot.voice, previous, p));
        if candidates.is_empty() {
            return Err(FilterStage::IntervalBounds);
        }
        candidates.retain(|p| {
            !constraints::forms_forbidden_parallel(ctx, &self.score, slot.voice, slot.onset, p)
        });
        if candidates.is_empty() {
            return Err(FilterStage::Parallels);
        }
        Ok(candidates)
    }

    /// Draw and remove the next pitch from the front candidate group.
    fn choose(
        &mut self,
        candidates: &mut Candidates,
        table: &HarmonyTable,
        previous: Option<Pitch>,
    ) -> Option<Pitch> {
        let ctx = self.ctx;
        let group = candidates.current()?;
        let index = match previous {
            Some(previous) => {
                let weights: Vec<f64> = group
                    .pitches
                    .iter()
                    .map(|&p| constraints::melodic_weight(ctx, table, previous, p))
                    .collect();
                self.rng.weighted_index(&weights)?
            }
            None => self.rng.range_usize(0, group.pitches.len()),
        };
        Some(group.pitches.remove(index))
    }

    fn rejection(&self, slot: &Slot, previous: &[Pitch], pitch: Pitch) -> Option<Rejection> {
        let melody = &self.ctx.config.melody;
        if melody
            .max_alternations
            .is_some_and(|max| constraints::violates_alternation(previous, pitch, max))
        {
            return Some(Rejection::Alternation);
        }
        if melody
            .max_repeated_notes
            .is_some_and(|max| constraints::violates_repetition(previous, pitch, max))
        {
            return Some(Rejection::Repetition);
        }
        // The first loop cycle may not be a single repeated pitch.
        if let Some(len) = self.loop_len(slot.voice).filter(|&len| len > 1) {
            if previous.len() + 1 == len && previous.iter().all(|&p| p == pitch) {
                return Some(Rejection::LoopUniqueness);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConsonanceTreatment, OnsetRule, ParallelPair};
    use crate::rhythm::{RhythmNote, generate_rhythm};
    use crate::score::beats;

    fn context(config: Config) -> Context {
        Context::new(config).unwrap()
    }

    fn pitches(score: &Score, voice: usize) -> Vec<Pitch> {
        score.voice(voice).iter().filter_map(|n| n.pitch).collect()
    }

    fn even_rhythm(voices: usize, notes: i64) -> Rhythm {
        Rhythm::new(
            (0..voices)
                .map(|_| {
                    (0..notes)
                        .map(|i| RhythmNote {
                            onset: beats(i),
                            duration: beats(1),
                        })
                        .collect()
                })
                .collect(),
        )
    }

    fn three_voice_config() -> Config {
        let mut config = Config {
            num_voices: 3,
            scales: vec![vec![0, 2, 4, 5, 7, 9, 11], vec![7, 9, 11, 0, 2, 4, 5]],
            chords: vec![vec![0, 4, 7], vec![7, 11, 2]],
            harmony_len: vec![beats(4)],
            num_harmonies: 2,
            pattern_len: beats(8),
            voice_ranges: vec![(43, 60), (52, 67), (60, 76)],
            hard_bounds: vec![(36, 67), (45, 74), (55, 84)],
            ..Config::default()
        };
        config.parallels.prohibit = vec![0, 7];
        config.parallels.antiparallels = true;
        config.foot.force = OnsetRule::Never;
        config.search.max_dead_ends = 20_000;
        config
    }

    /// Octave-equivalent parallel or anti-parallel motion between any two voices.
    fn find_parallel(score: &Score, tet: i32, prohibited: &[i32]) -> Option<(usize, usize, Time)> {
        for a in 0..score.num_voices() {
            for b in (a + 1)..score.num_voices() {
                for note in score.voice(a).iter() {
                    let Some(now_a) = note.pitch else { continue };
                    let Some(now_b) = score.voice(b).notes_at(note.onset).iter().find_map(|n| n.pitch)
                    else {
                        continue;
                    };
                    let prev_a = score.voice(a).previous_note(note.onset).and_then(|n| n.pitch);
                    let prev_b = score.voice(b).previous_note(note.onset).and_then(|n| n.pitch);
                    let (Some(prev_a), Some(prev_b)) = (prev_a, prev_b) else {
                        continue;
                    };
                    if now_a == prev_a || now_b == prev_b {
                        continue;
                    }
                    let before = (prev_b - prev_a).rem_euclid(tet);
                    let after = (now_b - now_a).rem_euclid(tet);
                    if before == after && prohibited.contains(&after) {
                        return Some((a, b, note.onset));
                    }
                }
            }
        }
        None
    }

    #[test]
    fn no_forbidden_parallels_across_many_seeds() {
        let ctx = context(three_voice_config());
        let cancel = CancelToken::new();
        let mut successes = 0;
        for seed in 0..40 {
            let mut rng = PatternRng::new(seed);
            let rhythm = generate_rhythm(&ctx, &mut rng);
            let Ok(pattern) = generate_initial_pattern(&ctx, &rhythm, &mut rng, &cancel) else {
                continue;
            };
            successes += 1;
            assert_eq!(pattern.score.note_count(), rhythm.note_count());
            assert_eq!(
                find_parallel(&pattern.score, 12, &[0, 7]),
                None,
                "seed {seed} produced forbidden parallels"
            );
        }
        assert!(successes >= 10, "only {successes} of 40 seeds succeeded");
    }

    #[test]
    fn melodic_rules_hold_in_generated_patterns() {
        let mut config = three_voice_config();
        config.melody.max_repeated_notes = Some(1);
        config.melody.max_alternations = Some(2);
        let ctx = context(config);
        let cancel = CancelToken::new();
        for seed in 100..120 {
            let mut rng = PatternRng::new(seed);
            let rhythm = generate_rhythm(&ctx, &mut rng);
            let Ok(pattern) = generate_initial_pattern(&ctx, &rhythm, &mut rng, &cancel) else {
                continue;
            };
            for voice in 0..3 {
                let line = pitches(&pattern.score, voice);
                assert!(
                    line.windows(3).all(|w| !(w[0] == w[1] && w[1] == w[2])),
                    "seed {seed} voice {voice}: three repeated notes in {line:?}"
                );
                assert!(
                    line.windows(6).all(|w| !(w[0] != w[1]
                        && w[0] == w[2]
                        && w[2] == w[4]
                        && w[1] == w[3]
                        && w[3] == w[5])),
                    "seed {seed} voice {voice}: alternation in {line:?}"
                );
            }
        }
    }

    /// The first seed in `0..20` that yields a pattern.
    fn first_pattern(ctx: &Context, rhythm: Option<&Rhythm>) -> InitialPattern {
        let cancel = CancelToken::new();
        (0..20)
            .find_map(|seed| {
                let mut rng = PatternRng::new(seed);
                let generated;
                let rhythm = match rhythm {
                    Some(rhythm) => rhythm,
                    None => {
                        generated = generate_rhythm(ctx, &mut rng);
                        &generated
                    }
                };
                generate_initial_pattern(ctx, rhythm, &mut rng, &cancel).ok()
            })
            .expect("no seed produced a pattern")
    }

    #[test]
    fn forced_chord_tones_are_chord_tones() {
        let mut config = three_voice_config();
        config.chord_tones.force = OnsetRule::FirstBeat;
        config.chord_tones.len_to_force = Some(beats(2));
        let ctx = context(config);
        let pattern = first_pattern(&ctx, None);
        assert!(!pattern.forced_chord_tones.is_empty());
        for &(voice, onset) in &pattern.forced_chord_tones {
            let table = ctx.harmony(pattern.score.harmony_index_at(onset));
            let pitch = pattern.score.voice(voice).notes_at(onset)[0].pitch.unwrap();
            assert!(table.is_chord_tone(pitch), "voice {voice} at {onset}: {pitch}");
        }
    }

    #[test]
    fn foot_is_forced_in_the_bass() {
        let mut config = three_voice_config();
        config.foot.force = OnsetRule::FirstBeat;
        config.foot_pcs = vec![0, 7];
        let ctx = context(config);
        let pattern = first_pattern(&ctx, Some(&even_rhythm(3, 8)));
        let bass = pattern.score.voice(0);
        assert_eq!(bass.notes_at(beats(0))[0].pitch.map(|p| p % 12), Some(0));
        assert_eq!(bass.notes_at(beats(4))[0].pitch.map(|p| p % 12), Some(7));
    }

    #[test]
    fn hard_pitch_loop_repeats_the_cycle() {
        let mut config = three_voice_config();
        config.num_voices = 1;
        config.num_harmonies = 1;
        config.pattern_len = beats(4);
        config.scales = vec![vec![0, 2, 4, 5, 7, 9, 11]];
        config.chords = vec![vec![0, 4, 7]];
        config.melody.pitch_loop = vec![Some(3)];
        config.melody.hard_pitch_loop = true;
        config.melody.max_alternations = None;
        config.melody.max_repeated_notes = None;
        let ctx = context(config);
        let rhythm = even_rhythm(1, 4);
        let pattern = first_pattern(&ctx, Some(&rhythm));
        let line = pitches(&pattern.score, 0);
        assert_eq!(line.len(), 4);
        assert_eq!(line[3], line[0]);
        assert!(
            !(line[0] == line[1] && line[1] == line[2]),
            "loop collapsed to one pitch: {line:?}"
        );
    }

    #[test]
    fn parallel_follower_copies_the_leader() {
        let mut config = three_voice_config();
        config.num_voices = 2;
        config.parallels.prohibit = Vec::new();
        config.parallels.force_parallel_motion = vec![ParallelPair {
            leader: 1,
            follower: 0,
        }];
        config.consonance.treatment = ConsonanceTreatment::None;
        config.allow_voice_crossings = true;
        config.hard_bounds = vec![(0, 127), (45, 74)];
        let ctx = context(config);
        let rhythm = even_rhythm(2, 8);
        let pattern = first_pattern(&ctx, Some(&rhythm));
        let leader = pitches(&pattern.score, 1);
        let follower = pitches(&pattern.score, 0);
        for i in 1..8 {
            let table = ctx.harmony(pattern.score.harmony_index_at(beats(i as i64)));
            assert_eq!(
                table.generic_interval(follower[i - 1], follower[i]),
                table.generic_interval(leader[i - 1], leader[i]),
                "step {i}: leader {leader:?}, follower {follower:?}"
            );
        }
    }

    #[test]
    fn cancelled_search_times_out() {
        let ctx = context(three_voice_config());
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut rng = PatternRng::new(1);
        let rhythm = generate_rhythm(&ctx, &mut rng);
        assert!(matches!(
            generate_initial_pattern(&ctx, &rhythm, &mut rng, &cancel),
            Err(GenerationError::Timeout)
        ));
    }

    #[test]
    fn impossible_range_reports_diagnostics() {
        let mut config = three_voice_config();
        config.num_voices = 1;
        config.voice_ranges = vec![(61, 61)];
        config.chord_tones.selection = false;
        let ctx = context(config);
        let rhythm = even_rhythm(1, 2);
        match generate_initial_pattern(&ctx, &rhythm, &mut PatternRng::new(2), &CancelToken::new()) {
            Err(GenerationError::PitchMaterialsExhausted { attempts, diagnostics }) => {
                assert_eq!(attempts, 1);
                assert_eq!(diagnostics.no_pitches, 1);
                assert_eq!(diagnostics.dead_ends, 1);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn forced_feet_obey_the_repetition_limit() {
        let mut config = three_voice_config();
        config.num_voices = 2;
        config.scales = vec![vec![0, 2, 4, 5, 7, 9, 11]];
        config.chords = vec![vec![0, 4, 7]];
        config.harmony_len = vec![beats(1)];
        config.num_harmonies = 8;
        config.voice_ranges = vec![(48, 64), (60, 76)];
        config.foot.force = OnsetRule::FirstBeat;
        config.foot_pcs = vec![0];
        config.melody.max_repeated_notes = Some(1);
        let ctx = context(config);
        let pattern = first_pattern(&ctx, Some(&even_rhythm(2, 8)));
        let bass = pitches(&pattern.score, 0);
        assert_eq!(bass.len(), 8);
        assert!(bass.iter().all(|p| p % 12 == 0), "bass left the foot: {bass:?}");
        assert!(
            bass.windows(3).all(|w| !(w[0] == w[1] && w[1] == w[2])),
            "three repeated feet in {bass:?}"
        );
    }

    #[test]
    fn repeated_notes_follow_the_rhythm_cell() {
        let mut config = three_voice_config();
        config.num_voices = 2;
        config.rhythm.rhythm_len = Some(beats(1));
        config.rhythm.grid = Time::new(1, 2);
        config.rhythm.onset_density = vec![0.5];
        config.melody.force_repeated_notes = true;
        let ctx = context(config);
        let pattern = first_pattern(&ctx, None);
        let score = &pattern.score;
        let mut copies = 0;
        for voice in score.voices() {
            for note in voice.iter() {
                if note.onset < beats(1) {
                    continue;
                }
                let earlier = note.onset - beats(1);
                if score.harmony_index_at(earlier) != score.harmony_index_at(note.onset) {
                    continue;
                }
                let source = voice.notes_at(earlier).iter().find_map(|n| n.pitch);
                assert_eq!(note.pitch, source, "onset {} does not repeat {earlier}", note.onset);
                copies += 1;
            }
        }
        assert!(copies > 0);
    }

    #[test]
    fn randomized_voice_order_keeps_onsets_and_followers_in_place() {
        let mut config = three_voice_config();
        config.search.randomize_voice_order = true;
        config.parallels.force_parallel_motion = vec![ParallelPair {
            leader: 2,
            follower: 0,
        }];
        let ctx = context(config);
        let rhythm = even_rhythm(3, 4);
        let mut orders = BTreeSet::new();
        for seed in 0..30 {
            let slots = ordered_slots(&ctx, &rhythm, &mut PatternRng::new(seed));
            assert_eq!(slots.len(), 12);
            assert!(slots.windows(2).all(|w| w[0].onset <= w[1].onset));
            let order: Vec<usize> = slots[..3].iter().map(|s| s.voice).collect();
            assert_eq!(order[2], 0, "seed {seed}: follower placed before its leader");
            for chunk in slots.chunks(3) {
                let voices: Vec<usize> = chunk.iter().map(|s| s.voice).collect();
                assert_eq!(voices, order, "seed {seed}: order changed between onsets");
            }
            orders.insert(order);
        }
        assert_eq!(orders.len(), 2);
    }
}
