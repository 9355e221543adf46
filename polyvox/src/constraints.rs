// Stateless candidate evaluation for the initial-pattern search.
//
// Every function here reads the context, the score as it stands, and a
// candidate slot (voice, onset, duration); none of them mutate anything.
// initial.rs composes them per step:
//
//   1. `decide_chord_tone` settles whether the note should be a chord tone:
//      forced by an onset rule, a length threshold or synchronized chord-tone
//      attacks, or drawn from the duration-scaled probability ramp.
//   2. `harmonic_candidates` turns that decision into ordered pitch-class
//      groups, realizes them as pitches inside the boundary range, and drops
//      pitches that are dissonant against the other voices.
//   3. `within_interval_bounds` and `forms_forbidden_parallel` narrow the
//      result melodically against the voice's previous pitch.
//
// When a stage leaves nothing, the caller records the `FilterStage` it
// reached so failed attempts can explain themselves.
//
// Voice 0 is the lowest voice. Intervals between voices are measured
// octave-equivalently: |a - b| mod tet.

use crate::config::{
    ChordToneParams, ConsonanceKind, ConsonanceParams, ConsonanceTreatment, Context, Cyclic,
    Doubling, IntervalLimit, OnsetRule, ProbabilityCurve,
};
use crate::diagnostics::FilterStage;
use crate::harmony::HarmonyTable;
use crate::score::{Pitch, Score, Time, beats, to_f64};
use polyvox_prng::PatternRng;
use std::collections::{BTreeSet, VecDeque};

/// The note being decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub voice: usize,
    pub onset: Time,
    pub duration: Time,
}

impl Slot {
    pub fn end(&self) -> Time {
        self.onset + self.duration
    }
}

// ---------------------------------------------------------------------------
// Ranges
// ---------------------------------------------------------------------------

/// Admissible `[low, high]` for a slot. Without voice crossings the range is
/// clamped between the highest pitch sounding in lower voices and the lowest
/// sounding in higher voices (unisons allowed), and it never leaves the
/// voice's hard bounds. `low > high` means nothing fits.
pub fn boundary_pitches(ctx: &Context, score: &Score, slot: &Slot) -> (Pitch, Pitch) {
    let (mut low, mut high) = ctx.voice_range(slot.voice);
    if !ctx.config.allow_voice_crossings {
        for (index, voice) in score.voices().iter().enumerate() {
            if index == slot.voice {
                continue;
            }
            for pitch in voice.sounding_pitches(slot.onset, slot.end()) {
                if index < slot.voice {
                    low = low.max(pitch);
                } else {
                    high = high.min(pitch);
                }
            }
        }
    }
    let (hard_low, hard_high) = ctx.hard_bounds(slot.voice);
    (low.max(hard_low), high.min(hard_high))
}

// ---------------------------------------------------------------------------
// Chord-tone decision
// ---------------------------------------------------------------------------

/// Outcome of the chord-tone decision, which fixes the candidate group order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordToneChoice {
    /// Only chord tones.
    Forced,
    /// Chord tones first, non-chord tones as fallback.
    Preferred,
    /// Non-chord tones first (alone if forcing non-chord tones).
    Avoided,
    /// Chord-tone selection is off: one group of every scale tone.
    Free,
}

/// Whether `rule` selects this slot.
pub fn onset_rule_applies(rule: OnsetRule, score: &Score, slot: &Slot) -> bool {
    let voice = score.voice(slot.voice);
    let harmony = score.timeline().interval_at(slot.onset);
    match rule {
        OnsetRule::Never => false,
        OnsetRule::GlobalFirstBeat => slot.onset == beats(0),
        OnsetRule::GlobalFirstNote => voice.is_empty_before(slot.onset),
        OnsetRule::FirstBeat => slot.onset == harmony.start,
        OnsetRule::FirstNote => voice.notes_in(harmony.start, slot.onset).next().is_none(),
    }
}

/// Deterministic overrides that always demand a chord tone.
pub fn chord_tone_forced(ctx: &Context, score: &Score, slot: &Slot) -> bool {
    let params = &ctx.config.chord_tones;
    if onset_rule_applies(params.force, score, slot) {
        return true;
    }
    if params.len_to_force.is_some_and(|len| slot.duration >= len) {
        return true;
    }
    if params.sync_onsets {
        let table = ctx.harmony(score.harmony_index_at(slot.onset));
        return score
            .voices()
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != slot.voice)
            .flat_map(|(_, voice)| voice.notes_at(slot.onset))
            .filter_map(|note| note.pitch)
            .any(|pitch| table.is_chord_tone(pitch));
    }
    false
}

/// Consecutive non-chord tones immediately before `onset`, counting at most `cap`.
pub fn non_chord_tones_since_chord_tone(
    ctx: &Context,
    score: &Score,
    voice: usize,
    onset: Time,
    cap: usize,
) -> usize {
    let mut count = 0;
    let mut cursor = onset;
    while count < cap {
        let Some(note) = score.voice(voice).previous_note(cursor) else {
            break;
        };
        let (Some(pitch), note_onset) = (note.pitch, note.onset) else {
            break;
        };
        if ctx.harmony(score.harmony_index_at(note_onset)).is_chord_tone(pitch) {
            break;
        }
        count += 1;
        cursor = note_onset;
    }
    count
}

/// Probability that the next note is a chord tone.
///
/// Rises from `min_prob` right after a chord tone to 1 once `max_n_between`
/// non-chord tones have passed, along a linear or square-root ramp. With
/// duration scaling, notes longer than the neutral duration move toward 1
/// (`1 - (1 - p) / ratio`) and, optionally, shorter notes scale down (`p * ratio`).
pub fn chord_tone_probability(params: &ChordToneParams, since: usize, duration: Time) -> f64 {
    let cap = params.max_n_between.max(1);
    if since >= cap {
        return 1.0;
    }
    let x = since as f64 / cap as f64;
    let ramp = match params.curve {
        ProbabilityCurve::Linear => x,
        ProbabilityCurve::Sqrt => x.sqrt(),
    };
    let mut p = params.min_prob + (1.0 - params.min_prob) * ramp;
    if params.scale_by_duration {
        let ratio = to_f64(duration / params.neutral_duration);
        if ratio > 1.0 {
            p = 1.0 - (1.0 - p) / ratio;
        } else if ratio < 1.0 && params.scale_short_down {
            p *= ratio;
        }
    }
    p.clamp(0.0, 1.0)
}

pub fn decide_chord_tone(
    ctx: &Context,
    score: &Score,
    slot: &Slot,
    rng: &mut PatternRng,
) -> ChordToneChoice {
    let params = &ctx.config.chord_tones;
    if !params.selection {
        return ChordToneChoice::Free;
    }
    if chord_tone_forced(ctx, score, slot) {
        return ChordToneChoice::Forced;
    }
    let cap = params.max_n_between.max(1);
    let since = non_chord_tones_since_chord_tone(ctx, score, slot.voice, slot.onset, cap);
    if rng.random_bool(chord_tone_probability(params, since, slot.duration)) {
        ChordToneChoice::Preferred
    } else {
        ChordToneChoice::Avoided
    }
}

// ---------------------------------------------------------------------------
// Candidate structure
// ---------------------------------------------------------------------------

/// One pitch-class subset and its remaining concrete pitches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateGroup {
    pub pitch_classes: Vec<i32>,
    pub pitches: Vec<Pitch>,
}

/// Ordered candidate groups; the search consumes the front group first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    groups: VecDeque<CandidateGroup>,
}

impl Candidates {
    pub fn push(&mut self, group: CandidateGroup) {
        self.groups.push_back(group);
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.pitches.is_empty())
    }

    /// Keep only pitches satisfying `keep`, dropping groups left empty.
    pub fn retain(&mut self, mut keep: impl FnMut(Pitch) -> bool) {
        for group in &mut self.groups {
            group.pitches.retain(|&p| keep(p));
        }
        self.groups.retain(|g| !g.pitches.is_empty());
    }

    /// The first group that still has pitches, discarding exhausted ones.
    pub fn current(&mut self) -> Option<&mut CandidateGroup> {
        while self.groups.front().is_some_and(|g| g.pitches.is_empty()) {
            self.groups.pop_front();
        }
        self.groups.front_mut()
    }

    /// Move `pitch` to a group of its own at the front. Returns false if absent.
    pub fn prefer(&mut self, pitch: Pitch) -> bool {
        let Some(group) = self.groups.iter_mut().find(|g| g.pitches.contains(&pitch)) else {
            return false;
        };
        group.pitches.retain(|&p| p != pitch);
        let pitch_classes = group.pitch_classes.clone();
        self.groups.push_front(CandidateGroup {
            pitch_classes,
            pitches: vec![pitch],
        });
        true
    }
}

/// Pitch-class groups in trial order for a chord-tone decision.
pub fn pitch_class_groups(
    ctx: &Context,
    table: &HarmonyTable,
    choice: ChordToneChoice,
) -> Vec<Vec<i32>> {
    let chord = table.chord.clone();
    let non_chord = table.non_chord.clone();
    match choice {
        ChordToneChoice::Free => vec![table.scale.clone()],
        ChordToneChoice::Forced => vec![chord],
        ChordToneChoice::Preferred => vec![chord, non_chord],
        ChordToneChoice::Avoided if ctx.config.chord_tones.try_to_force_non_chord_tones => {
            vec![non_chord]
        }
        ChordToneChoice::Avoided => vec![non_chord, chord],
    }
}

/// Candidate pitches for a slot after range and consonance filtering.
pub fn harmonic_candidates(
    ctx: &Context,
    score: &Score,
    slot: &Slot,
    table: &HarmonyTable,
    choice: ChordToneChoice,
) -> Result<Candidates, FilterStage> {
    let groups = pitch_class_groups(ctx, table, choice);
    if groups.iter().all(Vec::is_empty) {
        return Err(FilterStage::NoPitchClasses);
    }
    let (low, high) = boundary_pitches(ctx, score, slot);
    let others = consonance_context(ctx, score, slot);
    let mut candidates = Candidates::default();
    for pitch_classes in groups.into_iter().filter(|g| !g.is_empty()) {
        let pitches: Vec<Pitch> = table
            .pitches_in_range(&pitch_classes, low, high)
            .into_iter()
            .filter(|&p| is_consonant(ctx, &others, p))
            .collect();
        if !pitches.is_empty() {
            candidates.push(CandidateGroup {
                pitch_classes,
                pitches,
            });
        }
    }
    if candidates.is_empty() {
        Err(FilterStage::NoPitches)
    } else {
        Ok(candidates)
    }
}

// ---------------------------------------------------------------------------
// Consonance
// ---------------------------------------------------------------------------

/// Other-voice pitches a candidate in `slot` must agree with.
pub fn consonance_context(ctx: &Context, score: &Score, slot: &Slot) -> Vec<Pitch> {
    let others = score
        .voices()
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != slot.voice)
        .map(|(_, voice)| voice);
    match ctx.config.consonance.treatment {
        ConsonanceTreatment::None => Vec::new(),
        ConsonanceTreatment::AllOnsets => others
            .flat_map(|voice| voice.notes_at(slot.onset))
            .filter_map(|note| note.pitch)
            .collect(),
        ConsonanceTreatment::AllDurs => others
            .flat_map(|voice| voice.sounding_pitches(slot.onset, slot.end()))
            .collect(),
    }
}

pub fn is_consonant(ctx: &Context, others: &[Pitch], pitch: Pitch) -> bool {
    if others.is_empty() {
        return true;
    }
    let params = &ctx.config.consonance;
    match params.kind {
        ConsonanceKind::Pairwise => pairwise_consonant(params, ctx.tet(), others, pitch),
        ConsonanceKind::Chordwise => chordwise_consonant(params, ctx.tet(), others, pitch),
    }
}

fn pairwise_consonant(params: &ConsonanceParams, tet: i32, others: &[Pitch], pitch: Pitch) -> bool {
    let listed = |interval: i32| {
        params
            .consonances
            .iter()
            .any(|&c| c.rem_euclid(tet) == interval)
    };
    let all_consonant = others.iter().all(|&other| {
        let interval = (pitch - other).abs() % tet;
        listed(interval) != params.invert
    });
    if !all_consonant {
        return false;
    }
    !(params.exclude_augmented_triads && completes_augmented_triad(tet, others, pitch))
}

fn completes_augmented_triad(tet: i32, others: &[Pitch], pitch: Pitch) -> bool {
    if tet % 3 != 0 {
        return false;
    }
    let third = tet / 3;
    let pc = pitch.rem_euclid(tet);
    let pcs: BTreeSet<i32> = others.iter().map(|p| p.rem_euclid(tet)).collect();
    // Root, third or fifth alike: the other two tones sit a major third either side.
    pcs.contains(&(pc + third).rem_euclid(tet)) && pcs.contains(&(pc - third).rem_euclid(tet))
}

/// Decides whether a pitch class already sounding may be doubled.
pub trait DoublingPolicy {
    /// `sounding` holds the pitch classes present before the candidate,
    /// `chord` the transposed chord matched with it.
    fn permits_doubling(&self, sounding: &BTreeSet<i32>, chord: &BTreeSet<i32>) -> bool;
}

impl DoublingPolicy for Doubling {
    fn permits_doubling(&self, sounding: &BTreeSet<i32>, chord: &BTreeSet<i32>) -> bool {
        match self {
            Doubling::Permit => true,
            Doubling::Forbid => false,
            Doubling::CompleteChordFirst => chord.is_subset(sounding),
        }
    }
}

fn chordwise_consonant(params: &ConsonanceParams, tet: i32, others: &[Pitch], pitch: Pitch) -> bool {
    let sounding: BTreeSet<i32> = others.iter().map(|p| p.rem_euclid(tet)).collect();
    let pc = pitch.rem_euclid(tet);
    let doubled = sounding.contains(&pc);
    let mut with_candidate = sounding.clone();
    with_candidate.insert(pc);
    let bass = others.iter().copied().chain([pitch]).min().unwrap_or(pitch);

    for shape in &params.chords {
        let Some(&root) = shape.first() else {
            continue;
        };
        for shift in 0..tet {
            let chord: BTreeSet<i32> = shape.iter().map(|x| (x + shift).rem_euclid(tet)).collect();
            if !with_candidate.is_subset(&chord) {
                continue;
            }
            if !params.octave_equivalence && bass.rem_euclid(tet) != (root + shift).rem_euclid(tet) {
                continue;
            }
            if doubled && !params.doubling.permits_doubling(&sounding, &chord) {
                continue;
            }
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Melodic filters
// ---------------------------------------------------------------------------

/// Whether the move from `previous` to `pitch` respects the voice's interval
/// bounds (chord-tone or non-chord-tone bounds by the target's role).
pub fn within_interval_bounds(
    ctx: &Context,
    table: &HarmonyTable,
    voice: usize,
    previous: Option<Pitch>,
    pitch: Pitch,
) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    let melody = &ctx.config.melody;
    let (max, min) = if table.is_chord_tone(pitch) {
        (melody.max_interval.cyc(voice), melody.min_interval.cyc(voice))
    } else {
        (
            melody.max_interval_for_non_chord_tones.cyc(voice),
            melody.min_interval_for_non_chord_tones.cyc(voice),
        )
    };
    let size = |limit: &IntervalLimit| match limit {
        IntervalLimit::Generic(_) => table.generic_interval(previous, pitch).abs(),
        IntervalLimit::Specific(_) => (pitch - previous).abs(),
    };
    size(max) <= max.value() && size(min) >= min.value()
}

/// Whether placing `pitch` in `voice` at `onset` moves in forbidden parallel
/// (or, if enabled, anti-parallel) motion with a voice attacking at the same onset.
pub fn forms_forbidden_parallel(
    ctx: &Context,
    score: &Score,
    voice: usize,
    onset: Time,
    pitch: Pitch,
) -> bool {
    let params = &ctx.config.parallels;
    if params.prohibit.is_empty() {
        return false;
    }
    let tet = ctx.tet();
    let Some(previous) = score.voice(voice).previous_note(onset).and_then(|n| n.pitch) else {
        return false;
    };
    let motion = pitch - previous;
    if motion == 0 {
        return false;
    }
    let prohibited = |interval: i32| params.prohibit.iter().any(|&p| p.rem_euclid(tet) == interval);
    for (index, other) in score.voices().iter().enumerate() {
        if index == voice {
            continue;
        }
        let Some(other_previous) = other.previous_note(onset).and_then(|n| n.pitch) else {
            continue;
        };
        for other_pitch in other.notes_at(onset).iter().filter_map(|n| n.pitch) {
            let other_motion = other_pitch - other_previous;
            if other_motion == 0 {
                continue;
            }
            let before = voice_interval(voice, previous, index, other_previous, tet);
            let after = voice_interval(voice, pitch, index, other_pitch, tet);
            if before != after || !prohibited(after) {
                continue;
            }
            let same_direction = (motion > 0) == (other_motion > 0);
            if same_direction || params.antiparallels {
                return true;
            }
        }
    }
    false
}

/// Interval from the lower-indexed voice up to the higher-indexed one, modulo
/// the octave. Crossed voices keep their orientation, so a fifth stays a fifth.
fn voice_interval(a: usize, pitch_a: Pitch, b: usize, pitch_b: Pitch, tet: i32) -> i32 {
    let (lower, upper) = if a < b { (pitch_a, pitch_b) } else { (pitch_b, pitch_a) };
    (upper - lower).rem_euclid(tet)
}

/// Selection weight for moving from `previous` to `pitch`:
/// `1 / log_b(b + size)` with `size` in scale steps, a unison weighted as
/// `unison_weighted_as`. Larger bases flatten the preference for steps.
pub fn melodic_weight(ctx: &Context, table: &HarmonyTable, previous: Pitch, pitch: Pitch) -> f64 {
    let melody = &ctx.config.melody;
    let steps = table.generic_interval(previous, pitch).unsigned_abs() as f64;
    let size = if steps == 0.0 {
        melody.unison_weighted_as
    } else {
        steps
    };
    let base = melody.interval_weight_log_base;
    1.0 / (base + size).log(base)
}

/// Whether `candidate` would complete a strict two-pitch alternation longer
/// than `max_alternations` allows (2 permits A B A B A, forbids A B A B A B).
pub fn violates_alternation(previous: &[Pitch], candidate: Pitch, max_alternations: usize) -> bool {
    let window = 2 * max_alternations + 2;
    if previous.len() + 1 < window {
        return false;
    }
    let mut run: Vec<Pitch> = previous[previous.len() + 1 - window..].to_vec();
    run.push(candidate);
    run[0] != run[1] && (2..run.len()).all(|i| run[i] == run[i - 2])
}

/// Whether `candidate` would repeat one pitch more than `max_repeated` times
/// (1 permits A A, forbids A A A).
pub fn violates_repetition(previous: &[Pitch], candidate: Pitch, max_repeated: usize) -> bool {
    previous.len() > max_repeated
        && previous[previous.len() - max_repeated - 1..]
            .iter()
            .all(|&p| p == candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::score::Note;

    fn context(config: Config) -> Context {
        Context::new(config).unwrap()
    }

    fn two_voice_config() -> Config {
        Config {
            num_voices: 2,
            scales: vec![vec![0, 2, 4, 5, 7, 9, 11]],
            chords: vec![vec![0, 4, 7]],
            harmony_len: vec![beats(4)],
            num_harmonies: 1,
            pattern_len: beats(4),
            voice_ranges: vec![(48, 60), (60, 72)],
            hard_bounds: vec![(36, 72), (48, 84)],
            ..Config::default()
        }
    }

    fn empty_score(ctx: &Context) -> Score {
        Score::new(ctx.num_voices(), ctx.timeline().clone())
    }

    /// Every pitch left in `candidates`, front group first.
    fn drain(mut candidates: Candidates) -> Vec<Pitch> {
        let mut pitches = Vec::new();
        while let Some(group) = candidates.current() {
            pitches.append(&mut group.pitches);
        }
        pitches
    }

    fn slot(voice: usize, onset: i64, duration: i64) -> Slot {
        Slot {
            voice,
            onset: beats(onset),
            duration: beats(duration),
        }
    }

    #[test]
    fn alternation_limit() {
        assert!(!violates_alternation(&[60, 62, 60, 62], 60, 2));
        assert!(violates_alternation(&[60, 62, 60, 62, 60], 62, 2));
        assert!(!violates_alternation(&[60, 62, 60, 64, 60], 62, 2));
        assert!(!violates_alternation(&[60, 60, 60, 60, 60], 60, 2));
        assert!(violates_alternation(&[60, 62, 60], 62, 1));
    }

    #[test]
    fn repetition_limit() {
        assert!(!violates_repetition(&[60], 60, 1));
        assert!(violates_repetition(&[60, 60], 60, 1));
        assert!(!violates_repetition(&[62, 60], 60, 1));
        assert!(violates_repetition(&[60], 60, 0));
        assert!(!violates_repetition(&[], 60, 0));
    }

    #[test]
    fn probability_ramp_and_duration_scaling() {
        let mut params = ChordToneParams {
            min_prob: 0.2,
            max_n_between: 4,
            scale_by_duration: false,
            ..ChordToneParams::default()
        };
        let eighth = Time::new(1, 2);
        assert!((chord_tone_probability(&params, 0, eighth) - 0.2).abs() < 1e-12);
        assert!((chord_tone_probability(&params, 2, eighth) - 0.6).abs() < 1e-12);
        assert_eq!(chord_tone_probability(&params, 4, eighth), 1.0);

        params.curve = ProbabilityCurve::Sqrt;
        assert!((chord_tone_probability(&params, 1, eighth) - 0.6).abs() < 1e-12);

        params.curve = ProbabilityCurve::Linear;
        params.scale_by_duration = true;
        params.neutral_duration = eighth;
        // Twice the neutral duration halves the distance to 1.
        assert!((chord_tone_probability(&params, 0, beats(1)) - 0.6).abs() < 1e-12);
        let sixteenth = Time::new(1, 4);
        assert!((chord_tone_probability(&params, 0, sixteenth) - 0.2).abs() < 1e-12);
        params.scale_short_down = true;
        assert!((chord_tone_probability(&params, 0, sixteenth) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn boundary_avoids_crossings_and_respects_hard_bounds() {
        let ctx = context(two_voice_config());
        let mut score = empty_score(&ctx);
        score.add_note(0, Note::new(55, beats(0), beats(2)));
        score.add_note(1, Note::new(64, beats(1), beats(2)));

        assert_eq!(boundary_pitches(&ctx, &score, &slot(1, 0, 1)), (60, 72));
        assert_eq!(boundary_pitches(&ctx, &score, &slot(0, 1, 1)), (48, 60));
        assert_eq!(boundary_pitches(&ctx, &score, &slot(0, 2, 2)), (48, 60));

        let mut crossing = two_voice_config();
        crossing.voice_ranges = vec![(48, 70), (50, 72)];
        let ctx = context(crossing);
        assert_eq!(boundary_pitches(&ctx, &score, &slot(1, 0, 1)), (55, 72));
        assert_eq!(boundary_pitches(&ctx, &score, &slot(0, 1, 2)), (48, 64));
    }

    #[test]
    fn forced_chord_tones_by_rule_length_and_sync() {
        let mut config = two_voice_config();
        config.chord_tones.force = OnsetRule::FirstBeat;
        config.chord_tones.len_to_force = Some(beats(2));
        config.chord_tones.sync_onsets = true;
        let ctx = context(config);
        let mut score = empty_score(&ctx);

        assert!(chord_tone_forced(&ctx, &score, &slot(0, 0, 1)));
        assert!(!chord_tone_forced(&ctx, &score, &slot(0, 1, 1)));
        assert!(chord_tone_forced(&ctx, &score, &slot(0, 1, 2)));

        score.add_note(1, Note::new(64, beats(1), beats(1)));
        assert!(chord_tone_forced(&ctx, &score, &slot(0, 1, 1)));
        score.add_note(1, Note::new(62, beats(3), beats(1)));
        assert!(!chord_tone_forced(&ctx, &score, &slot(0, 3, 1)));
    }

    #[test]
    fn onset_rules() {
        let mut config = two_voice_config();
        config.num_harmonies = 2;
        config.harmony_len = vec![beats(2)];
        let ctx = context(config);
        let mut score = empty_score(&ctx);
        score.add_note(0, Note::new(48, beats(0), beats(1)));

        assert!(onset_rule_applies(OnsetRule::FirstBeat, &score, &slot(0, 2, 1)));
        assert!(!onset_rule_applies(OnsetRule::GlobalFirstBeat, &score, &slot(0, 2, 1)));
        assert!(!onset_rule_applies(OnsetRule::GlobalFirstNote, &score, &slot(0, 1, 1)));
        assert!(onset_rule_applies(OnsetRule::GlobalFirstNote, &score, &slot(1, 1, 1)));
        assert!(onset_rule_applies(OnsetRule::FirstNote, &score, &slot(0, 3, 1)));
        assert!(!onset_rule_applies(OnsetRule::FirstNote, &score, &slot(0, 1, 1)));
        assert!(!onset_rule_applies(OnsetRule::Never, &score, &slot(0, 0, 1)));
    }

    #[test]
    fn group_order_follows_the_decision() {
        let mut config = two_voice_config();
        let ctx = context(config.clone());
        let table = ctx.harmony(0);
        let chord = table.chord.clone();
        let non_chord = table.non_chord.clone();

        assert_eq!(pitch_class_groups(&ctx, table, ChordToneChoice::Forced), vec![chord.clone()]);
        assert_eq!(
            pitch_class_groups(&ctx, table, ChordToneChoice::Preferred),
            vec![chord.clone(), non_chord.clone()]
        );
        assert_eq!(
            pitch_class_groups(&ctx, table, ChordToneChoice::Avoided),
            vec![non_chord.clone(), chord]
        );
        assert_eq!(
            pitch_class_groups(&ctx, table, ChordToneChoice::Free),
            vec![table.scale.clone()]
        );

        config.chord_tones.try_to_force_non_chord_tones = true;
        let ctx = context(config);
        assert_eq!(
            pitch_class_groups(&ctx, ctx.harmony(0), ChordToneChoice::Avoided),
            vec![non_chord]
        );
    }

    #[test]
    fn pairwise_consonance_against_sounding_notes() {
        let mut config = two_voice_config();
        config.consonance.consonances = vec![0, 3, 4, 7, 8, 9];
        let ctx = context(config);
        let mut score = empty_score(&ctx);
        score.add_note(0, Note::new(48, beats(0), beats(4)));

        let candidates = harmonic_candidates(
            &ctx,
            &score,
            &slot(1, 1, 1),
            ctx.harmony(0),
            ChordToneChoice::Free,
        )
        .unwrap();
        assert_eq!(drain(candidates), vec![60, 64, 67, 69, 72]);
    }

    #[test]
    fn onset_consonance_ignores_held_notes() {
        let mut config = two_voice_config();
        config.consonance.consonances = vec![0, 3, 4, 7, 8, 9];
        config.consonance.treatment = ConsonanceTreatment::AllOnsets;
        let ctx = context(config);
        let mut score = empty_score(&ctx);
        score.add_note(0, Note::new(48, beats(0), beats(4)));
        score.add_note(0, Note::new(50, beats(4), beats(1)));

        assert!(consonance_context(&ctx, &score, &slot(1, 1, 1)).is_empty());
        assert_eq!(consonance_context(&ctx, &score, &slot(1, 0, 1)), vec![48]);
        let held = harmonic_candidates(
            &ctx,
            &score,
            &slot(1, 1, 1),
            ctx.harmony(0),
            ChordToneChoice::Free,
        )
        .unwrap();
        assert_eq!(drain(held), vec![60, 62, 64, 65, 67, 69, 71, 72]);
    }

    #[test]
    fn inverted_consonances_are_dissonances() {
        let mut config = two_voice_config();
        config.consonance.consonances = vec![1, 2, 5, 6, 10, 11];
        config.consonance.invert = true;
        let ctx = context(config);
        assert!(is_consonant(&ctx, &[48], 64));
        assert!(!is_consonant(&ctx, &[48], 65));
    }

    #[test]
    fn augmented_triads_are_excluded() {
        let mut config = two_voice_config();
        config.consonance.consonances = vec![0, 3, 4, 7, 8, 9];
        let ctx = context(config.clone());
        assert!(!is_consonant(&ctx, &[48, 52], 56));
        assert!(is_consonant(&ctx, &[48, 52], 55));

        config.consonance.exclude_augmented_triads = false;
        let ctx = context(config);
        assert!(is_consonant(&ctx, &[48, 52], 56));
    }

    #[test]
    fn chordwise_consonance_with_doubling_and_root_policies() {
        let mut config = two_voice_config();
        config.consonance.kind = ConsonanceKind::Chordwise;
        config.consonance.chords = vec![vec![0, 4, 7]];
        let ctx = context(config.clone());
        assert!(is_consonant(&ctx, &[48, 52], 55));
        assert!(is_consonant(&ctx, &[48], 57));
        assert!(!is_consonant(&ctx, &[48, 52], 57));
        assert!(is_consonant(&ctx, &[48, 52], 60));

        config.consonance.doubling = Doubling::Forbid;
        let ctx = context(config.clone());
        assert!(!is_consonant(&ctx, &[48, 52], 60));

        config.consonance.doubling = Doubling::CompleteChordFirst;
        let ctx = context(config.clone());
        assert!(!is_consonant(&ctx, &[48, 52], 60));
        assert!(is_consonant(&ctx, &[48, 52, 55], 60));

        config.consonance.doubling = Doubling::Permit;
        config.consonance.octave_equivalence = false;
        let ctx = context(config);
        assert!(is_consonant(&ctx, &[48], 52));
        assert!(!is_consonant(&ctx, &[52], 60));
    }

    #[test]
    fn interval_bounds_by_role() {
        let mut config = two_voice_config();
        config.melody.max_interval = vec![IntervalLimit::Generic(4)];
        config.melody.min_interval = vec![IntervalLimit::Generic(0)];
        config.melody.max_interval_for_non_chord_tones = vec![IntervalLimit::Specific(2)];
        config.melody.min_interval_for_non_chord_tones = vec![IntervalLimit::Generic(1)];
        let ctx = context(config);
        let table = ctx.harmony(0);

        assert!(within_interval_bounds(&ctx, table, 1, None, 84));
        assert!(within_interval_bounds(&ctx, table, 1, Some(60), 67));
        assert!(!within_interval_bounds(&ctx, table, 1, Some(60), 72));
        assert!(within_interval_bounds(&ctx, table, 1, Some(60), 62));
        assert!(!within_interval_bounds(&ctx, table, 1, Some(60), 65));
        assert!(within_interval_bounds(&ctx, table, 1, Some(67), 67));
    }

    #[test]
    fn parallel_fifths_and_octaves_are_detected() {
        let mut config = two_voice_config();
        config.parallels.prohibit = vec![0, 7];
        config.parallels.antiparallels = false;
        let ctx = context(config.clone());
        let mut score = empty_score(&ctx);
        score.add_note(0, Note::new(48, beats(0), beats(1)));
        score.add_note(1, Note::new(55, beats(0), beats(1)));
        score.add_note(0, Note::new(50, beats(1), beats(1)));

        assert!(forms_forbidden_parallel(&ctx, &score, 1, beats(1), 57));
        assert!(!forms_forbidden_parallel(&ctx, &score, 1, beats(1), 59));
        assert!(!forms_forbidden_parallel(&ctx, &score, 1, beats(1), 55));
        // The same fifth reached by contrary motion.
        assert!(!forms_forbidden_parallel(&ctx, &score, 1, beats(1), 43));

        config.parallels.antiparallels = true;
        let ctx = context(config);
        assert!(forms_forbidden_parallel(&ctx, &score, 1, beats(1), 43));
    }

    #[test]
    fn crossed_voices_keep_their_interval() {
        let mut config = two_voice_config();
        config.allow_voice_crossings = true;
        config.parallels.prohibit = vec![7];
        config.parallels.antiparallels = true;
        let ctx = context(config.clone());
        let mut score = empty_score(&ctx);
        score.add_note(0, Note::new(60, beats(0), beats(1)));
        score.add_note(1, Note::new(67, beats(0), beats(1)));
        score.add_note(0, Note::new(62, beats(1), beats(1)));

        // G4 down to A3 under D4: still a fifth from voice 0 up to voice 1.
        assert!(forms_forbidden_parallel(&ctx, &score, 1, beats(1), 57));
        assert!(forms_forbidden_parallel(&ctx, &score, 1, beats(1), 69));
        // A fourth below D4 is not.
        assert!(!forms_forbidden_parallel(&ctx, &score, 1, beats(1), 59));

        config.parallels.antiparallels = false;
        let ctx = context(config);
        assert!(!forms_forbidden_parallel(&ctx, &score, 1, beats(1), 57));
        assert!(forms_forbidden_parallel(&ctx, &score, 1, beats(1), 69));
    }

    #[test]
    fn weights_prefer_steps() {
        let ctx = context(two_voice_config());
        let table = ctx.harmony(0);
        let step = melodic_weight(&ctx, table, 60, 62);
        let leap = melodic_weight(&ctx, table, 60, 69);
        let unison = melodic_weight(&ctx, table, 60, 60);
        assert!(step > leap);
        assert!((unison - melodic_weight(&ctx, table, 60, 65)).abs() < 1e-12);
    }

    #[test]
    fn candidate_groups_are_consumable() {
        let mut candidates = Candidates::default();
        candidates.push(CandidateGroup {
            pitch_classes: vec![0],
            pitches: vec![60],
        });
        candidates.push(CandidateGroup {
            pitch_classes: vec![2, 4],
            pitches: vec![62, 64],
        });

        assert!(candidates.prefer(64));
        assert!(!candidates.prefer(70));
        assert_eq!(candidates.current().map(|g| g.pitches.clone()), Some(vec![64]));
        if let Some(group) = candidates.current() {
            group.pitches.clear();
        }
        assert_eq!(candidates.current().map(|g| g.pitches.clone()), Some(vec![60]));
        candidates.retain(|p| p != 60);
        assert_eq!(candidates.current().map(|g| g.pitches.clone()), Some(vec![62]));
        assert_eq!(drain(candidates.clone()), vec![62]);
        candidates.retain(|_| false);
        assert!(candidates.is_empty());
        assert!(candidates.current().is_none());
    }
}
