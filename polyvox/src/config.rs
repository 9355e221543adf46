// Data-driven generator configuration.
//
// Every tunable parameter lives in `Config`, loaded from JSON. The generator
// never uses magic numbers; it reads from the config. Parameters are grouped
// into nested structs: `RhythmParams`, `ChordToneParams`, `FootParams`,
// `MelodyParams`, `ParallelParams`, `ConsonanceParams`,
// `VoiceLeadingParams`, `SearchParams` and `OutputParams`. Every struct has
// `#[serde(default)]`, so a JSON file only needs the keys it changes.
//
// Lists that vary per voice or per harmony are read cyclically through the
// `Cyclic` trait: a one-element list applies to every voice, a two-element
// list alternates, and so on.
//
// `Context` is the validated, immutable form handed to the generator. It
// owns the config plus the derived per-harmony tables and the harmony
// timeline, computed once in `Context::new`.
//
// Rational times (grid, lengths, thresholds) serialize as `[numer, denom]`
// pairs, e.g. `[1, 2]` for an eighth note.
//
// See also: `harmony.rs` for the derived tables, `score.rs` for the timeline.

use crate::error::ConfigError;
use crate::harmony::HarmonyTable;
use crate::score::{HarmonyTimeline, Pitch, Time, beats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Cyclic indexing into per-voice and per-harmony parameter lists.
pub trait Cyclic<T> {
    /// Element `index` modulo the length. Panics on an empty list;
    /// `Context::new` rejects empty parameter lists.
    fn cyc(&self, index: usize) -> &T;
}

impl<T> Cyclic<T> for [T] {
    fn cyc(&self, index: usize) -> &T {
        &self[index % self.len()]
    }
}

// ---------------------------------------------------------------------------
// Enumerated settings
// ---------------------------------------------------------------------------

/// Which onsets a forcing rule applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnsetRule {
    Never,
    /// Onset 0 of the piece.
    GlobalFirstBeat,
    /// The voice's first note of the piece.
    GlobalFirstNote,
    /// The first beat of every harmony.
    FirstBeat,
    /// The voice's first note within every harmony.
    FirstNote,
}

/// Shape of the chord-tone probability ramp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbabilityCurve {
    Linear,
    Sqrt,
}

/// A melodic interval bound, inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalLimit {
    /// Scale steps in the current harmony's scale.
    Generic(i32),
    /// Tuning divisions (semitones in 12-tet).
    Specific(i32),
}

impl IntervalLimit {
    pub fn value(self) -> i32 {
        match self {
            IntervalLimit::Generic(v) | IntervalLimit::Specific(v) => v,
        }
    }
}

/// Which other-voice pitches a candidate must be consonant with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsonanceTreatment {
    /// No consonance filtering.
    None,
    /// Only notes attacking at the candidate's onset.
    AllOnsets,
    /// Every note sounding at any point of the candidate's duration.
    AllDurs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsonanceKind {
    /// Each pair of pitches against the consonance-interval set.
    Pairwise,
    /// The whole sounding set against the permitted chords.
    Chordwise,
}

/// Whether chordwise consonance accepts a pitch class that is already sounding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Doubling {
    Permit,
    Forbid,
    /// Doubling only once every tone of the matched chord is present.
    CompleteChordFirst,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParallelDirection {
    /// Follow the sign of the average shortest interval.
    Shortest,
    Up,
    Down,
}

/// A leader/follower voice pair for forced parallel motion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelPair {
    pub leader: usize,
    pub follower: usize,
}

// ---------------------------------------------------------------------------
// Parameter groups
// ---------------------------------------------------------------------------

/// Rhythm skeleton generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RhythmParams {
    /// Grid spacing for candidate onsets.
    pub grid: Time,
    /// Per-voice probability that a grid slot (other than the first) starts a note.
    pub onset_density: Vec<f64>,
    /// When set, a rhythm cell of this length is tiled across the pattern.
    pub rhythm_len: Option<Time>,
}

impl Default for RhythmParams {
    fn default() -> Self {
        Self {
            grid: Time::new(1, 2),
            onset_density: vec![0.3, 0.5, 0.5, 0.6],
            rhythm_len: None,
        }
    }
}

/// Chord-tone selection for the initial pattern.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChordToneParams {
    /// When false, every scale pitch class is a candidate in one group.
    pub selection: bool,
    pub curve: ProbabilityCurve,
    /// Chord-tone probability right after a chord tone.
    pub min_prob: f64,
    /// Consecutive non-chord tones after which a chord tone is certain.
    pub max_n_between: usize,
    pub scale_by_duration: bool,
    /// Duration at which the probability is left unscaled.
    pub neutral_duration: Time,
    /// Also scale the probability down for notes shorter than neutral.
    pub scale_short_down: bool,
    /// Notes at least this long are always chord tones.
    pub len_to_force: Option<Time>,
    pub force: OnsetRule,
    /// Force a chord tone where another voice attacks a chord tone at the same onset.
    pub sync_onsets: bool,
    /// When a non-chord tone is chosen, offer no chord tones as fallback.
    pub try_to_force_non_chord_tones: bool,
}

impl Default for ChordToneParams {
    fn default() -> Self {
        Self {
            selection: true,
            curve: ProbabilityCurve::Linear,
            min_prob: 0.5,
            max_n_between: 2,
            scale_by_duration: true,
            neutral_duration: Time::new(1, 2),
            scale_short_down: false,
            len_to_force: Some(beats(2)),
            force: OnsetRule::FirstBeat,
            sync_onsets: false,
            try_to_force_non_chord_tones: false,
        }
    }
}

/// Bass "foot" forcing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FootParams {
    pub force: OnsetRule,
    /// Extra room below voice 0's range when placing a forced foot.
    pub extend_bass_range: i32,
}

impl Default for FootParams {
    fn default() -> Self {
        Self {
            force: OnsetRule::FirstBeat,
            extend_bass_range: 0,
        }
    }
}

/// Melodic limits and weighting within each voice.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MelodyParams {
    /// Per-voice bounds for moves onto chord tones.
    pub max_interval: Vec<IntervalLimit>,
    pub min_interval: Vec<IntervalLimit>,
    /// Per-voice bounds for moves onto non-chord tones.
    pub max_interval_for_non_chord_tones: Vec<IntervalLimit>,
    pub min_interval_for_non_chord_tones: Vec<IntervalLimit>,
    /// Maximum A-B alternations before a strict A-B-A-B... run is rejected.
    pub max_alternations: Option<usize>,
    /// Maximum repetitions of one pitch (1 allows two in a row, not three).
    pub max_repeated_notes: Option<usize>,
    /// Per-voice loop length in notes; `None` disables looping for the voice.
    pub pitch_loop: Vec<Option<usize>>,
    /// Commit looped pitches unconditionally instead of preferring them.
    pub hard_pitch_loop: bool,
    /// Repeat the pitch one `rhythm_len` earlier when the harmony is unchanged.
    pub force_repeated_notes: bool,
    /// Generic interval size used to weight a unison.
    pub unison_weighted_as: f64,
    /// Base of the log in the melodic-interval weight. Larger is flatter.
    pub interval_weight_log_base: f64,
}

impl Default for MelodyParams {
    fn default() -> Self {
        Self {
            max_interval: vec![IntervalLimit::Generic(4)],
            min_interval: vec![IntervalLimit::Generic(0)],
            max_interval_for_non_chord_tones: vec![IntervalLimit::Generic(2)],
            min_interval_for_non_chord_tones: vec![IntervalLimit::Generic(1)],
            max_alternations: Some(2),
            max_repeated_notes: Some(1),
            pitch_loop: vec![None],
            hard_pitch_loop: false,
            force_repeated_notes: false,
            unison_weighted_as: 3.0,
            interval_weight_log_base: 2.0,
        }
    }
}

/// Forbidden and forced parallel motion.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelParams {
    /// Octave-equivalent intervals that may not move in parallel (0 = unison/octave).
    pub prohibit: Vec<i32>,
    /// Also forbid the same interval reached by contrary motion.
    pub antiparallels: bool,
    pub force_parallel_motion: Vec<ParallelPair>,
}

impl Default for ParallelParams {
    fn default() -> Self {
        Self {
            prohibit: vec![0, 7],
            antiparallels: true,
            force_parallel_motion: Vec::new(),
        }
    }
}

/// Harmonic consonance between voices.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsonanceParams {
    pub treatment: ConsonanceTreatment,
    pub kind: ConsonanceKind,
    /// Octave-equivalent consonant intervals for pairwise checks.
    pub consonances: Vec<i32>,
    /// Read `consonances` as the dissonant set instead.
    pub invert: bool,
    /// Reject a pitch that completes an augmented triad.
    pub exclude_augmented_triads: bool,
    /// Permitted chord shapes (pitch classes, root first) for chordwise checks.
    pub chords: Vec<Vec<i32>>,
    /// When false, the lowest sounding pitch must be the matched chord's root.
    pub octave_equivalence: bool,
    pub doubling: Doubling,
}

impl Default for ConsonanceParams {
    fn default() -> Self {
        Self {
            treatment: ConsonanceTreatment::AllDurs,
            kind: ConsonanceKind::Pairwise,
            consonances: vec![0, 3, 4, 5, 7, 8, 9],
            invert: false,
            exclude_augmented_triads: true,
            chords: vec![vec![0, 4, 7], vec![0, 3, 7], vec![0, 3, 6]],
            octave_equivalence: true,
            doubling: Doubling::Permit,
        }
    }
}

/// Propagation of the initial pattern across later harmonies.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceLeadingParams {
    /// Voice-lead chord tones and non-chord tones separately.
    pub chord_tones: bool,
    /// Move every scale degree by the interval between roots.
    pub parallel: bool,
    pub parallel_direction: ParallelDirection,
    /// Hold one voice-leading for a whole window.
    pub strict: bool,
    /// Allow switching voice-leadings mid-window.
    pub flexible: bool,
    pub maintain_consonance: bool,
    pub maintain_limit_intervals: bool,
    pub maintain_forbidden_parallels: bool,
    pub max_dead_ends: usize,
}

impl Default for VoiceLeadingParams {
    fn default() -> Self {
        Self {
            chord_tones: true,
            parallel: false,
            parallel_direction: ParallelDirection::Shortest,
            strict: true,
            flexible: true,
            maintain_consonance: false,
            maintain_limit_intervals: false,
            maintain_forbidden_parallels: false,
            max_dead_ends: 2_000,
        }
    }
}

/// Retry and search budgets.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub initial_pattern_attempts: usize,
    /// Dead ends allowed per initial-pattern attempt.
    pub max_dead_ends: usize,
    /// Shuffle the voice order at equal onsets for each attempt.
    pub randomize_voice_order: bool,
    pub timeout_secs: Option<f64>,
    /// Ask whether to continue once the attempt budget is spent.
    pub ask_for_more_attempts: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            initial_pattern_attempts: 20,
            max_dead_ends: 5_000,
            randomize_voice_order: false,
            timeout_secs: None,
            ask_for_more_attempts: false,
        }
    }
}

/// Finalization and MIDI rendering.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputParams {
    pub tempo_bpm: u16,
    pub velocity: u8,
    /// Per-voice timbre, written as the MIDI program.
    pub timbres: Vec<u8>,
    pub num_reps: usize,
    pub transpose: Pitch,
}

impl Default for OutputParams {
    fn default() -> Self {
        Self {
            tempo_bpm: 96,
            velocity: 80,
            timbres: vec![52],
            num_reps: 1,
            transpose: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level generator configuration. Loaded from JSON, never mutated during generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fixed seed for reproducible output; drawn from the clock when absent.
    pub seed: Option<u64>,
    /// Equal divisions of the octave.
    pub tet: i32,
    pub num_voices: usize,
    /// Per-harmony scales as pitch classes, tonic first.
    pub scales: Vec<Vec<i32>>,
    /// Per-harmony chords as pitch classes, root first.
    pub chords: Vec<Vec<i32>>,
    /// Per-harmony foot pitch class; the chord root when empty.
    pub foot_pcs: Vec<i32>,
    /// Cyclic harmony lengths.
    pub harmony_len: Vec<Time>,
    pub num_harmonies: usize,
    /// Length of the initial pattern; later material is voice-led from it.
    pub pattern_len: Time,
    /// Per-voice preferred range (inclusive), voice 0 lowest.
    pub voice_ranges: Vec<(Pitch, Pitch)>,
    /// Per-voice absolute range (inclusive) that nothing may leave.
    pub hard_bounds: Vec<(Pitch, Pitch)>,
    pub allow_voice_crossings: bool,
    pub rhythm: RhythmParams,
    pub chord_tones: ChordToneParams,
    pub foot: FootParams,
    pub melody: MelodyParams,
    pub parallels: ParallelParams,
    pub consonance: ConsonanceParams,
    pub voice_leading: VoiceLeadingParams,
    pub search: SearchParams,
    pub output: OutputParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: None,
            tet: 12,
            num_voices: 4,
            scales: vec![
                vec![0, 2, 4, 5, 7, 9, 11],
                vec![9, 11, 0, 2, 4, 5, 7],
                vec![5, 7, 9, 10, 0, 2, 4],
                vec![7, 9, 11, 0, 2, 4, 5],
            ],
            chords: vec![vec![0, 4, 7], vec![9, 0, 4], vec![5, 9, 0], vec![7, 11, 2]],
            foot_pcs: Vec::new(),
            harmony_len: vec![beats(4)],
            num_harmonies: 8,
            pattern_len: beats(4),
            voice_ranges: vec![(40, 57), (50, 67), (57, 74), (62, 81)],
            hard_bounds: vec![(28, 64), (40, 74), (48, 81), (55, 91)],
            allow_voice_crossings: false,
            rhythm: RhythmParams::default(),
            chord_tones: ChordToneParams::default(),
            foot: FootParams::default(),
            melody: MelodyParams::default(),
            parallels: ParallelParams::default(),
            consonance: ConsonanceParams::default(),
            voice_leading: VoiceLeadingParams::default(),
            search: SearchParams::default(),
            output: OutputParams::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Config::from_json_str(&text)
    }

    pub fn from_json_str(json: &str) -> Result<Config, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ---------------------------------------------------------------------------
// Validated context
// ---------------------------------------------------------------------------

/// A validated config plus derived tables, shared by reference through a run.
#[derive(Clone, Debug)]
pub struct Context {
    pub config: Config,
    tables: Vec<HarmonyTable>,
    timeline: HarmonyTimeline,
}

impl Context {
    pub fn new(config: Config) -> Result<Context, ConfigError> {
        validate(&config)?;
        let tables = (0..config.num_harmonies)
            .map(|h| {
                let foot = if config.foot_pcs.is_empty() {
                    None
                } else {
                    Some(*config.foot_pcs.cyc(h))
                };
                HarmonyTable::new(config.tet, config.scales.cyc(h), config.chords.cyc(h), foot)
            })
            .collect();
        let timeline = HarmonyTimeline::from_lengths(&config.harmony_len, config.num_harmonies);
        Ok(Context {
            config,
            tables,
            timeline,
        })
    }

    pub fn tet(&self) -> i32 {
        self.config.tet
    }

    pub fn num_voices(&self) -> usize {
        self.config.num_voices
    }

    /// Table for a timeline position; positions past the configured count
    /// (after repetition) wrap around.
    pub fn harmony(&self, index: usize) -> &HarmonyTable {
        self.tables.cyc(index)
    }

    pub fn timeline(&self) -> &HarmonyTimeline {
        &self.timeline
    }

    /// The initial pattern's length, never longer than the piece.
    pub fn pattern_len(&self) -> Time {
        self.config.pattern_len.min(self.timeline.total_len())
    }

    /// Whether anything beyond the initial pattern needs voice-leading.
    pub fn needs_voice_leading(&self) -> bool {
        self.pattern_len() < self.timeline.total_len()
    }

    pub fn voice_range(&self, voice: usize) -> (Pitch, Pitch) {
        *self.config.voice_ranges.cyc(voice)
    }

    pub fn hard_bounds(&self, voice: usize) -> (Pitch, Pitch) {
        *self.config.hard_bounds.cyc(voice)
    }

    pub fn velocity(&self) -> u8 {
        self.config.output.velocity
    }

    pub fn timbre(&self, voice: usize) -> u8 {
        *self.config.output.timbres.cyc(voice)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let tet = config.tet;
    if tet <= 0 {
        return Err(invalid("tet must be positive"));
    }
    if config.num_voices == 0 {
        return Err(invalid("num_voices must be positive"));
    }
    if config.num_harmonies == 0 {
        return Err(invalid("num_harmonies must be positive"));
    }
    if config.scales.is_empty() || config.chords.is_empty() {
        return Err(invalid("at least one scale and one chord are required"));
    }
    let check_pcs = |what: &str, pcs: &[i32]| -> Result<(), ConfigError> {
        if pcs.is_empty() {
            return Err(invalid(format!("{what} must not be empty")));
        }
        if let Some(pc) = pcs.iter().find(|&&pc| !(0..tet).contains(&pc)) {
            return Err(invalid(format!("{what} pitch class {pc} is outside 0..{tet}")));
        }
        let distinct: BTreeSet<i32> = pcs.iter().copied().collect();
        if distinct.len() != pcs.len() {
            return Err(invalid(format!("{what} repeats a pitch class")));
        }
        Ok(())
    };
    for (i, scale) in config.scales.iter().enumerate() {
        check_pcs(&format!("scale {i}"), scale)?;
    }
    for (i, chord) in config.chords.iter().enumerate() {
        check_pcs(&format!("chord {i}"), chord)?;
    }
    for h in 0..config.num_harmonies {
        let scale = config.scales.cyc(h);
        if let Some(pc) = config.chords.cyc(h).iter().find(|pc| !scale.contains(pc)) {
            return Err(invalid(format!(
                "harmony {h}: chord pitch class {pc} is not in the scale"
            )));
        }
        if !config.foot_pcs.is_empty() {
            let foot = config.foot_pcs.cyc(h);
            if !scale.contains(foot) {
                return Err(invalid(format!("harmony {h}: foot {foot} is not in the scale")));
            }
        }
    }

    if config.harmony_len.is_empty() || config.harmony_len.iter().any(|&l| l <= beats(0)) {
        return Err(invalid("harmony_len must be a non-empty list of positive lengths"));
    }
    if config.pattern_len <= beats(0) {
        return Err(invalid("pattern_len must be positive"));
    }
    if config.rhythm.grid <= beats(0) {
        return Err(invalid("rhythm.grid must be positive"));
    }
    if config.rhythm.rhythm_len.is_some_and(|l| l <= beats(0)) {
        return Err(invalid("rhythm.rhythm_len must be positive"));
    }
    if config.rhythm.onset_density.is_empty()
        || config.rhythm.onset_density.iter().any(|d| !(0.0..=1.0).contains(d))
    {
        return Err(invalid("rhythm.onset_density values must lie in [0, 1]"));
    }
    if config.chord_tones.neutral_duration <= beats(0) {
        return Err(invalid("chord_tones.neutral_duration must be positive"));
    }
    if !(0.0..=1.0).contains(&config.chord_tones.min_prob) {
        return Err(invalid("chord_tones.min_prob must lie in [0, 1]"));
    }

    if config.voice_ranges.is_empty() || config.hard_bounds.is_empty() {
        return Err(invalid("voice_ranges and hard_bounds must not be empty"));
    }
    if let Some((lo, hi)) = config
        .voice_ranges
        .iter()
        .chain(&config.hard_bounds)
        .find(|(lo, hi)| lo > hi)
    {
        return Err(invalid(format!("range ({lo}, {hi}) is inverted")));
    }

    let melody = &config.melody;
    if melody.max_interval.is_empty()
        || melody.min_interval.is_empty()
        || melody.max_interval_for_non_chord_tones.is_empty()
        || melody.min_interval_for_non_chord_tones.is_empty()
        || melody.pitch_loop.is_empty()
    {
        return Err(invalid("melody interval and loop lists must not be empty"));
    }
    if melody.max_alternations == Some(0) {
        return Err(invalid("melody.max_alternations must be at least 1"));
    }
    if melody.interval_weight_log_base.is_nan() || melody.interval_weight_log_base <= 1.0 {
        return Err(invalid("melody.interval_weight_log_base must be greater than 1"));
    }
    if melody.unison_weighted_as.is_nan() || melody.unison_weighted_as <= 0.0 {
        return Err(invalid("melody.unison_weighted_as must be positive"));
    }

    for pair in &config.parallels.force_parallel_motion {
        if pair.leader >= config.num_voices
            || pair.follower >= config.num_voices
            || pair.leader == pair.follower
        {
            return Err(invalid(format!(
                "parallel pair {}->{} must name two distinct voices",
                pair.leader, pair.follower
            )));
        }
    }
    if config.consonance.chords.iter().flatten().any(|pc| !(0..tet).contains(pc)) {
        return Err(invalid("consonance chord pitch classes must lie below tet"));
    }

    if config.output.timbres.is_empty() {
        return Err(invalid("output.timbres must not be empty"));
    }
    if config.output.tempo_bpm == 0 {
        return Err(invalid("output.tempo_bpm must be positive"));
    }

    let vl = &config.voice_leading;
    if !vl.strict && !vl.flexible {
        return Err(invalid("enable at least one of voice_leading.strict and flexible"));
    }
    let timeline = HarmonyTimeline::from_lengths(&config.harmony_len, config.num_harmonies);
    if config.pattern_len < timeline.total_len() {
        let expected = config.scales[0].len();
        if (0..config.num_harmonies).any(|h| config.scales.cyc(h).len() != expected) {
            return Err(invalid(
                "all scales must share a cardinality when the piece outlasts the pattern",
            ));
        }
    }
    Ok(())
}
