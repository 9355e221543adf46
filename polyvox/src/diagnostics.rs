// Failure counters for the pitch search and the voice-leading applier.
//
// `Diagnostics` counts why the initial-pattern search could not place a note:
// the furthest candidate filtering stage reached when every candidate was
// filtered away, the rejection rule that discarded a chosen pitch, and the
// number of dead ends. Counters add up across attempts via `+=`, so the
// driver can report both per-attempt and cumulative figures.
//
// `TransitionFailures` is the voice-leading histogram: for every
// (source harmony, destination harmony) transition, how often a note could
// not be placed and why.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;

/// Furthest filtering stage reached before every candidate was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilterStage {
    NoPitchClasses,
    NoPitches,
    IntervalBounds,
    Parallels,
}

/// Why a chosen pitch was rejected without a full backtrack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Alternation,
    Repetition,
    LoopUniqueness,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub no_pitch_classes: usize,
    pub no_pitches: usize,
    pub interval_bounds: usize,
    pub parallels: usize,
    pub alternations: usize,
    pub repetitions: usize,
    pub loop_uniqueness: usize,
    pub dead_ends: usize,
}

impl Diagnostics {
    pub fn record_stage(&mut self, stage: FilterStage) {
        match stage {
            FilterStage::NoPitchClasses => self.no_pitch_classes += 1,
            FilterStage::NoPitches => self.no_pitches += 1,
            FilterStage::IntervalBounds => self.interval_bounds += 1,
            FilterStage::Parallels => self.parallels += 1,
        }
    }

    pub fn record_rejection(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::Alternation => self.alternations += 1,
            Rejection::Repetition => self.repetitions += 1,
            Rejection::LoopUniqueness => self.loop_uniqueness += 1,
        }
    }

    /// Chosen pitches discarded by the rejection rules.
    pub fn unable_to_choose(&self) -> usize {
        self.alternations + self.repetitions + self.loop_uniqueness
    }
}

impl AddAssign for Diagnostics {
    fn add_assign(&mut self, other: Self) {
        self.no_pitch_classes += other.no_pitch_classes;
        self.no_pitches += other.no_pitches;
        self.interval_bounds += other.interval_bounds;
        self.parallels += other.parallels;
        self.alternations += other.alternations;
        self.repetitions += other.repetitions;
        self.loop_uniqueness += other.loop_uniqueness;
        self.dead_ends += other.dead_ends;
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  no candidate pitch classes: {}", self.no_pitch_classes)?;
        writeln!(f, "  no candidate pitches:       {}", self.no_pitches)?;
        writeln!(f, "  interval bounds exceeded:   {}", self.interval_bounds)?;
        writeln!(f, "  forbidden parallels:        {}", self.parallels)?;
        writeln!(
            f,
            "  unable to choose:           {} (alternation {}, repetition {}, loop {})",
            self.unable_to_choose(),
            self.alternations,
            self.repetitions,
            self.loop_uniqueness
        )?;
        write!(f, "  dead ends:                  {}", self.dead_ends)
    }
}

/// Why a voice-led note could not be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    OutOfRange,
    IntervalLimit,
    Parallel,
    Consonance,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureCounts {
    pub out_of_range: usize,
    pub interval_limit: usize,
    pub parallel: usize,
    pub consonance: usize,
    /// Sessions that ran out of voice-leadings.
    pub exhausted: usize,
}

impl FailureCounts {
    pub fn total(&self) -> usize {
        self.out_of_range + self.interval_limit + self.parallel + self.consonance + self.exhausted
    }
}

/// Voice-leading failures keyed by (source harmony, destination harmony).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionFailures {
    by_transition: BTreeMap<(usize, usize), FailureCounts>,
}

impl TransitionFailures {
    pub fn record(&mut self, transition: (usize, usize), reason: FailureReason) {
        let counts = self.by_transition.entry(transition).or_default();
        match reason {
            FailureReason::OutOfRange => counts.out_of_range += 1,
            FailureReason::IntervalLimit => counts.interval_limit += 1,
            FailureReason::Parallel => counts.parallel += 1,
            FailureReason::Consonance => counts.consonance += 1,
        }
    }

    pub fn record_exhausted(&mut self, transition: (usize, usize)) {
        self.by_transition.entry(transition).or_default().exhausted += 1;
    }

    pub fn merge(&mut self, other: &TransitionFailures) {
        for (&transition, counts) in &other.by_transition {
            let mine = self.by_transition.entry(transition).or_default();
            mine.out_of_range += counts.out_of_range;
            mine.interval_limit += counts.interval_limit;
            mine.parallel += counts.parallel;
            mine.consonance += counts.consonance;
            mine.exhausted += counts.exhausted;
        }
    }

    pub fn get(&self, transition: (usize, usize)) -> Option<&FailureCounts> {
        self.by_transition.get(&transition)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(usize, usize), &FailureCounts)> {
        self.by_transition.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.by_transition.is_empty()
    }
}

impl fmt::Display for TransitionFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "  (no failures recorded)");
        }
        let mut first = true;
        for ((from, to), c) in &self.by_transition {
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(
                f,
                "  harmony {from} -> {to}: out of range {}, interval {}, parallel {}, consonance {}, exhausted {}",
                c.out_of_range, c.interval_limit, c.parallel, c.consonance, c.exhausted
            )?;
        }
        Ok(())
    }
}
