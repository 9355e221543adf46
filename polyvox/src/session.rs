// Stateful iteration over voice-leadings for one harmony transition.
//
// A session is bound to a (source harmony, destination harmony) pair and
// hands out candidate voice-leadings from best to worse. Candidates are
// per scale degree: displacement `i` moves whatever pitch sits on scale
// degree `i` of the source harmony.
//
// Three strategies:
//
// - Plain: successive solver levels over the full scales. Each level is the
//   set of optimal bijections above the previous level's total, computed on
//   demand and cached.
// - Chord tones: two independent ladders, one over chord tones and one over
//   non-chord tones. Level pairs (i, j) are visited best-first through a
//   frontier heap, and each pair's solution lists are zipped back into full
//   scale order. The shorter list is padded by cycling its own leading
//   entries, so a pair yields max(len_a, len_b) leadings rather than the full
//   product. If the two harmonies' chords differ in size the session uses the
//   plain strategy instead.
// - Parallel: one leading that moves every scale degree by the interval
//   between the roots, upward or downward as configured.
//
// Callers report failing (source index, displacement) pairs with `exclude`.
// Exclusions persist for the session's lifetime and filter both cached and
// future levels.

use crate::config::{Context, ParallelDirection};
use crate::error::SolveError;
use crate::harmony::HarmonyTable;
use crate::solver::{self, VoiceLeading, shortest_displacement};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Plain,
    ChordTones,
    Parallel {
        direction: ParallelDirection,
        /// Measure the root interval between chord roots rather than tonics.
        chord_roots: bool,
    },
}

#[derive(Debug, Clone)]
pub struct VoiceLeadingSession {
    transition: (usize, usize),
    tet: i32,
    mode: SessionMode,
    strategy: Strategy,
    exclusions: Vec<Vec<i32>>,
    pending: VecDeque<VoiceLeading>,
    current: Option<VoiceLeading>,
}

#[derive(Debug, Clone)]
enum Strategy {
    Plain(Ladder),
    Split(Box<SplitLadders>),
    Parallel(Option<VoiceLeading>),
    Mismatch(SolveError),
}

impl VoiceLeadingSession {
    /// Session for a transition between two harmonies of the context, in the
    /// mode the voice-leading settings select.
    pub fn new(ctx: &Context, source_harmony: usize, dest_harmony: usize) -> Self {
        let params = &ctx.config.voice_leading;
        let mode = if params.parallel {
            SessionMode::Parallel {
                direction: params.parallel_direction,
                chord_roots: params.chord_tones,
            }
        } else if params.chord_tones {
            SessionMode::ChordTones
        } else {
            SessionMode::Plain
        };
        let mut session =
            Self::with_mode(ctx.harmony(source_harmony), ctx.harmony(dest_harmony), mode);
        session.transition = (source_harmony, dest_harmony);
        session
    }

    pub fn with_mode(source: &HarmonyTable, dest: &HarmonyTable, mode: SessionMode) -> Self {
        let tet = source.tet;
        let mut effective = mode;
        let strategy = if source.scale.len() != dest.scale.len() {
            Strategy::Mismatch(SolveError::CardinalityMismatch {
                from_len: source.scale.len(),
                to_len: dest.scale.len(),
            })
        } else {
            match mode {
                SessionMode::Plain => Strategy::Plain(Ladder::new(&source.scale, &dest.scale)),
                SessionMode::ChordTones if source.chord.len() != dest.chord.len() => {
                    log::debug!(
                        "chord sizes differ ({} vs {}), voice-leading full scales",
                        source.chord.len(),
                        dest.chord.len()
                    );
                    effective = SessionMode::Plain;
                    Strategy::Plain(Ladder::new(&source.scale, &dest.scale))
                }
                SessionMode::ChordTones => Strategy::Split(Box::new(SplitLadders::new(source, dest))),
                SessionMode::Parallel {
                    direction,
                    chord_roots,
                } => Strategy::Parallel(Some(parallel_leading(
                    source,
                    dest,
                    direction,
                    chord_roots,
                ))),
            }
        };
        VoiceLeadingSession {
            transition: (0, 0),
            tet,
            mode: effective,
            strategy,
            exclusions: vec![Vec::new(); source.scale.len()],
            pending: VecDeque::new(),
            current: None,
        }
    }

    /// The (source, destination) harmony indices this session serves.
    pub fn transition(&self) -> (usize, usize) {
        self.transition
    }

    /// The mode in effect, after any fallback to plain.
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// The leading most recently returned by `next_voice_leading`.
    pub fn current(&self) -> Option<&VoiceLeading> {
        self.current.as_ref()
    }

    /// Forbid moving scale degree `source_index` by `displacement` from now on.
    pub fn exclude(&mut self, source_index: usize, displacement: i32) {
        if let Some(excluded) = self.exclusions.get_mut(source_index) {
            if !excluded.contains(&displacement) {
                excluded.push(displacement);
            }
        }
    }

    /// The next-best leading not ruled out by any exclusion.
    pub fn next_voice_leading(&mut self) -> Result<VoiceLeading, SolveError> {
        loop {
            while let Some(candidate) = self.pending.pop_front() {
                if !candidate.violates(&self.exclusions) {
                    self.current = Some(candidate.clone());
                    return Ok(candidate);
                }
            }
            let batch = self.refill()?;
            self.pending.extend(batch);
        }
    }

    fn refill(&mut self) -> Result<Vec<VoiceLeading>, SolveError> {
        match &mut self.strategy {
            Strategy::Plain(ladder) => ladder
                .next_level(self.tet, &self.exclusions)?
                .ok_or(SolveError::NoMoreVoiceLeadings),
            Strategy::Split(split) => split.next_batch(self.tet, &self.exclusions),
            Strategy::Parallel(leading) => leading
                .take()
                .map(|vl| vec![vl])
                .ok_or(SolveError::NoMoreVoiceLeadings),
            Strategy::Mismatch(err) => Err(err.clone()),
        }
    }
}

/// Solver levels over one pair of pitch-class lists, computed on demand.
#[derive(Debug, Clone)]
struct Ladder {
    source: Vec<i32>,
    dest: Vec<i32>,
    levels: Vec<Vec<VoiceLeading>>,
    exhausted: bool,
    cursor: usize,
}

impl Ladder {
    fn new(source: &[i32], dest: &[i32]) -> Self {
        Ladder {
            source: source.to_vec(),
            dest: dest.to_vec(),
            levels: Vec::new(),
            exhausted: false,
            cursor: 0,
        }
    }

    fn level(
        &mut self,
        index: usize,
        tet: i32,
        exclusions: &[Vec<i32>],
    ) -> Result<Option<&[VoiceLeading]>, SolveError> {
        while self.levels.len() <= index && !self.exhausted {
            let floor = self
                .levels
                .last()
                .and_then(|level| level.first())
                .map(|vl| vl.total);
            match solver::solve(&self.source, &self.dest, tet, floor, exclusions) {
                Ok(level) => self.levels.push(level),
                Err(SolveError::NoMoreVoiceLeadings) => self.exhausted = true,
                Err(err) => return Err(err),
            }
        }
        Ok(self.levels.get(index).map(Vec::as_slice))
    }

    fn level_total(
        &mut self,
        index: usize,
        tet: i32,
        exclusions: &[Vec<i32>],
    ) -> Result<Option<u32>, SolveError> {
        Ok(self
            .level(index, tet, exclusions)?
            .and_then(|level| level.first())
            .map(|vl| vl.total))
    }

    fn next_level(
        &mut self,
        tet: i32,
        exclusions: &[Vec<i32>],
    ) -> Result<Option<Vec<VoiceLeading>>, SolveError> {
        let index = self.cursor;
        self.cursor += 1;
        Ok(self.level(index, tet, exclusions)?.map(<[VoiceLeading]>::to_vec))
    }
}

/// Separate chord-tone and non-chord-tone ladders walked best-first.
#[derive(Debug, Clone)]
struct SplitLadders {
    chord: Ladder,
    non_chord: Ladder,
    chord_indices: Vec<usize>,
    non_chord_indices: Vec<usize>,
    len: usize,
    frontier: BinaryHeap<Reverse<(u32, usize, usize)>>,
    seen: BTreeSet<(usize, usize)>,
    started: bool,
}

impl SplitLadders {
    fn new(source: &HarmonyTable, dest: &HarmonyTable) -> Self {
        let pcs = |table: &HarmonyTable, indices: &[usize]| -> Vec<i32> {
            indices.iter().map(|&i| table.scale[i]).collect()
        };
        SplitLadders {
            chord: Ladder::new(
                &pcs(source, &source.chord_indices),
                &pcs(dest, &dest.chord_indices),
            ),
            non_chord: Ladder::new(
                &pcs(source, &source.non_chord_indices),
                &pcs(dest, &dest.non_chord_indices),
            ),
            chord_indices: source.chord_indices.clone(),
            non_chord_indices: source.non_chord_indices.clone(),
            len: source.scale.len(),
            frontier: BinaryHeap::new(),
            seen: BTreeSet::new(),
            started: false,
        }
    }

    fn push(
        &mut self,
        i: usize,
        j: usize,
        tet: i32,
        chord_exclusions: &[Vec<i32>],
        non_chord_exclusions: &[Vec<i32>],
    ) -> Result<(), SolveError> {
        if !self.seen.insert((i, j)) {
            return Ok(());
        }
        let Some(chord_total) = self.chord.level_total(i, tet, chord_exclusions)? else {
            return Ok(());
        };
        let Some(other_total) = self.non_chord.level_total(j, tet, non_chord_exclusions)? else {
            return Ok(());
        };
        self.frontier.push(Reverse((chord_total + other_total, i, j)));
        Ok(())
    }

    fn next_batch(
        &mut self,
        tet: i32,
        exclusions: &[Vec<i32>],
    ) -> Result<Vec<VoiceLeading>, SolveError> {
        let chord_exclusions = project(exclusions, &self.chord_indices);
        let non_chord_exclusions = project(exclusions, &self.non_chord_indices);
        if !self.started {
            self.started = true;
            self.push(0, 0, tet, &chord_exclusions, &non_chord_exclusions)?;
        }
        let Some(Reverse((_, i, j))) = self.frontier.pop() else {
            return Err(SolveError::NoMoreVoiceLeadings);
        };
        self.push(i + 1, j, tet, &chord_exclusions, &non_chord_exclusions)?;
        self.push(i, j + 1, tet, &chord_exclusions, &non_chord_exclusions)?;

        let usable = |level: &[VoiceLeading], excluded: &[Vec<i32>]| -> Vec<VoiceLeading> {
            level
                .iter()
                .filter(|vl| !vl.violates(excluded))
                .cloned()
                .collect()
        };
        let chords = usable(&self.chord.levels[i], &chord_exclusions);
        let others = usable(&self.non_chord.levels[j], &non_chord_exclusions);
        Ok(zip_padded(
            &chords,
            &others,
            &self.chord_indices,
            &self.non_chord_indices,
            self.len,
        ))
    }
}

/// Exclusions restricted to a subset of scale degrees, in subset order.
fn project(exclusions: &[Vec<i32>], indices: &[usize]) -> Vec<Vec<i32>> {
    indices
        .iter()
        .map(|&i| exclusions.get(i).cloned().unwrap_or_default())
        .collect()
}

/// Merge chord and non-chord sub-leadings into full-scale leadings, cycling
/// the shorter list so both have the same length.
fn zip_padded(
    chords: &[VoiceLeading],
    others: &[VoiceLeading],
    chord_indices: &[usize],
    non_chord_indices: &[usize],
    len: usize,
) -> Vec<VoiceLeading> {
    if chords.is_empty() || others.is_empty() {
        return Vec::new();
    }
    let count = chords.len().max(others.len());
    (0..count)
        .map(|k| {
            let chord = &chords[k % chords.len()];
            let other = &others[k % others.len()];
            let mut displacements = vec![0; len];
            for (sub, &index) in chord_indices.iter().enumerate() {
                displacements[index] = chord.displacements[sub];
            }
            for (sub, &index) in non_chord_indices.iter().enumerate() {
                displacements[index] = other.displacements[sub];
            }
            VoiceLeading::from_displacements(displacements)
        })
        .collect()
}

/// Every scale degree moved by the interval between corresponding roots.
fn parallel_leading(
    source: &HarmonyTable,
    dest: &HarmonyTable,
    direction: ParallelDirection,
    chord_roots: bool,
) -> VoiceLeading {
    let tet = source.tet;
    let n = source.scale.len();
    if n == 0 {
        return VoiceLeading::from_displacements(Vec::new());
    }
    let root = |table: &HarmonyTable| {
        if chord_roots {
            table
                .chord
                .first()
                .and_then(|&pc| table.scale_index(pc))
                .unwrap_or(0)
        } else {
            0
        }
    };
    let (source_root, dest_root) = (root(source), root(dest));
    let upward: Vec<i32> = (0..n)
        .map(|i| {
            let j = (i + n - source_root + dest_root) % n;
            (dest.scale[j] - source.scale[i]).rem_euclid(tet)
        })
        .collect();
    let go_down = match direction {
        ParallelDirection::Up => false,
        ParallelDirection::Down => true,
        ParallelDirection::Shortest => {
            upward
                .iter()
                .map(|&up| shortest_displacement(0, up, tet))
                .sum::<i32>()
                < 0
        }
    };
    let displacements = if go_down {
        upward
            .into_iter()
            .map(|up| if up == 0 { 0 } else { up - tet })
            .collect()
    } else {
        upward
    };
    VoiceLeading::from_displacements(displacements)
}
