// Minimum-displacement voice-leading between two pitch-class collections.
//
// `solve` finds every bijection from source indices to destination indices
// whose total displacement is minimal among bijections totalling more than
// an optional floor. Each pairwise displacement is the shorter way around
// the pitch-class circle; a move of exactly half an octave goes up. Raising
// the floor to the previous result's total yields the next-best level, which
// is how the session in session.rs walks from best to worse voice-leadings.
//
// The search is branch-and-bound over permutations: destination indices are
// assigned to source indices one at a time, and a branch is cut as soon as
// its running total exceeds the best complete total found so far. Branches
// that merely tie are kept so that every optimal bijection is returned.
// Per-index exclusions remove specific displacement values for a source
// index; the applier uses them to rule out moves that already failed.
//
// Ties are ordered by ascending variance of the displacement magnitudes, so
// leadings that spread motion evenly across voices come first.

use crate::error::SolveError;

/// A voice-leading: the signed displacement applied to each source index.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceLeading {
    pub displacements: Vec<i32>,
    /// Sum of absolute displacements.
    pub total: u32,
    /// Population variance of the absolute displacements.
    pub variance: f64,
}

impl VoiceLeading {
    pub fn from_displacements(displacements: Vec<i32>) -> Self {
        let total = displacements.iter().map(|d| d.unsigned_abs()).sum();
        let variance = magnitude_variance(&displacements);
        VoiceLeading {
            displacements,
            total,
            variance,
        }
    }

    pub fn len(&self) -> usize {
        self.displacements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.displacements.is_empty()
    }

    /// True if any index moves by a displacement excluded for that index.
    pub fn violates(&self, exclusions: &[Vec<i32>]) -> bool {
        self.displacements
            .iter()
            .zip(exclusions)
            .any(|(d, excluded)| excluded.contains(d))
    }
}

fn magnitude_variance(displacements: &[i32]) -> f64 {
    if displacements.is_empty() {
        return 0.0;
    }
    let n = displacements.len() as f64;
    let magnitudes = displacements.iter().map(|d| d.unsigned_abs() as f64);
    let mean = magnitudes.clone().sum::<f64>() / n;
    magnitudes.map(|m| (m - mean) * (m - mean)).sum::<f64>() / n
}

/// Signed shortest move from pitch class `from` to `to` modulo `tet`.
/// An exact half-octave resolves upward.
pub fn shortest_displacement(from: i32, to: i32, tet: i32) -> i32 {
    let up = (to - from).rem_euclid(tet);
    if up * 2 > tet { up - tet } else { up }
}

/// All minimal bijections from `source` onto `dest` whose total exceeds `floor`.
///
/// `excluded[i]` lists displacements forbidden for source index `i`; missing
/// entries exclude nothing.
pub fn solve(
    source: &[i32],
    dest: &[i32],
    tet: i32,
    floor: Option<u32>,
    excluded: &[Vec<i32>],
) -> Result<Vec<VoiceLeading>, SolveError> {
    if source.len() != dest.len() {
        return Err(SolveError::CardinalityMismatch {
            from_len: source.len(),
            to_len: dest.len(),
        });
    }
    let n = source.len();
    let matrix: Vec<Vec<i32>> = source
        .iter()
        .map(|&s| dest.iter().map(|&d| shortest_displacement(s, d, tet)).collect())
        .collect();

    let mut search = BranchAndBound {
        matrix: &matrix,
        excluded,
        floor,
        used: vec![false; n],
        current: Vec::with_capacity(n),
        best: None,
        solutions: Vec::new(),
    };
    search.descend(0, 0);

    let mut solutions = search.solutions;
    if solutions.is_empty() {
        return Err(SolveError::NoMoreVoiceLeadings);
    }
    solutions.sort_by(|a, b| a.variance.total_cmp(&b.variance));
    Ok(solutions)
}

struct BranchAndBound<'a> {
    matrix: &'a [Vec<i32>],
    excluded: &'a [Vec<i32>],
    floor: Option<u32>,
    used: Vec<bool>,
    current: Vec<i32>,
    best: Option<u32>,
    solutions: Vec<VoiceLeading>,
}

impl BranchAndBound<'_> {
    fn descend(&mut self, index: usize, total: u32) {
        if index == self.matrix.len() {
            self.complete(total);
            return;
        }
        for j in 0..self.matrix.len() {
            if self.used[j] {
                continue;
            }
            let d = self.matrix[index][j];
            if self
                .excluded
                .get(index)
                .is_some_and(|excluded| excluded.contains(&d))
            {
                continue;
            }
            let next = total + d.unsigned_abs();
            if self.best.is_some_and(|best| next > best) {
                continue;
            }
            self.used[j] = true;
            self.current.push(d);
            self.descend(index + 1, next);
            self.current.pop();
            self.used[j] = false;
        }
    }

    fn complete(&mut self, total: u32) {
        if self.floor.is_some_and(|floor| total <= floor) {
            return;
        }
        match self.best {
            Some(best) if total > best => {}
            Some(best) if total == best => {
                self.solutions
                    .push(VoiceLeading::from_displacements(self.current.clone()));
            }
            _ => {
                self.best = Some(total);
                self.solutions.clear();
                self.solutions
                    .push(VoiceLeading::from_displacements(self.current.clone()));
            }
        }
    }
}
