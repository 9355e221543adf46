// Voice-leads the initial pattern across the rest of the piece.
//
// The stretch after the pattern is cut into windows at every harmony start,
// every harmony start shifted by one pattern length, and every multiple of
// the pattern length. A window therefore has one destination harmony, and
// its source (the same window one pattern length earlier) lies in one source
// harmony and is already fully written. One work item is a (window, voice)
// pair; items run in window order, lower voices first.
//
// Each item copies its source notes forward, moving every pitch by the
// displacement a `VoiceLeadingSession` assigns to its scale degree. Strict
// items hold one leading for the whole window and retry the window from
// scratch on any failing note. Flexible items keep what they placed and ask
// for a new leading at the failing note. Every failure excludes the failing
// (degree, displacement) pair from the session.
//
// Items recurse depth-first. When an item runs out of leadings its notes are
// gone and the previous item moves on to its next alternative. A dead-end cap
// bounds the whole walk.

use crate::cancel::CancelToken;
use crate::config::Context;
use crate::constraints::{self, Slot};
use crate::diagnostics::{FailureReason, TransitionFailures};
use crate::error::{GenerationError, SolveError};
use crate::score::{Note, Pitch, Score, Time};
use crate::session::VoiceLeadingSession;
use crate::solver::VoiceLeading;
use std::collections::BTreeSet;

/// One voice's window of destination time and where its material comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub voice: usize,
    pub start: Time,
    pub end: Time,
    pub source_start: Time,
    pub source_harmony: usize,
    pub dest_harmony: usize,
}

impl WorkItem {
    /// Distance from the source window to this one.
    pub fn offset(&self) -> Time {
        self.start - self.source_start
    }

    pub fn source_end(&self) -> Time {
        self.end - self.offset()
    }

    pub fn transition(&self) -> (usize, usize) {
        (self.source_harmony, self.dest_harmony)
    }
}

/// Every work item after the initial pattern, in application order.
pub fn work_items(ctx: &Context) -> Vec<WorkItem> {
    if !ctx.needs_voice_leading() {
        return Vec::new();
    }
    let pattern_len = ctx.pattern_len();
    let total = ctx.timeline().total_len();
    let inside = |t: &Time| pattern_len < *t && *t < total;

    let mut boundaries: BTreeSet<Time> = BTreeSet::from([pattern_len, total]);
    for interval in ctx.timeline().intervals() {
        boundaries.extend([interval.start, interval.start + pattern_len].into_iter().filter(inside));
    }
    let mut multiple = pattern_len + pattern_len;
    while multiple < total {
        boundaries.insert(multiple);
        multiple += pattern_len;
    }

    let bounds: Vec<Time> = boundaries.into_iter().collect();
    let timeline = ctx.timeline();
    bounds
        .windows(2)
        .flat_map(|w| {
            let (start, end) = (w[0], w[1]);
            let source_start = start - pattern_len;
            (0..ctx.num_voices()).map(move |voice| WorkItem {
                voice,
                start,
                end,
                source_start,
                source_harmony: timeline.index_at(source_start),
                dest_harmony: timeline.index_at(start),
            })
        })
        .collect()
}

/// A failed single-note application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyFailure {
    pub reason: FailureReason,
    /// Scale degree of the source pitch in the source harmony.
    pub source_index: usize,
    pub displacement: i32,
}

/// Resolves and validates one voice-led note.
pub trait VoiceLeadingApplicator {
    /// The note `source` becomes in `item`'s window under `leading`, checked
    /// against the score as written so far.
    fn apply(
        &self,
        score: &Score,
        item: &WorkItem,
        source: &Note,
        leading: &VoiceLeading,
    ) -> Result<Note, ApplyFailure>;
}

/// Looks up each source pitch's scale degree and moves it by that degree's
/// displacement. Rests move in time only.
pub struct ScaleApplicator<'a> {
    ctx: &'a Context,
}

impl<'a> ScaleApplicator<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        ScaleApplicator { ctx }
    }

    fn check(
        &self,
        score: &Score,
        item: &WorkItem,
        note: &Note,
        pitch: Pitch,
    ) -> Option<FailureReason> {
        let ctx = self.ctx;
        let params = &ctx.config.voice_leading;
        let (low, high) = ctx.hard_bounds(item.voice);
        if !(low..=high).contains(&pitch) {
            return Some(FailureReason::OutOfRange);
        }
        if params.maintain_limit_intervals {
            let table = ctx.harmony(item.dest_harmony);
            let previous = score
                .voice(item.voice)
                .previous_note(note.onset)
                .and_then(|n| n.pitch);
            if !constraints::within_interval_bounds(ctx, table, item.voice, previous, pitch) {
                return Some(FailureReason::IntervalLimit);
            }
        }
        if params.maintain_forbidden_parallels
            && constraints::forms_forbidden_parallel(ctx, score, item.voice, note.onset, pitch)
        {
            return Some(FailureReason::Parallel);
        }
        if params.maintain_consonance {
            let slot = Slot {
                voice: item.voice,
                onset: note.onset,
                duration: note.duration,
            };
            let others = constraints::consonance_context(ctx, score, &slot);
            if !constraints::is_consonant(ctx, &others, pitch) {
                return Some(FailureReason::Consonance);
            }
        }
        None
    }
}

impl VoiceLeadingApplicator for ScaleApplicator<'_> {
    fn apply(
        &self,
        score: &Score,
        item: &WorkItem,
        source: &Note,
        leading: &VoiceLeading,
    ) -> Result<Note, ApplyFailure> {
        let total = self.ctx.timeline().total_len();
        let mut note = source.clone();
        note.onset = source.onset + item.offset();
        note.duration = (note.onset + source.duration).min(total) - note.onset;
        let Some(pitch) = source.pitch else {
            return Ok(note);
        };

        let table = self.ctx.harmony(item.source_harmony);
        let source_index = table.nearest_index(pitch);
        let displacement = leading
            .displacements
            .get(source_index)
            .copied()
            .unwrap_or(0);
        let moved = pitch + displacement;
        if let Some(reason) = self.check(score, item, &note, moved) {
            return Err(ApplyFailure {
                reason,
                source_index,
                displacement,
            });
        }
        note.pitch = Some(moved);
        Ok(note)
    }
}

/// Voice-lead everything after the initial pattern in place. Returns
/// `Ok(false)` when the pattern already covers the piece.
pub fn voice_lead(
    ctx: &Context,
    score: &mut Score,
    cancel: &CancelToken,
) -> Result<bool, GenerationError> {
    voice_lead_with(ctx, score, cancel, &ScaleApplicator::new(ctx))
}

/// `voice_lead` with a caller-supplied note applicator.
pub fn voice_lead_with<A: VoiceLeadingApplicator>(
    ctx: &Context,
    score: &mut Score,
    cancel: &CancelToken,
    applicator: &A,
) -> Result<bool, GenerationError> {
    let items = work_items(ctx);
    if items.is_empty() {
        return Ok(false);
    }
    let mut applier = PatternApplier {
        ctx,
        applicator,
        cancel,
        score,
        items,
        failures: TransitionFailures::default(),
        dead_ends: 0,
    };
    match applier.lead(0) {
        Ok(true) => {
            log::debug!(
                "voice-led {} work items with {} dead ends",
                applier.items.len(),
                applier.dead_ends
            );
            Ok(true)
        }
        Ok(false) | Err(Abort::DeadEnds) => Err(GenerationError::VoiceLeadingExhausted {
            failures: applier.failures,
        }),
        Err(Abort::Cancelled) => Err(GenerationError::Timeout),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    Strict,
    Flexible,
}

enum Abort {
    Cancelled,
    DeadEnds,
}

struct PatternApplier<'a, A> {
    ctx: &'a Context,
    applicator: &'a A,
    cancel: &'a CancelToken,
    score: &'a mut Score,
    items: Vec<WorkItem>,
    failures: TransitionFailures,
    dead_ends: usize,
}

impl<A: VoiceLeadingApplicator> PatternApplier<'_, A> {
    fn lead(&mut self, k: usize) -> Result<bool, Abort> {
        let Some(&item) = self.items.get(k) else {
            return Ok(true);
        };
        self.check_cancel()?;
        let sources: Vec<Note> = self
            .score
            .voice(item.voice)
            .notes_in(item.source_start, item.source_end())
            .cloned()
            .collect();
        if sources.is_empty() {
            return self.lead(k + 1);
        }

        for policy in self.policies() {
            let mut session =
                VoiceLeadingSession::new(self.ctx, item.source_harmony, item.dest_harmony);
            loop {
                self.check_cancel()?;
                let placed = match self.realize(policy, &mut session, &item, &sources)? {
                    Some(placed) => placed,
                    None => break,
                };
                if self.lead(k + 1)? {
                    return Ok(true);
                }
                self.rollback(item.voice, &placed);
            }
        }
        self.dead_end()
    }

    fn policies(&self) -> Vec<Policy> {
        let params = &self.ctx.config.voice_leading;
        let mut policies = Vec::new();
        if params.strict {
            policies.push(Policy::Strict);
        }
        if params.flexible {
            policies.push(Policy::Flexible);
        }
        policies
    }

    /// Place one alternative for the item, or `None` once the session has
    /// nothing left. Placed notes are returned for rollback.
    fn realize(
        &mut self,
        policy: Policy,
        session: &mut VoiceLeadingSession,
        item: &WorkItem,
        sources: &[Note],
    ) -> Result<Option<Vec<Note>>, Abort> {
        let Some(mut leading) = self.next_leading(session, item)? else {
            return Ok(None);
        };
        let mut placed = Vec::with_capacity(sources.len());
        let mut index = 0;
        while index < sources.len() {
            match self
                .applicator
                .apply(self.score, item, &sources[index], &leading)
            {
                Ok(note) => {
                    self.score.add_note(item.voice, note.clone());
                    placed.push(note);
                    index += 1;
                }
                Err(failure) => {
                    self.failures.record(item.transition(), failure.reason);
                    session.exclude(failure.source_index, failure.displacement);
                    if policy == Policy::Strict {
                        self.rollback(item.voice, &placed);
                        placed.clear();
                        index = 0;
                    }
                    self.check_cancel()?;
                    match self.next_leading(session, item)? {
                        Some(next) => leading = next,
                        None => {
                            self.rollback(item.voice, &placed);
                            return Ok(None);
                        }
                    }
                }
            }
        }
        Ok(Some(placed))
    }

    fn next_leading(
        &mut self,
        session: &mut VoiceLeadingSession,
        item: &WorkItem,
    ) -> Result<Option<VoiceLeading>, Abort> {
        match session.next_voice_leading() {
            Ok(leading) => Ok(Some(leading)),
            Err(SolveError::NoMoreVoiceLeadings) => {
                self.failures.record_exhausted(item.transition());
                Ok(None)
            }
            Err(err @ SolveError::CardinalityMismatch { .. }) => {
                log::warn!("harmony {:?}: {err}", item.transition());
                self.failures.record_exhausted(item.transition());
                Ok(None)
            }
        }
    }

    fn rollback(&mut self, voice: usize, placed: &[Note]) {
        for note in placed.iter().rev() {
            self.score.remove_note(voice, note.onset, note.pitch);
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
        self.dead_ends += 1;
        if self.dead_ends > self.ctx.config.voice_leading.max_dead_ends {
            log::debug!(
                "voice-leading dead-end cap of {} reached",
                self.ctx.config.voice_leading.max_dead_ends
            );
            return Err(Abort::DeadEnds);
        }
        Ok(false)
    }
}
