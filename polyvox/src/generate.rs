// Generation driver: retry loop, finalization, and reporting.
//
// One attempt draws a rhythm, searches an initial pattern over it and
// voice-leads that pattern across the piece. Attempts get independent random
// streams forked from the run's seed, so attempt n of a seeded run is
// reproducible on its own. Exhausted attempts are retried up to
// `search.initial_pattern_attempts` times; a timeout ends the run at once.
// When the budget runs out and `search.ask_for_more_attempts` is set, the
// caller's prompt decides whether another batch of attempts runs.

use crate::applier;
use crate::cancel::CancelToken;
use crate::config::{Config, Context};
use crate::diagnostics::{Diagnostics, TransitionFailures};
use crate::error::GenerationError;
use crate::initial;
use crate::rhythm;
use crate::score::Score;
use polyvox_prng::PatternRng;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cumulative statistics for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub seed: u64,
    pub attempts: usize,
    pub diagnostics: Diagnostics,
    pub voice_leading_failures: TransitionFailures,
}

impl fmt::Display for GenerationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "seed {}, {} attempt(s)", self.seed, self.attempts)?;
        writeln!(f, "initial pattern search:")?;
        writeln!(f, "{}", self.diagnostics)?;
        writeln!(f, "voice-leading:")?;
        write!(f, "{}", self.voice_leading_failures)
    }
}

#[derive(Debug, Clone)]
pub struct Generated {
    pub score: Score,
    pub report: GenerationReport,
}

/// Asked whether to keep going after the attempt budget is spent.
pub type ContinuePrompt<'a> = Box<dyn FnMut(&GenerationReport) -> bool + 'a>;

pub struct Generator<'a> {
    ctx: &'a Context,
    cancel: CancelToken,
    prompt: Option<ContinuePrompt<'a>>,
}

enum LastFailure {
    PitchMaterials,
    VoiceLeading,
}

impl<'a> Generator<'a> {
    /// A generator honoring the configured timeout, if any.
    pub fn new(ctx: &'a Context) -> Self {
        let mut cancel = CancelToken::new();
        if let Some(secs) = ctx.config.search.timeout_secs {
            if secs.is_finite() && secs >= 0.0 {
                cancel = cancel.with_deadline(Duration::from_secs_f64(secs));
            }
        }
        Generator {
            ctx,
            cancel,
            prompt: None,
        }
    }

    /// Replace the cancellation token (and with it the configured deadline).
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_prompt(mut self, prompt: ContinuePrompt<'a>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn run(&mut self) -> Result<Generated, GenerationError> {
        let ctx = self.ctx;
        let seed = ctx.config.seed.unwrap_or_else(clock_seed);
        let batch = ctx.config.search.initial_pattern_attempts;
        log::info!(
            "generating {} voice(s) over {} harmonies, seed {seed}",
            ctx.num_voices(),
            ctx.timeline().len()
        );

        let mut rng = PatternRng::new(seed);
        let mut report = GenerationReport {
            seed,
            ..GenerationReport::default()
        };
        let mut budget = batch;
        let mut last = LastFailure::PitchMaterials;
        loop {
            while report.attempts < budget {
                if self.cancel.is_cancelled() {
                    return Err(GenerationError::Timeout);
                }
                report.attempts += 1;
                let mut attempt_rng = rng.fork(report.attempts as u64);
                log::debug!("attempt {}/{budget}", report.attempts);
                match self.attempt(&mut attempt_rng, &mut report.diagnostics) {
                    Ok(mut score) => {
                        finalize(ctx, &mut score);
                        log::info!(
                            "generated {} notes after {} attempt(s)",
                            score.note_count(),
                            report.attempts
                        );
                        return Ok(Generated { score, report });
                    }
                    Err(GenerationError::PitchMaterialsExhausted { diagnostics, .. }) => {
                        log::warn!(
                            "attempt {}: no initial pattern ({} dead ends)",
                            report.attempts,
                            diagnostics.dead_ends
                        );
                        report.diagnostics += diagnostics;
                        last = LastFailure::PitchMaterials;
                    }
                    Err(GenerationError::VoiceLeadingExhausted { failures }) => {
                        log::warn!("attempt {}: voice-leading exhausted", report.attempts);
                        report.voice_leading_failures.merge(&failures);
                        last = LastFailure::VoiceLeading;
                    }
                    Err(err) => return Err(err),
                }
            }
            if !self.ask_for_more(&report) {
                break;
            }
            budget += batch.max(1);
        }

        log::warn!("giving up after {} attempt(s)", report.attempts);
        Err(match last {
            LastFailure::PitchMaterials => GenerationError::PitchMaterialsExhausted {
                attempts: report.attempts,
                diagnostics: report.diagnostics,
            },
            LastFailure::VoiceLeading => GenerationError::VoiceLeadingExhausted {
                failures: report.voice_leading_failures,
            },
        })
    }

    /// One full attempt. The pattern search's diagnostics are added to
    /// `diagnostics` when the search succeeds; on failure they travel in the error.
    fn attempt(
        &self,
        rng: &mut PatternRng,
        diagnostics: &mut Diagnostics,
    ) -> Result<Score, GenerationError> {
        let rhythm = rhythm::generate_rhythm(self.ctx, rng);
        let pattern = initial::generate_initial_pattern(self.ctx, &rhythm, rng, &self.cancel)?;
        log::debug!(
            "initial pattern: {} notes, {} forced chord tones, {} dead ends",
            pattern.score.note_count(),
            pattern.forced_chord_tones.len(),
            pattern.diagnostics.dead_ends
        );
        *diagnostics += pattern.diagnostics;
        let mut score = pattern.score;
        applier::voice_lead(self.ctx, &mut score, &self.cancel)?;
        Ok(score)
    }

    fn ask_for_more(&mut self, report: &GenerationReport) -> bool {
        if !self.ctx.config.search.ask_for_more_attempts {
            return false;
        }
        match self.prompt.as_mut() {
            Some(prompt) => prompt(report),
            None => false,
        }
    }
}

/// Generate with the context's own settings and no prompt.
pub fn generate(ctx: &Context) -> Result<Generated, GenerationError> {
    Generator::new(ctx).run()
}

/// Validate `config` and generate from it.
pub fn generate_from_config(config: Config) -> Result<Generated, GenerationError> {
    let ctx = Context::new(config)?;
    generate(&ctx)
}

/// Repetitions, then transposition.
pub fn finalize(ctx: &Context, score: &mut Score) {
    let output = &ctx.config.output;
    score.repeat(output.num_reps);
    score.transpose(output.transpose);
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
