// Polyvox: procedural multi-voice pattern generator.
//
// Writes a short multi-voice pattern over the first harmonies of a piece and
// voice-leads it across every later harmony. The pattern comes from a
// backtracking search over a rhythm skeleton, constrained by chord tones,
// melodic intervals, parallel motion and consonance. Later harmonies receive
// the pattern's material moved scale degree by scale degree along
// minimum-displacement voice-leadings.
//
// Architecture:
// - score.rs: Rational time, notes, voices, the harmony timeline and the Score
// - config.rs: JSON configuration, validation, and the derived Context
// - harmony.rs: Per-harmony scale/chord tables and scale-step arithmetic
// - rhythm.rs: Rhythm skeleton for the initial pattern
// - constraints.rs: Candidate pitch generation and per-note rule checks
// - initial.rs: Backtracking search for the initial pattern
// - solver.rs: Branch-and-bound minimum-displacement voice-leading solver
// - session.rs: Best-to-worse iteration over voice-leadings for one transition
// - applier.rs: Work-item windows and strict/flexible pattern propagation
// - generate.rs: Retry loop, finalization, and run reports
// - diagnostics.rs: Failure counters and voice-leading failure histograms
// - cancel.rs: Cooperative cancellation with optional deadline
// - error.rs: Error types
// - midi.rs: MIDI file output
//
// The generator is deterministic given a seed, supporting reproducible output.

pub mod applier;
pub mod cancel;
pub mod config;
pub mod constraints;
pub mod diagnostics;
pub mod error;
pub mod generate;
pub mod harmony;
pub mod initial;
pub mod midi;
pub mod rhythm;
pub mod score;
pub mod session;
pub mod solver;
