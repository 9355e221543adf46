// Error taxonomy for configuration, generation, solving and output.

use crate::diagnostics::{Diagnostics, TransitionFailures};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    /// No initial pattern could be found within the attempt budget.
    #[error("pitch materials exhausted after {attempts} attempt(s)\n{diagnostics}")]
    PitchMaterialsExhausted {
        attempts: usize,
        diagnostics: Diagnostics,
    },
    /// The initial pattern could not be voice-led across the piece.
    #[error("voice-leading exhausted\n{failures}")]
    VoiceLeadingExhausted { failures: TransitionFailures },
    #[error("generation timed out")]
    Timeout,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("no more voice-leadings")]
    NoMoreVoiceLeadings,
    #[error("cannot voice-lead {from_len} pitch classes onto {to_len}")]
    CardinalityMismatch { from_len: usize, to_len: usize },
}

#[derive(Debug, Error)]
pub enum MidiError {
    #[error("cannot write MIDI file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot encode score as MIDI: {0}")]
    Encode(String),
}
