// MIDI output from scores.
//
// Converts a Score into a Standard MIDI File (SMF) Format 1: a tempo track,
// then one track per voice carrying a track name, its notes, and a program
// change wherever a note's timbre differs from the one before it. Voices
// without notes get the configured timbre. Onsets are rational beats (quarter notes);
// they map to ticks at TICKS_PER_QUARTER, rounded to the nearest tick.
//
// Uses the `midly` crate for MIDI writing. Channel 9 (General MIDI drums) is
// skipped when assigning channels.

use crate::config::Context;
use crate::error::MidiError;
use crate::score::{Score, Time};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Ticks per quarter note in MIDI output.
pub const TICKS_PER_QUARTER: u16 = 480;

const DRUM_CHANNEL: usize = 9;

/// Convert a Score to MIDI and write it to `path`.
pub fn write_midi(score: &Score, ctx: &Context, path: &Path) -> Result<(), MidiError> {
    let names: Vec<String> = (0..score.num_voices())
        .map(|voice| format!("Voice {voice}"))
        .collect();
    let smf = score_to_smf(score, ctx, &names)?;
    let file = BufWriter::new(File::create(path)?);
    smf.write_std(file)?;
    Ok(())
}

fn to_ticks(t: Time) -> u64 {
    let ticks = (t * Time::from_integer(i64::from(TICKS_PER_QUARTER))).round();
    ticks.to_integer().max(0) as u64
}

fn channel(voice: usize) -> u4 {
    let channel = if voice < DRUM_CHANNEL { voice } else { voice + 1 };
    u4::new((channel % 16) as u8)
}

/// Convert a Score to an in-memory SMF. Track names borrow from `names`.
fn score_to_smf<'a>(
    score: &Score,
    ctx: &Context,
    names: &'a [String],
) -> Result<Smf<'a>, MidiError> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    // Track 0: tempo track
    let tempo_microseconds = 60_000_000 / u32::from(ctx.config.output.tempo_bpm.max(1));
    smf.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_microseconds))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);

    for (index, voice) in score.voices().iter().enumerate() {
        let channel = channel(index);
        let mut program = voice
            .iter()
            .find(|n| n.pitch.is_some())
            .map_or(ctx.timbre(index), |n| n.timbre);
        let mut track: Track<'a> = vec![
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::TrackName(names[index].as_bytes())),
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::ProgramChange {
                        program: u7::new(program.min(127)),
                    },
                },
            },
        ];

        // (tick, note-offs then program changes then note-ons, message)
        let mut events: Vec<(u64, u8, MidiMessage)> = Vec::new();
        for note in voice.iter() {
            let Some(pitch) = note.pitch else { continue };
            let Ok(key) = u8::try_from(pitch) else { continue };
            if key > 127 {
                continue;
            }
            let key = u7::new(key);
            if note.timbre != program {
                program = note.timbre;
                events.push((
                    to_ticks(note.onset),
                    1,
                    MidiMessage::ProgramChange {
                        program: u7::new(program.min(127)),
                    },
                ));
            }
            events.push((
                to_ticks(note.onset),
                2,
                MidiMessage::NoteOn {
                    key,
                    vel: u7::new(note.velocity.clamp(1, 127)),
                },
            ));
            events.push((
                to_ticks(note.end()),
                0,
                MidiMessage::NoteOff {
                    key,
                    vel: u7::new(0),
                },
            ));
        }
        events.sort_by_key(|&(tick, order, _)| (tick, order));

        let mut last_tick = 0;
        for (tick, _, message) in events {
            let gap = tick - last_tick;
            let delta = u32::try_from(gap)
                .ok()
                .and_then(u28::try_from)
                .ok_or_else(|| MidiError::Encode(format!("voice {index}: gap of {gap} ticks")))?;
            track.push(TrackEvent {
                delta,
                kind: TrackEventKind::Midi { channel, message },
            });
            last_tick = tick;
        }

        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf.tracks.push(track);
    }

    Ok(smf)
}
