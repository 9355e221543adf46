// End-to-end generation: configuration in, voice-led score and MIDI out.

use polyvox::cancel::CancelToken;
use polyvox::config::{Config, Context, OnsetRule};
use polyvox::error::GenerationError;
use polyvox::generate::{Generator, generate};
use polyvox::initial::generate_initial_pattern;
use polyvox::midi::write_midi;
use polyvox::rhythm::generate_rhythm;
use polyvox::score::{Score, Time, beats};
use polyvox_prng::PatternRng;

/// Two voices over C, F, G, C major, two beats per harmony.
fn cadence_config(seed: u64) -> Config {
    let mut config = Config {
        seed: Some(seed),
        num_voices: 2,
        scales: vec![
            vec![0, 2, 4, 5, 7, 9, 11],
            vec![5, 7, 9, 10, 0, 2, 4],
            vec![7, 9, 11, 0, 2, 4, 6],
            vec![0, 2, 4, 5, 7, 9, 11],
        ],
        chords: vec![vec![0, 4, 7], vec![5, 9, 0], vec![7, 11, 2], vec![0, 4, 7]],
        harmony_len: vec![beats(2)],
        num_harmonies: 4,
        pattern_len: beats(2),
        voice_ranges: vec![(48, 60), (60, 76)],
        hard_bounds: vec![(36, 72), (48, 88)],
        ..Config::default()
    };
    config.rhythm.grid = Time::new(1, 2);
    config.rhythm.onset_density = vec![0.5];
    config.chord_tones.force = OnsetRule::FirstBeat;
    config
}

fn harmony_start_pitches(score: &Score, voice: usize) -> Vec<(usize, i32)> {
    score
        .timeline()
        .intervals()
        .iter()
        .filter_map(|interval| {
            let pitch = score
                .voice(voice)
                .notes_at(interval.start)
                .iter()
                .find_map(|n| n.pitch)?;
            Some((interval.index, pitch))
        })
        .collect()
}

#[test]
fn cadence_generates_with_chord_tones_on_every_downbeat() {
    let ctx = Context::new(cadence_config(7)).unwrap();
    let generated = generate(&ctx).expect("generation failed");
    let score = &generated.score;
    assert!(generated.report.attempts <= ctx.config.search.initial_pattern_attempts);
    assert_eq!(score.timeline().total_len(), beats(8));

    for voice in 0..2 {
        let downbeats = harmony_start_pitches(score, voice);
        assert_eq!(downbeats.len(), 4, "voice {voice} is missing a downbeat");
        for (harmony, pitch) in downbeats {
            assert!(
                ctx.harmony(harmony).is_chord_tone(pitch),
                "voice {voice}: {pitch} is not in chord {harmony}"
            );
        }
        let (low, high) = ctx.hard_bounds(voice);
        assert!(score.voice(voice).iter().all(|n| n.pitch.is_none_or(|p| (low..=high).contains(&p))));
    }
}

#[test]
fn forced_chord_tones_belong_to_their_chords_across_seeds() {
    for seed in 0..10 {
        let ctx = Context::new(cadence_config(seed)).unwrap();
        let mut rng = PatternRng::new(seed);
        let rhythm = generate_rhythm(&ctx, &mut rng);
        let Ok(pattern) = generate_initial_pattern(&ctx, &rhythm, &mut rng, &CancelToken::new())
        else {
            continue;
        };
        for (voice, onset) in pattern.forced_chord_tones {
            let table = ctx.harmony(pattern.score.harmony_index_at(onset));
            let pitch = pattern.score.voice(voice).notes_at(onset)[0].pitch.unwrap();
            assert!(table.is_chord_tone(pitch), "seed {seed}: voice {voice} at {onset}");
        }
    }
}

#[test]
fn no_voice_repeats_a_pitch_three_times() {
    for seed in 0..5 {
        let ctx = Context::new(cadence_config(seed)).unwrap();
        let Ok(generated) = generate(&ctx) else {
            continue;
        };
        let pattern_end = ctx.pattern_len();
        for voice in generated.score.voices() {
            let line: Vec<i32> = voice
                .notes_in(beats(0), pattern_end)
                .filter_map(|n| n.pitch)
                .collect();
            assert!(
                line.windows(3).all(|w| !(w[0] == w[1] && w[1] == w[2])),
                "seed {seed}: {line:?}"
            );
        }
    }
}

#[test]
fn pre_cancelled_generation_times_out() {
    let ctx = Context::new(cadence_config(1)).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut generator = Generator::new(&ctx).with_cancel(cancel);
    assert!(matches!(generator.run(), Err(GenerationError::Timeout)));
}

#[test]
fn config_round_trips_through_json() {
    let config = cadence_config(3);
    let json = config.to_json_pretty().unwrap();
    let parsed = Config::from_json_str(&json).unwrap();
    let a = generate(&Context::new(config).unwrap()).map(|g| g.score);
    let b = generate(&Context::new(parsed).unwrap()).map(|g| g.score);
    match (a, b) {
        (Ok(a), Ok(b)) => assert_eq!(a, b),
        (Err(_), Err(_)) => {}
        _ => panic!("parsed config behaved differently"),
    }
}

#[test]
fn generated_piece_writes_to_midi() {
    let ctx = Context::new(cadence_config(7)).unwrap();
    let generated = generate(&ctx).expect("generation failed");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cadence.mid");
    write_midi(&generated.score, &ctx, &path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], b"MThd");
}
