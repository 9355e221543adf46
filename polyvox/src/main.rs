// Polyvox generator: CLI entry point.
//
// Generates a multi-voice piece from a JSON configuration (or the built-in
// default) and writes it to MIDI.
// The pipeline: rhythm -> initial pattern search -> voice-leading -> MIDI output.
//
// Usage:
//   cargo run -p polyvox --bin generate -- [output.mid] [--config FILE]
//     [--seed N] [--attempts N] [--timeout SECS] [--ask] [--dump-config]

use anyhow::Context as _;
use clap::Parser;
use log::LevelFilter;
use polyvox::config::{Config, Context};
use polyvox::generate::{GenerationReport, Generator};
use polyvox::midi::write_midi;
use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// Logging is controlled with RUST_LOG; see docs for the env_logger crate.
/// If RUST_LOG is not set, the log level defaults to Info.
#[derive(Parser)]
#[command(version, about = "Generate a voice-led multi-voice piece as MIDI", long_about = None)]
struct Cli {
    /// Output MIDI file
    #[arg(default_value = "output.mid")]
    output: PathBuf,

    /// JSON configuration file; omitted fields take their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Random seed (overrides the configuration)
    #[arg(long)]
    seed: Option<u64>,

    /// Initial-pattern attempts per batch
    #[arg(long)]
    attempts: Option<usize>,

    /// Give up after this many seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Ask whether to keep trying once the attempts are used up
    #[arg(long)]
    ask: bool,

    /// Print the default configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut log_builder = env_logger::builder();
    if env::var("RUST_LOG").is_err() {
        log_builder.filter_level(LevelFilter::Info);
    }
    log_builder.init();

    if cli.dump_config {
        println!("{}", Config::default().to_json_pretty()?);
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    if let Some(attempts) = cli.attempts {
        config.search.initial_pattern_attempts = attempts;
    }
    if cli.timeout.is_some() {
        config.search.timeout_secs = cli.timeout;
    }
    if cli.ask {
        config.search.ask_for_more_attempts = true;
    }
    let ctx = Context::new(config)?;

    println!("=== Polyvox Generator ===");
    println!("Output: {}", cli.output.display());
    println!("Voices: {}", ctx.num_voices());
    println!(
        "Harmonies: {} ({} beats)",
        ctx.timeline().len(),
        ctx.timeline().total_len()
    );
    println!("Pattern length: {} beats", ctx.pattern_len());
    println!();

    let mut generator = Generator::new(&ctx).with_prompt(Box::new(ask_to_continue));
    let generated = generator.run().context("generation failed")?;

    println!("{}", generated.score.summary());
    println!("{}", generated.report);
    write_midi(&generated.score, &ctx, &cli.output)
        .with_context(|| format!("writing {}", cli.output.display()))?;
    println!("Wrote {}", cli.output.display());
    Ok(())
}

/// Report progress on stdout and read a yes/no answer from stdin.
fn ask_to_continue(report: &GenerationReport) -> bool {
    println!("No piece found yet:");
    println!("{report}");
    print!("Keep trying? [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
