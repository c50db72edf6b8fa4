//! Somnus CLI - Command-line interface for the Somnus engine
//!
//! Commands:
//! - replay: Run a recorded sensor log through the engine and print state transitions
//! - brackets: Show age-bracket defaults

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Deserialize;

use somnus_engine::engine::TICK_INTERVAL_SECS;
use somnus_engine::{
    AgeBracket, EngineConfig, EngineError, HeartRateSample, MemoryStore, SleepEngine,
    ENGINE_VERSION,
};

/// Somnus - On-device personalized sleep-detection engine
#[derive(Parser)]
#[command(name = "somnus")]
#[command(author = "Somnus Labs")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Replay wearable sensor logs through the sleep-detection engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a recorded sensor log through the engine and print transitions
    Replay {
        /// Input file path, NDJSON (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Resting heart rate in bpm
        #[arg(long)]
        resting_hr: f64,

        /// Wearer age in years (selects the age bracket)
        #[arg(long)]
        age: Option<u32>,

        /// Local UTC offset in hours for day/night classification
        #[arg(long, default_value = "0")]
        utc_offset_hours: i32,

        /// Emit every tick evaluation, not only transitions
        #[arg(long)]
        verbose: bool,

        /// Output format
        #[arg(long, default_value = "text")]
        output_format: OutputFormat,
    },

    /// Show age-bracket defaults
    Brackets,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// One NDJSON record of the replay log
#[derive(Debug, Deserialize)]
struct LogRecord {
    /// Sample timestamp (RFC 3339)
    t: DateTime<Utc>,
    /// "hr" or "motion"
    kind: RecordKind,
    value: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RecordKind {
    Hr,
    Motion,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Replay {
            input,
            resting_hr,
            age,
            utc_offset_hours,
            verbose,
            output_format,
        } => replay(
            &input,
            resting_hr,
            age,
            utc_offset_hours,
            verbose,
            output_format,
        ),
        Commands::Brackets => {
            print_brackets();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn replay(
    input: &PathBuf,
    resting_hr: f64,
    age: Option<u32>,
    utc_offset_hours: i32,
    verbose: bool,
    output_format: OutputFormat,
) -> Result<(), EngineError> {
    let raw = read_input(input)
        .map_err(|e| EngineError::SourceUnavailable(format!("{}: {e}", input.display())))?;

    let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
        .ok_or_else(|| EngineError::SourceUnavailable("invalid UTC offset".to_string()))?;
    let config = EngineConfig {
        bracket: age.map(AgeBracket::for_age).unwrap_or_default(),
        local_offset: offset,
        ..EngineConfig::default()
    };

    let mut records = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: LogRecord = serde_json::from_str(line).map_err(|e| {
            EngineError::SourceUnavailable(format!("line {}: {e}", lineno + 1))
        })?;
        records.push(record);
    }
    if records.is_empty() {
        return Err(EngineError::SourceUnavailable("empty log".to_string()));
    }

    let start = records[0].t;
    let mut engine = SleepEngine::new(config, Box::new(MemoryStore::new()), start);
    engine.update_resting_heart_rate(resting_hr);
    engine.start_sleep_detection(start)?;

    // Drive the three cadences from the log's timeline: sensor pushes at
    // their recorded instants, the stillness counter once per second, the
    // transition evaluation every TICK_INTERVAL_SECS.
    let mut clock = start;
    let mut next_eval = start + Duration::seconds(i64::from(TICK_INTERVAL_SECS));

    for record in &records {
        while clock < record.t {
            clock += Duration::seconds(1);
            engine.tick_second();
            if clock >= next_eval {
                if let Some(state) = engine.tick(clock) {
                    if verbose {
                        emit_tick(&engine, state.as_str(), clock, output_format);
                    }
                }
                next_eval = clock + Duration::seconds(i64::from(TICK_INTERVAL_SECS));
            }
        }
        match record.kind {
            RecordKind::Hr => engine.on_heart_rate(HeartRateSample {
                timestamp: record.t,
                bpm: record.value,
            }),
            RecordKind::Motion => engine.on_motion(record.value, record.t),
        }
        drain_events(&mut engine, output_format);
    }

    engine.stop_sleep_detection(clock);
    drain_events(&mut engine, output_format);

    let sessions = engine.model().sessions();
    match output_format {
        OutputFormat::Text => {
            println!(
                "replayed {} records over {}s; {} session(s) recorded",
                records.len(),
                (clock - start).num_seconds(),
                sessions.len()
            );
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&engine.snapshot(clock))?
            );
        }
    }

    Ok(())
}

fn drain_events(engine: &mut SleepEngine, output_format: OutputFormat) {
    for event in engine.take_events() {
        match output_format {
            OutputFormat::Text => println!("{event:?}"),
            OutputFormat::Json => {
                if let Ok(json) = serde_json::to_string(&event) {
                    println!("{json}");
                }
            }
        }
    }
}

fn emit_tick(engine: &SleepEngine, state: &str, at: DateTime<Utc>, output_format: OutputFormat) {
    match output_format {
        OutputFormat::Text => {
            let snapshot = engine.snapshot(at);
            println!(
                "{at} state={state} threshold={:.1}bpm disturbances={}",
                snapshot.threshold_bpm, snapshot.disturbance_count
            );
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string(&engine.snapshot(at)) {
                println!("{json}");
            }
        }
    }
}

fn print_brackets() {
    let use_color = atty::is(atty::Stream::Stdout);
    for bracket in [AgeBracket::Teen, AgeBracket::Adult, AgeBracket::Senior] {
        let name = if use_color {
            format!("\x1b[1m{}\x1b[0m", bracket.as_str())
        } else {
            bracket.as_str().to_string()
        };
        println!(
            "{name}: default ratio {:.2}, min qualifying sleep {}s",
            bracket.default_ratio(),
            bracket.min_qualifying_seconds()
        );
    }
}

fn read_input(path: &PathBuf) -> io::Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().lock().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        fs::read_to_string(path)
    }
}
