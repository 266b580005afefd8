//! CLI surface for the tape reader (§6.4's tape-specific analogue): replay
//! a memory-mapped time-indexed tape file full, per-ticker, or sliced (with
//! optional per-interval sampling) to stdout.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rt_tape::{SeekTarget, TapeMessage, TapeReader};

/// Replay messages from a memory-mapped tape file (§3.7, §4.11, §6.3).
#[derive(Debug, Parser)]
#[command(name = "tape-dump", version, about)]
struct Cli {
    /// Path to the tape file.
    #[arg(long = "tape")]
    tape: PathBuf,
    /// Ticker to replay via its per-record chain instead of linear file
    /// order (`PumpTicker`, §4.11). Requires `-s`.
    #[arg(long = "t")]
    ticker: Option<String>,
    /// Service paired with `-t`.
    #[arg(long = "s")]
    service: Option<String>,
    /// Start of a `PumpTapeSlice`/`PumpTapeSliceSample` window, nanoseconds
    /// since the Unix epoch.
    #[arg(long = "from")]
    from: Option<i64>,
    /// End of a `PumpTapeSlice`/`PumpTapeSliceSample` window, nanoseconds
    /// since the Unix epoch. Required alongside `-from`.
    #[arg(long = "to")]
    to: Option<i64>,
    /// Sub-sample interval in nanoseconds for `PumpTapeSliceSample`; only
    /// meaningful together with `-from`/`-to`. Restrict the sampled fields
    /// with a comma-separated field-id list.
    #[arg(long = "sample")]
    sample: Option<i64>,
    /// Comma-separated field ids to restrict a sampled slice to.
    #[arg(long = "f")]
    fields: Option<String>,
    /// Replay direction (§4.11 `SetTapeDirection`).
    #[arg(long = "reverse")]
    reverse: bool,
    /// Cap on the number of messages a full-tape pump delivers.
    #[arg(long = "max", default_value_t = usize::MAX)]
    max: usize,
}

fn print_message(msg: &TapeMessage) {
    let fields: Vec<String> =
        msg.envelope.fields.iter().map(|f| format!("{}={}", f.id, f.value.to_text())).collect();
    println!(
        "{}\t{}.{}\t{:?}\t{}",
        msg.timestamp_ns,
        msg.envelope.svc,
        msg.envelope.tkr,
        msg.envelope.msg_type,
        fields.join(" ")
    );
}

fn run(cli: Cli) -> Result<(), String> {
    let mut reader = TapeReader::open(&cli.tape).map_err(|e| format!("opening {:?}: {e}", cli.tape))?;
    if cli.reverse {
        reader.set_direction(rt_tape::Direction::Reverse);
    }

    let delivered = if let Some(ticker) = &cli.ticker {
        let Some(service) = &cli.service else {
            return Err("-t requires -s (a record's identity is (service, ticker))".to_owned());
        };
        reader.pump_ticker(service, ticker, print_message).map_err(|e| e.to_string())?
    } else if let (Some(from), Some(to)) = (cli.from, cli.to) {
        if let Some(interval) = cli.sample {
            let field_ids: Vec<u16> = cli
                .fields
                .as_deref()
                .unwrap_or("")
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            reader.pump_tape_slice_sample(from, to, interval, &field_ids, print_message).map_err(|e| e.to_string())?
        } else {
            reader.pump_tape_slice(from, to, print_message).map_err(|e| e.to_string())?
        }
    } else {
        reader.rewind();
        let start = reader.position();
        reader.pump_full_tape(start, cli.max, print_message).map_err(|e| e.to_string())?
    };

    eprintln!("{delivered} message(s) delivered");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")))
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}
