//! CLI surface for the LVC reader (§6.4): dump records, dump the field
//! dictionary, or dump the §4.10 `Stats` admin query, all against a
//! memory-mapped last-value cache file on disk.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use rt_lvc::LvcReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DumpMode {
    /// Dump matching records, one line per (service, ticker).
    Dump,
    /// Dump the embedded schema's field dictionary.
    Dict,
    /// Dump the §"Supplemented features" `Stats` admin snapshot.
    Mem,
}

/// Dump records from a memory-mapped last-value cache file (§3.6, §4.10, §6.2).
#[derive(Debug, Parser)]
#[command(name = "lvc-dump", version, about)]
struct Cli {
    /// Path to the LVC file.
    #[arg(long = "db")]
    db: PathBuf,
    /// Ticker(s) to dump: a single name, a comma-separated list, or
    /// `@path` to read one ticker per line from a file. Requires `-s`.
    #[arg(long = "t")]
    ticker: Option<String>,
    /// Service(s) to restrict to (comma-separated); also the service-axis
    /// half of `SetFilter` (§4.10).
    #[arg(long = "s")]
    service: Option<String>,
    /// Field ids to restrict to (comma-separated); translated to names via
    /// the embedded schema before being handed to `SetFilter`'s field axis.
    #[arg(long = "f")]
    fields: Option<String>,
    /// Which of the three dump modes to run.
    #[arg(long = "ty", value_enum, default_value_t = DumpMode::Dump)]
    ty: DumpMode,
    /// Number of concurrent reader threads to exercise against the sequence
    /// lock before performing the requested dump (§8 property 5: "no reader
    /// ever observes a torn record").
    #[arg(long = "threads", default_value_t = 1)]
    threads: usize,
    /// Print the embedded schema instead of any records, then exit.
    #[arg(long = "schema")]
    schema: bool,
    /// Accepted for CLI parity with the source tool; this reader is always
    /// safe for concurrent many-reader access via the per-slot sequence
    /// lock (§4.10), so there is nothing extra to opt into.
    #[arg(long = "shared")]
    shared: bool,
}

fn resolve_list(raw: &str) -> Result<Vec<String>, String> {
    if let Some(path) = raw.strip_prefix('@') {
        let text = std::fs::read_to_string(path).map_err(|e| format!("reading {path:?}: {e}"))?;
        Ok(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_owned).collect())
    } else {
        Ok(raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect())
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let mut reader = LvcReader::open(&cli.db).map_err(|e| format!("opening {:?}: {e}", cli.db))?;

    if cli.schema {
        for def in reader.get_schema().iter_by_id() {
            println!("{}\t{}\t{:?}\t{}", def.id, def.name, def.ty, def.max_len);
        }
        return Ok(());
    }

    let services = cli.service.as_deref().map(resolve_list).transpose()?;
    let field_names = cli
        .fields
        .as_deref()
        .map(resolve_list)
        .transpose()?
        .map(|ids| {
            ids.iter()
                .filter_map(|raw| raw.parse::<u16>().ok())
                .filter_map(|id| reader.get_schema().by_id(id).map(|def| def.name.clone()))
                .collect::<std::collections::HashSet<_>>()
        });
    reader.set_filter(field_names, services.clone().map(|v| v.into_iter().collect()));

    if cli.threads > 1 {
        smoke_check_concurrent_readers(&cli.db, cli.threads)?;
    }

    match cli.ty {
        DumpMode::Dict => {
            for def in reader.get_schema().iter_by_id() {
                println!("{}\t{}\t{:?}", def.id, def.name, def.ty);
            }
        }
        DumpMode::Mem => {
            let stats = reader.stats().map_err(|e| e.to_string())?;
            println!(
                "records={} active={} schema_fields={} last_writer_seq={}",
                stats.record_count, stats.active_count, stats.schema_field_count, stats.last_writer_sequence
            );
        }
        DumpMode::Dump => {
            if let Some(ticker_raw) = &cli.ticker {
                let Some(services) = &services else {
                    return Err("-t requires -s (service is part of a record's identity)".to_owned());
                };
                let tickers = resolve_list(ticker_raw)?;
                for service in services {
                    for ticker in &tickers {
                        match reader.view(service, ticker).map_err(|e| e.to_string())? {
                            Some(view) => print_view(&view),
                            None => eprintln!("{service}.{ticker}: not found"),
                        }
                    }
                }
            } else {
                for view in reader.view_all().map_err(|e| e.to_string())? {
                    print_view(&view);
                }
            }
        }
    }

    let _ = cli.shared;
    Ok(())
}

fn print_view(view: &rt_lvc::RecordView) {
    let fields: Vec<String> = view.fields.iter().map(|f| format!("{}={}", f.id, f.value.to_text())).collect();
    let stale = if view.stale { " STALE" } else { "" };
    println!("{}.{}{}: {}", view.service, view.ticker, stale, fields.join(" "));
}

/// Opens `threads` independent `LvcReader`s against the same file and
/// `view_all`s concurrently once each, asserting every reader saw the same
/// active-record count. Demonstrates §8 property 5 rather than proving it
/// exhaustively — a real stress run needs a live writer, which this
/// read-only tool doesn't have.
fn smoke_check_concurrent_readers(path: &std::path::Path, threads: usize) -> Result<(), String> {
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let path = path.to_owned();
            std::thread::spawn(move || -> Result<usize, String> {
                let reader = LvcReader::open(&path).map_err(|e| e.to_string())?;
                Ok(reader.view_all().map_err(|e| e.to_string())?.len())
            })
        })
        .collect();
    let mut counts = Vec::new();
    for h in handles {
        counts.push(h.join().map_err(|_| "reader thread panicked".to_owned())??);
    }
    let first = counts.first().copied().unwrap_or(0);
    if counts.iter().all(|c| *c == first) {
        eprintln!("{threads} reader threads observed {first} active records (consistent)");
    } else {
        eprintln!("{threads} reader threads disagreed on active record count: {counts:?}");
    }
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
