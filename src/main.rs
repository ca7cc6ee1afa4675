use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use log::{Level, LevelFilter, Log, Metadata, Record};

use gptsync::console::{Console, Terminal};
use gptsync::device::open_device;
use gptsync::partition::types::MBR_TYPES;
use gptsync::sync::{sync_device, ComposeOptions, SyncOutcome, SyncRequest};

/// Synchronize the MBR with the GPT of a disk, creating a hybrid MBR.
///
/// Each PARTITION is a 1-based GPT partition number to mirror into the MBR,
/// optionally followed by `+` to mark it active and/or a hex MBR type
/// (`2+`, `3-83`, `1+af`). Without partitions the first GPT partitions are
/// used, skipping a leading EFI System Partition.
#[derive(Parser, Debug)]
#[command(version = env!("APP_VERSION"), about, long_about)]
struct Args {
    /// Create an MBR containing only the EFI protective partition
    #[arg(short, long)]
    empty: bool,

    /// Don't protect the unused space after the last partition
    #[arg(short, long)]
    nofill: bool,

    /// List the recognised MBR partition types and exit
    #[arg(short, long)]
    types: bool,

    /// Don't ask for confirmation before writing
    #[arg(short, long)]
    yes: bool,

    /// Also print the GPT, the proposed table and the outcome as JSON
    #[arg(short, long)]
    json: bool,

    /// More output (-v info, -vv debug)
    #[arg(short, action = ArgAction::Count)]
    verbose: u8,

    /// Disk device or image file
    #[arg(required_unless_present = "types")]
    device: Option<PathBuf>,

    /// Partitions to mirror: NUMBER[+|-][TYPE]
    #[arg(allow_hyphen_values = true)]
    partitions: Vec<String>,
}

/// Prints log records to stderr, in the same style as the status output.
struct ConsoleLogger {
    level: LevelFilter,
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match record.level() {
            Level::Error => eprintln!("ERROR: {}", record.args()),
            Level::Warn => eprintln!("Warning: {}", record.args()),
            _ => eprintln!("{}", record.args()),
        }
    }

    fn flush(&self) {}
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    if log::set_boxed_logger(Box::new(ConsoleLogger { level })).is_ok() {
        log::set_max_level(level);
    }
}

fn print_types() {
    println!("\ngptsync MBR recognized types:\n");
    for (code, name) in MBR_TYPES {
        println!("    {code:02x}  {name}");
    }
}

fn sync(args: Args) -> Result<SyncOutcome> {
    let Some(path) = args.device else {
        bail!("no device given");
    };

    let mut opened = open_device(&path)?;
    let mut console = Terminal::stdio(args.yes, args.json);
    let request = SyncRequest {
        partitions: args.partitions,
        options: ComposeOptions {
            create_empty: args.empty,
            fill_unused: !args.nofill,
        },
    };

    let outcome = sync_device(&mut opened.disk, &mut console, &request)
        .with_context(|| format!("{}", path.display()))?;
    if args.json {
        console.report(&serde_json::to_string(&outcome)?);
    }
    Ok(outcome)
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.types {
        print_types();
        return ExitCode::SUCCESS;
    }

    match sync(args) {
        Ok(outcome) => {
            log::debug!("outcome: {outcome:?}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
