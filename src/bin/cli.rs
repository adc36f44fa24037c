//! BrambleKV CLI
//!
//! Opens a data directory in-process and runs one command against it.

use std::process;
use std::time::Duration;

use bramblekv::{
    BrambleError, Config, DataType, Engine, IoMode, ScanRange, Ttl,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

/// BrambleKV CLI
#[derive(Parser, Debug)]
#[command(name = "bramble-cli")]
#[command(about = "Inspect and edit a BrambleKV data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./bramble_data")]
    data_dir: String,

    /// Use memory-mapped segment I/O
    #[arg(long)]
    mmap: bool,

    /// Partition to operate on
    #[arg(short = 't', long = "type", value_enum, default_value = "string")]
    data_type: TypeArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TypeArg {
    String,
    List,
    Hash,
    Set,
    Zset,
}

impl From<TypeArg> for DataType {
    fn from(arg: TypeArg) -> Self {
        match arg {
            TypeArg::String => DataType::String,
            TypeArg::List => DataType::List,
            TypeArg::Hash => DataType::Hash,
            TypeArg::Set => DataType::Set,
            TypeArg::Zset => DataType::SortedSet,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a value (hash/set/zset need --member; zset value is the score)
    Set {
        key: String,

        /// Value (empty for sets)
        #[arg(default_value = "")]
        value: String,

        #[arg(short, long)]
        member: Option<String>,

        /// Time to live in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Read a value
    Get {
        key: String,

        #[arg(short, long)]
        member: Option<String>,
    },

    /// Delete a key or one member
    Del {
        key: String,

        #[arg(short, long)]
        member: Option<String>,
    },

    /// Show the time to live of a key
    Ttl { key: String },

    /// Set the time to live of a key in seconds
    Expire { key: String, seconds: u64 },

    /// List entries, optionally only keys starting with a prefix
    Scan {
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Show space accounting for every partition
    Stats,

    /// Compact the partition
    Merge {
        /// Merge even below the configured threshold
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bramblekv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .io_mode(if args.mmap { IoMode::Mmap } else { IoMode::Buffered })
        .build();

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            process::exit(1);
        }
    };

    let result = run(&engine, args.data_type.into(), args.command);
    let closed = engine.close();

    match result.and(closed) {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            println!("(nil)");
        }
        Err(e) => {
            tracing::error!("{}", e);
            process::exit(1);
        }
    }
}

fn run(engine: &Engine, data_type: DataType, command: Commands) -> bramblekv::Result<()> {
    match command {
        Commands::Set {
            key,
            value,
            member,
            ttl,
        } => {
            let value = match data_type {
                DataType::SortedSet => {
                    let score: f64 = value.parse().map_err(|_| {
                        BrambleError::InvalidArgument(format!("not a score: {}", value))
                    })?;
                    score.to_le_bytes().to_vec()
                }
                _ => value.into_bytes(),
            };
            engine.put(
                data_type,
                key.as_bytes(),
                member.as_deref().map(str::as_bytes),
                &value,
                ttl.map(Duration::from_secs),
            )?;
            println!("OK");
        }
        Commands::Get { key, member } => {
            let value = engine.get(data_type, key.as_bytes(), member.as_deref().map(str::as_bytes))?;
            println!("{}", render(data_type, &value));
        }
        Commands::Del { key, member } => {
            engine.delete(data_type, key.as_bytes(), member.as_deref().map(str::as_bytes))?;
            println!("OK");
        }
        Commands::Ttl { key } => match engine.ttl(data_type, key.as_bytes())? {
            Ttl::NoExpiry => println!("no expiry"),
            Ttl::Remaining(left) => println!("{}s", left.as_secs()),
        },
        Commands::Expire { key, seconds } => {
            engine.expire(data_type, key.as_bytes(), Duration::from_secs(seconds))?;
            println!("OK");
        }
        Commands::Scan { prefix } => {
            let range = match prefix {
                Some(prefix) => ScanRange::Prefix(prefix.into_bytes()),
                None => ScanRange::All,
            };
            for item in engine.scan(data_type, range) {
                let item = item?;
                let key = String::from_utf8_lossy(&item.key);
                match item.member {
                    Some(member) => println!(
                        "{} {} {}",
                        key,
                        String::from_utf8_lossy(&member),
                        render(data_type, &item.value)
                    ),
                    None => println!("{} {}", key, render(data_type, &item.value)),
                }
            }
        }
        Commands::Stats => {
            println!(
                "{:<8} {:>8} {:>14} {:>14} {:>14} {:>10}",
                "type", "segments", "total", "live", "reclaimable", "entries"
            );
            for data_type in DataType::ALL {
                let stats = engine.stats(data_type);
                println!(
                    "{:<8} {:>8} {:>14} {:>14} {:>14} {:>10}",
                    data_type.to_string(),
                    stats.segments,
                    stats.total_bytes,
                    stats.live_bytes,
                    stats.reclaimable_bytes,
                    stats.live_entries
                );
            }
        }
        Commands::Merge { force } => {
            let stats = if force {
                Some(engine.merge(data_type)?)
            } else {
                engine.trigger_merge(data_type)?
            };
            match stats {
                Some(stats) => println!(
                    "merged {} segments into {}: {} -> {} bytes",
                    stats.segments_merged, stats.output_segments, stats.bytes_before, stats.bytes_after
                ),
                None => println!("below merge threshold, nothing to do"),
            }
        }
    }
    Ok(())
}

fn render(data_type: DataType, value: &[u8]) -> String {
    if data_type == DataType::SortedSet {
        if let Ok(raw) = <[u8; 8]>::try_from(value) {
            return f64::from_le_bytes(raw).to_string();
        }
    }
    String::from_utf8_lossy(value).into_owned()
}
