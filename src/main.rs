use clap::{Parser, Subcommand};
use kdbcarve::carve::{self, CarveOptions, ScanOptions, DEFAULT_WINDOW_SIZE};
use kdbcarve::container::{DecodeOptions, Kdb, KdbWriter, DEFAULT_BLOCK_SIZE};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kdbcarve", about = "KDB container decoder and magic-JPEG carver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt a KDB container and print its entries
    Decode {
        input: PathBuf,
        /// Fail when a record list hits its cap without a sentinel
        #[arg(long)]
        strict: bool,
        /// Print payloads as hex instead of lossy text
        #[arg(long)]
        hex: bool,
    },
    /// Build a KDB container from files
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        /// Entries as NAME=FILE pairs (names are at most 16 bytes)
        #[arg(short, long, required = true, num_args = 1..)]
        entry: Vec<String>,
        /// Ciphertext block size in bytes (max 65535)
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,
    },
    /// List signature/end-marker pairs in a blob without writing files
    Scan {
        blob: PathBuf,
        /// KDB container supplying the signature
        #[arg(short, long)]
        kdb: PathBuf,
        /// Scan window size in bytes
        #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
        window: usize,
    },
    /// Carve and repair every hidden image in a blob
    Carve {
        blob: PathBuf,
        /// KDB container supplying the signature
        #[arg(short, long)]
        kdb: PathBuf,
        /// Output directory (default: <blob_stem>_repaired next to the blob)
        #[arg(short = 'C', long)]
        output_dir: Option<PathBuf>,
        /// Scan window size in bytes
        #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
        window: usize,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Fail when a record list hits its cap without a sentinel
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    match Cli::parse().command {

        // ── Decode ───────────────────────────────────────────────────────────
        Commands::Decode { input, strict, hex } => {
            let opts = DecodeOptions {
                strict,
                ..DecodeOptions::default()
            };
            let kdb = Kdb::decode_file_with(&input, &opts)?;
            println!("Container: {} ({} entries)", input.display(), kdb.entries.len());
            for entry in &kdb.entries {
                if hex {
                    println!("{:<16}  {}", entry.display_name(), hex::encode(&entry.payload));
                } else {
                    println!(
                        "{:<16}  {}",
                        entry.display_name(),
                        String::from_utf8_lossy(&entry.payload)
                    );
                }
            }
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { output, entry, block_size } => {
            let file = std::fs::File::create(&output)?;
            let mut writer = KdbWriter::with_block_size(file, block_size)?;
            for pair in &entry {
                let (name, path) = split_entry_arg(pair)?;
                let data = std::fs::read(path)?;
                writer.add_entry(name, &data)?;
                println!("  packed  {name} ({} bytes)", data.len());
            }
            writer.finalize()?;
            println!("Created: {}", output.display());
        }

        // ── Scan ─────────────────────────────────────────────────────────────
        Commands::Scan { blob, kdb, window } => {
            let container = Kdb::decode_file(&kdb)?;
            let sig = container
                .find_signature()
                .ok_or("No MAGIC-prefixed entry in the container")?;
            let opts = ScanOptions {
                window_size: window,
            };
            let regions = carve::scan_file(&blob, &sig.payload, &opts)?;
            println!("{} region(s) in {}", regions.len(), blob.display());
            println!("{:>12} {:>12} {:>10}", "Start", "End", "Size");
            for r in &regions {
                println!("{:>12} {:>12} {:>10}", r.start, r.end, r.size());
            }
        }

        // ── Carve ────────────────────────────────────────────────────────────
        Commands::Carve { blob, kdb, output_dir, window, json, strict } => {
            let opts = CarveOptions {
                scan: ScanOptions {
                    window_size: window,
                },
                decode: DecodeOptions {
                    strict,
                    ..DecodeOptions::default()
                },
                output_dir,
            };
            let report = carve::carve_file(&blob, &kdb, &opts)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{:>12} {:>12}  {:<32}  Path", "Offset", "Size", "MD5");
                for image in &report.images {
                    println!(
                        "{:>12} {:>12}  {:<32}  {}",
                        image.offset,
                        image.size,
                        image.md5,
                        image.path.display()
                    );
                }
                println!("{}", report.summary());
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn split_entry_arg(arg: &str) -> Result<(&str, &str), Box<dyn std::error::Error>> {
    arg.split_once('=')
        .ok_or_else(|| format!("Entry must be NAME=FILE, got {arg:?}").into())
}
