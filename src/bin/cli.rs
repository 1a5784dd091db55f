//! adbwire CLI Client
//!
//! Command-line interface for file transfer and shell access through a
//! running adb server.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use adbwire::{CompressionType, Config, FileEntry, Result, Session};

/// adbwire CLI
#[derive(Parser, Debug)]
#[command(name = "adbwire-cli")]
#[command(about = "Talk to Android devices through the adb server wire protocol")]
#[command(version)]
struct Args {
    /// adb server address (host:port); defaults to the ANDROID_ADB_SERVER_* environment
    #[arg(long)]
    server: Option<String>,

    /// Device serial; the only connected device when omitted
    #[arg(short, long)]
    serial: Option<String>,

    /// Use sync V2 requests (64-bit sizes, compression)
    #[arg(long)]
    v2: bool,

    /// Compression for V2 transfers: none, any, brotli, lz4, zstd
    #[arg(short, long, default_value = "any")]
    compression: CompressionType,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List a remote directory
    Ls {
        /// Remote directory
        path: String,
    },

    /// Show metadata of a remote path
    Stat {
        /// Remote path
        path: String,
    },

    /// Copy a remote file to the local machine
    Pull {
        /// Remote file
        remote: String,

        /// Local destination
        local: String,
    },

    /// Copy a local file to the device
    Push {
        /// Local file
        local: String,

        /// Remote destination
        remote: String,

        /// Remote file mode (octal)
        #[arg(short, long, default_value = "644")]
        mode: String,
    },

    /// Run a shell command and print its output
    Shell {
        /// Command line
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing/logging
    let default_filter = if args.verbose { "info,adbwire=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    tracing::debug!("adbwire v{}", adbwire::VERSION);

    let mut config = Config::from_env();
    if let Some(server) = &args.server {
        config.server_addr = server.clone();
    }

    match run(&args, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, config: &Config) -> Result<()> {
    let session = Session::open(config, args.serial.as_deref())?;

    match &args.command {
        Commands::Ls { path } => {
            let entries = session.with_sync(|channel| {
                if args.v2 {
                    channel.list_v2(path)?.collect::<Result<Vec<_>>>()
                } else {
                    channel.list_all(path)
                }
            })?;
            for entry in &entries {
                print_entry(entry);
            }
        }

        Commands::Stat { path } => {
            let entry = session.with_sync(|channel| if args.v2 { channel.stat_v2(path) } else { channel.stat(path) })?;
            let entry = FileEntry {
                name: path.clone(),
                ..entry
            };
            print_entry(&entry);
        }

        Commands::Pull { remote, local } => {
            let mut sink = BufWriter::new(File::create(local)?);
            let bytes = session.with_sync(|channel| {
                if args.v2 {
                    channel.pull_v2(remote, args.compression, &mut sink)
                } else {
                    channel.pull(remote, &mut sink)
                }
            })?;
            println!("{}: {} bytes", remote, bytes);
        }

        Commands::Push { local, remote, mode } => {
            let mode = u32::from_str_radix(mode, 8)
                .map_err(|_| adbwire::AdbError::InvalidRequest(format!("bad octal mode {:?}", mode)))?;
            let file = File::open(local)?;
            let mtime = file
                .metadata()?
                .modified()?
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0);
            let mut source = BufReader::new(file);

            // Regular file type bits plus the requested permissions.
            let mode = 0o100000 | (mode & 0o7777);
            let bytes = session.with_sync(|channel| {
                if args.v2 {
                    channel.push_v2(&mut source, remote, mode, mtime, args.compression)
                } else {
                    channel.push_with_mtime(&mut source, remote, mode, mtime)
                }
            })?;
            println!("{}: {} bytes", remote, bytes);
        }

        Commands::Shell { command } => {
            let mut output = session.shell(&command.join(" "))?;
            let stdout = io::stdout();
            let mut stdout = stdout.lock();
            io::copy(&mut output, &mut stdout)?;
            stdout.flush()?;
        }
    }

    Ok(())
}

fn print_entry(entry: &FileEntry) {
    let kind = if entry.is_directory() {
        'd'
    } else if entry.is_symlink() {
        'l'
    } else {
        '-'
    };
    println!("{}{:04o} {:>10} {:>10} {}", kind, entry.permissions(), entry.size, entry.mtime, entry.name);
}
