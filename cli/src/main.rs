use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use parse_size::parse_size;

use dfu::DfuConfig;
use detach::*;
use download::*;
use error::CliError;
use list::*;
use random::*;
use upload::*;

mod detach;
mod download;
mod error;
mod list;
mod progress;
mod random;
mod upload;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// list DFU devices
    List {
        /// vendor ID (ex: "0483")
        #[clap(short, long, value_parser=hex_u16)]
        vendor: Option<u16>,
        /// product ID (ex: "df11")
        #[clap(short, long, value_parser=hex_u16)]
        product: Option<u16>,
    },
    /// request detach of a run-time mode device
    Detach {
        /// vendor ID (ex: "0483")
        #[clap(short, long, value_parser=hex_u16)]
        vendor: Option<u16>,
        /// product ID (ex: "df11")
        #[clap(short, long, value_parser=hex_u16)]
        product: Option<u16>,
        /// seconds to wait before reopening the device
        #[clap(short = 'E', long, default_value_t = 5)]
        detach_delay: u64,
    },
    /// download firmware to device
    Download {
        /// firmware file to flash
        file: PathBuf,
        /// vendor ID (ex: "0483")
        #[clap(short, long, value_parser=hex_u16)]
        vendor: Option<u16>,
        /// product ID (ex: "df11")
        #[clap(short, long, value_parser=hex_u16)]
        product: Option<u16>,
        /// DFU interface number (default: auto-detect)
        #[clap(short, long, value_parser=maybe_hex::<u8>)]
        interface: Option<u8>,
        /// alternate setting of the DFU interface
        #[clap(short, long, value_parser=maybe_hex::<u8>, default_value_t = 0)]
        alt: u8,
        /// bytes per USB transfer (default: from descriptor)
        #[clap(short, long, value_parser=maybe_hex::<u16>, default_value_t = 0)]
        transfer_size: u16,
        /// seconds to wait before reopening the device after detach
        #[clap(short = 'E', long, default_value_t = 5)]
        detach_delay: u64,
        /// detach afterwards, with a USB reset if the device will not
        /// re-attach on its own
        #[clap(short = 'R', long)]
        reset: bool,
        /// reject devices not reporting bcdDFUVersion 0x0101
        #[clap(long)]
        strict_version: bool,
    },
    /// read firmware from device into a file
    Upload {
        /// file to write
        file: PathBuf,
        /// vendor ID (ex: "0483")
        #[clap(short, long, value_parser=hex_u16)]
        vendor: Option<u16>,
        /// product ID (ex: "df11")
        #[clap(short, long, value_parser=hex_u16)]
        product: Option<u16>,
        /// DFU interface number (default: auto-detect)
        #[clap(short, long, value_parser=maybe_hex::<u8>)]
        interface: Option<u8>,
        /// alternate setting of the DFU interface
        #[clap(short, long, value_parser=maybe_hex::<u8>, default_value_t = 0)]
        alt: u8,
        /// bytes per USB transfer (default: from descriptor)
        #[clap(short, long, value_parser=maybe_hex::<u16>, default_value_t = 0)]
        transfer_size: u16,
        /// expected upload size for progress display (ex: 64K, 2MB)
        #[clap(short = 'Z', long, value_parser=parse_length, default_value = "32M")]
        upload_size: u64,
        /// seconds to wait before reopening the device after detach
        #[clap(short = 'E', long, default_value_t = 5)]
        detach_delay: u64,
        /// detach afterwards, with a USB reset if the device will not
        /// re-attach on its own
        #[clap(short = 'R', long)]
        reset: bool,
        /// reject devices not reporting bcdDFUVersion 0x0101
        #[clap(long)]
        strict_version: bool,
    },
    /// generate a random binary file for flashing tests
    Random {
        /// file to write
        file: PathBuf,
        /// file size (ex: 4096, 64K, 1M)
        #[clap(short, long, value_parser=parse_length)]
        size: u64,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::List {
            vendor: None,
            product: None,
        }
    }
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::List { .. } => "list",
            Commands::Detach { .. } => "detach",
            Commands::Download { .. } => "download",
            Commands::Upload { .. } => "upload",
            Commands::Random { .. } => "random",
        }
    }
}

fn hex_u16(s: &str) -> Result<u16, String> {
    <u16>::from_str_radix(s, 16).map_err(|e| format!("{e}"))
}

fn parse_length(s: &str) -> Result<u64, String> {
    parse_size(s).map_err(|e| format!("{e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::init();

    let command = cli.command.unwrap_or_default();
    if let Err(err) = run(&command) {
        eprintln!("Error: {} failed: {err}", command.name());
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(command: &Commands) -> Result<(), CliError> {
    match command {
        Commands::List { vendor, product } => {
            list_dfu_devices(*vendor, *product)
        }
        Commands::Detach {
            vendor,
            product,
            detach_delay,
        } => {
            let config = DfuConfig {
                vendor_id: *vendor,
                product_id: *product,
                detach_delay: Duration::from_secs(*detach_delay),
                ..DfuConfig::default()
            };
            detach_device(&config)
        }
        Commands::Download {
            file,
            vendor,
            product,
            interface,
            alt,
            transfer_size,
            detach_delay,
            reset,
            strict_version,
        } => {
            let config = DfuConfig {
                vendor_id: *vendor,
                product_id: *product,
                interface: *interface,
                alt_setting: *alt,
                transfer_size: *transfer_size,
                detach_delay: Duration::from_secs(*detach_delay),
                final_reset: *reset,
                strict_version: *strict_version,
                ..DfuConfig::default()
            };
            download_file(file, &config)
        }
        Commands::Upload {
            file,
            vendor,
            product,
            interface,
            alt,
            transfer_size,
            upload_size,
            detach_delay,
            reset,
            strict_version,
        } => {
            let config = DfuConfig {
                vendor_id: *vendor,
                product_id: *product,
                interface: *interface,
                alt_setting: *alt,
                transfer_size: *transfer_size,
                expected_upload_size: *upload_size,
                detach_delay: Duration::from_secs(*detach_delay),
                final_reset: *reset,
                strict_version: *strict_version,
            };
            upload_file(file, &config)
        }
        Commands::Random { file, size } => generate_random_file(file, *size),
    }
}
