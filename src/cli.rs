use clap::{Parser, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crate::scanner::tcp::DEFAULT_PROBE_TIMEOUT_MS;

#[derive(Parser, Debug)]
#[command(name = "portsweep")]
#[command(version)]
#[command(about = "Concurrent TCP connect port scanner", long_about = None)]
pub struct Cli {
    #[arg(short, long, help = "Target hostname or IP address (prompted for when omitted)")]
    pub target: Option<String>,

    #[arg(short, long, help = "Path to the JSON scan configuration [default: config.json]")]
    pub config: Option<PathBuf>,

    #[arg(long, allow_negative_numbers = true, help = "Override the first port of the range")]
    pub low: Option<i64>,

    #[arg(long, allow_negative_numbers = true, help = "Override the end of the range (exclusive)")]
    pub high: Option<i64>,

    #[arg(short = 'n', long, allow_negative_numbers = true, help = "Override the number of concurrent workers")]
    pub threads: Option<i64>,

    #[arg(
        long,
        default_value_t = DEFAULT_PROBE_TIMEOUT_MS,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Timeout in milliseconds for each connection attempt"
    )]
    pub timeout: u64,

    #[arg(short = 'o', long, value_enum, default_value = "human", help = "Output format")]
    pub output_format: OutputFormat,

    #[arg(long, help = "Do not clear the screen before scanning")]
    pub no_clear: bool,

    #[arg(long, help = "Disable colored output")]
    pub no_color: bool,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum OutputFormat {
    #[value(name = "human", help = "Stream open ports as they are found")]
    Human,
    #[value(name = "json", help = "Print a JSON report when the scan ends")]
    Json,
}

/// Ask for the target host on stdin.
pub fn prompt_target() -> io::Result<String> {
    print!("Enter a remote host to scan: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
