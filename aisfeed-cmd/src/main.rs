mod decode;
mod output;
mod stats;

use std::io::stderr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use output::Format;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct DecodeArgs {
    /// Output format
    #[arg(short, long, default_value = "text")]
    format: Format,

    /// Print a per-channel summary at exit rather than each message.
    #[arg(short, long, action)]
    summary: bool,

    /// Reject sentences whose checksum does not match their contents.
    #[arg(long, action)]
    verify_checksum: bool,

    /// Load traffic statistics from this file at start, if it exists, and save them back
    /// at exit.
    #[arg(long, value_name = "path")]
    stats: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode AIS messages from a file of NMEA sentences.
    File {
        /// Input file, or - for stdin.
        input: PathBuf,

        #[command(flatten)]
        args: DecodeArgs,
    },
    /// Decode AIS messages from a remote NMEA feed over TCP.
    ///
    /// The connection is re-established whenever it fails, waiting --retry-min seconds
    /// after the first failure and doubling the wait after each further failure, up to
    /// --retry-max seconds.
    Tcp {
        #[arg(long)]
        host: String,

        #[arg(short, long)]
        port: String,

        /// Connect and read timeout in seconds.
        #[arg(short, long, default_value = "2", value_parser = parse_seconds)]
        timeout: Duration,

        #[arg(long, default_value = "1", value_name = "seconds", value_parser = clap::value_parser!(u64).range(1..))]
        retry_min: u64,

        #[arg(long, default_value = "60", value_name = "seconds")]
        retry_max: u64,

        /// Stop after this many messages.
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Stop after this many seconds.
        #[arg(short, long, value_name = "seconds")]
        duration: Option<u64>,

        #[command(flatten)]
        args: DecodeArgs,
    },
    /// Show a saved traffic statistics file.
    Stats {
        /// Statistics file written using --stats
        input: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: Format,
    },
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .parse()
        .map_err(|_| format!("{s} is not a number of seconds"))?;
    let duration = Duration::try_from_secs_f64(secs).map_err(|err| format!("{s}: {err}"))?;
    if duration.is_zero() {
        return Err("must be greater than 0".to_string());
    }
    Ok(duration)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("AISFEED_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::File { input, args } => decode::decode_file(input, args),
        Commands::Tcp {
            host,
            port,
            timeout,
            retry_min,
            retry_max,
            count,
            duration,
            args,
        } => {
            if retry_min > retry_max {
                bail!("--retry-min must not be greater than --retry-max");
            }
            let opts = decode::TcpOpts {
                host: host.clone(),
                port: port.clone(),
                timeout: *timeout,
                retry_min: *retry_min,
                retry_max: *retry_max,
                count: *count,
                duration: *duration,
            };
            decode::decode_tcp(&opts, args)
        }
        Commands::Stats { input, format } => stats::show(input, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_seconds_values() {
        assert_eq!(parse_seconds("2"), Ok(Duration::from_secs(2)));
        assert_eq!(parse_seconds("0.25"), Ok(Duration::from_millis(250)));
        assert!(parse_seconds("0").is_err());
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("1e30").is_err());
        assert!(parse_seconds("inf").is_err());
        assert!(parse_seconds("NaN").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn tcp_args() {
        let cli = Cli::try_parse_from(["aisfeed", "tcp", "--host", "h", "-p", "1", "-t", "1e30"]);
        assert!(cli.is_err());

        let cli = Cli::try_parse_from(["aisfeed", "tcp", "--host", "h", "-p", "1", "--retry-min", "0"]);
        assert!(cli.is_err());

        let cli = Cli::try_parse_from(["aisfeed", "tcp", "--host", "h", "-p", "1"]).unwrap();
        let Commands::Tcp {
            timeout, retry_min, ..
        } = cli.command
        else {
            panic!("expected tcp command");
        };
        assert_eq!(timeout, Duration::from_secs(2));
        assert_eq!(retry_min, 1);
    }
}
