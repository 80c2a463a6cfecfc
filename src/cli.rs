//! `clap`-derived command lines for both binaries, folded into the runtime
//! types the rest of the crate works with.

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::error::FlytrapError;
use crate::ip4set::Ip4Set;
use crate::wire::{parse_range, EtherAddr};

/// `flytrap [-dfnv] [-i include_range] [-l csvpath] [-p pidfile] [-x exclude_range] interface`
#[derive(Debug, Parser)]
#[command(name = "flytrap", about = "Passive-active darknet sensor")]
pub struct SensorCli {
    /// Enable debug-level logging.
    #[arg(short = 'd')]
    pub debug: bool,

    /// Stay in the foreground instead of daemonizing.
    #[arg(short = 'f')]
    pub foreground: bool,

    /// Add an address, range, or CIDR to the destination include set.
    #[arg(short = 'i', value_name = "include_range")]
    pub include: Vec<String>,

    /// CSV output path (default: stdout).
    #[arg(short = 'l', value_name = "csvpath")]
    pub csv_path: Option<PathBuf>,

    /// Dry run: parse and log, never transmit.
    #[arg(short = 'n')]
    pub dry_run: bool,

    /// PID file path.
    #[arg(short = 'p', value_name = "pidfile", default_value = "/var/run/flytrap.pid")]
    pub pid_path: PathBuf,

    /// Verbose logging.
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Remove an address, range, or CIDR from the destination include set.
    #[arg(short = 'x', value_name = "exclude_range")]
    pub exclude: Vec<String>,

    /// The interface to capture on.
    pub interface: String,
}

impl SensorCli {
    /// Fold the parsed flags into a runtime [`Config`].
    ///
    /// All `-i` inserts are applied before any `-x` removals, a documented
    /// simplification of the original single-pass `getopt` fold (see
    /// DESIGN.md) — `-x` still implicitly fills the set to `0.0.0.0/0`
    /// first if no `-i` has populated it yet. Neither flag given at all
    /// leaves `dst_set` as `None` (accept every destination), matching the
    /// original's claim-everything default rather than an inert sensor.
    pub fn into_config(self, our_ether: EtherAddr) -> Result<Config, FlytrapError> {
        let dst_set = if self.include.is_empty() && self.exclude.is_empty() {
            None
        } else {
            let mut set = Ip4Set::new();
            let mut touched = false;

            for spec in &self.include {
                let (lo, hi) = parse_range_or_err(spec)?;
                set.insert(lo, hi);
                touched = true;
            }
            for spec in &self.exclude {
                let (lo, hi) = parse_range_or_err(spec)?;
                if !touched {
                    set.insert("0.0.0.0".parse().unwrap(), "255.255.255.255".parse().unwrap());
                    touched = true;
                }
                set.remove(lo, hi);
            }
            Some(set)
        };

        Ok(Config {
            interface: self.interface,
            dry_run: self.dry_run,
            foreground: self.foreground,
            debug: self.debug,
            verbose: self.verbose,
            csv_path: self.csv_path,
            pid_path: Some(self.pid_path),
            our_ether,
            dst_set,
            src_set: None,
        })
    }
}

fn parse_range_or_err(spec: &str) -> Result<(std::net::Ipv4Addr, std::net::Ipv4Addr), FlytrapError> {
    let (lo, hi, rest) = parse_range(spec).ok_or_else(|| FlytrapError::InvalidAddress(spec.to_string()))?;
    if !rest.is_empty() {
        return Err(FlytrapError::InvalidAddress(spec.to_string()));
    }
    Ok((lo, hi))
}

/// `ft2dshield [-dhv] [-o out] [-r recipient] [-s sender] [-u userid]
///             [-Ii addr|range|subnet] [-Xx addr|range|subnet]
///             [-f fromdate] [-t todate] [file ...]`
#[derive(Debug, Parser)]
#[command(name = "ft2dshield", about = "Convert flytrap CSV logs to DShield TSV reports")]
pub struct DshieldCli {
    /// Enable debug-level logging.
    #[arg(short = 'd')]
    pub debug: bool,

    /// Verbose logging.
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Output path (default: stdout).
    #[arg(short = 'o', value_name = "out")]
    pub out: Option<PathBuf>,

    /// Report recipient, for the optional email header block.
    #[arg(short = 'r', value_name = "recipient")]
    pub recipient: Option<String>,

    /// Report sender, for the optional email header block.
    #[arg(short = 's', value_name = "sender")]
    pub sender: Option<String>,

    /// DShield user ID, for the optional email header block.
    #[arg(short = 'u', value_name = "userid")]
    pub userid: Option<String>,

    /// Add an address, range, or CIDR to the source include set.
    #[arg(short = 'I', value_name = "addr")]
    pub src_include: Vec<String>,

    /// Add an address, range, or CIDR to the destination include set.
    #[arg(short = 'i', value_name = "addr")]
    pub dst_include: Vec<String>,

    /// Remove an address, range, or CIDR from the source include set.
    #[arg(short = 'X', value_name = "addr")]
    pub src_exclude: Vec<String>,

    /// Remove an address, range, or CIDR from the destination include set.
    #[arg(short = 'x', value_name = "addr")]
    pub dst_exclude: Vec<String>,

    /// Earliest timestamp to include (inclusive).
    #[arg(short = 'f', value_name = "fromdate")]
    pub from_date: Option<String>,

    /// Latest timestamp to include (inclusive).
    #[arg(short = 't', value_name = "todate")]
    pub to_date: Option<String>,

    /// Input CSV files; stdin if none given.
    pub files: Vec<PathBuf>,
}
