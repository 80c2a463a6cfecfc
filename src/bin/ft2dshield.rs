//! The `ft2dshield` converter binary: reads flytrap CSV logs and emits
//! DShield-formatted TSV reports, with optional address-set and time-window
//! filtering and an optional email header block.

use std::fs::File;
use std::io::{self, BufReader, Write};

use clap::Parser;

use flytrap::cli::DshieldCli;
use flytrap::dshield::{self, DshieldFilter, DEFAULT_RECIPIENT};
use flytrap::ip4set::Ip4Set;
use flytrap::wire::parse_range;

fn init_logging(debug: bool, verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Fold a set of `-I`/`-X`-style include/exclude specs into one [`Ip4Set`],
/// same implicit-fill-then-remove rule as the sensor's own `-i`/`-x`.
fn fold_set(include: &[String], exclude: &[String]) -> anyhow::Result<Option<Ip4Set>> {
    if include.is_empty() && exclude.is_empty() {
        return Ok(None);
    }
    let mut set = Ip4Set::new();
    let mut touched = false;
    for spec in include {
        let (lo, hi) = parse_spec(spec)?;
        set.insert(lo, hi);
        touched = true;
    }
    for spec in exclude {
        let (lo, hi) = parse_spec(spec)?;
        if !touched {
            set.insert("0.0.0.0".parse().unwrap(), "255.255.255.255".parse().unwrap());
            touched = true;
        }
        set.remove(lo, hi);
    }
    Ok(Some(set))
}

fn parse_spec(spec: &str) -> anyhow::Result<(std::net::Ipv4Addr, std::net::Ipv4Addr)> {
    let (lo, hi, rest) = parse_range(spec).ok_or_else(|| anyhow::anyhow!("invalid address, range, or CIDR: {spec}"))?;
    if !rest.is_empty() {
        anyhow::bail!("invalid address, range, or CIDR: {spec}");
    }
    Ok((lo, hi))
}

fn main() -> anyhow::Result<()> {
    let cli = DshieldCli::parse();
    init_logging(cli.debug, cli.verbose);

    let src_set = fold_set(&cli.src_include, &cli.src_exclude)?;
    let dst_set = fold_set(&cli.dst_include, &cli.dst_exclude)?;
    let from = match &cli.from_date {
        Some(s) => dshield::parse_date_bound(s, false)?,
        None => 0,
    };
    let to = match &cli.to_date {
        Some(s) => dshield::parse_date_bound(s, true)?,
        None => i64::MAX,
    };
    let filter = DshieldFilter { src_set, dst_set, from, to };

    // The email header block is only emitted when the operator asks for it;
    // `-r`/`-u` without `-s` is a usage error, matching the original's
    // validation (a header needs a sender and a userid to mean anything).
    if (cli.recipient.is_some() || cli.userid.is_some()) && cli.sender.is_none() {
        anyhow::bail!("-r/-u require -s (sender) to be given");
    }

    let userid: u64 = match &cli.userid {
        Some(s) => s.parse().map_err(|_| anyhow::anyhow!("invalid -u userid: {s}"))?,
        None => 0,
    };
    if cli.sender.is_some() && userid == 0 {
        anyhow::bail!("-s (sender) requires a nonzero -u userid");
    }

    let mut out: Box<dyn Write> = match &cli.out {
        Some(path) => Box::new(open_output(path)?),
        None => Box::new(io::stdout()),
    };

    if let Some(sender) = &cli.sender {
        let recipient = cli.recipient.as_deref().unwrap_or(DEFAULT_RECIPIENT);
        write!(out, "{}", dshield::email_header(sender, recipient, userid))?;
    }

    let mut warned = 0u32;
    if cli.files.is_empty() {
        let stdin = io::stdin();
        dshield::convert_stream(stdin.lock(), &mut out, userid, &filter, |w| {
            warned += 1;
            tracing::warn!("{w}");
        })?;
    } else {
        for path in &cli.files {
            let file = File::open(path).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
            dshield::convert_stream(BufReader::new(file), &mut out, userid, &filter, |w| {
                warned += 1;
                tracing::warn!(file = %path.display(), "{w}");
            })?;
        }
    }
    out.flush()?;
    if warned > 0 {
        tracing::info!(count = warned, "skipped malformed or rejected log lines");
    }
    Ok(())
}

fn open_output(path: &std::path::Path) -> anyhow::Result<impl Write> {
    File::create(path).map(io::BufWriter::new).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}
