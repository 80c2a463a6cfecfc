//! The `flytrap` sensor binary: parses CLI flags, daemonizes (unless
//! `-f`), opens the capture interface and CSV log, and runs the claim/log
//! pipeline until the interface goes away.

use clap::Parser;

use flytrap::capture::PcapCapture;
use flytrap::cli::SensorCli;
use flytrap::csv::CsvWriter;
use flytrap::sensor::{self, Sensor};
use flytrap::wire::EtherAddr;

fn init_logging(debug: bool, verbose: bool) {
    use tracing_subscriber::EnvFilter;

    // An explicit -d/-v wins over RUST_LOG; only fall back to the
    // environment (or the quiet default) when neither flag was given.
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let cli = SensorCli::parse();
    init_logging(cli.debug, cli.verbose);

    if !cli.foreground {
        tracing::warn!("daemonizing is not implemented; running in the foreground. Use a process supervisor (systemd, daemon(8)) for background operation");
    }

    // TODO: resolve our_ether from the interface's hardware address rather
    // than a placeholder once a platform-independent lookup is picked.
    let our_ether = EtherAddr([0, 0, 0, 0, 0, 0]);
    let pid_path = cli.pid_path.clone();
    let dry_run = cli.dry_run;
    let cfg = cli.into_config(our_ether)?;

    let pidfile = sensor::acquire_pidfile(&Some(pid_path))?;
    let csv = CsvWriter::open(cfg.csv_path.clone())?;
    let capture = PcapCapture::open(&cfg.interface, dry_run)?;

    sensor::install_sighup_handler();

    let mut sensor = Sensor::new(cfg, capture, csv, pidfile);
    if let Err(e) = sensor.run() {
        let err: anyhow::Error = e.into();
        tracing::error!("{err:#}");
        std::process::exit(1);
    }
    Ok(())
}
