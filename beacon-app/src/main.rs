// qitx-beacon -- run beacon cycles and maintenance commands against a QITX
// transmitter controller.
//
// Usage:
//   qitx-beacon run
//   qitx-beacon --config site.toml --schedule cycle.json run --no-wait
//   qitx-beacon ident
//   qitx-beacon carrier --seconds 30
//   qitx-beacon query
//   qitx-beacon clear-inhibit
//   qitx-beacon payload --minute "19-10-2026 12:01"

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use beacon::engine::configure;
use beacon::modes::send_carrier;
use beacon::payload::parse_seed;
use beacon::{
    Clock, ConfigFile, EngineOptions, Mode, PayloadGenerator, RunOutcome, ScheduleEntry,
    StationConfig, SystemClock, TransmitterLink, default_schedule, load_schedule, log_config,
    log_schedule, run_beacon,
};

/// Parameters read back by `query`.
const QUERY_PARAMETERS: [&str; 6] = ["FREQ", "FREQSSB", "FREQOFF", "POWER", "MSG", "CALL"];

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// QITX beacon controller.
#[derive(Parser)]
#[command(name = "qitx-beacon", version, about)]
struct Cli {
    /// Station configuration file (TOML).
    #[arg(long, default_value = "beacon.toml")]
    config: PathBuf,

    /// Schedule file (JSON). The standard cycle is used when omitted.
    #[arg(long)]
    schedule: Option<PathBuf>,

    /// Serial device, overriding the configuration file.
    #[arg(long)]
    device: Option<String>,

    /// Log protocol traffic.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the beacon schedule once.
    Run {
        /// Start immediately instead of waiting for the top of the minute.
        #[arg(long)]
        no_wait: bool,
    },

    /// Send a single Morse ident (subject to the inhibit guard).
    Ident,

    /// Key an unmodulated carrier.
    Carrier {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },

    /// Read back the transmitter's current settings.
    Query,

    /// Release the transmitter's inhibit.
    ClearInhibit,

    /// Print the payload for a transmission minute.
    Payload {
        /// Minute as "dd-mm-YYYY HH:MM" (UTC). Defaults to the minute an
        /// aligned run started now would use.
        #[arg(long)]
        minute: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn open_link(device: &str, config: &StationConfig) -> Result<TransmitterLink> {
    TransmitterLink::open(device, config.baud, config.timings)
        .await
        .with_context(|| format!("failed to open {device} at {} baud", config.baud))
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it.
async fn termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    Ok(()) = tokio::signal::ctrl_c() => {}
                    Some(()) = term.recv() => {}
                    else => std::future::pending::<()>().await,
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot watch for SIGTERM"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot watch for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Await `fut`, giving up on Ctrl-C or SIGTERM. The caller releases the
/// link either way.
async fn interruptible<T>(fut: impl Future<Output = beacon::Result<T>>) -> Result<T> {
    tokio::select! {
        result = fut => Ok(result?),
        _ = termination() => {
            warn!("interrupted, releasing transmitter");
            bail!("interrupted")
        }
    }
}

async fn query(
    link: &mut TransmitterLink,
) -> beacon::Result<Vec<(&'static str, Option<String>)>> {
    let mut values = Vec::with_capacity(QUERY_PARAMETERS.len());
    for name in QUERY_PARAMETERS {
        values.push((name, link.get_parameter(name).await?));
    }
    Ok(values)
}

async fn carrier_test(
    link: &mut TransmitterLink,
    config: &StationConfig,
    hold: Duration,
) -> beacon::Result<bool> {
    configure(link, config).await?;
    link.power_on(true).await?;
    Ok(send_carrier(link, hold).await?.is_success())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_schedule(
    link: &mut TransmitterLink,
    store: &mut ConfigFile,
    config: &mut StationConfig,
    schedule: &[ScheduleEntry],
    options: EngineOptions,
) -> Result<()> {
    let outcome = interruptible(run_beacon(
        link,
        config,
        store,
        schedule,
        &SystemClock,
        options,
    ))
    .await;
    link.shutdown().await?;

    match outcome? {
        RunOutcome::Inhibited(decision) => {
            info!(
                grace_counter = decision.new_grace_counter,
                "transmitter inhibited, nothing sent"
            );
        }
        RunOutcome::Completed(report) => {
            for seg in &report.segments {
                println!(
                    "{:>3}s  {:<10} {}",
                    seg.offset_seconds,
                    seg.mode.name(),
                    seg.result
                );
            }
        }
    }
    Ok(())
}

fn cmd_payload(config: &StationConfig, minute: Option<&str>) -> Result<()> {
    let generator = PayloadGenerator::from_config(config);
    let payload = match minute {
        Some(m) => generator.for_minute(parse_seed(m)?),
        None => generator.for_aligned_start(SystemClock.now()),
    };
    println!("seed:  {}", payload.seed_string());
    println!("body:  {}", payload.body());
    println!("wire:  {}", payload.wire_string());
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut store = ConfigFile::new(&cli.config);
    let mut config = store
        .load()
        .context("failed to load station configuration")?;
    // Not written into the config, which may be persisted during the run.
    let device = cli
        .device
        .clone()
        .unwrap_or_else(|| config.serial_device.clone());

    if let Command::Payload { minute } = &cli.command {
        return cmd_payload(&config, minute.as_deref());
    }

    log_config(&config);

    // Everything below needs the transmitter. Load the schedule first so a
    // bad file never touches the device.
    let schedule = match (&cli.command, &cli.schedule) {
        (Command::Run { .. }, Some(path)) => {
            load_schedule(path).context("failed to load schedule")?
        }
        (Command::Run { .. }, None) => default_schedule(),
        (Command::Ident, _) => vec![ScheduleEntry::new(0, Mode::Ident)],
        _ => Vec::new(),
    };

    let mut link = open_link(&device, &config).await?;

    match cli.command {
        Command::Run { no_wait } => {
            log_schedule(&schedule);
            let mut options = EngineOptions::from_timings(&config.timings);
            if no_wait {
                options = options.without_alignment();
            }
            cmd_schedule(&mut link, &mut store, &mut config, &schedule, options).await
        }
        Command::Ident => {
            let options = EngineOptions::from_timings(&config.timings).without_alignment();
            cmd_schedule(&mut link, &mut store, &mut config, &schedule, options).await
        }
        Command::Carrier { seconds } => {
            let result = interruptible(carrier_test(
                &mut link,
                &config,
                Duration::from_secs(seconds),
            ))
            .await;
            link.shutdown().await?;
            if !result? {
                bail!("carrier not confirmed by transmitter");
            }
            Ok(())
        }
        Command::Query => {
            let result = interruptible(query(&mut link)).await;
            link.close().await?;
            for (name, value) in result? {
                println!("{name:<8} {}", value.as_deref().unwrap_or("(no answer)"));
            }
            Ok(())
        }
        Command::ClearInhibit => {
            let result = interruptible(link.clear_inhibit()).await;
            link.close().await?;
            if !result? {
                bail!("inhibit clear not confirmed by transmitter");
            }
            println!("inhibit cleared");
            Ok(())
        }
        Command::Payload { .. } => Ok(()),
    }
}
