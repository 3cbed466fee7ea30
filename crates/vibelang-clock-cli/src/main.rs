//! VibeLang Clock CLI - The `vibeclock` command.
//!
//! Small tool for poking at the timing and dispatch layer without a running
//! SuperCollider server:
//!
//! - `time` prints the current elapsed and network time
//! - `match` tests OSC address patterns
//! - `tick` runs a periodic routine on the scheduler
//! - `dispatch` feeds OSC datagram files through the responder registry

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vibelang_clock::{
    matches, InboundMessage, LogicalClock, Resume, Runtime, RuntimeConfig, Task,
    SECONDS_FROM_1900_TO_1970,
};

/// VibeLang clock and OSC dispatch tool
#[derive(Parser, Debug)]
#[command(name = "vibeclock")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect the VibeLang scheduler clock and OSC responders", long_about = None)]
struct Args {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the current logical and network time
    Time,

    /// Test an OSC address pattern against addresses
    Match {
        /// OSC address pattern (e.g. /synth/*/freq)
        pattern: String,

        /// Addresses to test
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Run a periodic routine on the scheduler
    Tick {
        /// Time between ticks (e.g. 500ms, 1s)
        #[arg(short, long, value_parser = humantime::parse_duration, default_value = "500ms")]
        interval: Duration,

        /// Stop after this many ticks (runs until Ctrl+C otherwise)
        #[arg(short, long)]
        count: Option<u64>,

        /// Start on the next multiple of this many seconds
        #[arg(short, long)]
        quant: Option<f64>,

        /// Time between clock resyncs
        #[arg(long, value_parser = humantime::parse_duration, default_value = "20s")]
        resync_interval: Duration,
    },

    /// Feed OSC datagram files through the responder registry
    Dispatch {
        /// Files containing one raw OSC packet each ("-" reads stdin)
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Register a responder on this address (repeatable)
        #[arg(short, long = "listen", value_name = "PATH")]
        listen: Vec<String>,

        /// Register responders on the pattern dispatcher
        #[arg(short, long)]
        matching: bool,

        /// Log every inbound message
        #[arg(short, long)]
        trace: bool,

        /// Sender address reported for the datagrams
        #[arg(long, default_value = "127.0.0.1:57110")]
        sender: SocketAddr,

        /// Receive port reported for the datagrams
        #[arg(long, default_value_t = 57120)]
        recv_port: u16,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    match args.command {
        Commands::Time => print_time(),
        Commands::Match { pattern, addresses } => {
            match_addresses(&pattern, &addresses);
            Ok(())
        }
        Commands::Tick {
            interval,
            count,
            quant,
            resync_interval,
        } => run_ticks(interval, count, quant, resync_interval),
        Commands::Dispatch {
            files,
            listen,
            matching,
            trace,
            sender,
            recv_port,
        } => dispatch_files(&files, &listen, matching, trace, sender, recv_port),
    }
}

fn print_time() -> Result<()> {
    let clock = LogicalClock::new();
    let elapsed = clock.elapsed_time();
    let ntp = clock.to_network_time(elapsed);
    let osc = clock.to_osc_time(elapsed);
    let unix = u64::from(osc.seconds).saturating_sub(SECONDS_FROM_1900_TO_1970);

    println!("elapsed:       {:.9}s", elapsed);
    println!("network time:  {:#018x}", ntp);
    println!("  seconds:     {} (unix {})", osc.seconds, unix);
    println!("  fraction:    {}", osc.fractional);
    println!("offset:        {:#018x}", clock.network_offset());

    let drift = clock.resync().context("Failed to resync clock")?;
    println!("resync offset: {:#018x}", drift);
    Ok(())
}

fn match_addresses(pattern: &str, addresses: &[String]) {
    for address in addresses {
        let result = if matches(pattern, address) {
            "match"
        } else {
            "no match"
        };
        println!("{} {} -> {}", pattern, address, result);
    }
}

fn run_ticks(
    interval: Duration,
    count: Option<u64>,
    quant: Option<f64>,
    resync_interval: Duration,
) -> Result<()> {
    let config = RuntimeConfig::default().with_resync_interval(resync_interval);
    let runtime = Runtime::start(config).context("Failed to start runtime")?;

    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, interrupted.clone())
        .context("Failed to register Ctrl+C handler")?;

    let (done_tx, done_rx) = bounded::<()>(1);
    let delta = interval.as_secs_f64();
    let mut tick = 0u64;
    let routine = Task::from_fn(move |ctx| {
        tick += 1;
        let ntp = ctx.scheduler().clock().to_network_time(ctx.seconds());
        let late = ctx.scheduler().elapsed_time() - ctx.seconds();
        log::info!(
            "[TICK] #{} at {:.6}s (ntp {:#018x}, late {:.3}ms)",
            tick,
            ctx.seconds(),
            ntp,
            late * 1000.0
        );
        if count.is_some_and(|count| tick >= count) {
            let _ = done_tx.try_send(());
            return Ok(Resume::Done(None));
        }
        Ok(Resume::Continue(delta))
    });

    match quant {
        Some(quant) => {
            let start = runtime.scheduler().next_time_on_grid(quant, 0.0);
            log::info!("Starting on grid at {:.6}s", start);
            runtime.scheduler().schedule_absolute(start, routine)?;
        }
        None => runtime.scheduler().play(routine)?,
    }
    log::info!("Ticking every {:?} (Press Ctrl+C to exit)", interval);

    loop {
        if interrupted.load(Ordering::Relaxed) {
            log::info!("Interrupted by user (Ctrl+C)");
            runtime.reset();
            break;
        }
        match done_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    runtime.shutdown();
    Ok(())
}

fn read_datagram(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut bytes = Vec::new();
        std::io::stdin()
            .read_to_end(&mut bytes)
            .context("Failed to read datagram from stdin")?;
        return Ok(bytes);
    }
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn dispatch_files(
    files: &[PathBuf],
    listen: &[String],
    matching: bool,
    trace: bool,
    sender: SocketAddr,
    recv_port: u16,
) -> Result<()> {
    let config = RuntimeConfig::default().with_resync_enabled(false);
    let runtime = Runtime::start(config).context("Failed to start runtime")?;
    runtime.router().trace(trace, true);

    let hits = Arc::new(AtomicUsize::new(0));
    for path in listen {
        let hits = hits.clone();
        let label = path.clone();
        let mut builder = runtime
            .responders()
            .builder(path, move |msg: &InboundMessage| {
                hits.fetch_add(1, Ordering::Relaxed);
                log::info!(
                    "[RESPONDER] {} <- {} {:?} (time {:.6}, from {})",
                    label,
                    msg.addr(),
                    msg.args(),
                    msg.time,
                    msg.sender
                );
            });
        if matching {
            builder = builder.matching();
        }
        let responder = builder.build()?;
        log::debug!("Registered {}", responder);
    }

    let mut failed = 0;
    for path in files {
        let bytes = read_datagram(path)?;
        if let Err(e) = runtime.router().receive_datagram(&bytes, sender, recv_port) {
            log::warn!("Skipping {}: {}", path.display(), e);
            failed += 1;
        }
    }

    for (type_key, funcs) in runtime.responders().all_enabled() {
        for func in funcs {
            println!("{:<14} {}", type_key, func);
        }
    }
    println!(
        "{} datagrams, {} undecodable, {} responder calls",
        files.len(),
        failed,
        hits.load(Ordering::Relaxed)
    );

    runtime.shutdown();
    Ok(())
}
