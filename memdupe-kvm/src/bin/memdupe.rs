//! Probe for memory deduplication between processes or virtual machines.
//!
//! Run the same binary in two guests on the same host, one as a sender and
//! one as a receiver, pointing both at identical files:
//!
//! ```text
//! guest-a$ memdupe sender 10 /usr/bin/perl --message hi
//! guest-b$ memdupe receiver 10 /usr/bin/perl --message-len 2
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{ info, warn };

use memdupe::{
    ClockSource, HostPlatform, KsmRun, MemdupeEnv, MergeHint, Platform,
    ProbeConfig, ProbeSession, ProcessCpuClock, Role, TaskClock,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum ClockKind {
    /// CPU time consumed by this process (`CLOCK_PROCESS_CPUTIME_ID`).
    Process,
    /// The perf `task-clock` software counter.
    Task,
}

#[derive(Parser)]
#[command(version)]
struct Args {
    /// Role of this session (or 0, 1, 2)
    #[arg(value_enum, default_value_t = Role::Tester)]
    role: Role,

    /// Seconds to sleep between the two write passes
    #[arg(default_value_t = 5)]
    sleeptime: u64,

    /// File loaded into the probed pages
    #[arg(default_value = ProbeConfig::DEFAULT_PATH)]
    filepath: PathBuf,

    /// Classification threshold (default depends on the role)
    #[arg(long)]
    threshold: Option<f64>,

    /// Message to send
    #[arg(long, default_value = "Hello")]
    message: String,

    /// Number of bytes to decode when receiving
    #[arg(long)]
    message_len: Option<usize>,

    /// Don't load redundant copies of the file
    #[arg(long)]
    no_redundant: bool,

    /// Whether buffers must be marked as mergeable
    #[arg(long, value_enum, default_value_t = MergeHint::BestEffort)]
    merge_hint: MergeHint,

    /// Clock used to time page writes
    #[arg(long, value_enum, default_value_t = ClockKind::Process)]
    clock: ClockKind,

    /// Pin to this core before running
    #[arg(long)]
    pin: Option<usize>,

    /// Print a CSV record for every timed page write to stderr
    #[arg(long)]
    trace: bool,

    /// Start the KSM daemon before running (requires root)
    #[arg(long)]
    ksm_start: bool,
}

impl Args {
    fn config(&self) -> ProbeConfig {
        let mut cfg = ProbeConfig::for_role(self.role)
            .dormant(Duration::from_secs(self.sleeptime))
            .file_path(&self.filepath)
            .message(&self.message)
            .message_len(self.message_len)
            .load_redundant_copies(!self.no_redundant)
            .merge_hint(self.merge_hint)
            .pinned_core(self.pin)
            .trace(self.trace);
        if let Some(thr) = self.threshold {
            cfg = cfg.threshold(thr);
        }
        cfg
    }

    fn clock(&self) -> anyhow::Result<Box<dyn ClockSource>> {
        Ok(match self.clock {
            ClockKind::Process => Box::new(ProcessCpuClock::new()),
            ClockKind::Task => Box::new(
                TaskClock::new().context("couldn't open task-clock")?
            ),
        })
    }
}

fn main() -> anyhow::Result<()> {
    // Progress goes to stdout, leaving stderr to the CSV trace
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).target(env_logger::Target::Stdout).init();

    let args = Args::parse();

    let platform = HostPlatform;
    match platform.is_virtualized() {
        true => info!("Running in guest mode"),
        false => info!("Running in host mode"),
    }
    if platform.is_privileged() {
        warn!("Running at CPL 0, timings may not reflect a user process");
    }

    if args.ksm_start {
        match MemdupeEnv::sysfs_ksm_run_set(KsmRun::Running) {
            Ok(()) => info!("Started the KSM daemon"),
            Err(e) => warn!("Couldn't start the KSM daemon: {:?}", e),
        }
    }

    let cfg = args.config();
    info!("Role: {}, threshold: {}, dormant: {:?}", cfg.role, cfg.threshold,
        cfg.dormant);

    let session = ProbeSession::new(cfg, args.clock()?)
        .context("invalid configuration")?;
    let report = session.run()
        .with_context(|| format!("{} session failed", args.role))?;

    for line in report.summary().lines() {
        info!("{}", line);
    }
    match args.role {
        Role::Tester => {
            if let Some(v) = report.verdict {
                println!("{}", v);
            }
        },
        Role::Sender => {},
        Role::Receiver => {
            if let Some(msg) = &report.message {
                println!("{}", memdupe::codec::printable(msg));
            }
        },
    }
    Ok(())
}
