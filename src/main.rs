//! GIL Trace Studio CLI
//!
//! Turns `perf script` scheduler and GIL uprobe events, plus a VizTracer
//! snapshot, into timelines and off-GIL flamegraphs.

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use env_logger::Env;
use log::info;
use std::path::PathBuf;

use gil_trace_studio::commands::{
    display_version, execute_gil, execute_inject, execute_offgil, execute_sched,
    validate_timeline_file, GilArgs, InjectArgs, OffgilArgs, RunOutcome, SchedArgs,
};
use gil_trace_studio::output::FlamegraphConfig;
use gil_trace_studio::stack::CorrelateOptions;
use gil_trace_studio::timeline::{GilConfig, ProbePatterns, SchedOptions};
use gil_trace_studio::utils::config::{
    DEFAULT_MIN_HOLD_US, DROP_PROBE, DROP_PROBE_RETURN, TAKE_PROBE, TAKE_PROBE_RETURN,
};

/// GIL Trace Studio - where did my Python threads wait for the GIL?
#[derive(Parser, Debug)]
#[command(name = "gil-trace")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// `--flag` / `--no-flag` pair, last one wins
fn negatable(yes: bool, no: bool, default: bool) -> bool {
    match (yes, no) {
        (true, _) => true,
        (_, true) => false,
        _ => default,
    }
}

/// Input/output shared by the converters
#[derive(Args, Debug)]
struct IoArgs {
    /// perf script output (default: stdin)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Stack correlation switches
#[derive(Args, Debug)]
struct CorrelateFlags {
    /// VizTracer JSON snapshot
    #[arg(short, long, default_value = "viztracer.json")]
    snapshot: PathBuf,

    /// Keep CPython evaluation frames (tagged cpyeval::) instead of replacing them
    #[arg(long, overrides_with = "no_keep_evaluation_frames")]
    keep_evaluation_frames: bool,
    #[arg(long, overrides_with = "keep_evaluation_frames", hide = true)]
    no_keep_evaluation_frames: bool,

    /// Keep going when native and Python stacks cannot be matched
    #[arg(long, overrides_with = "no_allow_mismatch")]
    allow_mismatch: bool,
    #[arg(long, overrides_with = "allow_mismatch", hide = true)]
    no_allow_mismatch: bool,

    /// Also fail on mismatches with a known benign cause
    #[arg(long, overrides_with = "no_pedantic")]
    pedantic: bool,
    #[arg(long, overrides_with = "pedantic", hide = true)]
    no_pedantic: bool,
}

impl CorrelateFlags {
    fn options(&self) -> CorrelateOptions {
        CorrelateOptions {
            keep_evaluation_frames: negatable(
                self.keep_evaluation_frames,
                self.no_keep_evaluation_frames,
                false,
            ),
            allow_mismatch: negatable(self.allow_mismatch, self.no_allow_mismatch, false),
            pedantic: negatable(self.pedantic, self.no_pedantic, false),
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert scheduler tracepoints into run/sleep segments
    Sched {
        #[command(flatten)]
        io: IoArgs,

        /// Emit running (R) segments
        #[arg(long, overrides_with = "no_running")]
        running: bool,
        #[arg(long, overrides_with = "running")]
        no_running: bool,

        /// Emit sleeping (S, S(GIL)) segments [default]
        #[arg(long, overrides_with = "no_sleeping")]
        sleeping: bool,
        #[arg(long, overrides_with = "sleeping")]
        no_sleeping: bool,

        /// Emit an instant for every tracepoint
        #[arg(long)]
        all_tracepoints: bool,

        /// Log and skip undecodable records
        #[arg(long)]
        skip_malformed: bool,
    },

    /// Convert GIL uprobe hits into hold/wait flows and a summary
    Gil {
        #[command(flatten)]
        io: IoArgs,

        /// Render holds as async flows [default]
        #[arg(long, overrides_with = "no_as_async")]
        as_async: bool,
        #[arg(long, overrides_with = "as_async")]
        no_as_async: bool,

        /// Only draw confirmed holds, not take/drop requests
        #[arg(long)]
        only_lock: bool,

        /// Do not emit take/drop instants
        #[arg(long)]
        no_instants: bool,

        /// Holds shorter than this (us) are not drawn
        #[arg(long, default_value_t = DEFAULT_MIN_HOLD_US)]
        min_hold: f64,

        #[arg(long, default_value = TAKE_PROBE)]
        take_probe: String,
        #[arg(long, default_value = TAKE_PROBE_RETURN)]
        take_probe_return: String,
        #[arg(long, default_value = DROP_PROBE)]
        drop_probe: String,
        #[arg(long, default_value = DROP_PROBE_RETURN)]
        drop_probe_return: String,

        /// Write the per-thread breakdown as JSON
        #[arg(long)]
        summary_json: Option<PathBuf>,

        /// Log and skip undecodable lines
        #[arg(long)]
        skip_malformed: bool,
    },

    /// Splice Python call stacks from a snapshot into perf script output
    Inject {
        #[command(flatten)]
        io: IoArgs,

        #[command(flatten)]
        correlate: CorrelateFlags,
    },

    /// Fold stacks of threads waiting for the GIL, weighted by wait time
    Offgil {
        #[command(flatten)]
        io: IoArgs,

        #[command(flatten)]
        correlate: CorrelateFlags,

        /// Sleep state to collect
        #[arg(long, default_value = "S(GIL)")]
        state: String,

        /// Remove everything above take_gil from the stack [default]
        #[arg(long, overrides_with = "no_strip_take_gil")]
        strip_take_gil: bool,
        #[arg(long, overrides_with = "strip_take_gil")]
        no_strip_take_gil: bool,

        /// Log and skip undecodable records
        #[arg(long)]
        skip_malformed: bool,

        /// Also render an SVG flamegraph
        #[arg(short, long)]
        flamegraph: Option<PathBuf>,

        /// Flamegraph title
        #[arg(long)]
        title: Option<String>,
    },

    /// Validate a timeline JSON file
    Validate {
        /// Path to timeline JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Display version information
    Version,
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging; stderr, so stdout stays usable for output
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    // Execute command
    match cli.command {
        Commands::Sched {
            io,
            running,
            no_running,
            sleeping,
            no_sleeping,
            all_tracepoints,
            skip_malformed,
        } => {
            let options = SchedOptions {
                all_tracepoints,
                skip_malformed,
                ..SchedOptions::default()
            }
            .with_running(negatable(running, no_running, false))
            .with_sleeping(negatable(sleeping, no_sleeping, true));

            let outcome = execute_sched(SchedArgs {
                input: io.input,
                output: io.output,
                options,
            })?;
            report(&outcome);
        }

        Commands::Gil {
            io,
            as_async,
            no_as_async,
            only_lock,
            no_instants,
            min_hold,
            take_probe,
            take_probe_return,
            drop_probe,
            drop_probe_return,
            summary_json,
            skip_malformed,
        } => {
            if min_hold.is_nan() || min_hold < 0.0 {
                bail!("--min-hold must be a non-negative number of microseconds");
            }
            let probes = ProbePatterns::new(
                &take_probe,
                &take_probe_return,
                &drop_probe,
                &drop_probe_return,
            )
            .context("Invalid probe pattern")?;
            let mut config = GilConfig {
                probes,
                ..GilConfig::default()
            }
            .with_async(negatable(as_async, no_as_async, true))
            .with_only_lock(only_lock)
            .with_min_hold(min_hold);
            config.show_instant = !no_instants;

            let (outcome, _summary) = execute_gil(GilArgs {
                input: io.input,
                output: io.output,
                config,
                skip_malformed,
                summary_json,
            })?;
            report(&outcome);
        }

        Commands::Inject { io, correlate } => {
            let outcome = execute_inject(InjectArgs {
                input: io.input,
                output: io.output,
                snapshot: correlate.snapshot.clone(),
                correlate: correlate.options(),
            })?;
            report(&outcome);
        }

        Commands::Offgil {
            io,
            correlate,
            state,
            strip_take_gil,
            no_strip_take_gil,
            skip_malformed,
            flamegraph,
            title,
        } => {
            let mut flamegraph_config = FlamegraphConfig::default();
            if let Some(title) = title {
                flamegraph_config = flamegraph_config.with_title(title);
            }

            let outcome = execute_offgil(OffgilArgs {
                input: io.input,
                output: io.output,
                snapshot: correlate.snapshot.clone(),
                correlate: correlate.options(),
                state,
                strip_take_gil: negatable(strip_take_gil, no_strip_take_gil, true),
                skip_malformed,
                flamegraph,
                flamegraph_config,
            })?;
            report(&outcome);
        }

        Commands::Validate { file } => {
            validate_timeline_file(&file)?;
        }

        Commands::Version => {
            display_version();
        }
    }

    Ok(())
}

fn report(outcome: &RunOutcome) {
    if outcome.stopped_early {
        info!(
            "Output closed after {} of the records, stopped early",
            outcome.records
        );
    }
}
