use clap::{Parser, Subcommand, ValueEnum};
use probe_bench::benches;
use probe_bench::harness::{Isolation, Profile, RunConfig};
use probe_bench::isolation::{self, WorkerRequest};
use probe_bench::report;
use probe_bench::schema::{RunMeta, RunReport};
use probe_bench::{HarnessError, OutputFormat, Scheduler};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Anything that stops the run before a report exists: bad arguments, unknown
/// probes, unwritable output paths. `1` stays reserved for failed probes.
const EXIT_ERROR: u8 = 2;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProfileArg {
    Quick,
    Full,
}

impl From<ProfileArg> for Profile {
    fn from(v: ProfileArg) -> Self {
        match v {
            ProfileArg::Quick => Profile::Quick,
            ProfileArg::Full => Profile::Full,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum IsolationArg {
    Thread,
    Process,
}

impl From<IsolationArg> for Isolation {
    fn from(v: IsolationArg) -> Self {
        match v {
            IsolationArg::Thread => Isolation::Thread,
            IsolationArg::Process => Isolation::Process,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the selected probes and print a report.
    Run {
        /// Probe names or globs (`*`, `?`); `all` runs every probe.
        #[arg(long, value_name = "GLOB", num_args = 1.., default_value = "all")]
        probes: Vec<String>,

        /// Worker threads per probe.
        #[arg(long)]
        threads: Option<usize>,

        /// Forks per probe.
        #[arg(long)]
        forks: Option<u32>,

        /// Warm-up invocations per thread.
        #[arg(long)]
        warmup_iter: Option<u64>,

        /// Warm-up duration in seconds.
        #[arg(long, value_name = "SECONDS")]
        warmup_time: Option<f64>,

        /// Measured invocations per thread.
        #[arg(long)]
        measure_iter: Option<u64>,

        /// Measurement duration in seconds.
        #[arg(long, value_name = "SECONDS")]
        measure_time: Option<f64>,

        /// Deadline for each fork in seconds; phases past it are truncated.
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<f64>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Run each fork in-process or in a fresh child process.
        #[arg(long, value_enum, default_value_t = IsolationArg::Thread)]
        isolation: IsolationArg,

        /// Append one JSON line per result to this file.
        #[arg(long, value_name = "FILE")]
        results_log: Option<PathBuf>,

        /// Binary to launch for process-isolated forks.
        #[arg(long, value_name = "FILE", hide = true)]
        worker_exe: Option<PathBuf>,
    },

    /// List the built-in probes in registration order.
    List,

    /// Run a single fork and print its result as JSON (used by process isolation).
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        probe: String,

        #[arg(long)]
        fork: u32,

        /// Effective probe configuration as JSON.
        #[arg(long)]
        config: String,

        #[arg(long)]
        timeout_ns: Option<u64>,
    },
}

#[derive(Parser, Debug)]
#[command(name = "probe-bench")]
#[command(about = "Micro-benchmark probe runner with warm-up, forks and threads")]
struct Args {
    #[arg(long, value_enum, default_value_t = ProfileArg::Quick, global = true)]
    profile: ProfileArg,

    #[arg(long, default_value_t = 0, global = true)]
    seed: u64,

    /// Where to write the report. If omitted, prints to stdout.
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

fn now_utc_rfc3339() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("unix:{secs}")
}

fn git_sha_short() -> Option<String> {
    // Best-effort: read from environment set by CI/build scripts.
    std::env::var("GIT_SHA")
        .ok()
        .or_else(|| std::env::var("GITHUB_SHA").ok())
        .map(|s| s.chars().take(12).collect())
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "probe_bench=debug"
    } else {
        "probe_bench=info"
    };
    let filter =
        EnvFilter::try_from_env("PROBE_BENCH_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn seconds(flag: &str, value: Option<f64>) -> Result<Option<Duration>, HarnessError> {
    value
        .map(|s| {
            Duration::try_from_secs_f64(s)
                .ok()
                .filter(|d| !d.is_zero())
                .ok_or_else(|| {
                    HarnessError::Configuration(format!(
                        "--{flag} must be a positive number of seconds"
                    ))
                })
        })
        .transpose()
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run(args: Args) -> Result<u8, HarnessError> {
    let mut run = RunConfig {
        profile: args.profile.into(),
        seed: args.seed,
        ..RunConfig::default()
    };

    match args.cmd {
        Command::List => {
            let registry = benches::registry(&run)?;
            for probe in registry.list() {
                println!("{}", probe.name());
            }
            Ok(0)
        }
        Command::Worker {
            probe,
            fork,
            config,
            timeout_ns,
        } => {
            let registry = benches::registry(&run)?;
            let request = WorkerRequest {
                probe,
                fork,
                config: WorkerRequest::parse_config(&config)?,
                timeout: timeout_ns.map(Duration::from_nanos),
            };
            println!("{}", isolation::serve_worker(&registry, &request, &run)?);
            Ok(0)
        }
        Command::Run {
            probes,
            threads,
            forks,
            warmup_iter,
            warmup_time,
            measure_iter,
            measure_time,
            timeout,
            format,
            isolation,
            results_log,
            worker_exe,
        } => {
            if threads == Some(0) {
                return Err(HarnessError::Configuration("--threads must be at least 1".into()));
            }
            if forks == Some(0) {
                return Err(HarnessError::Configuration("--forks must be at least 1".into()));
            }
            if measure_iter == Some(0) {
                return Err(HarnessError::Configuration(
                    "--measure-iter must be at least 1".into(),
                ));
            }
            run.threads = threads;
            run.forks = forks;
            run.warmup_iterations = warmup_iter;
            run.warmup_time = seconds("warmup-time", warmup_time)?;
            run.measurement_iterations = measure_iter;
            run.measurement_time = seconds("measure-time", measure_time)?;
            run.timeout = seconds("timeout", timeout)?;
            run.isolation = isolation.into();
            run.worker_exe = worker_exe;

            let registry = benches::registry(&run)?;
            let selected = registry.select(&probes)?;
            info!(probes = selected.len(), profile = run.profile.as_str(), "starting run");

            let scheduler = Scheduler::new(run.clone());
            let results = scheduler.run(selected)?;

            let report = RunReport {
                run: RunMeta {
                    schema_version: 1,
                    bench_version: env!("CARGO_PKG_VERSION").to_string(),
                    profile: run.profile.as_str().to_string(),
                    seed: run.seed,
                    timestamp_utc: now_utc_rfc3339(),
                    git_sha: git_sha_short(),
                    config_digest: run.digest(),
                },
                results,
            };

            if let Some(path) = results_log {
                report::append_results_log(&path, &report)?;
            }

            let rendered = report::render(&report, format)?;
            if let Some(out) = args.out {
                fs::write(out, rendered)?;
            } else {
                print!("{rendered}");
                if format == OutputFormat::Json {
                    println!();
                }
            }

            Ok(report::exit_code(&report.results))
        }
    }
}
