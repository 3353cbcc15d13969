//! lightbaker CLI - bake light probes from a JSON scene description.

use std::env;
use std::net::TcpStream;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use lightbaker::bake::ipc::{self, Message};
use lightbaker::bake::{bake_to_report, BakeInput};
use lightbaker::progress::{BakeProgressState, ProgressReporter, DEFAULT_REPORT_INTERVAL};
use lightbaker::{Backend, DeviceSettings};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Verbosity {
    Quiet,
    Info,
    Debug,
    Trace,
}

impl Verbosity {
    fn filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Info => "info",
            Verbosity::Debug => "debug",
            Verbosity::Trace => "trace",
        }
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    // Parse global flags
    let mut verbosity = Verbosity::Info;
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args {
        match arg.as_str() {
            "-v" | "--verbose" => verbosity = Verbosity::Debug,
            "-vv" | "--trace" => verbosity = Verbosity::Trace,
            "-q" | "--quiet" => verbosity = Verbosity::Quiet,
            _ => filtered_args.push(arg),
        }
    }

    let _trace_guard = init_tracing(verbosity);

    let result = match filtered_args.first().copied() {
        None | Some("help" | "h" | "-h" | "--help") => {
            print_help();
            Ok(ExitCode::SUCCESS)
        }
        Some("version" | "-V" | "--version") => {
            print_version();
            Ok(ExitCode::SUCCESS)
        }
        Some("bake" | "b") => cmd_bake(&filtered_args[1..], verbosity),
        Some("backends") => {
            cmd_backends();
            Ok(ExitCode::SUCCESS)
        }
        Some("config") => cmd_config(&filtered_args[1..]),
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_help();
            Ok(ExitCode::FAILURE)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// stderr logging filtered by verbosity (`RUST_LOG` wins), plus a Chrome
/// trace in `trace.json` when `LIGHTBAKER_TRACE=1`.
fn init_tracing(verbosity: Verbosity) -> Option<tracing_chrome::FlushGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.filter()));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (chrome_layer, guard) = if env::var("LIGHTBAKER_TRACE").ok().as_deref() == Some("1") {
        let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .file("trace.json")
            .build();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(chrome_layer);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    guard
}

fn print_help() {
    println!("lightbaker {} - light probe baker", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: lightbaker [-v|-vv|-q] <command> [args]");
    println!();
    println!("Commands:");
    println!("  bake <input.json> [options]   Bake probes");
    println!("      -o, --output <file>       Write probe output JSON (default: stdout summary)");
    println!("      -b, --backend <name>      reference | jobs | gpu");
    println!("      -c, --config <file>       Device settings JSON");
    println!("      -j, --threads <n>         Job backend worker threads");
    println!("      --report-to <host:port>   Stream progress/result frames over TCP");
    println!("  backends                      List backends in this build");
    println!("  config [--save]               Show (or write) the default device settings");
    println!("  version                       Show version and build date");
    println!();
    println!("Environment:");
    println!("  RUST_LOG             Log filter, overrides -v/-q");
    println!("  LIGHTBAKER_TRACE=1   Write a Chrome trace to trace.json");
}

fn print_version() {
    println!(
        "lightbaker {} (built {} {})",
        env!("CARGO_PKG_VERSION"),
        lightbaker::BUILD_DATE,
        lightbaker::BUILD_TIME
    );
}

fn cmd_backends() {
    for backend in Backend::ALL {
        let status = if backend.is_available() {
            "available"
        } else {
            "not built (enable the `gpu` feature)"
        };
        println!("  {:<10} {}", backend, status);
    }
}

fn cmd_config(args: &[&str]) -> Result<ExitCode> {
    let settings = DeviceSettings::load();
    println!("{}", serde_json::to_string_pretty(&settings)?);
    if args.contains(&"--save") {
        let path = DeviceSettings::default_path().context("no config directory on this platform")?;
        settings.save_to(&path)?;
        println!("Saved to {}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

struct BakeArgs {
    input: PathBuf,
    output: Option<PathBuf>,
    backend: Option<Backend>,
    config: Option<PathBuf>,
    threads: Option<usize>,
    report_to: Option<String>,
}

fn parse_bake_args(args: &[&str]) -> Result<BakeArgs> {
    let mut input = None;
    let mut parsed = BakeArgs {
        input: PathBuf::new(),
        output: None,
        backend: None,
        config: None,
        threads: None,
        report_to: None,
    };

    let mut it = args.iter().copied();
    while let Some(arg) = it.next() {
        let mut value = || {
            it.next()
                .with_context(|| format!("missing value for {}", arg))
        };
        match arg {
            "-o" | "--output" => parsed.output = Some(PathBuf::from(value()?)),
            "-b" | "--backend" => parsed.backend = Some(value()?.parse()?),
            "-c" | "--config" => parsed.config = Some(PathBuf::from(value()?)),
            "-j" | "--threads" => {
                parsed.threads = Some(value()?.parse().context("--threads expects a number")?)
            }
            "--report-to" => parsed.report_to = Some(value()?.to_string()),
            flag if flag.starts_with('-') => bail!("unknown option {}", flag),
            path if input.is_none() => input = Some(PathBuf::from(path)),
            extra => bail!("unexpected argument {}", extra),
        }
    }

    parsed.input = input.context("missing input file\nUsage: lightbaker bake <input.json> [options]")?;
    Ok(parsed)
}

fn cmd_bake(args: &[&str], verbosity: Verbosity) -> Result<ExitCode> {
    let args = parse_bake_args(args)?;

    let mut settings = match &args.config {
        Some(path) => DeviceSettings::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DeviceSettings::load(),
    };
    if let Some(backend) = args.backend {
        settings.backend = backend;
    }
    if let Some(threads) = args.threads {
        settings.worker_threads = threads;
    }

    info!("Loading bake input: {}", args.input.display());
    let input = BakeInput::load(&args.input)
        .with_context(|| format!("loading {}", args.input.display()))?;

    let report_stream = match &args.report_to {
        Some(addr) => {
            let stream =
                TcpStream::connect(addr).with_context(|| format!("connecting to {}", addr))?;
            debug!("Reporting to {}", addr);
            Some(Arc::new(Mutex::new(stream)))
        }
        None => None,
    };

    let progress = Arc::new(BakeProgressState::new());
    let mut reporter = match &report_stream {
        Some(stream) => {
            let stream = Arc::clone(stream);
            Some(ProgressReporter::spawn(
                Arc::clone(&progress),
                DEFAULT_REPORT_INTERVAL,
                move |p| {
                    if let Err(e) = ipc::write_message(&mut *stream.lock(), &Message::Progress(p)) {
                        debug!("progress frame dropped: {}", e);
                    }
                },
            ))
        }
        None if verbosity > Verbosity::Quiet => Some(ProgressReporter::spawn(
            Arc::clone(&progress),
            DEFAULT_REPORT_INTERVAL,
            |p| eprint!("\rBaking: {:5.1}%", p * 100.0),
        )),
        None => None,
    };

    let (output, report) = bake_to_report(&input, &settings, &progress);

    // No progress frame may follow the result
    if let Some(reporter) = reporter.as_mut() {
        reporter.stop();
        if report_stream.is_none() {
            eprintln!();
        }
    }
    if let Some(stream) = &report_stream {
        ipc::write_message(&mut *stream.lock(), &Message::Result(report.clone()))
            .context("sending result frame")?;
    }

    let Some(output) = output else {
        eprintln!("Bake failed: {}", report);
        return Ok(ExitCode::FAILURE);
    };

    match &args.output {
        Some(path) => {
            output.save(path)?;
            info!("Wrote {} probes to {}", output.irradiance.len(), path.display());
        }
        None => {
            let invalid = output.validity.iter().filter(|&&v| v > 0.5).count();
            println!("Backend:        {}", output.backend);
            println!("Probes:         {}", output.irradiance.len());
            println!("Invalid (>50%): {}", invalid);
        }
    }
    Ok(ExitCode::SUCCESS)
}
