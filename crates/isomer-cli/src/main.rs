mod commands;

use clap::Parser;
use commands::build::BuildArgs;
use commands::{exit_code_for, EXIT_TOOL_ERROR};
use isomer_core::install_interrupt_handler;
use isomer_runtime::{select_backend, MasteringBackend, DEFAULT_BACKEND};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "isomer",
    version,
    about = "Compose a custom installation image from a template tree and a flavor file"
)]
struct Cli {
    /// Flavor name (looked up as <name>.cfg) or path to a flavor file.
    #[arg(short, long)]
    flavor: PathBuf,

    /// Template tree the image is composed from.
    #[arg(short, long)]
    source: PathBuf,

    /// Path of the image to write.
    #[arg(short, long)]
    outfile: PathBuf,

    /// Existing directory to build in; it is emptied first.
    /// A temporary directory is used by default.
    #[arg(short, long)]
    working: Option<PathBuf>,

    /// Discard the output of the mastering tools.
    #[arg(short, long, default_value_t = false)]
    quiet: bool,

    /// Volume ID to use when the flavor does not set one.
    #[arg(long)]
    volume_id: Option<String>,

    /// Print a build summary as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false)]
    trace: bool,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("ISOMER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_interrupt_handler();

    let backend_name =
        std::env::var("ISOMER_BACKEND").unwrap_or_else(|_| DEFAULT_BACKEND.to_owned());
    let backend: Arc<dyn MasteringBackend> = match select_backend(&backend_name) {
        Ok(backend) => Arc::from(backend),
        Err(e) => {
            eprintln!("error: runtime error: {e}");
            return ExitCode::from(EXIT_TOOL_ERROR);
        }
    };
    let check_prereqs = backend.name() == DEFAULT_BACKEND
        && std::env::var("ISOMER_SKIP_PREREQS").as_deref() != Ok("1");

    let args = BuildArgs {
        flavor: &cli.flavor,
        source: &cli.source,
        outfile: &cli.outfile,
        working: cli.working.as_deref(),
        volume_id: cli.volume_id.as_deref(),
        quiet: cli.quiet,
        check_prereqs,
        json: cli.json,
    };

    match commands::build::run(&args, backend) {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
