mod config;
mod test_runner;

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use blocks::Program;
use blocks::chain::ChainId;
use blocks::integrity::{self, IntegrityViolation};
use blocks::listing::Listing;
use clap::{Parser, Subcommand};
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use log::{LevelFilter, info};

use interpreter::{ControllerError, EngineConfig, ExecutionController, Failure, Outcome, RunHandle};

const EXIT_FAILED: i32 = 1;
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "blocks", version, about = "Run block programs")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    /// Config file (defaults to ./blocks.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "interpreter=trace". Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a chain of a program
    Run(RunArgs),

    /// Check a program's integrity without running it
    Check(ProgramArgs),

    /// Print every chain of a program as text
    List(ProgramArgs),

    /// Run .test.blocks test files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Program file (JSON)
    file: PathBuf,

    /// Chain to run. Defaults to the first chain starting with "when run".
    #[arg(short, long)]
    chain: Option<u32>,

    /// Stop the run after this many seconds
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Discard printed output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::Args)]
struct ProgramArgs {
    /// Program file (JSON)
    file: PathBuf,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.blocks file or a directory containing them
    path: PathBuf,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn main() {
    let cli = Cli::parse();

    let config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(EXIT_FAILED);
        }
    };
    init_logging(cli.log_level.as_deref(), config.log_level.as_deref());

    let color_choice = if cli.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    let exit_code = match cli.command {
        Command::Run(args) => do_run(args, &config.engine, color_choice),
        Command::Check(args) => do_check(&args.file, color_choice),
        Command::List(args) => do_list(&args.file),
        Command::Test(args) => {
            if args.list_categories {
                test_runner::list_categories(&args.path);
                0
            } else {
                test_runner::run_tests(&args.path, cli.no_color, &args.category, &config.engine)
            }
        }
    };
    process::exit(exit_code);
}

fn init_logging(flag: Option<&str>, configured: Option<&str>) {
    let mut builder = pretty_env_logger::formatted_builder();
    match (flag, std::env::var("RUST_LOG").ok(), configured) {
        (Some(filters), _, _) => builder.parse_filters(filters),
        (None, Some(filters), _) => builder.parse_filters(&filters),
        (None, None, Some(filters)) => builder.parse_filters(filters),
        (None, None, None) => builder.filter_level(LevelFilter::Warn),
    };
    builder.init();
}

fn load_program(file: &Path) -> Result<Program, i32> {
    Program::load(file).map_err(|e| {
        eprintln!("error: cannot load '{}': {}", file.display(), e);
        EXIT_FAILED
    })
}

/// `--timeout` as a duration. Negative, NaN and infinite values are refused.
fn time_limit(seconds: Option<f64>) -> Result<Option<Duration>, String> {
    seconds
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .map_err(|_| format!("--timeout must be a finite, non-negative number of seconds, got {}", secs))
        })
        .transpose()
}

fn do_run(args: RunArgs, engine: &EngineConfig, color_choice: ColorChoice) -> i32 {
    let limit = match time_limit(args.timeout) {
        Ok(limit) => limit,
        Err(e) => {
            eprintln!("error: {}", e);
            return EXIT_FAILED;
        }
    };

    let program = match load_program(&args.file) {
        Ok(program) => program,
        Err(code) => return code,
    };

    let chain = match args.chain.map(ChainId).or_else(|| program.entry_chain().map(|c| c.id)) {
        Some(chain) => chain,
        None => {
            eprintln!("error: no chain starts with a \"when run\" block; pick one with --chain");
            return EXIT_FAILED;
        }
    };

    let output: Box<dyn Write + Send> = if args.quiet {
        Box::new(io::sink())
    } else {
        Box::new(io::stdout())
    };

    let program = Arc::new(program);
    let mut controller = ExecutionController::new(engine.clone());
    let handle = match controller.start(program.clone(), chain, output) {
        Ok(handle) => handle,
        Err(ControllerError::Integrity(violations)) => {
            emit_violations(&program, &args.file, &violations, color_choice);
            return EXIT_FAILED;
        }
        Err(e) => {
            eprintln!("error: {}", e);
            return EXIT_FAILED;
        }
    };

    let outcome = match drive(&mut controller, handle, limit) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("error: {}", e);
            return EXIT_FAILED;
        }
    };

    eprintln!("{}", outcome.message());
    if let Outcome::Failed(failure) = &outcome {
        emit_failure(&program, &args.file, failure, color_choice);
    }
    if let Err(e) = controller.free(handle) {
        eprintln!("error: {}", e);
    }

    match outcome {
        Outcome::Completed(_) => 0,
        Outcome::Cancelled => EXIT_CANCELLED,
        Outcome::Failed(_) => EXIT_FAILED,
    }
}

/// Poll a run once per tick until it finishes. Past `limit`, ask it to stop
/// and give it the configured grace period.
pub(crate) fn drive(
    controller: &mut ExecutionController,
    handle: RunHandle,
    limit: Option<Duration>,
) -> Result<Outcome, ControllerError> {
    let started = Instant::now();
    let tick = controller.config().poll_interval();
    loop {
        if let Some(outcome) = controller.try_join(handle)? {
            return Ok(outcome);
        }
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            info!("{} reached its time limit, stopping", handle);
            let grace = controller.config().stop_grace();
            return controller.stop_within(handle, grace);
        }
        thread::sleep(tick);
    }
}

fn do_check(file: &Path, color_choice: ColorChoice) -> i32 {
    let program = match load_program(file) {
        Ok(program) => program,
        Err(code) => return code,
    };

    let violations = integrity::check_program(&program);
    if violations.is_empty() {
        eprintln!(
            "ok: {} chain(s) in {} passed",
            program.chains.len(),
            file.display()
        );
        return 0;
    }
    emit_violations(&program, file, &violations, color_choice);
    EXIT_FAILED
}

fn do_list(file: &Path) -> i32 {
    let program = match load_program(file) {
        Ok(program) => program,
        Err(code) => return code,
    };

    for chain in &program.chains {
        println!(
            "{} at ({}, {})",
            chain.id, chain.position.x, chain.position.y
        );
        for line in Listing::of_chain(chain, &program.definitions).text.lines() {
            println!("    {}", line);
        }
        println!();
    }
    0
}

/// One codespan file per chain listing, added on first use.
struct ChainFiles<'a> {
    program: &'a Program,
    file: &'a Path,
    files: SimpleFiles<String, String>,
    listings: BTreeMap<ChainId, (usize, Listing)>,
}

impl<'a> ChainFiles<'a> {
    fn new(program: &'a Program, file: &'a Path) -> Self {
        ChainFiles {
            program,
            file,
            files: SimpleFiles::new(),
            listings: BTreeMap::new(),
        }
    }

    fn listing(&mut self, chain: ChainId) -> Option<&(usize, Listing)> {
        if !self.listings.contains_key(&chain) {
            let source = self.program.chain(chain)?;
            let listing = Listing::of_chain(source, &self.program.definitions);
            let name = format!("{} ({})", self.file.display(), chain);
            let file_id = self.files.add(name, listing.text.clone());
            self.listings.insert(chain, (file_id, listing));
        }
        self.listings.get(&chain)
    }

    fn emit(&self, diagnostic: &Diagnostic<usize>, color_choice: ColorChoice) {
        let writer = StandardStream::stderr(color_choice);
        let config = term::Config::default();
        let _ = term::emit_to_write_style(&mut writer.lock(), &config, &self.files, diagnostic);
    }
}

fn emit_violations(
    program: &Program,
    file: &Path,
    violations: &[IntegrityViolation],
    color_choice: ColorChoice,
) {
    let mut files = ChainFiles::new(program, file);
    for violation in violations {
        let diagnostic = match files.listing(violation.chain) {
            Some((file_id, listing)) => violation.to_diagnostic(*file_id, listing),
            None => Diagnostic::error().with_message(violation.to_string()),
        };
        files.emit(&diagnostic, color_choice);
    }
}

fn emit_failure(program: &Program, file: &Path, failure: &Failure, color_choice: ColorChoice) {
    let mut files = ChainFiles::new(program, file);
    let mut diagnostic = Diagnostic::error().with_message(failure.error.to_string());
    if let Some(location) = failure.location {
        if let Some((file_id, listing)) = files.listing(location.chain) {
            if let Some(span) = listing.span(location.block) {
                diagnostic = diagnostic.with_labels(vec![
                    Label::primary(*file_id, span).with_message("while running this block"),
                ]);
            }
        }
    }
    files.emit(&diagnostic, color_choice);
}
