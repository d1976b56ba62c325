//! typthon command-line compiler.
//!
//! ```bash
//! # Compile and link against the runtime
//! typthon compile prog.py -o prog --runtime runtime.c
//!
//! # Cross-compile to riscv64 assembly only
//! typthon compile prog.py -S -o prog.s --arch riscv64 --opt 3
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use typthon::core::{Arch, CompileOptions, CompileResult, OptLevel};
use typthon::driver::compile_source;
use typthon::link::{write_assembly, LinkOptions, Linker};

#[derive(Parser)]
#[command(
    name = "typthon",
    version = env!("CARGO_PKG_VERSION"),
    about = "Ahead-of-time compiler for statically typed Python"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use multiple times for increased verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file to a native executable or assembly
    Compile(CompileArgs),

    /// Print the compiler version
    Version,
}

#[derive(Args)]
struct CompileArgs {
    /// Source file
    source: PathBuf,

    /// Output path (defaults to the source name without extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target architecture (defaults to the host)
    #[arg(long, value_enum)]
    arch: Option<Arch>,

    /// Optimization level 0-3
    #[arg(short = 'O', long = "opt", default_value = "2")]
    opt: OptLevel,

    /// JSON profile for profile-guided optimization at -O3
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Write assembly to the output instead of linking
    #[arg(short = 'S')]
    assembly_only: bool,

    /// Print the optimized IR
    #[arg(long)]
    emit_ir: bool,

    /// Runtime to link against (.c, .o or .a)
    #[arg(long)]
    runtime: Option<PathBuf>,

    /// Worker threads (0 = one per CPU)
    #[arg(long, default_value_t = 0)]
    jobs: usize,

    /// Keep the intermediate assembly and object files
    #[arg(long)]
    keep_temps: bool,

    /// Print compilation statistics
    #[arg(long)]
    stats: bool,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn default_output(source: &Path, assembly_only: bool) -> PathBuf {
    let stem = source
        .file_stem()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("a.out"));
    if assembly_only {
        stem.with_extension("s")
    } else {
        stem
    }
}

/// Returns whether every function compiled.
fn compile(args: &CompileArgs) -> CompileResult<bool> {
    let arch = match args.arch.or_else(Arch::host) {
        Some(arch) => arch,
        None => {
            log::warn!("Host architecture is not a supported target; defaulting to amd64");
            Arch::Amd64
        }
    };
    let options = CompileOptions::new(arch)
        .with_opt_level(args.opt)
        .with_profile(args.profile.clone())
        .with_jobs(args.jobs);

    let source = std::fs::read_to_string(&args.source)?;
    log::info!("Compiling {} for {}", args.source.display(), arch);
    let outcome = compile_source(&source, &options)?;

    if args.emit_ir {
        println!("{}", outcome.ir_text());
    }
    if args.stats {
        print!("{}", outcome.stats);
    }
    if !outcome.is_success() {
        for failure in &outcome.failures {
            eprintln!("error: {}", failure);
        }
        eprintln!(
            "error: {} function(s) failed to compile",
            outcome.failures.len()
        );
        return Ok(false);
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.source, args.assembly_only));
    if args.assembly_only {
        write_assembly(&output, &outcome.assembly)?;
    } else {
        let link = LinkOptions::new(arch, &output)
            .with_runtime(args.runtime.clone())
            .with_keep_temps(args.keep_temps);
        let linker = Linker::new(link);
        log::info!("Linking with {}", linker.driver());
        linker.link_assembly(&outcome.assembly)?;
    }
    Ok(true)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Version => {
            println!("typthon compiler version {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Commands::Compile(args) => match compile(&args) {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::FAILURE,
            Err(err) => {
                eprintln!("error: {}", err);
                ExitCode::FAILURE
            }
        },
    }
}
