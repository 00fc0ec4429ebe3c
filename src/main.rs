//! PEL CLI
//!
//! Main entry point for the `pel` command.

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use pel::sim::{FailurePolicy, Mode};
use pel::{FunctionTable, IrModule, RunConfig, SourceFile};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "pel")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compiler and simulator for PEL economic models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Type-check a model without compiling it
    Check {
        /// Input file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Show the parsed AST
        #[arg(long)]
        show_ast: bool,

        /// Show declared symbols and their types
        #[arg(long)]
        show_symbols: bool,
    },

    /// Compile a model to an IR document
    Compile {
        /// Input file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file (stdout when absent)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Simulate a model source file or a compiled IR document
    Run {
        /// `.pel` source or `.json` IR document
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Run configuration file (TOML)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        #[arg(long, value_enum)]
        mode: Option<Mode>,

        /// Monte Carlo run count
        #[arg(long)]
        runs: Option<usize>,

        /// Number of steps
        #[arg(long)]
        horizon: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// Per-run time limit in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(long, value_enum)]
        failure_policy: Option<FailurePolicy>,

        /// Worker threads (0 = available parallelism)
        #[arg(long)]
        threads: Option<usize>,

        /// Include every run's series in the results
        #[arg(long)]
        keep_runs: bool,

        /// Results file (stdout when absent)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show information about the compiler
    Info,
}

struct Overrides {
    mode: Option<Mode>,
    runs: Option<usize>,
    horizon: Option<usize>,
    seed: Option<u64>,
    timeout_ms: Option<u64>,
    failure_policy: Option<FailurePolicy>,
    threads: Option<usize>,
    keep_runs: bool,
}

impl Overrides {
    fn apply(self, config: &mut RunConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(runs) = self.runs {
            config.runs = runs;
        }
        if let Some(horizon) = self.horizon {
            config.horizon = horizon;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.timeout_ms.is_some() {
            config.timeout_ms = self.timeout_ms;
        }
        if let Some(policy) = self.failure_policy {
            config.failure_policy = policy;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        config.keep_runs |= self.keep_runs;
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match cli.command {
        Commands::Check {
            input,
            show_ast,
            show_symbols,
        } => check(&input, show_ast, show_symbols),

        Commands::Compile { input, output } => compile(&input, output.as_deref()),

        Commands::Run {
            input,
            config,
            mode,
            runs,
            horizon,
            seed,
            timeout_ms,
            failure_policy,
            threads,
            keep_runs,
            output,
        } => {
            let overrides = Overrides {
                mode,
                runs,
                horizon,
                seed,
                timeout_ms,
                failure_policy,
                threads,
                keep_runs,
            };
            run(&input, config.as_deref(), overrides, output.as_deref())
        }

        Commands::Info => info(),
    }
}

fn read_source(input: &Path) -> Result<SourceFile> {
    let content = std::fs::read_to_string(input)
        .map_err(|e| miette::miette!("Failed to read input file: {}", e))?;
    Ok(SourceFile::new(input.to_string_lossy().to_string(), content))
}

fn write_output(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, text)
            .map_err(|e| miette::miette!("Failed to write {}: {}", path.display(), e)),
        None => {
            println!("{}", text);
            Ok(())
        }
    }
}

/// Compile a source file, printing warnings to stderr
fn compile_source(input: &Path, functions: &FunctionTable) -> Result<IrModule> {
    let file = read_source(input)?;
    let model = pel::typecheck_file(&file, functions)?;
    for warning in &model.warnings {
        eprintln!("{:?}", miette::Report::new(warning.clone()));
    }
    Ok(pel::ir::lower(&model).into_diagnostic()?)
}

fn check(input: &Path, show_ast: bool, show_symbols: bool) -> Result<()> {
    tracing::info!("Type-checking {:?}", input);
    let file = read_source(input)?;

    if show_ast {
        let ast = pel::parse_file(&file)?;
        println!("=== AST ===");
        let json = serde_json::to_string_pretty(&ast)
            .map_err(|e| miette::miette!("Failed to serialize AST: {}", e))?;
        println!("{}", json);
        println!();
    }

    let model = pel::typecheck_file(&file, &FunctionTable::standard())?;
    for warning in &model.warnings {
        eprintln!("{:?}", miette::Report::new(warning.clone()));
    }

    if show_symbols {
        println!("=== Symbols ===");
        for symbol in model.symbols.declared() {
            println!(
                "  {} {}: {}",
                symbol.kind.describe(),
                symbol.name,
                symbol.type_display()
            );
        }
        println!();
    }

    println!(
        "All checks passed: {} ({} parameters, {} rates, {} constraints, {} policies)",
        input.display(),
        model.params.len(),
        model.rates.len(),
        model.constraints.len(),
        model.policies.len()
    );
    Ok(())
}

fn compile(input: &Path, output: Option<&Path>) -> Result<()> {
    tracing::info!("Compiling {:?}", input);
    let module = compile_source(input, &FunctionTable::standard())?;
    let json = module.to_json().into_diagnostic()?;
    write_output(output, &json)
}

fn run(
    input: &Path,
    config_path: Option<&Path>,
    overrides: Overrides,
    output: Option<&Path>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    overrides.apply(&mut config);

    let functions = FunctionTable::standard();
    let module = if input.extension().is_some_and(|ext| ext == "json") {
        let json = std::fs::read_to_string(input)
            .map_err(|e| miette::miette!("Failed to read input file: {}", e))?;
        IrModule::from_json(&json).into_diagnostic()?
    } else {
        compile_source(input, &functions)?
    };

    let results = pel::simulate(&module, &config, &functions)?;
    if results.runs_failed > 0 {
        eprintln!(
            "{} of {} runs failed",
            results.runs_failed, results.runs_executed
        );
    }
    let json = results
        .to_json()
        .map_err(|e| miette::miette!("Failed to serialize results: {}", e))?;
    write_output(output, &json)
}

fn info() -> Result<()> {
    println!("PEL Compiler");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Types:");
    for name in pel::types::NAMED_TYPES {
        println!("  - {}", name);
    }
    println!();
    println!("Distributions:");
    for family in pel::distribution::FAMILIES {
        println!("  - {}({})", family.name, family.params.join(", "));
    }
    println!();
    println!("Functions:");
    for sig in FunctionTable::standard().iter() {
        println!("  - {}/{}: {}", sig.builtin.name(), sig.arity, sig.doc);
    }
    Ok(())
}
