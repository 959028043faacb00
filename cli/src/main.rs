use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use passflow_core::dataflow::passes::{builtin, BUILTIN_PASSES};
use passflow_core::dataflow::{check_well_formed, Graph};
use passflow_core::{
    names_before, solve, Constraint, MismatchReport, Nested, PassHandle, PassManager,
    PassManagerConfig, RunOptions, Tolerance,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "passflow")]
#[command(about = "Schedule and run constraint-ordered rewrite passes over dataflow graphs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a pipeline's pass order without running it
    Schedule {
        /// Pipeline description file
        pipeline: PathBuf,

        /// Output file (defaults to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },

    /// Run a pipeline over a graph until it reaches a fixed point
    Run {
        /// Pipeline description file
        pipeline: PathBuf,

        /// Input graph file
        graph: PathBuf,

        /// Graph inputs used for per-pass equivalence checks
        #[arg(long)]
        input: Option<PathBuf>,

        /// Relative tolerance for equivalence checks
        #[arg(long, default_value_t = Tolerance::default().rtol)]
        rtol: f64,

        /// Absolute tolerance for equivalence checks
        #[arg(long, default_value_t = Tolerance::default().atol)]
        atol: f64,

        /// Output file (defaults to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OutputFormat {
    Pretty,
    Compact,
}

/// A pipeline file: built-in passes by name, name-pattern ordering
/// constraints, and manager configuration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PipelineSpec {
    passes: Vec<String>,
    #[serde(default)]
    constraints: Vec<OrderingSpec>,
    #[serde(default)]
    config: PassManagerConfig,
}

/// Passes whose names match `before` run ahead of passes matching `after`.
#[derive(Debug, Deserialize)]
struct OrderingSpec {
    before: String,
    after: String,
}

impl PipelineSpec {
    fn passes(&self) -> Result<Vec<PassHandle<Graph>>> {
        self.passes
            .iter()
            .map(|name| match builtin(name) {
                Some(pass) => Ok(pass),
                None => bail!(
                    "Unknown pass '{}' (expected one of: {})",
                    name,
                    BUILTIN_PASSES.join(", ")
                ),
            })
            .collect()
    }

    fn constraints(&self) -> Result<Vec<Constraint>> {
        self.constraints
            .iter()
            .map(|c| {
                names_before(&c.before, &c.after)
                    .with_context(|| format!("Invalid constraint {} -> {}", c.before, c.after))
            })
            .collect()
    }
}

#[derive(Serialize)]
struct ScheduleReport<'a> {
    order: Vec<&'a str>,
    cyclic: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct RunReport {
    graph: Graph,
    modified: bool,
    steps_run: usize,
    warnings: Vec<MismatchReport>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for JSON
    let log_level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Schedule {
            pipeline,
            output,
            format,
        } => {
            let spec: PipelineSpec = read_json(&pipeline, "pipeline")?;
            let passes = spec.passes()?;
            let constraints = spec.constraints()?;

            let solution = solve(&passes, &constraints);
            let report = ScheduleReport {
                order: solution.schedule.iter().map(PassHandle::name).collect(),
                cyclic: solution.cyclic,
            };
            write_json(&report, output.as_ref(), format)?;
        }
        Commands::Run {
            pipeline,
            graph,
            input,
            rtol,
            atol,
            output,
            format,
        } => {
            let tolerance = Tolerance { rtol, atol };
            tolerance.validate().context("Invalid tolerance")?;

            let spec: PipelineSpec = read_json(&pipeline, "pipeline")?;
            let graph: Graph = read_json(&graph, "graph")?;
            let input: Option<Nested> = input
                .map(|path| read_json(&path, "graph input"))
                .transpose()?;

            if input.is_some() && !spec.config.run_checks_after_each_pass {
                eprintln!(
                    "Warning: --input has no effect unless run-checks-after-each-pass is enabled."
                );
            }

            let mut pm = PassManager::with_passes(
                spec.config.clone(),
                spec.passes()?,
                spec.constraints()?,
            )
            .context("Invalid pipeline configuration")?;
            pm.set_invariant_check(|g: &Graph| Ok(check_well_formed(g)?));

            let options = RunOptions { input, tolerance };
            let result = pm
                .run(graph, &options)
                .map_err(|e| anyhow::Error::from(e).context("Pipeline run failed"))?;

            for warning in &result.warnings {
                eprintln!("Warning: {warning}");
            }

            let report = RunReport {
                graph: result.artifact,
                modified: result.modified,
                steps_run: result.steps_run,
                warnings: result.warnings,
            };
            write_json(&report, output.as_ref(), format)?;
        }
    }

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open {} file: {}", what, path.display()))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .with_context(|| format!("Failed to parse {} from: {}", what, path.display()))
}

fn write_json<T: Serialize>(val: &T, path: Option<&PathBuf>, format: OutputFormat) -> Result<()> {
    let mut writer: Box<dyn Write> = if let Some(p) = path {
        let file = File::create(p)
            .with_context(|| format!("Failed to create output file: {}", p.display()))?;
        Box::new(BufWriter::new(file))
    } else {
        Box::new(BufWriter::new(io::stdout()))
    };

    match format {
        OutputFormat::Pretty => {
            serde_json::to_writer_pretty(&mut writer, val).context("Failed to write JSON")?;
        }
        OutputFormat::Compact => {
            serde_json::to_writer(&mut writer, val).context("Failed to write JSON")?;
        }
    }

    // Ensure trailing newline
    writeln!(writer).context("Failed to write trailing newline")?;
    writer.flush().context("Failed to flush output")?;

    Ok(())
}
