use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use padelim_ir::{Graph, OpKind};
use padelim_opt::padding::INSPECT_UNPAD_ACTIVATION_FUNC;
use padelim_opt::{PassManager, PaddingEliminationConfig};

/// padelim: remove padding tokens from embedding-rooted graph regions
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input graph (JSON)
    input: PathBuf,

    /// Graph input holding sparse embedding token ids (repeatable)
    #[arg(long = "sparse-input", value_name = "NAME")]
    sparse_inputs: Vec<String>,

    /// Only patch activation inspectors; leave the region padded
    #[arg(long)]
    inspect_only: bool,

    /// Execution target the embedding may run on (repeatable; default: any)
    #[arg(long = "target", value_name = "NAME")]
    targets: Vec<String>,

    /// Pass configuration (JSON); command-line flags are added to it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Dump the rewritten graph to stderr
    #[arg(long)]
    emit_ir: bool,

    /// Validate and rewrite without producing output
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> miette::Result<PaddingEliminationConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .into_diagnostic()
                .wrap_err_with(|| format!("invalid pass configuration in {}", path.display()))?
        }
        None => PaddingEliminationConfig::default(),
    };
    config.sparse_embedding_inputs.extend(cli.sparse_inputs.iter().cloned());
    config.compatible_targets.extend(cli.targets.iter().cloned());
    if cli.inspect_only {
        config = config.inspect_only();
    }
    Ok(config)
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // 1. Read and validate the graph.
    let source = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;
    let mut graph = Graph::from_json(&source)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("graph load failed")?;

    // 2. Rewrite and validate.
    let summary = rewrite(&mut graph, config)?;

    // 3. Summary.
    match summary {
        Some(summary) => eprintln!(
            "padding elimination: {} filters, {} restores, {} hooks patched",
            summary.filters, summary.restores, summary.patched_hooks,
        ),
        None => eprintln!("padding elimination: graph unchanged"),
    }

    // 4. Optionally dump IR to stderr.
    if cli.emit_ir {
        eprintln!("{}", padelim_ir::dump_graph(&graph));
    }

    // 5. Dry-run: stop here.
    if cli.dry_run {
        return Ok(());
    }

    // 6. Write output.
    let json = graph
        .to_json()
        .into_diagnostic()
        .wrap_err("failed to serialize graph")?;
    match &cli.output {
        Some(path) => std::fs::write(path, json)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }

    Ok(())
}

/// Run the standard pipeline; `None` when the graph is unchanged.
fn rewrite(graph: &mut Graph, config: PaddingEliminationConfig) -> miette::Result<Option<Summary>> {
    let modified = PassManager::padding_elimination(config)
        .run(graph)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("padding elimination failed")?;
    Ok(modified.then(|| Summary::of(graph)))
}

/// Boundary and instrumentation nodes present after the rewrite.
#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    filters: usize,
    restores: usize,
    patched_hooks: usize,
}

impl Summary {
    fn of(graph: &Graph) -> Self {
        let mut summary = Self::default();
        for (_, node) in graph.nodes.iter() {
            match &node.op {
                OpKind::FlattenAndUnpad => summary.filters += 1,
                OpKind::PadAndUnflatten => summary.restores += 1,
                OpKind::PythonOp { func_name: Some(f) } if f == INSPECT_UNPAD_ACTIVATION_FUNC => {
                    summary.patched_hooks += 1
                }
                _ => {}
            }
        }
        summary
    }
}
