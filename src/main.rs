use std::path::PathBuf;

use bracket_fem::{config, mesher, post_processor, solver, FemError, MeshSource};
use clap::Parser;
use slog::{error, info, o, Drain, Logger};

/// Plane stress analysis of the riveted bracket
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Study file (material, thickness, force, mesh step)
    study: String,

    /// Imported node list; replaces the generated mesh
    #[arg(long, requires = "elements")]
    nodes: Option<String>,

    /// Imported element list
    #[arg(long, requires = "nodes")]
    elements: Option<String>,

    /// Directory for nodes.csv and elements.csv
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Show progress bars
    #[arg(long)]
    progress: bool,

    /// Log every solver iteration
    #[arg(long)]
    trace_solver: bool,
}

fn terminal_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

fn execute(args: &Args, log: &Logger) -> Result<(), FemError> {
    let mut study_config = config::load_study_file(&args.study)?;
    info!(log, "loaded study"; "material" => &study_config.material_name, "step" => study_config.study.mesh_step);

    if let (Some(nodes), Some(elements)) = (&args.nodes, &args.elements) {
        study_config.study.mesh_source =
            MeshSource::External(mesher::load_external_mesh(nodes, elements)?);
    }

    let mut settings = study_config.settings;
    settings.show_progress = args.progress;
    settings.trace_iterations = args.trace_solver;

    let solution = solver::run(&study_config.study, &settings, log)?;

    let max_stress = solution
        .equivalent_stresses
        .iter()
        .cloned()
        .fold(0.0, f64::max);
    info!(log, "solve complete"; "max_equivalent_stress" => max_stress);

    std::fs::create_dir_all(&args.output_dir).map_err(|err| {
        FemError::Output(format!(
            "Unable to create {}: {err}",
            args.output_dir.display()
        ))
    })?;
    let nodes_output = args.output_dir.join("nodes.csv");
    let elements_output = args.output_dir.join("elements.csv");
    post_processor::csv_output(&solution, &nodes_output, &elements_output)?;
    info!(log, "wrote output"; "nodes" => nodes_output.display().to_string(), "elements" => elements_output.display().to_string());

    Ok(())
}

fn main() {
    let args = Args::parse();
    let log = terminal_logger();

    if let Err(err) = execute(&args, &log) {
        error!(log, "{}", err);
        // flush the async drain before exiting
        drop(log);
        std::process::exit(1)
    }
}
