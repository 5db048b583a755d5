mod layout;
mod run;

use clap::{Parser, Subcommand};
use std::io::{self, Write};

#[derive(Parser)]
#[command(name = "tilecyte", about = "tilecyte CLI: grid layout, tiled cytometry run")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show tile geometry for an experiment.
    Grid(layout::LayoutArgs),
    /// Process raw tiles into corrected planes, masks, cell tables and montages.
    Run(run::RunArgs),
}

fn progress(prog: f64, msg: &str) {
    let _ = writeln!(
        io::stderr(),
        "{}",
        serde_json::json!({"progress": prog, "message": msg})
    );
    let _ = io::stderr().flush();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Grid(args) => layout::run(args, progress)?,
        Commands::Run(args) => run::run(args, progress)?,
    }
    Ok(())
}
