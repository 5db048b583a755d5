use clap::Args;
use std::path::Path;

use tilecyte::config::ExperimentConfig;
use tilecyte::selection::Selection;

#[derive(Args, Clone)]
pub struct LayoutArgs {
    /// Experiment YAML.
    #[arg(long)]
    pub config: String,
    #[arg(long, default_value = "all")]
    pub tiles: String,
}

/// Print the tile geometry of the configured grid as JSON on stdout.
pub fn run(args: LayoutArgs, progress: impl Fn(f64, &str)) -> Result<(), Box<dyn std::error::Error>> {
    let config = ExperimentConfig::load(Path::new(&args.config))?;
    let grid = config.grid()?;
    let indices = Selection::parse(&args.tiles)?.resolve(grid.num_tiles(), None)?;

    let mut tiles = Vec::with_capacity(indices.len());
    for i in indices {
        let geometry = grid.tile(i)?;
        tiles.push(serde_json::json!({
            "index": geometry.index,
            "coord": geometry.coord,
            "rect": geometry.rect(),
            "core": grid.core_rect(geometry.coord),
        }));
    }
    let (width, height) = grid.region_size();
    let out = serde_json::json!({
        "grid": grid,
        "region_width_px": width,
        "region_height_px": height,
        "tiles": tiles,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    progress(1.0, &format!("{} of {} tiles", tiles.len(), grid.num_tiles()));
    Ok(())
}
