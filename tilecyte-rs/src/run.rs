use clap::Args;
use std::collections::BTreeMap;
use std::path::Path;

use tilecyte::config::ExperimentConfig;
use tilecyte::export;
use tilecyte::ingest::{self, RawIndex, RawSource};
use tilecyte::pipeline::Pipeline;
use tilecyte::selection::Selection;
use tilecyte::zarr;

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Experiment YAML.
    #[arg(long)]
    pub config: String,
    /// Raw acquisition directory.
    #[arg(long)]
    pub input: String,
    #[arg(long)]
    pub output: String,
    /// Regions by index or name, e.g. "all", "0,2", "Region1".
    #[arg(long, default_value = "all")]
    pub regions: String,
    /// Tile indices, e.g. "all", "0:4", "-1".
    #[arg(long, default_value = "all")]
    pub tiles: String,
    /// Write an 8-bit PNG of every montaged channel.
    #[arg(long, default_value_t = false)]
    pub preview: bool,
}

pub fn run(
    args: RunArgs,
    progress: impl Fn(f64, &str) + Sync,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = Path::new(&args.config);
    let config = ExperimentConfig::load(config_path)?;
    let input = Path::new(&args.input);
    if !input.is_dir() {
        return Err(format!("Input directory not found: {}", input.display()).into());
    }

    let illumination = match &config.processor.illumination_correction {
        Some(params) if config.processor.args.run_illumination_correction => {
            let base = config_path.parent().unwrap_or(Path::new("."));
            ingest::load_illumination_images(params, base)?
        }
        _ => BTreeMap::new(),
    };
    let pipeline = Pipeline::new(config, illumination)?;
    let config = pipeline.config();
    let names = &config.acquisition.region_names;
    let regions = Selection::parse(&args.regions)?.resolve(names.len(), Some(names.as_slice()))?;
    let tiles = Selection::parse(&args.tiles)?.resolve(pipeline.grid().num_tiles(), None)?;
    if regions.is_empty() || tiles.is_empty() {
        return Err("Selection matches no regions or no tiles".into());
    }

    let index = RawIndex::discover(input, config.environment.path_formats)?;
    if index.is_empty() {
        return Err(format!("No raw tiles found in {}", input.display()).into());
    }
    progress(
        0.0,
        &format!(
            "Discovered {} raw planes: {} regions, {} tiles each",
            index.len(),
            regions.len(),
            tiles.len()
        ),
    );

    let source = RawSource::new(
        index,
        names.clone(),
        config.channel_map()?,
        config.acquisition.num_z_planes,
    );
    let report = pipeline.run(&regions, &tiles, &source, &progress)?;

    let output = Path::new(&args.output);
    let store = zarr::open_store(&output.join("processor.zarr"))?;
    let mut cells = 0;
    for region in &report.regions {
        export::persist_tiles(&store, &region.region, pipeline.store())?;
        let Some(montage) = &region.montage else {
            continue;
        };
        export::persist_montage(&store, montage)?;
        let csv_path = output
            .join("cytometry")
            .join(format!("{}.csv", region.region));
        cells += export::write_cells_csv(&csv_path, montage)?;
        if args.preview {
            for (channel, image) in &montage.images {
                let png = output
                    .join("preview")
                    .join(format!("{}_{}.png", region.region, channel));
                export::write_preview_png(&png, image)?;
            }
        }
    }
    export::write_report(&output.join("report.json"), &report)?;

    let failed: usize = report.regions.iter().map(|r| r.failed.len()).sum();
    progress(
        1.0,
        &format!(
            "Wrote {} cells from {} regions to {} ({} tiles failed)",
            cells,
            report.regions.len(),
            output.display(),
            failed
        ),
    );
    Ok(())
}
