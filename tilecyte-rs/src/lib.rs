pub mod artifacts;
pub mod barrier;
pub mod config;
pub mod correct;
pub mod devices;
pub mod error;
pub mod export;
pub mod focus;
pub mod grid;
pub mod ingest;
pub mod montage;
pub mod pipeline;
pub mod plane;
pub mod quantify;
pub mod segment;
pub mod selection;
pub mod tile;
pub mod zarr;

#[cfg(test)]
mod test_utils;

pub use error::{Error, Result};
