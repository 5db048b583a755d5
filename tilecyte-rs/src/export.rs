//! Run outputs: Zarr artifacts, per-region cell tables, the JSON run report
//! and 8-bit PNG previews.
//!
//! Zarr layout:
//!   /region/{name}/cycle/{c}/tile/{idx:05}/proc_{channel}   f32 (y, x)
//!   /region/{name}/cycle/0/tile/{idx:05}/{nucleus,cell}_mask u32 (y, x), when extracted
//!   /region/{name}/montage/{channel}                        f32 (y, x)
//!   /region/{name}/montage/{nucleus,cell}_labels            u32 (y, x)

use image::GrayImage;
use std::fs;
use std::path::Path;

use crate::artifacts::{Artifact, ArtifactKind, ArtifactStore};
use crate::montage::Montage;
use crate::pipeline::RunReport;
use crate::plane::{min_max, Plane};
use crate::zarr;

fn tile_group(region: &str, cycle: u32, tile: usize) -> String {
    format!("/region/{}/cycle/{}/tile/{:05}", region, cycle, tile)
}

fn plane_attrs(extra: serde_json::Value) -> Option<serde_json::Map<String, serde_json::Value>> {
    let mut attrs = serde_json::json!({ "axis_names": ["y", "x"] });
    if let (Some(a), serde_json::Value::Object(e)) = (attrs.as_object_mut(), extra) {
        a.extend(e);
    }
    attrs.as_object().cloned()
}

/// Write every recorded tile artifact of `region`. Returns the number of
/// arrays written.
pub fn persist_tiles(
    store: &zarr::Store,
    region: &str,
    artifacts: &ArtifactStore,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut written = 0;
    let mut focus = Vec::new();
    for (key, artifact) in artifacts.region(region) {
        let group = tile_group(region, key.cycle, key.tile);
        match (&key.kind, artifact.as_ref()) {
            (ArtifactKind::Corrected(channel), Artifact::Corrected(plane)) => {
                zarr::ensure_groups(store, &group)?;
                let attrs = plane_attrs(serde_json::json!({ "channel": channel }));
                zarr::write_plane_f32(store, &format!("{}/proc_{}", group, channel), plane, attrs)?;
                written += 1;
            }
            (ArtifactKind::Mask(kind), Artifact::Labels(labels)) => {
                zarr::ensure_groups(store, &group)?;
                let count = labels.iter().copied().max().unwrap_or(0);
                let attrs = plane_attrs(serde_json::json!({ "count": count }));
                zarr::write_labels_u32(store, &format!("{}/{}", group, kind.name()), labels, attrs)?;
                written += 1;
            }
            (ArtifactKind::Focus, Artifact::Focus(focal)) => {
                focus.push((group, serde_json::json!({ "focal_selection": focal })));
            }
            _ => {}
        }
    }
    // Group attributes go last so array writes cannot reset them.
    for (group, attrs) in focus {
        zarr::ensure_groups(store, &group)?;
        zarr::write_group_attrs(store, &group, attrs.as_object().cloned())?;
    }
    tracing::debug!(region, arrays = written, "persisted tile artifacts");
    Ok(written)
}

pub fn persist_montage(store: &zarr::Store, montage: &Montage) -> Result<(), Box<dyn std::error::Error>> {
    let group = format!("/region/{}/montage", montage.region);
    zarr::ensure_groups(store, &group)?;
    let summary = serde_json::json!({
        "partial": montage.partial,
        "failed_tiles": montage.failed,
        "cells": montage.cells.len(),
    });
    zarr::write_group_attrs(store, &group, summary.as_object().cloned())?;
    for (channel, image) in &montage.images {
        let attrs = plane_attrs(serde_json::json!({ "channel": channel }));
        zarr::write_plane_f32(store, &format!("{}/{}", group, channel), image, attrs)?;
    }
    let attrs = plane_attrs(serde_json::json!({ "cells": montage.cells.len() }));
    zarr::write_labels_u32(store, &format!("{}/nucleus_labels", group), &montage.nucleus_labels, attrs.clone())?;
    zarr::write_labels_u32(store, &format!("{}/cell_labels", group), &montage.cell_labels, attrs)?;
    Ok(())
}

/// One row per global cell.
pub fn write_cells_csv(path: &Path, montage: &Montage) -> Result<usize, Box<dyn std::error::Error>> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let channels: Vec<String> = montage
        .cells
        .first()
        .map(|c| c.record.cell_intensity.keys().cloned().collect())
        .unwrap_or_default();
    let with_nucleus = montage
        .cells
        .first()
        .is_some_and(|c| c.record.nucleus_intensity.is_some());

    let mut header: Vec<String> = [
        "region", "id", "tile", "tile_row", "tile_col", "label", "x", "y", "bbox_x", "bbox_y",
        "bbox_w", "bbox_h", "area", "perimeter", "diameter", "eccentricity", "solidity",
        "nucleus_area", "nucleus_diameter",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for c in &channels {
        header.push(format!("ci:{}:mean", c));
        header.push(format!("ci:{}:sum", c));
    }
    if with_nucleus {
        for c in &channels {
            header.push(format!("ni:{}:mean", c));
            header.push(format!("ni:{}:sum", c));
        }
    }
    header.push("neighbors".to_string());

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&header)?;
    for cell in &montage.cells {
        let r = &cell.record;
        let mut row: Vec<String> = vec![
            montage.region.clone(),
            cell.id.to_string(),
            cell.tile_index.to_string(),
            cell.tile_coord.row.to_string(),
            cell.tile_coord.col.to_string(),
            cell.local_label.to_string(),
            cell.x.to_string(),
            cell.y.to_string(),
            cell.bbox.x.to_string(),
            cell.bbox.y.to_string(),
            cell.bbox.width.to_string(),
            cell.bbox.height.to_string(),
            r.area.to_string(),
            r.perimeter.to_string(),
            r.diameter.to_string(),
            r.eccentricity.to_string(),
            r.solidity.to_string(),
            r.nucleus_area.to_string(),
            r.nucleus_diameter.to_string(),
        ];
        for c in &channels {
            let s = r.cell_intensity.get(c).copied().unwrap_or_default();
            row.push(s.mean.to_string());
            row.push(s.sum.to_string());
        }
        if with_nucleus {
            for c in &channels {
                let s = r
                    .nucleus_intensity
                    .as_ref()
                    .and_then(|n| n.get(c).copied())
                    .unwrap_or_default();
                row.push(s.mean.to_string());
                row.push(s.sum.to_string());
            }
        }
        row.push(
            cell.neighbors
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(";"),
        );
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(montage.cells.len())
}

pub fn write_report(path: &Path, report: &RunReport) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

/// Min-max stretch to 8 bits.
fn to_u8(plane: &Plane) -> Vec<u8> {
    let Some((min, max)) = min_max(plane.view()) else {
        return vec![0; plane.len()];
    };
    let range = (max - min) as f64;
    plane
        .iter()
        .map(|&v| {
            if range > 0.0 {
                (((v - min) as f64 / range) * 255.0).round() as u8
            } else {
                0
            }
        })
        .collect()
}

pub fn write_preview_png(path: &Path, plane: &Plane) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let (h, w) = plane.dim();
    let img = GrayImage::from_raw(w as u32, h as u32, to_u8(plane))
        .ok_or("preview buffer does not match the plane size")?;
    img.save(path)?;
    Ok(())
}
