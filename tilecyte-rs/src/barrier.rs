//! Per-region task groups: the montage of a region waits for every tile.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::grid::TileCoord;
use crate::tile::TileResult;

/// Final state of one tile's work. A failed tile is never an empty result.
#[derive(Debug, Clone)]
pub enum TileOutcome {
    Completed(Box<TileResult>),
    Failed {
        index: usize,
        coord: TileCoord,
        kind: &'static str,
        reason: String,
    },
    Cancelled {
        index: usize,
        coord: TileCoord,
    },
}

/// Serializable summary of an outcome for reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeSummary {
    Completed { index: usize, cells: usize },
    Failed { index: usize, kind: String, reason: String },
    Cancelled { index: usize },
}

impl TileOutcome {
    pub fn index(&self) -> usize {
        match self {
            TileOutcome::Completed(r) => r.geometry.index,
            TileOutcome::Failed { index, .. } | TileOutcome::Cancelled { index, .. } => *index,
        }
    }

    pub fn summary(&self) -> OutcomeSummary {
        match self {
            TileOutcome::Completed(r) => OutcomeSummary::Completed {
                index: r.geometry.index,
                cells: r.records.len(),
            },
            TileOutcome::Failed {
                index, kind, reason, ..
            } => OutcomeSummary::Failed {
                index: *index,
                kind: kind.to_string(),
                reason: reason.clone(),
            },
            TileOutcome::Cancelled { index, .. } => OutcomeSummary::Cancelled { index: *index },
        }
    }
}

struct Group {
    expected: usize,
    outcomes: BTreeMap<usize, TileOutcome>,
    cancelled: bool,
}

/// Counting task groups keyed by region name.
#[derive(Default)]
pub struct RegionBarrier {
    groups: Mutex<BTreeMap<String, Group>>,
    condvar: Condvar,
}

impl RegionBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a region expecting `tiles` outcomes.
    pub fn open(&self, region: &str, tiles: usize) -> Result<()> {
        let mut groups = self.groups.lock();
        if groups.contains_key(region) {
            return Err(Error::Configuration(format!(
                "region {:?} is already being processed",
                region
            )));
        }
        groups.insert(
            region.to_string(),
            Group {
                expected: tiles,
                outcomes: BTreeMap::new(),
                cancelled: false,
            },
        );
        Ok(())
    }

    pub fn complete(&self, region: &str, outcome: TileOutcome) -> Result<()> {
        let mut groups = self.groups.lock();
        let group = groups.get_mut(region).ok_or_else(|| {
            Error::Configuration(format!("region {:?} has no open task group", region))
        })?;
        let index = outcome.index();
        if group.outcomes.contains_key(&index) {
            return Err(Error::DuplicateArtifact(format!("{}/tile{:05} outcome", region, index)));
        }
        group.outcomes.insert(index, outcome);
        if group.outcomes.len() >= group.expected {
            self.condvar.notify_all();
        }
        Ok(())
    }

    /// Mark the region so tiles that have not started yet are skipped.
    pub fn cancel(&self, region: &str) {
        if let Some(g) = self.groups.lock().get_mut(region) {
            g.cancelled = true;
        }
    }

    pub fn is_cancelled(&self, region: &str) -> bool {
        self.groups
            .lock()
            .get(region)
            .map(|g| g.cancelled)
            .unwrap_or(false)
    }

    /// Block until every tile of `region` reported, then close the group and
    /// return its outcomes in acquisition order.
    pub fn join(&self, region: &str) -> Result<Vec<TileOutcome>> {
        let mut groups = self.groups.lock();
        loop {
            let ready = match groups.get(region) {
                Some(g) => g.outcomes.len() >= g.expected,
                None => {
                    return Err(Error::Configuration(format!(
                        "region {:?} has no open task group",
                        region
                    )))
                }
            };
            if ready {
                break;
            }
            self.condvar.wait(&mut groups);
        }
        let group = groups
            .remove(region)
            .ok_or_else(|| Error::Configuration(format!("region {:?} vanished", region)))?;
        Ok(group.outcomes.into_values().collect())
    }
}
