//! Append-only store of per-tile stage outputs.
//!
//! Entries are keyed by (region, cycle, tile, kind). Corrected planes live
//! under the cycle their channel was acquired in; tile-level products
//! (focal selection, mask overlays, records) live under the reference cycle 0.

use ndarray::Array2;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::focus::FocalSelection;
use crate::plane::Plane;
use crate::quantify::CellRecord;

/// Label image kept as a per-tile overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MaskKind {
    Nucleus,
    Cell,
}

impl MaskKind {
    pub fn name(self) -> &'static str {
        match self {
            MaskKind::Nucleus => "nucleus_mask",
            MaskKind::Cell => "cell_mask",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    Focus,
    Corrected(String),
    Mask(MaskKind),
    Records,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactKey {
    pub region: String,
    pub cycle: u32,
    pub tile: usize,
    pub kind: ArtifactKind,
}

impl ArtifactKey {
    pub fn new(region: &str, cycle: u32, tile: usize, kind: ArtifactKind) -> Self {
        Self {
            region: region.to_string(),
            cycle,
            tile,
            kind,
        }
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/cycle{}/tile{:05}/", self.region, self.cycle, self.tile)?;
        match &self.kind {
            ArtifactKind::Focus => write!(f, "focus"),
            ArtifactKind::Corrected(c) => write!(f, "proc_{}", c),
            ArtifactKind::Mask(m) => write!(f, "{}", m.name()),
            ArtifactKind::Records => write!(f, "records"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Artifact {
    Focus(FocalSelection),
    Corrected(Plane),
    Labels(Array2<u32>),
    Records(Vec<CellRecord>),
}

/// Shared by reference across workers; nothing is ever replaced or removed.
#[derive(Default)]
pub struct ArtifactStore {
    entries: RwLock<BTreeMap<ArtifactKey, Arc<Artifact>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: ArtifactKey, artifact: Artifact) -> Result<Arc<Artifact>> {
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(Error::DuplicateArtifact(key.to_string()));
        }
        let artifact = Arc::new(artifact);
        tracing::trace!(key = %key, "artifact recorded");
        entries.insert(key, Arc::clone(&artifact));
        Ok(artifact)
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<Arc<Artifact>> {
        self.entries.read().get(key).cloned()
    }

    /// All entries of one region, in key order.
    pub fn region(&self, region: &str) -> Vec<(ArtifactKey, Arc<Artifact>)> {
        self.entries
            .read()
            .iter()
            .filter(|(k, _)| k.region == region)
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_append_only() {
        let store = ArtifactStore::new();
        let key = ArtifactKey::new("reg1", 1, 3, ArtifactKind::Corrected("CD4".into()));
        store
            .record(key.clone(), Artifact::Corrected(Plane::zeros((2, 2))))
            .unwrap();
        let err = store
            .record(key.clone(), Artifact::Corrected(Plane::ones((2, 2))))
            .unwrap_err();
        assert_eq!(err, Error::DuplicateArtifact("reg1/cycle1/tile00003/proc_CD4".into()));
        match store.get(&key).as_deref() {
            Some(Artifact::Corrected(p)) => assert_eq!(p[[0, 0]], 0.0),
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[test]
    fn region_listing_is_ordered_and_scoped() {
        let store = ArtifactStore::new();
        for (region, tile) in [("reg2", 0), ("reg1", 1), ("reg1", 0)] {
            store
                .record(
                    ArtifactKey::new(region, 0, tile, ArtifactKind::Records),
                    Artifact::Records(Vec::new()),
                )
                .unwrap();
        }
        let tiles: Vec<usize> = store.region("reg1").iter().map(|(k, _)| k.tile).collect();
        assert_eq!(tiles, vec![0, 1]);
        assert_eq!(store.len(), 3);
    }
}
