use std::path::Path;

use hashbrown::HashSet;
use indexcore_common::DocId;
use serde::{Deserialize, Serialize};

/// The sidecar persisted alongside every shard's primary artifact, carrying
/// just enough state (`size`, `ids`) to answer `has_id`/`id_intersection`
/// and the fullness test without a full load.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Sidecar {
    pub size: f64,
    pub ids: HashSet<DocId>,
}

impl Sidecar {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}
