//! Stage catalog: the fixed, ordered list of epic stages a story passes
//! through, with JSON loading for project-specific catalogs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One ordered stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage id. Ids are ordered but need not be contiguous.
    pub id: u32,
    /// Human-readable stage name.
    pub name: String,
}

impl StageSpec {
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

/// Ordered stage catalog driving the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCatalog {
    pub stages: Vec<StageSpec>,
}

impl StageCatalog {
    /// The built-in stage sequence.
    pub fn builtin() -> Self {
        Self {
            stages: vec![
                StageSpec::new(1, "analyze"),
                StageSpec::new(2, "design"),
                StageSpec::new(3, "implement"),
                StageSpec::new(4, "test"),
                StageSpec::new(5, "review"),
                StageSpec::new(6, "integrate"),
                StageSpec::new(7, "deliver"),
            ],
        }
    }

    /// Load a catalog from `stages.json`, falling back to the built-in
    /// sequence when the file does not exist.
    pub fn load_or_builtin(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::builtin());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stage catalog: {}", path.display()))?;
        let catalog: StageCatalog = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse stage catalog JSON: {}", path.display()))?;
        if catalog.stages.is_empty() {
            anyhow::bail!("Stage catalog at {} contains no stages", path.display());
        }
        Ok(catalog)
    }

    pub fn ids(&self) -> Vec<u32> {
        self.stages.iter().map(|s| s.id).collect()
    }

    pub fn get(&self, id: u32) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Ordinal position of a stage id in catalog order.
    pub fn position(&self, id: u32) -> Option<usize> {
        self.stages.iter().position(|s| s.id == id)
    }

    /// The stage id following `id` in catalog order, if any.
    pub fn next_after(&self, id: u32) -> Option<u32> {
        let pos = self.position(id)?;
        self.stages.get(pos + 1).map(|s| s.id)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
