//! Engine configuration file
//!
//! Every section is optional; missing fields take their defaults. The file
//! format follows the extension: `.yaml`/`.yml` or `.json`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::hierarchy::{ClusteringMethod, HierarchyConfig};
use crate::layout::LayoutParams;
use crate::model::Area;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub layout: LayoutParams,
    pub clustering: ClusteringMethod,
    pub hierarchy: HierarchyConfig,
    /// Area whose nodes stay pinned during layout
    pub restriction: Option<Area>,
}

impl EngineConfig {
    /// Read a configuration file, choosing the parser by extension
    pub fn load(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| GraphError::UnknownExtension(path.display().to_string()))?;
        let content = fs::read_to_string(path)?;

        let config: Self = match ext.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| GraphError::Parse(format!("{}: {e}", path.display())))?,
            "json" => serde_json::from_str(&content)
                .map_err(|e| GraphError::Parse(format!("{}: {e}", path.display())))?,
            other => return Err(GraphError::UnsupportedFormat(other.to_string())),
        };
        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        if let Some(area) = &self.restriction {
            area.validate()?;
        }
        if self.hierarchy.max_levels == 0 {
            return Err(GraphError::InvalidInput(
                "hierarchy.max_levels must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
