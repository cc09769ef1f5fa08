//! Declared-state documents
//!
//! A document is `{ objects = [...] }` in TOML, or the same shape in JSON.
//! Each object carries `name`, `kind`, an optional `scope` (default
//! `shared`) and the attributes of its kind.

use anyhow::{Context, Result, bail};
use converge::ConfigObject;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct DesiredDocument {
    #[serde(default)]
    objects: Vec<ConfigObject>,
}

/// Load and validate every object declared in `path`
pub fn load(path: &Path) -> Result<Vec<ConfigObject>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read desired state: {}", path.display()))?;
    let document: DesiredDocument = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))?,
        Some("json") | None => serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON format in {}", path.display()))?,
        Some(other) => bail!("Unsupported desired-state format '.{other}' (use .json or .toml)"),
    };

    for object in &document.objects {
        object
            .validate()
            .with_context(|| format!("Invalid object {}", object.path()))?;
    }
    log::info!(
        "Loaded {} declared objects from {}",
        document.objects.len(),
        path.display()
    );
    Ok(document.objects)
}
