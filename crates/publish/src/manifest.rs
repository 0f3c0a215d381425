use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::write::{io_error, PublishError};

pub const MANIFEST_FILE: &str = "manifest.json";

/// One written chunk file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub bucket: String,
    pub index: usize,
    pub lines: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: String,
    pub version: String,
    pub total_lines: usize,
    pub artifacts: Vec<Artifact>,
}

impl Manifest {
    /// With a `base_url`, every artifact gets `<base_url>/<name>`.
    pub fn new(generated_at: String, mut artifacts: Vec<Artifact>, base_url: Option<&str>) -> Self {
        if let Some(base) = base_url.map(|b| b.trim_end_matches('/')).filter(|b| !b.is_empty()) {
            for a in &mut artifacts {
                a.url = Some(format!("{base}/{}", a.name));
            }
        }
        Manifest {
            generated_at,
            version: keyprobe_core::version().to_string(),
            total_lines: artifacts.iter().map(|a| a.lines).sum(),
            artifacts,
        }
    }

    pub fn write(&self, out_dir: &Path) -> Result<PathBuf, PublishError> {
        let path = out_dir.join(MANIFEST_FILE);
        let tmp = out_dir.join(format!("{MANIFEST_FILE}.tmp"));
        let body = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp, body).map_err(io_error(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_error(&path))?;
        Ok(path)
    }
}
