//! Workspace manifest file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TrioError;
use crate::program::AutorunSpec;

/// Programs a controller is expected to hold.
///
/// ```yaml
/// files:
///   - filename: src/MAIN.BAS
///     autorun: -1
///   - filename: MC_CONFIG.MCC
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub files: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative to the manifest's directory.
    pub filename: String,
    /// Absent means the program is not started at boot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autorun: Option<AutorunSpec>,
}

impl ManifestEntry {
    #[must_use]
    pub fn new(filename: impl Into<String>, autorun: Option<AutorunSpec>) -> Self {
        Self {
            filename: filename.into(),
            autorun,
        }
    }

    /// Boot process requested for this program.
    #[must_use]
    pub fn auto_process(&self) -> Option<i32> {
        self.autorun.and_then(AutorunSpec::process)
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, TrioError> {
        let text = fs::read_to_string(path).map_err(|err| {
            TrioError::Manifest(format!("failed to read {}: {err}", path.display()).into())
        })?;
        Self::from_yaml(&text).map_err(|err| match err {
            TrioError::Manifest(reason) => {
                TrioError::Manifest(format!("{}: {reason}", path.display()).into())
            }
            other => other,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, TrioError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|err| TrioError::Manifest(err.to_string().into()))
    }

    pub fn to_yaml(&self) -> Result<String, TrioError> {
        serde_yaml::to_string(self).map_err(|err| TrioError::Manifest(err.to_string().into()))
    }

    pub fn save(&self, path: &Path) -> Result<(), TrioError> {
        let text = self.to_yaml()?;
        fs::write(path, text).map_err(|err| {
            TrioError::Manifest(format!("failed to write {}: {err}", path.display()).into())
        })
    }
}
