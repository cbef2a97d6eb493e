//! Bootstrap configuration envelope read from the inherited channel.

use std::io::Read;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RootcellError};
use crate::spec::{Process, RuntimeSpec};

/// ID mapping as supplied by the process that spawned the bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcIdMap {
    /// First ID inside the namespace.
    #[serde(rename = "ContainerID")]
    pub container_id: u32,
    /// First ID outside the namespace.
    #[serde(rename = "HostID")]
    pub host_id: u32,
    /// Length of the range.
    pub size: u32,
}

/// Everything the bootstrap needs for one launch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BootstrapConfig {
    /// The runtime specification.
    #[serde(default)]
    pub spec: Option<RuntimeSpec>,
    /// Bundle directory; holds scratch state such as the masking directory.
    #[serde(default)]
    pub bundle_path: PathBuf,
    /// UID mappings applied to this process.
    #[serde(rename = "UIDMappings", default)]
    pub uid_mappings: Vec<ProcIdMap>,
    /// GID mappings applied to this process.
    #[serde(rename = "GIDMappings", default)]
    pub gid_mappings: Vec<ProcIdMap>,
}

impl BootstrapConfig {
    /// Decodes a single JSON object from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`RootcellError::Decode`] if the stream is not a valid
    /// configuration object.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let mut de = serde_json::Deserializer::from_reader(reader);
        let config = Self::deserialize(&mut de)?;
        Ok(config)
    }

    /// Returns the runtime spec and its process descriptor, both of which are required.
    ///
    /// # Errors
    ///
    /// Returns [`RootcellError::SpecValidation`] if either is missing or the
    /// root path is empty.
    pub fn validated(&self) -> Result<(&RuntimeSpec, &Process)> {
        let invalid = || RootcellError::SpecValidation {
            message: "invalid options spec passed in".into(),
        };
        let spec = self.spec.as_ref().ok_or_else(invalid)?;
        let process = spec.process.as_ref().ok_or_else(invalid)?;
        match &spec.root {
            Some(root) if !root.path.as_os_str().is_empty() => Ok((spec, process)),
            _ => Err(RootcellError::SpecValidation {
                message: "runtime spec has no root path".into(),
            }),
        }
    }
}
