//! Container options
//!
//! Options can be built in code or loaded from YAML:
//!
//! ```
//! use flacfb::cfb::{CfbOptions, TreeBalancing};
//!
//! let options = CfbOptions::from_yaml_str("version: 4\nbalancing: legacy\n").unwrap();
//! assert_eq!(options.version, 4);
//! assert_eq!(options.balancing, TreeBalancing::Legacy);
//! assert_eq!(options.mini_stream_cutoff, 4096);
//! ```

use super::consts::*;
use super::error::{CfbError, CfbResult};
use crate::common::id::{generate_guid_bytes, parse_clsid};
use serde::{Deserialize, Serialize};

/// How new entries are linked into a storage's sibling tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TreeBalancing {
    /// Red-black insertion with recoloring and rotations
    #[default]
    RedBlack,
    /// Right-first attachment, then the whole level is painted black.
    /// Produces the tree shapes found in files written by legacy FLA tools.
    Legacy,
}

/// Options for creating or opening a compound file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CfbOptions {
    /// Major version of new containers: 3 (512-byte sectors) or 4 (4096-byte sectors)
    pub version: u16,
    /// Streams smaller than this are stored in the mini stream
    pub mini_stream_cutoff: u32,
    /// Root CLSID of new containers; random when `None`
    pub root_clsid: Option<String>,
    /// Sibling tree insertion strategy
    pub balancing: TreeBalancing,
    /// `log` target for every record emitted by the container
    pub log_target: String,
}

impl Default for CfbOptions {
    fn default() -> Self {
        Self {
            version: 3,
            mini_stream_cutoff: DEFAULT_MINI_STREAM_CUTOFF,
            root_clsid: None,
            balancing: TreeBalancing::default(),
            log_target: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

impl CfbOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn with_mini_stream_cutoff(mut self, cutoff: u32) -> Self {
        self.mini_stream_cutoff = cutoff;
        self
    }

    pub fn with_root_clsid(mut self, clsid: impl Into<String>) -> Self {
        self.root_clsid = Some(clsid.into());
        self
    }

    pub fn with_balancing(mut self, balancing: TreeBalancing) -> Self {
        self.balancing = balancing;
        self
    }

    pub fn with_log_target(mut self, target: impl Into<String>) -> Self {
        self.log_target = target.into();
        self
    }

    /// Load options from a YAML document. Missing keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> CfbResult<Self> {
        let options: Self = serde_saphyr::from_str(yaml)
            .map_err(|e| CfbError::Config(format!("failed to parse options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Serialize the options to YAML.
    pub fn to_yaml_string(&self) -> CfbResult<String> {
        serde_saphyr::to_string(self)
            .map_err(|e| CfbError::Config(format!("failed to serialize options: {e}")))
    }

    /// Reject settings no container can be built with.
    pub fn validate(&self) -> CfbResult<()> {
        if self.version != 3 && self.version != 4 {
            return Err(CfbError::Config(format!(
                "unsupported major version {}",
                self.version
            )));
        }
        if self.mini_stream_cutoff == 0 {
            return Err(CfbError::Config(
                "mini stream cutoff must be positive".to_string(),
            ));
        }
        if let Some(clsid) = &self.root_clsid
            && parse_clsid(clsid).is_none()
        {
            return Err(CfbError::InvalidClsid(clsid.clone()));
        }
        Ok(())
    }

    /// Root CLSID bytes for a new container.
    pub(crate) fn resolve_root_clsid(&self) -> CfbResult<[u8; 16]> {
        match &self.root_clsid {
            Some(text) => parse_clsid(text).ok_or_else(|| CfbError::InvalidClsid(text.clone())),
            None => Ok(generate_guid_bytes()),
        }
    }
}
