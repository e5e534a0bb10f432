//! Engine configuration
//!
//! [`EngineConfig`] is plain data with defaults for every field, so a TOML
//! file only needs the keys it wants to change:
//!
//! ```toml
//! root_path = "MAIN"
//! max_branch_depth = 32
//! review_workers = 8
//! merge_strategy = "disjoint-fields"
//!
//! [telemetry]
//! level = "bvc_engine=debug,info"
//! json = true
//! ```

use std::path::Path;

use bvc_model::BranchPath;
use serde::{Deserialize, Serialize};

use crate::error::{VcError, VcResult};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root branch created by [`crate::VersionControl::bootstrap`]
    pub root_path: String,
    /// Bound on ancestor walks; deeper lineages fail loudly
    pub max_branch_depth: usize,
    /// Concurrent background review computations
    pub review_workers: usize,
    /// Auto-merge strategy used by merge reviews
    pub merge_strategy: String,
    /// Logging setup
    pub telemetry: TelemetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_path: "MAIN".to_string(),
            max_branch_depth: 64,
            review_workers: 4,
            merge_strategy: bvc_merge::DisjointFieldStrategy::NAME.to_string(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse from TOML text and validate
    ///
    /// # Errors
    /// [`VcError::Config`] on syntax errors or invalid values
    pub fn from_toml_str(text: &str) -> VcResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| VcError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file and validate
    ///
    /// # Errors
    /// [`VcError::Config`] if the file cannot be read or is invalid
    pub fn load(path: impl AsRef<Path>) -> VcResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| VcError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Check invariants the engine relies on
    ///
    /// The strategy name is checked against the registry when the engine is
    /// built, since custom strategies may be registered first.
    ///
    /// # Errors
    /// [`VcError::Config`] describing the first invalid value
    pub fn validate(&self) -> VcResult<()> {
        let root = self.root()?;
        if !root.is_root() {
            return Err(VcError::Config(format!(
                "root_path '{root}' must be a single segment"
            )));
        }
        if self.max_branch_depth == 0 {
            return Err(VcError::Config("max_branch_depth must be at least 1".into()));
        }
        if self.review_workers == 0 {
            return Err(VcError::Config("review_workers must be at least 1".into()));
        }
        Ok(())
    }

    /// Parsed root path
    ///
    /// # Errors
    /// [`VcError::Config`] if `root_path` is not a valid branch path
    pub fn root(&self) -> VcResult<BranchPath> {
        BranchPath::new(self.root_path.as_str())
            .map_err(|e| VcError::Config(format!("root_path: {e}")))
    }

    /// Set root path
    #[inline]
    #[must_use]
    pub fn with_root_path(mut self, root: impl Into<String>) -> Self {
        self.root_path = root.into();
        self
    }

    /// Set ancestry bound
    #[inline]
    #[must_use]
    pub fn with_max_branch_depth(mut self, depth: usize) -> Self {
        self.max_branch_depth = depth;
        self
    }

    /// Set background review concurrency
    #[inline]
    #[must_use]
    pub fn with_review_workers(mut self, workers: usize) -> Self {
        self.review_workers = workers;
        self
    }

    /// Set auto-merge strategy
    #[inline]
    #[must_use]
    pub fn with_merge_strategy(mut self, name: impl Into<String>) -> Self {
        self.merge_strategy = name.into();
        self
    }

    /// Set telemetry
    #[inline]
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
