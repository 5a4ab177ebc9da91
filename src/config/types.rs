//! Engine configuration types.
//!
//! These types map directly to the YAML engine configuration file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::planner::{DiffEngine, ExecutionPolicy, FailurePolicy};
use crate::spec::OrderedResourcesGenerator;
use crate::state::{DEFAULT_STATE_DIR, LocalStateStore, MemoryStateStore, S3StateStore, StateStore};

/// Default number of steps executed concurrently.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Root engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum number of steps in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Reaction to a failed step.
    #[serde(default)]
    pub policy: FailurePolicy,
    /// Kind precedence list for implicit ordering; empty means the default list.
    #[serde(default)]
    pub ordered_kinds: Vec<String>,
    /// Resource types that receive implicit edges; empty means Kubernetes only.
    #[serde(default)]
    pub ordered_types: Vec<String>,
    /// Dotted attribute paths excluded from diffs.
    #[serde(default)]
    pub ignored_fields: Vec<String>,
    /// Run the runtimes in dry-run mode and skip the state save.
    #[serde(default)]
    pub dry_run: bool,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// Base directory (local backend).
    #[serde(default)]
    pub path: Option<String>,
    /// Bucket name (s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// Key prefix (s3 backend).
    #[serde(default)]
    pub prefix: Option<String>,
    /// Region (s3 backend, uses the AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
    /// In-process storage, lost on exit.
    Memory,
}

const fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            policy: FailurePolicy::default(),
            ordered_kinds: Vec::new(),
            ordered_types: Vec::new(),
            ignored_fields: Vec::new(),
            dry_run: false,
            state: StateConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Builds the executor policy.
    #[must_use]
    pub const fn execution_policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            failure: self.policy,
            concurrency: self.concurrency,
            dry_run: self.dry_run,
        }
    }

    /// Builds the implicit-ordering generator.
    #[must_use]
    pub fn ordering_generator(&self) -> OrderedResourcesGenerator {
        OrderedResourcesGenerator::with_kinds(self.ordered_kinds.iter().cloned())
            .with_resource_types(self.ordered_types.iter().cloned())
    }

    /// Builds the attribute diff engine.
    #[must_use]
    pub fn diff_engine(&self) -> DiffEngine {
        DiffEngine::with_ignored_fields(self.ignored_fields.iter().cloned())
    }
}

impl std::fmt::Display for StateBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::S3 => "s3",
            Self::Memory => "memory",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for StateBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown state backend '{other}'")),
        }
    }
}

impl StateConfig {
    /// Opens the configured state store.
    ///
    /// # Errors
    ///
    /// Returns an error if the local base directory cannot be determined.
    pub async fn open_store(&self) -> Result<Box<dyn StateStore>> {
        let store: Box<dyn StateStore> = match self.backend {
            StateBackend::Local => match &self.path {
                Some(path) => Box::new(LocalStateStore::with_base_dir(PathBuf::from(path))),
                None => Box::new(LocalStateStore::new()?),
            },
            StateBackend::S3 => Box::new(
                S3StateStore::new(
                    self.bucket.as_deref().unwrap_or_default(),
                    self.prefix.as_deref(),
                    self.region.as_deref(),
                )
                .await,
            ),
            StateBackend::Memory => Box::new(MemoryStateStore::new()),
        };
        Ok(store)
    }

    /// Local base directory this configuration points at.
    #[must_use]
    pub fn local_dir(&self) -> PathBuf {
        self.path
            .as_ref()
            .map_or_else(|| PathBuf::from(DEFAULT_STATE_DIR), PathBuf::from)
    }
}
