//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{KbError, Result};

/// Directory name under the source root that holds all produced artifacts.
pub const DEFAULT_OUTPUT_DIR: &str = ".knowledge";

/// How aggressively a run may skip work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingMode {
    /// Decisions may yield SKIP based on freshness.
    #[default]
    Incremental,
    /// Every file and directory is rebuilt.
    Full,
    /// Only directory knowledge files are forced; file caches stay incremental.
    FullKbRebuild,
}

impl fmt::Display for IndexingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incremental => write!(f, "incremental"),
            Self::Full => write!(f, "full"),
            Self::FullKbRebuild => write!(f, "full_kb_rebuild"),
        }
    }
}

impl FromStr for IndexingMode {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "incremental" => Ok(Self::Incremental),
            "full" => Ok(Self::Full),
            "full_kb_rebuild" => Ok(Self::FullKbRebuild),
            other => Err(KbError::InvalidConfig {
                details: format!(
                    "unknown indexing mode {other:?}; expected incremental, full, or full_kb_rebuild"
                ),
            }),
        }
    }
}

/// Full indexer configuration model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexingConfig {
    pub engine: EngineConfig,
    pub handlers: HandlerConfig,
    pub summarizer: SummarizerConfig,
    pub log: LogConfig,
}

/// Execution-engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker-pool width for concurrent task execution.
    pub max_concurrent_operations: usize,
    /// When false, the first task failure aborts dispatch of the whole run.
    pub continue_on_file_errors: bool,
    /// Indexing mode applied to decisions.
    pub mode: IndexingMode,
    /// Estimated seconds for one file analysis (plan duration estimates).
    pub estimated_file_analysis_secs: f64,
    /// Estimated seconds for one directory KB build.
    pub estimated_kb_build_secs: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 8,
            continue_on_file_errors: true,
            mode: IndexingMode::Incremental,
            estimated_file_analysis_secs: 30.0,
            estimated_kb_build_secs: 15.0,
        }
    }
}

/// Handler scope and filtering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HandlerConfig {
    /// Name of the artifact directory under the source root.
    pub output_dir_name: String,
    /// Index the project tree itself.
    pub enable_project_indexing: bool,
    /// Index vendored repositories under `<output>/git-clones/`.
    pub enable_git_clone_indexing: bool,
    /// Extra exclusion patterns (regex, matched against the full path).
    pub excluded_patterns: Vec<String>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            output_dir_name: DEFAULT_OUTPUT_DIR.to_string(),
            enable_project_indexing: true,
            enable_git_clone_indexing: true,
            excluded_patterns: Vec::new(),
        }
    }
}

/// LLM summarizer call parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Per-call timeout; a timed-out task fails and blocks its dependents.
    pub llm_timeout_secs: u64,
    /// Cap on source bytes handed to a single analysis request.
    pub max_file_bytes: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            llm_timeout_secs: 120,
            max_file_bytes: 512 * 1024,
        }
    }
}

/// JSONL run-event log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Log file path; `None` disables file logging (events still reach stderr
    /// at warning severity and above).
    pub path: Option<PathBuf>,
    /// Maximum file size before rotation (bytes).
    pub max_size_bytes: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_size_bytes: 50 * 1024 * 1024,
        }
    }
}

impl IndexingConfig {
    /// Load configuration from `path`, the `KBX_CONFIG` env var, or defaults.
    ///
    /// An explicitly named file that does not exist is an error; the implicit
    /// default path is allowed to be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_config = if path.is_none() {
            env::var_os("KBX_CONFIG").map(PathBuf::from)
        } else {
            None
        };

        let effective = path.map_or(env_config, |p| Some(p.to_path_buf()));

        let cfg = match effective {
            Some(file) if file.exists() => {
                let raw = fs::read_to_string(&file).map_err(|e| KbError::io(&file, e))?;
                toml::from_str::<Self>(&raw)?
            }
            Some(file) => return Err(KbError::MissingConfig { path: file }),
            None => Self::default(),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate cross-field constraints and compile-check exclusion patterns.
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_concurrent_operations == 0 {
            return Err(KbError::InvalidConfig {
                details: "engine.max_concurrent_operations must be at least 1".to_string(),
            });
        }
        if self.handlers.output_dir_name.is_empty()
            || self.handlers.output_dir_name.contains('/')
            || self.handlers.output_dir_name.contains('\\')
        {
            return Err(KbError::InvalidConfig {
                details: format!(
                    "handlers.output_dir_name must be a bare directory name, got {:?}",
                    self.handlers.output_dir_name
                ),
            });
        }
        if !self.handlers.enable_project_indexing && !self.handlers.enable_git_clone_indexing {
            return Err(KbError::InvalidConfig {
                details: "at least one of project/git-clone indexing must be enabled".to_string(),
            });
        }
        if self.summarizer.llm_timeout_secs == 0 {
            return Err(KbError::InvalidConfig {
                details: "summarizer.llm_timeout_secs must be nonzero".to_string(),
            });
        }
        self.compiled_exclusions()?;
        Ok(())
    }

    /// Compile the configured exclusion patterns.
    pub fn compiled_exclusions(&self) -> Result<Vec<Regex>> {
        self.handlers
            .excluded_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| KbError::InvalidConfig {
                    details: format!("bad excluded_patterns entry {pattern:?}: {e}"),
                })
            })
            .collect()
    }
}
