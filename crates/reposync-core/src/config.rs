//! Run configuration, loaded once at startup.
//!
//! The on-disk format is JSON:
//!
//! ```json
//! {
//!   "organization": "stevedores-org",
//!   "repositories": ["billing", "gateway"],
//!   "local_paths": { "gateway": "../gateway" },
//!   "scan_dirs": ["services", "mcp", "agents"],
//!   "max_parallel": 4,
//!   "timeout_secs": 120
//! }
//! ```
//!
//! Every key is optional. Relative paths resolve against the project root.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Config file looked up under the project root when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/reposync.json";

pub const DEFAULT_SCAN_DIRS: [&str; 3] = ["services", "mcp", "agents"];
pub const DEFAULT_MAX_PARALLEL: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_COMMIT_MESSAGE: &str =
    "chore: automatic update of local files\n\nCommitted by reposync";

/// Raw file shape.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    organization: Option<String>,
    repositories: Option<Vec<String>>,
    #[serde(default)]
    local_paths: BTreeMap<String, PathBuf>,
    scan_dirs: Option<Vec<PathBuf>>,
    max_parallel: Option<usize>,
    timeout_secs: Option<u64>,
    commit_message: Option<String>,
}

/// A repository listed in configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredRepository {
    pub name: String,
    /// Explicit absolute path. `None` means "look in the usual places".
    pub path: Option<PathBuf>,
}

/// Immutable settings for one process.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Absolute project root.
    pub project_root: PathBuf,
    pub organization: Option<String>,
    /// `None` when no configuration lists repositories; discovery then scans.
    pub repositories: Option<Vec<ConfiguredRepository>>,
    /// Absolute base directories scanned one level deep.
    pub scan_dirs: Vec<PathBuf>,
    /// Upper bound on repositories processed at once.
    pub max_parallel: usize,
    /// Per git command.
    pub command_timeout: Duration,
    pub commit_message: String,
}

impl SyncConfig {
    /// Defaults for `project_root`, no configured repositories.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let scan_dirs = DEFAULT_SCAN_DIRS
            .iter()
            .map(|d| project_root.join(d))
            .collect();
        Self {
            project_root,
            organization: None,
            repositories: None,
            scan_dirs,
            max_parallel: DEFAULT_MAX_PARALLEL,
            command_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            commit_message: DEFAULT_COMMIT_MESSAGE.to_string(),
        }
    }

    /// Load configuration for `project_root`.
    ///
    /// An explicit `config_path` must exist. Without one, the default location
    /// is used when present and defaults apply otherwise.
    pub fn load(project_root: &Path, config_path: Option<&Path>) -> ConfigResult<Self> {
        if !project_root.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "project root is not a directory: {}",
                project_root.display()
            )));
        }
        let project_root = std::fs::canonicalize(project_root).map_err(|source| {
            ConfigError::Read {
                path: project_root.to_path_buf(),
                source,
            }
        })?;

        let path = match config_path {
            Some(p) => resolve(&project_root, p),
            None => {
                let default = project_root.join(DEFAULT_CONFIG_PATH);
                if !default.is_file() {
                    debug!(path = %default.display(), "no config file, using defaults");
                    return Ok(Self::new(project_root));
                }
                default
            }
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config");
        Self::from_json_str(project_root, &raw)
    }

    /// Parse and validate a JSON document against `project_root`.
    pub fn from_json_str(project_root: impl Into<PathBuf>, raw: &str) -> ConfigResult<Self> {
        let file: ConfigFile = serde_json::from_str(raw)?;
        Self::from_file(project_root.into(), file)
    }

    fn from_file(project_root: PathBuf, file: ConfigFile) -> ConfigResult<Self> {
        let mut config = Self::new(project_root);

        if let Some(max_parallel) = file.max_parallel {
            if max_parallel == 0 {
                return Err(ConfigError::Invalid(
                    "max_parallel must be at least 1".to_string(),
                ));
            }
            config.max_parallel = max_parallel;
        }
        if let Some(secs) = file.timeout_secs {
            if secs == 0 {
                return Err(ConfigError::Invalid(
                    "timeout_secs must be at least 1".to_string(),
                ));
            }
            config.command_timeout = Duration::from_secs(secs);
        }
        if let Some(message) = file.commit_message {
            if message.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "commit_message must not be empty".to_string(),
                ));
            }
            config.commit_message = message;
        }
        if let Some(dirs) = file.scan_dirs {
            config.scan_dirs = dirs
                .iter()
                .map(|d| resolve(&config.project_root, d))
                .collect();
        }
        config.organization = file.organization;

        let mut local_paths = file.local_paths;
        if let Some(names) = file.repositories {
            let mut seen = HashSet::new();
            let mut repositories = Vec::with_capacity(names.len());
            for name in names {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(ConfigError::Invalid(
                        "repository names must not be empty".to_string(),
                    ));
                }
                if !seen.insert(name.clone()) {
                    return Err(ConfigError::Invalid(format!(
                        "repository '{name}' is listed twice"
                    )));
                }
                let path = local_paths
                    .remove(&name)
                    .map(|p| resolve(&config.project_root, &p));
                repositories.push(ConfiguredRepository { name, path });
            }
            config.repositories = Some(repositories);
        }
        if let Some(orphan) = local_paths.keys().next() {
            return Err(ConfigError::Invalid(format!(
                "local_paths names '{orphan}', which is not listed in repositories"
            )));
        }

        Ok(config)
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_scan_standard_dirs() {
        let config = SyncConfig::new("/work");
        assert!(config.repositories.is_none());
        assert_eq!(
            config.scan_dirs,
            vec![
                PathBuf::from("/work/services"),
                PathBuf::from("/work/mcp"),
                PathBuf::from("/work/agents"),
            ]
        );
        assert_eq!(config.max_parallel, DEFAULT_MAX_PARALLEL);
    }

    #[test]
    fn test_parses_repositories_and_resolves_local_paths() {
        let config = SyncConfig::from_json_str(
            "/work",
            r#"{
                "organization": "stevedores-org",
                "repositories": ["billing", "gateway"],
                "local_paths": { "gateway": "../gateway", "billing": "/abs/billing" },
                "max_parallel": 2,
                "timeout_secs": 15
            }"#,
        )
        .unwrap();
        let repos = config.repositories.unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].path, Some(PathBuf::from("/abs/billing")));
        assert_eq!(repos[1].path, Some(PathBuf::from("/work/../gateway")));
        assert_eq!(config.organization.as_deref(), Some("stevedores-org"));
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.command_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = SyncConfig::from_json_str("/work", r#"{ "repos": [] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for raw in [
            r#"{ "max_parallel": 0 }"#,
            r#"{ "timeout_secs": 0 }"#,
            r#"{ "repositories": ["a", "a"] }"#,
            r#"{ "repositories": [" "] }"#,
            r#"{ "repositories": ["a"], "local_paths": { "b": "/b" } }"#,
        ] {
            let err = SyncConfig::from_json_str("/work", raw).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "accepted {raw}");
        }
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load(dir.path(), None).unwrap();
        assert!(config.repositories.is_none());
        assert!(config.project_root.is_absolute());
    }

    #[test]
    fn test_load_reads_default_location() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_PATH),
            r#"{ "repositories": ["svc-a"] }"#,
        )
        .unwrap();
        let config = SyncConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.repositories.unwrap()[0].name, "svc-a");
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = SyncConfig::load(dir.path(), Some(Path::new("nope.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = SyncConfig::load(dir.path(), Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
