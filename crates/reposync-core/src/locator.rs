//! Repository discovery from local filesystem state.
//!
//! Discovery is an ordered chain of [`DiscoveryStrategy`] values; the locator
//! takes the first one that yields any candidates. Entries that fail
//! validation are reported as [`DiscoveryWarning`]s instead of being dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ConfiguredRepository, SyncConfig};
use crate::error::DiscoveryError;
use crate::model::RepositoryRef;
use crate::obs::emit_discovery_warning;

/// Sub-directories of a search base probed for a configured name.
const PROBE_SUBDIRS: [&str; 3] = ["", "services", "mcp"];

/// Where a candidate came from. Configured entries win collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Origin {
    Configured,
    Scanned,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub repo: RepositoryRef,
    pub origin: Origin,
}

/// A repository excluded from the run, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryWarning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub reason: String,
}

impl From<&DiscoveryError> for DiscoveryWarning {
    fn from(err: &DiscoveryError) -> Self {
        Self {
            name: err.name().map(str::to_string),
            path: err.path().cloned(),
            reason: err.to_string(),
        }
    }
}

/// What one strategy produced.
#[derive(Debug, Default)]
pub struct StrategyOutcome {
    pub candidates: Vec<Candidate>,
    pub errors: Vec<DiscoveryError>,
}

/// One way of finding repositories.
pub trait DiscoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn discover(&self) -> StrategyOutcome;
}

/// Final discovery result: unique names, sorted by name.
#[derive(Debug, Default)]
pub struct Discovery {
    pub repositories: Vec<RepositoryRef>,
    pub warnings: Vec<DiscoveryWarning>,
}

/// Whether `path` is a directory holding git metadata.
///
/// `.git` may be a file for linked worktrees and submodules.
pub fn is_repository(path: &Path) -> bool {
    path.is_dir() && path.join(".git").exists()
}

fn validate(name: &str, path: &Path) -> Result<PathBuf, DiscoveryError> {
    if !path.exists() {
        return Err(DiscoveryError::MissingPath {
            name: name.to_string(),
            path: path.to_path_buf(),
        });
    }
    if !is_repository(path) {
        return Err(DiscoveryError::NotARepository {
            name: name.to_string(),
            path: path.to_path_buf(),
        });
    }
    std::fs::canonicalize(path).map_err(|source| DiscoveryError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Repositories named in configuration.
pub struct ConfiguredStrategy {
    entries: Vec<ConfiguredRepository>,
    organization: Option<String>,
    search_bases: Vec<PathBuf>,
}

impl ConfiguredStrategy {
    pub fn new(entries: Vec<ConfiguredRepository>, project_root: &Path) -> Self {
        let mut search_bases = Vec::new();
        if let Some(parent) = project_root.parent() {
            search_bases.push(parent.to_path_buf());
        }
        search_bases.push(project_root.to_path_buf());
        Self {
            entries,
            organization: None,
            search_bases,
        }
    }

    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization;
        self
    }

    fn probe(&self, name: &str) -> Option<PathBuf> {
        self.search_bases.iter().find_map(|base| {
            PROBE_SUBDIRS
                .iter()
                .map(|sub| base.join(sub).join(name))
                .find(|p| is_repository(p))
        })
    }

    fn make_ref(&self, name: &str, path: PathBuf) -> RepositoryRef {
        let repo = RepositoryRef::new(name, path);
        match &self.organization {
            Some(org) => repo.with_organization(org.clone()),
            None => repo,
        }
    }
}

impl DiscoveryStrategy for ConfiguredStrategy {
    fn name(&self) -> &'static str {
        "configured"
    }

    fn discover(&self) -> StrategyOutcome {
        let mut outcome = StrategyOutcome::default();
        for entry in &self.entries {
            let (path, origin) = match &entry.path {
                Some(path) => (path.clone(), Origin::Configured),
                None => match self.probe(&entry.name) {
                    Some(path) => (path, Origin::Scanned),
                    None => {
                        outcome.errors.push(DiscoveryError::Unresolved {
                            name: entry.name.clone(),
                        });
                        continue;
                    }
                },
            };
            match validate(&entry.name, &path) {
                Ok(path) => outcome.candidates.push(Candidate {
                    repo: self.make_ref(&entry.name, path),
                    origin,
                }),
                Err(err) => outcome.errors.push(err),
            }
        }
        outcome
    }
}

/// One-level scan of base directories for git working directories.
pub struct ScanStrategy {
    base_dirs: Vec<PathBuf>,
}

impl ScanStrategy {
    pub fn new(base_dirs: Vec<PathBuf>) -> Self {
        Self { base_dirs }
    }
}

impl DiscoveryStrategy for ScanStrategy {
    fn name(&self) -> &'static str {
        "scan"
    }

    fn discover(&self) -> StrategyOutcome {
        let mut outcome = StrategyOutcome::default();
        for base in &self.base_dirs {
            if !base.is_dir() {
                debug!(dir = %base.display(), "scan directory does not exist");
                continue;
            }
            let entries = match std::fs::read_dir(base) {
                Ok(entries) => entries,
                Err(source) => {
                    outcome.errors.push(DiscoveryError::Io {
                        path: base.clone(),
                        source,
                    });
                    continue;
                }
            };
            let mut found: Vec<(String, PathBuf)> = entries
                .filter_map(|e| e.ok())
                .filter_map(|e| {
                    let name = e.file_name().to_string_lossy().into_owned();
                    let path = e.path();
                    (!name.starts_with('.') && is_repository(&path)).then_some((name, path))
                })
                .collect();
            found.sort();
            for (name, path) in found {
                match validate(&name, &path) {
                    Ok(path) => outcome.candidates.push(Candidate {
                        repo: RepositoryRef::new(name, path),
                        origin: Origin::Scanned,
                    }),
                    Err(err) => outcome.errors.push(err),
                }
            }
        }
        outcome
    }
}

/// Runs the strategy chain and normalises the result.
pub struct RepositoryLocator {
    strategies: Vec<Box<dyn DiscoveryStrategy>>,
}

impl RepositoryLocator {
    pub fn new(strategies: Vec<Box<dyn DiscoveryStrategy>>) -> Self {
        Self { strategies }
    }

    /// Configured repositories first (when any are listed), then a scan.
    pub fn from_config(config: &SyncConfig) -> Self {
        let mut strategies: Vec<Box<dyn DiscoveryStrategy>> = Vec::new();
        if let Some(entries) = &config.repositories {
            strategies.push(Box::new(
                ConfiguredStrategy::new(entries.clone(), &config.project_root)
                    .with_organization(config.organization.clone()),
            ));
        }
        strategies.push(Box::new(ScanStrategy::new(config.scan_dirs.clone())));
        Self::new(strategies)
    }

    pub fn discover(&self) -> Discovery {
        let mut warnings = Vec::new();
        let mut repositories = Vec::new();

        for strategy in &self.strategies {
            let outcome = strategy.discover();
            for err in &outcome.errors {
                emit_discovery_warning(strategy.name(), err);
                warnings.push(DiscoveryWarning::from(err));
            }
            if !outcome.candidates.is_empty() {
                debug!(
                    strategy = strategy.name(),
                    count = outcome.candidates.len(),
                    "discovery strategy selected"
                );
                let (unique, duplicates) = dedupe(outcome.candidates);
                for err in &duplicates {
                    emit_discovery_warning(strategy.name(), err);
                    warnings.push(DiscoveryWarning::from(err));
                }
                repositories = unique;
                break;
            }
        }

        Discovery {
            repositories,
            warnings,
        }
    }
}

/// Unique by name and by path; configured origin wins, then first seen.
/// Every candidate left out comes back as a [`DiscoveryError::Duplicate`].
fn dedupe(mut candidates: Vec<Candidate>) -> (Vec<RepositoryRef>, Vec<DiscoveryError>) {
    candidates.sort_by_key(|c| c.origin);
    let mut by_name: HashMap<String, PathBuf> = HashMap::new();
    let mut by_path: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut repos = Vec::with_capacity(candidates.len());
    let mut duplicates = Vec::new();
    for candidate in candidates {
        let repo = candidate.repo;
        let kept = by_name
            .get(&repo.name)
            .or_else(|| by_path.get(&repo.path))
            .cloned();
        if let Some(kept) = kept {
            duplicates.push(DiscoveryError::Duplicate {
                name: repo.name,
                path: repo.path,
                kept,
            });
            continue;
        }
        by_name.insert(repo.name.clone(), repo.path.clone());
        by_path.insert(repo.path.clone(), repo.path.clone());
        repos.push(repo);
    }
    repos.sort_by(|a, b| a.name.cmp(&b.name));
    (repos, duplicates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_repo(dir: &Path) {
        std::fs::create_dir_all(dir.join(".git")).unwrap();
    }

    #[test]
    fn test_scan_finds_repos_one_level_deep_sorted() {
        let root = tempfile::tempdir().unwrap();
        let services = root.path().join("services");
        make_repo(&services.join("zeta"));
        make_repo(&services.join("alpha"));
        make_repo(&services.join(".hidden"));
        make_repo(&services.join("nested").join("deep"));
        std::fs::create_dir_all(services.join("plain")).unwrap();

        let locator = RepositoryLocator::new(vec![Box::new(ScanStrategy::new(vec![
            services.clone(),
            root.path().join("missing"),
        ]))]);
        let found = locator.discover();
        let names: Vec<&str> = found.repositories.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(found.warnings.is_empty());
        assert!(found.repositories.iter().all(|r| r.path.is_absolute()));
    }

    #[test]
    fn test_configured_invalid_entries_become_warnings() {
        let root = tempfile::tempdir().unwrap();
        let good = root.path().join("good");
        make_repo(&good);
        let not_repo = root.path().join("plain");
        std::fs::create_dir_all(&not_repo).unwrap();

        let strategy = ConfiguredStrategy::new(
            vec![
                ConfiguredRepository {
                    name: "good".to_string(),
                    path: Some(good.clone()),
                },
                ConfiguredRepository {
                    name: "plain".to_string(),
                    path: Some(not_repo),
                },
                ConfiguredRepository {
                    name: "gone".to_string(),
                    path: Some(root.path().join("gone")),
                },
            ],
            root.path(),
        );
        let found = RepositoryLocator::new(vec![Box::new(strategy)]).discover();
        assert_eq!(found.repositories.len(), 1);
        assert_eq!(found.repositories[0].name, "good");
        assert_eq!(found.warnings.len(), 2);
        assert_eq!(found.warnings[0].name.as_deref(), Some("plain"));
        assert_eq!(found.warnings[1].name.as_deref(), Some("gone"));
    }

    #[test]
    fn test_configured_name_is_probed_in_services() {
        let root = tempfile::tempdir().unwrap();
        make_repo(&root.path().join("services").join("billing"));
        let strategy = ConfiguredStrategy::new(
            vec![
                ConfiguredRepository {
                    name: "billing".to_string(),
                    path: None,
                },
                ConfiguredRepository {
                    name: "nowhere".to_string(),
                    path: None,
                },
            ],
            root.path(),
        )
        .with_organization(Some("stevedores-org".to_string()));
        let found = RepositoryLocator::new(vec![Box::new(strategy)]).discover();
        assert_eq!(found.repositories.len(), 1);
        assert_eq!(
            found.repositories[0].organization.as_deref(),
            Some("stevedores-org")
        );
        assert_eq!(found.warnings.len(), 1);
        assert!(found.warnings[0].reason.contains("nowhere"));
    }

    #[test]
    fn test_first_non_empty_strategy_wins() {
        let root = tempfile::tempdir().unwrap();
        make_repo(&root.path().join("services").join("scanned"));

        let empty_config = ConfiguredStrategy::new(Vec::new(), root.path());
        let scan = ScanStrategy::new(vec![root.path().join("services")]);
        let found = RepositoryLocator::new(vec![Box::new(empty_config), Box::new(scan)]).discover();
        assert_eq!(found.repositories.len(), 1);
        assert_eq!(found.repositories[0].name, "scanned");
    }

    #[test]
    fn test_configured_entry_wins_name_collision() {
        let probed = Candidate {
            repo: RepositoryRef::new("api", "/work/services/api"),
            origin: Origin::Scanned,
        };
        let configured = Candidate {
            repo: RepositoryRef::new("api", "/elsewhere/api"),
            origin: Origin::Configured,
        };
        let (repos, duplicates) = dedupe(vec![probed, configured]);
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].path, PathBuf::from("/elsewhere/api"));
        assert_eq!(duplicates.len(), 1);
        assert_eq!(
            duplicates[0].path(),
            Some(&PathBuf::from("/work/services/api"))
        );
    }

    #[test]
    fn test_same_name_in_two_scan_dirs_is_reported() {
        let root = tempfile::tempdir().unwrap();
        make_repo(&root.path().join("services").join("api"));
        make_repo(&root.path().join("mcp").join("api"));
        let config = SyncConfig::new(root.path());

        let found = RepositoryLocator::from_config(&config).discover();
        assert_eq!(found.repositories.len(), 1);
        assert!(found.repositories[0].path.ends_with("services/api"));
        assert_eq!(found.warnings.len(), 1);
        let warning = &found.warnings[0];
        assert_eq!(warning.name.as_deref(), Some("api"));
        assert!(warning.path.as_ref().unwrap().ends_with("mcp/api"));
        assert!(warning.reason.contains("duplicates"));
    }

    #[test]
    fn test_from_config_scans_when_nothing_configured() {
        let root = tempfile::tempdir().unwrap();
        make_repo(&root.path().join("mcp").join("tools"));
        make_repo(&root.path().join("agents").join("bots"));
        let config = SyncConfig::new(root.path());
        let found = RepositoryLocator::from_config(&config).discover();
        let names: Vec<&str> = found.repositories.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["bots", "tools"]);
    }
}
