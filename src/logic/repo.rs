//! Sync repositories and lookup priority
//!
//! Repositories are searched in declaration order. A [`PinPolicy`] names a
//! set of groups whose member packages may only come from one repository:
//! a package belonging to a pinned group is looked up in that repository and
//! nowhere else, whatever the general order says.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::logic::pkgset::{Package, find_satisfier};
use crate::logic::version::DepSpec;

/// Default package cache of pacman
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/pacman/pkg";

/// One sync database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Repo {
    pub name: String,
    /// Mirror base URLs, already expanded for this repository
    pub servers: Vec<String>,
    pub packages: Vec<Package>,
}

impl Repo {
    pub fn new(name: impl Into<String>, servers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            servers,
            packages: Vec::new(),
        }
    }

    /// Add a package, owning it to this repository.
    pub fn with_package(mut self, mut pkg: Package) -> Self {
        pkg.repo = self.name.clone();
        self.packages.push(pkg);
        self
    }

    pub fn get_pkg(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|pkg| pkg.name == name)
    }

    /// Members of a group, or `None` when this repository does not define it.
    pub fn read_group(&self, group: &str) -> Option<Vec<&Package>> {
        let members: Vec<&Package> = self.packages.iter().filter(|pkg| pkg.in_group(group)).collect();
        (!members.is_empty()).then_some(members)
    }

    pub fn find_satisfier(&self, dep: &DepSpec) -> Option<&Package> {
        find_satisfier(&self.packages, dep)
    }

    /// Database file name, e.g. `core.db`
    pub fn db_filename(&self) -> String {
        format!("{}.db", self.name)
    }
}

/// Per-repository settings relevant to downloading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Repository name → `SigLevel` tokens
    pub siglevels: BTreeMap<String, Vec<String>>,
    /// Global `SigLevel`, used for repositories without their own
    pub default_siglevel: Vec<String>,
    pub cache_dirs: Vec<PathBuf>,
}

impl RepoConfig {
    /// First `SigLevel` token of a repository.
    pub fn siglevel(&self, repo: &str) -> Option<&str> {
        self.siglevels
            .get(repo)
            .unwrap_or(&self.default_siglevel)
            .first()
            .map(String::as_str)
    }

    pub fn cache_dirs(&self) -> Vec<PathBuf> {
        if self.cache_dirs.is_empty() {
            vec![PathBuf::from(DEFAULT_CACHE_DIR)]
        } else {
            self.cache_dirs.clone()
        }
    }
}

/// Groups whose members must come from a single repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinPolicy {
    pub repo: String,
    pub groups: Vec<String>,
}

impl Default for PinPolicy {
    fn default() -> Self {
        Self {
            repo: "reborn".to_string(),
            groups: vec!["cinnamon".into(), "mate".into(), "mate-extra".into()],
        }
    }
}

impl PinPolicy {
    pub fn none() -> Self {
        Self {
            repo: String::new(),
            groups: Vec::new(),
        }
    }
}

/// Source of sync and local package data.
pub trait PackageDatabase {
    /// Sync repositories in priority order
    fn sync_repos(&self) -> &[Repo];
    /// Installed packages
    fn local_packages(&self) -> &[Package];
    fn repo_config(&self) -> &RepoConfig;
}

/// Serializable copy of the package databases.
///
/// Produced from libalpm under the `alpm` feature, or written by hand for
/// offline use and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSnapshot {
    pub repos: Vec<Repo>,
    pub local: Vec<Package>,
    pub config: RepoConfig,
}

impl DatabaseSnapshot {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PlannerError::config(format!("Failed to read database snapshot {}: {}", path.display(), e))
        })?;
        let mut snapshot: Self = serde_json::from_str(&content)?;
        for repo in &mut snapshot.repos {
            for pkg in &mut repo.packages {
                pkg.repo = repo.name.clone();
            }
        }
        log::debug!(
            "Loaded snapshot {}: {} repos, {} local packages",
            path.display(),
            snapshot.repos.len(),
            snapshot.local.len()
        );
        Ok(snapshot)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl PackageDatabase for DatabaseSnapshot {
    fn sync_repos(&self) -> &[Repo] {
        &self.repos
    }

    fn local_packages(&self) -> &[Package] {
        &self.local
    }

    fn repo_config(&self) -> &RepoConfig {
        &self.config
    }
}

/// Priority-ordered view over the sync repositories.
#[derive(Debug, Clone)]
pub struct RepoIndex<'a> {
    repos: &'a [Repo],
    pinned_repo: Option<&'a Repo>,
    pinned_pkgs: HashSet<&'a str>,
    pinned_groups: HashSet<String>,
}

impl<'a> RepoIndex<'a> {
    pub fn new(repos: &'a [Repo], policy: &PinPolicy) -> Self {
        let pinned_repo = repos.iter().find(|repo| repo.name == policy.repo);
        if pinned_repo.is_none() && !policy.groups.is_empty() {
            log::debug!("Pinned repository '{}' is not configured", policy.repo);
        }

        let pinned_pkgs = pinned_repo
            .map(|repo| {
                policy
                    .groups
                    .iter()
                    .filter_map(|group| repo.read_group(group))
                    .flatten()
                    .map(|pkg| pkg.name.as_str())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            repos,
            pinned_repo,
            pinned_pkgs,
            pinned_groups: policy.groups.iter().cloned().collect(),
        }
    }

    pub fn is_pinned(&self, name: &str) -> bool {
        self.pinned_pkgs.contains(name)
    }

    /// Repositories to search for `name`, best first.
    pub fn lookup_order(&self, name: &str) -> Vec<&'a Repo> {
        match self.pinned_repo {
            Some(repo) if self.is_pinned(name) => vec![repo],
            _ => self.repos.iter().collect(),
        }
    }

    /// Repository that provides the package `name`.
    pub fn resolve(&self, name: &str) -> Option<&'a Repo> {
        self.lookup_order(name)
            .into_iter()
            .find(|repo| repo.get_pkg(name).is_some())
    }

    pub fn find_package(&self, name: &str) -> Option<&'a Package> {
        self.resolve(name).and_then(|repo| repo.get_pkg(name))
    }

    /// Members of `group`: from the pinned repository for pinned groups,
    /// otherwise from the first repository that defines it.
    pub fn find_group(&self, group: &str) -> Option<Vec<&'a Package>> {
        if self.pinned_groups.contains(group) {
            if let Some(members) = self.pinned_repo.and_then(|repo| repo.read_group(group)) {
                return Some(members);
            }
        }
        self.repos.iter().find_map(|repo| repo.read_group(group))
    }

    /// First package, in repository order, satisfying `dep`.
    pub fn find_satisfier(&self, dep: &DepSpec) -> Option<&'a Package> {
        self.repos.iter().find_map(|repo| repo.find_satisfier(dep))
    }
}
