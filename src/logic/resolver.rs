//! Dependency resolver
//!
//! Turns requested package and group names into the set of sync packages to
//! download.
//!
//! # Resolution Rules
//!
//! | Step | What happens |
//! |------|--------------|
//! | names | each name is looked up as a package (repo priority, pinned groups honored), then as a group (first repo defining it) |
//! | closure | breadth-first over `depends`; a dependency already satisfied by an installed package is skipped unless `alldeps` |
//! | needed | packages with a verified copy in the cache are dropped |
//!
//! Unknown names and unsatisfiable dependencies are returned as data; the
//! resolver itself never fails.

use std::collections::{BTreeSet, HashSet, VecDeque};

use serde::Serialize;

use crate::error::{PlannerError, Result};
use crate::logic::cache::missing_from_cache;
use crate::logic::pkgset::{PkgSet, find_satisfier};
use crate::logic::repo::{PackageDatabase, PinPolicy, RepoIndex};
use crate::logic::version::DepSpec;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Skip dependency resolution
    pub nodeps: bool,
    /// Resolve dependencies even when an installed package satisfies them
    pub alldeps: bool,
    /// Drop packages already present in the cache
    pub needed: bool,
}

/// Outcome of a resolution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Resolution {
    pub resolved: PkgSet,
    pub not_found: BTreeSet<String>,
    /// Unsatisfiable dependency strings, in discovery order, duplicates kept
    pub missing_deps: Vec<String>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.not_found.is_empty() && self.missing_deps.is_empty()
    }

    /// Fail with [`PlannerError::Unresolved`] unless everything resolved.
    pub fn ensure_complete(&self) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }
        Err(PlannerError::Unresolved {
            not_found: self.not_found.clone(),
            missing_deps: self.missing_deps.clone(),
        })
    }
}

pub struct DependencyResolver<'a> {
    db: &'a dyn PackageDatabase,
    index: RepoIndex<'a>,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(db: &'a dyn PackageDatabase, policy: &PinPolicy) -> Self {
        Self {
            db,
            index: RepoIndex::new(db.sync_repos(), policy),
        }
    }

    pub fn resolve(&self, requested: &BTreeSet<String>, options: ResolveOptions) -> Resolution {
        let mut resolved = PkgSet::new();
        let mut found: BTreeSet<String> = BTreeSet::new();

        for name in requested {
            if let Some(pkg) = self.index.find_package(name) {
                log::debug!("{} found in {}", name, pkg.repo);
                resolved.add(pkg.clone());
            } else if let Some(members) = self.index.find_group(name) {
                log::debug!("{} is a group of {} packages", name, members.len());
                found.insert(name.clone());
                resolved.extend(members.into_iter().cloned());
            }
        }

        let mut missing_deps = Vec::new();
        if !resolved.is_empty() && !options.nodeps {
            self.close_dependencies(&mut resolved, &mut missing_deps, options.alldeps);
        }

        found.extend(resolved.names().map(str::to_string));
        let not_found: BTreeSet<String> = requested.difference(&found).cloned().collect();

        if options.needed {
            let cache_dirs = self.db.repo_config().cache_dirs();
            resolved = missing_from_cache(&resolved, &cache_dirs);
        }

        for name in &not_found {
            log::warn!("Can't find package or group: {}", name);
        }
        for dep in &missing_deps {
            log::warn!("Can't resolve dependency: {}", dep);
        }
        log::debug!("Resolved {} packages", resolved.len());

        Resolution {
            resolved,
            not_found,
            missing_deps,
        }
    }

    /// Breadth-first dependency closure; each package name is queued once.
    fn close_dependencies(&self, resolved: &mut PkgSet, missing_deps: &mut Vec<String>, alldeps: bool) {
        let local = self.db.local_packages();
        let mut queue: VecDeque<_> = resolved.iter().cloned().collect();
        let mut seen: HashSet<String> = resolved.names().map(str::to_string).collect();

        while let Some(pkg) = queue.pop_front() {
            for dep_str in &pkg.depends {
                let dep = DepSpec::parse(dep_str);
                if !alldeps && find_satisfier(local, &dep).is_some() {
                    continue;
                }
                match self.index.find_satisfier(&dep) {
                    Some(provider) => {
                        resolved.add(provider.clone());
                        if seen.insert(provider.name.clone()) {
                            queue.push_back(provider.clone());
                        }
                    }
                    None => missing_deps.push(dep_str.clone()),
                }
            }
        }
    }
}
