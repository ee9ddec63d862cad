//! Packages and name-keyed package sets

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};

use crate::logic::version::DepSpec;

/// One sync or local package.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Package {
    pub name: String,
    pub version: String,
    /// Owning repository; empty for local packages
    pub repo: String,
    pub depends: Vec<String>,
    pub provides: Vec<String>,
    pub groups: Vec<String>,
    pub filename: String,
    /// Compressed download size in bytes
    pub size: u64,
    pub desc: String,
    pub sha256sum: Option<String>,
    pub md5sum: Option<String>,
}

impl Package {
    pub fn new(name: impl Into<String>, version: impl Into<String>, repo: impl Into<String>) -> Self {
        let name = name.into();
        let version = version.into();
        Self {
            filename: format!("{}-{}-x86_64.pkg.tar.zst", name, version),
            name,
            version,
            repo: repo.into(),
            ..Default::default()
        }
    }

    pub fn with_depends<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = depends.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_provides<I, S>(mut self, provides: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provides = provides.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn satisfies(&self, dep: &DepSpec) -> bool {
        dep.satisfied_by(&self.name, &self.version, &self.provides)
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// First package of `packages` satisfying `dep`.
pub fn find_satisfier<'a, I>(packages: I, dep: &DepSpec) -> Option<&'a Package>
where
    I: IntoIterator<Item = &'a Package>,
{
    packages.into_iter().find(|pkg| pkg.satisfies(dep))
}

/// Set of packages keyed by name.
///
/// Adding a package whose name is already present replaces the stored one.
/// Equality compares names only: two sets holding different builds of the
/// same names are equal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PkgSet {
    pkgs: BTreeMap<String, Package>,
}

impl PkgSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pkg: Package) {
        self.pkgs.insert(pkg.name.clone(), pkg);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pkgs.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.pkgs.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Package> {
        self.pkgs.remove(name)
    }

    pub fn len(&self) -> usize {
        self.pkgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pkgs.is_empty()
    }

    /// Packages in name order
    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.pkgs.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pkgs.keys().map(String::as_str)
    }

    /// In-place union; packages of `other` win on name clashes.
    pub fn union_with(&mut self, other: &PkgSet) {
        for pkg in other.iter() {
            self.add(pkg.clone());
        }
    }

    pub fn union(&self, other: &PkgSet) -> PkgSet {
        let mut out = self.clone();
        out.union_with(other);
        out
    }

    /// Packages of `self` whose names also appear in `other`.
    pub fn intersection(&self, other: &PkgSet) -> PkgSet {
        self.iter()
            .filter(|pkg| other.contains(&pkg.name))
            .cloned()
            .collect()
    }

    pub fn intersect_with(&mut self, other: &PkgSet) {
        self.pkgs.retain(|name, _| other.contains(name));
    }
}

impl PartialEq for PkgSet {
    fn eq(&self, other: &Self) -> bool {
        self.pkgs.len() == other.pkgs.len() && self.pkgs.keys().eq(other.pkgs.keys())
    }
}

impl Eq for PkgSet {}

impl FromIterator<Package> for PkgSet {
    fn from_iter<T: IntoIterator<Item = Package>>(iter: T) -> Self {
        let mut set = PkgSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<Package> for PkgSet {
    fn extend<T: IntoIterator<Item = Package>>(&mut self, iter: T) {
        for pkg in iter {
            self.add(pkg);
        }
    }
}

impl IntoIterator for PkgSet {
    type Item = Package;
    type IntoIter = btree_map::IntoValues<String, Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.pkgs.into_values()
    }
}

impl<'a> IntoIterator for &'a PkgSet {
    type Item = &'a Package;
    type IntoIter = btree_map::Values<'a, String, Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.pkgs.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let mut set = PkgSet::new();
        set.add(Package::new("mate-panel", "1.26.0-1", "extra"));
        set.add(Package::new("mate-panel", "1.28.0-1", "reborn"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("mate-panel").map(|p| p.repo.as_str()), Some("reborn"));
    }

    #[test]
    fn test_union_prefers_other() {
        let a: PkgSet = [Package::new("bash", "5.2-1", "core")].into_iter().collect();
        let b: PkgSet = [
            Package::new("bash", "5.2-2", "testing"),
            Package::new("zsh", "5.9-1", "extra"),
        ]
        .into_iter()
        .collect();

        let merged = a.union(&b);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("bash").map(|p| p.repo.as_str()), Some("testing"));
        assert_eq!(merged, b.union(&a));
    }

    #[test]
    fn test_intersection_by_name() {
        let a: PkgSet = [
            Package::new("bash", "5.2-1", "core"),
            Package::new("vim", "9.1-1", "extra"),
        ]
        .into_iter()
        .collect();
        let b: PkgSet = [Package::new("bash", "5.2-9", "testing")].into_iter().collect();

        let common = a.intersection(&b);
        assert_eq!(common.names().collect::<Vec<_>>(), vec!["bash"]);
        assert_eq!(common.get("bash").map(|p| p.repo.as_str()), Some("core"));

        let mut c = a.clone();
        c.intersect_with(&b);
        assert_eq!(c, common);
    }

    #[test]
    fn test_find_satisfier() {
        let pkgs = vec![
            Package::new("bash", "5.2.26-2", "core").with_provides(["sh"]),
            Package::new("dash", "0.5.12-1", "extra").with_provides(["sh"]),
        ];
        let found = find_satisfier(&pkgs, &DepSpec::parse("sh"));
        assert_eq!(found.map(|p| p.name.as_str()), Some("bash"));
        assert!(find_satisfier(&pkgs, &DepSpec::parse("zsh")).is_none());
    }
}
