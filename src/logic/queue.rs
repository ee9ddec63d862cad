//! Download queue
//!
//! A fully resolved request becomes a list of databases and packages to
//! fetch, each with its mirror URLs and whether its detached signature
//! should be fetched too.

use serde::Serialize;
use strum::{Display, EnumString};

use crate::error::Result;
use crate::logic::pkgset::Package;
use crate::logic::repo::{PackageDatabase, Repo};
use crate::logic::resolver::Resolution;

/// Upper bound of mirror URLs per file
pub const MAX_URLS: usize = 15;

/// What a signature would be downloaded for; also the `SigLevel` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum SigTarget {
    Database,
    Package,
}

/// Whether to download the signature of a file.
///
/// `insistence` is the number of `--sigs` flags: 0 never, 1 when the
/// repository's `SigLevel` asks for signatures, 2 and more always.
pub fn needs_sig(siglevel: Option<&str>, insistence: u8, target: SigTarget) -> bool {
    if insistence > 1 {
        return true;
    }
    if insistence == 1 {
        if let Some(level) = siglevel {
            return ["Required", "Optional"]
                .iter()
                .any(|kind| level == *kind || level == format!("{}{}", target, kind));
        }
    }
    false
}

/// Join a mirror base URL and a file name.
pub fn join_url(server: &str, filename: &str) -> String {
    format!("{}/{}", server.trim_end_matches('/'), filename)
}

/// Mirror URLs for a file, first [`MAX_URLS`] distinct ones in server order.
pub fn mirror_urls(servers: &[String], filename: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for server in servers {
        let url = join_url(server, filename);
        if !urls.contains(&url) {
            urls.push(url);
        }
        if urls.len() == MAX_URLS {
            break;
        }
    }
    urls
}

/// Convert bytes to human-readable size string.
pub fn humanize_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GiB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MiB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KiB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DbEntry {
    pub repo: String,
    pub filename: String,
    pub urls: Vec<String>,
    pub wants_sig: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PkgEntry {
    pub package: Package,
    pub urls: Vec<String>,
    pub wants_sig: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadQueue {
    pub dbs: Vec<DbEntry>,
    pub packages: Vec<PkgEntry>,
}

impl DownloadQueue {
    pub fn is_empty(&self) -> bool {
        self.dbs.is_empty() && self.packages.is_empty()
    }

    /// Total bytes of the queued packages
    pub fn download_size(&self) -> u64 {
        self.packages.iter().map(|entry| entry.package.size).sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Queue the sync databases as well
    pub download_databases: bool,
    /// Number of `--sigs` flags
    pub sigs: u8,
}

pub struct DownloadQueueBuilder<'a> {
    db: &'a dyn PackageDatabase,
}

impl<'a> DownloadQueueBuilder<'a> {
    pub fn new(db: &'a dyn PackageDatabase) -> Self {
        Self { db }
    }

    fn repo(&self, name: &str) -> Option<&'a Repo> {
        self.db.sync_repos().iter().find(|repo| repo.name == name)
    }

    /// Build the queue for a resolution.
    ///
    /// Fails with [`PlannerError::Unresolved`](crate::error::PlannerError::Unresolved)
    /// when any name or dependency was left unresolved.
    pub fn build(&self, resolution: &Resolution, options: QueueOptions) -> Result<DownloadQueue> {
        resolution.ensure_complete()?;
        let config = self.db.repo_config();
        let mut queue = DownloadQueue::default();

        if options.download_databases {
            for repo in self.db.sync_repos() {
                let filename = repo.db_filename();
                queue.dbs.push(DbEntry {
                    repo: repo.name.clone(),
                    urls: mirror_urls(&repo.servers, &filename),
                    filename,
                    wants_sig: needs_sig(config.siglevel(&repo.name), options.sigs, SigTarget::Database),
                });
            }
        }

        for pkg in &resolution.resolved {
            let servers = self.repo(&pkg.repo).map(|r| r.servers.as_slice()).unwrap_or_default();
            let urls = mirror_urls(servers, &pkg.filename);
            if urls.is_empty() {
                log::warn!("No servers configured for {} ({})", pkg.name, pkg.repo);
            }
            queue.packages.push(PkgEntry {
                package: pkg.clone(),
                urls,
                wants_sig: needs_sig(config.siglevel(&pkg.repo), options.sigs, SigTarget::Package),
            });
        }

        log::info!(
            "Download queue: {} databases, {} packages, {}",
            queue.dbs.len(),
            queue.packages.len(),
            humanize_size(queue.download_size())
        );
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlannerError;
    use crate::logic::pkgset::PkgSet;
    use crate::logic::repo::{DatabaseSnapshot, RepoConfig};
    use std::collections::{BTreeMap, BTreeSet};

    #[test]
    fn test_needs_sig_policy() {
        assert!(needs_sig(Some("Required"), 1, SigTarget::Package));
        assert!(needs_sig(Some("PackageOptional"), 1, SigTarget::Package));
        assert!(!needs_sig(Some("DatabaseRequired"), 1, SigTarget::Package));
        assert!(needs_sig(Some("DatabaseRequired"), 1, SigTarget::Database));
        assert!(!needs_sig(Some("Never"), 1, SigTarget::Package));
        assert!(!needs_sig(Some("Optional"), 0, SigTarget::Package));
        assert!(!needs_sig(None, 1, SigTarget::Package));
        assert!(needs_sig(None, 2, SigTarget::Database));
    }

    #[test]
    fn test_humanize_size() {
        assert_eq!(humanize_size(512), "512 B");
        assert_eq!(humanize_size(1536), "1.50 KiB");
        assert_eq!(humanize_size(1048576), "1.00 MiB");
        assert_eq!(humanize_size(1073741824), "1.00 GiB");
    }

    #[test]
    fn test_mirror_urls_capped_and_deduplicated() {
        let servers: Vec<String> = (0..20).map(|i| format!("https://m{}.example/core/os/x86_64/", i)).collect();
        let urls = mirror_urls(&servers, "bash.pkg.tar.zst");
        assert_eq!(urls.len(), MAX_URLS);
        assert_eq!(urls[0], "https://m0.example/core/os/x86_64/bash.pkg.tar.zst");

        let dup = vec!["https://a/".to_string(), "https://a".to_string()];
        assert_eq!(mirror_urls(&dup, "f").len(), 1);
    }

    fn snapshot() -> DatabaseSnapshot {
        DatabaseSnapshot {
            repos: vec![
                Repo::new("core", vec!["https://mirror.example/core".into()])
                    .with_package(Package::new("bash", "5.2-1", "")),
            ],
            local: vec![],
            config: RepoConfig {
                siglevels: BTreeMap::from([("core".to_string(), vec!["Required".to_string()])]),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_build_queue() {
        let db = snapshot();
        let resolution = Resolution {
            resolved: db.repos[0].packages.iter().cloned().collect::<PkgSet>(),
            ..Default::default()
        };
        let queue = DownloadQueueBuilder::new(&db)
            .build(
                &resolution,
                QueueOptions {
                    download_databases: true,
                    sigs: 1,
                },
            )
            .expect("complete resolution"); // test: nothing unresolved

        assert_eq!(queue.dbs.len(), 1);
        assert_eq!(queue.dbs[0].urls, vec!["https://mirror.example/core/core.db".to_string()]);
        assert!(queue.dbs[0].wants_sig);
        assert_eq!(queue.packages.len(), 1);
        assert!(queue.packages[0].wants_sig);
        assert!(queue.packages[0].urls[0].ends_with("/core/bash-5.2-1-x86_64.pkg.tar.zst"));
    }

    #[test]
    fn test_incomplete_resolution_is_refused() {
        let db = snapshot();
        let resolution = Resolution {
            not_found: BTreeSet::from(["emacs".to_string()]),
            ..Default::default()
        };
        let err = DownloadQueueBuilder::new(&db)
            .build(&resolution, QueueOptions::default())
            .unwrap_err();
        assert!(matches!(err, PlannerError::Unresolved { .. }));
    }
}
