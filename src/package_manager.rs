//! libalpm-backed package databases
//!
//! Reads `pacman.conf`, registers its sync databases with libalpm and copies
//! what the resolver needs (packages, groups, servers, `SigLevel`s, cache
//! directories) into a [`DatabaseSnapshot`].
//!
//! All ALPM log output is routed through the `log` crate via `log_cb`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use alpm::{Alpm, LogLevel, SigLevel};
use anyhow::{Context, Result};

use crate::logic::pkgset::Package;
use crate::logic::repo::{DatabaseSnapshot, Repo, RepoConfig};

/// Package databases described by a `pacman.conf`.
pub struct PackageManager {
    handle: Alpm,
    conf: pacmanconf::Config,
}

impl PackageManager {
    /// Initialize ALPM from a `pacman.conf`, using its `RootDir` and `DBPath`.
    pub fn from_pacman_conf<P: AsRef<Path>>(conf_path: P) -> Result<Self> {
        let conf_path = conf_path.as_ref();
        let conf_str = conf_path
            .to_str()
            .context("pacman.conf path contains invalid UTF-8")?;

        let conf = pacmanconf::Config::from_file(conf_str)
            .with_context(|| format!("Failed to parse pacman.conf at {}", conf_path.display()))?;

        let mut handle = Alpm::new(conf.root_dir.as_str(), conf.db_path.as_str()).with_context(|| {
            format!(
                "Failed to initialize ALPM with root={}, db_path={}",
                conf.root_dir, conf.db_path
            )
        })?;

        handle.set_log_cb((), log_cb);

        for repo in &conf.repos {
            let db = handle
                .register_syncdb_mut(repo.name.clone(), SigLevel::USE_DEFAULT)
                .with_context(|| format!("Failed to register sync db: {}", repo.name))?;

            for server in &repo.servers {
                db.add_server(server.clone())
                    .with_context(|| format!("Failed to add server {} to {}", server, repo.name))?;
            }

            log::debug!(
                "Registered sync db: {} with {} servers",
                repo.name,
                repo.servers.len()
            );
        }

        Ok(Self { handle, conf })
    }

    /// `SigLevel`s and cache directories from `pacman.conf`.
    pub fn repo_config(&self) -> RepoConfig {
        RepoConfig {
            siglevels: self
                .conf
                .repos
                .iter()
                .filter(|repo| !repo.sig_level.is_empty())
                .map(|repo| (repo.name.clone(), repo.sig_level.clone()))
                .collect::<BTreeMap<_, _>>(),
            default_siglevel: self.conf.sig_level.clone(),
            cache_dirs: self.conf.cache_dir.iter().map(PathBuf::from).collect(),
        }
    }

    /// Copy the sync and local databases.
    pub fn snapshot(&self) -> DatabaseSnapshot {
        let repos: Vec<Repo> = self
            .handle
            .syncdbs()
            .iter()
            .map(|db| Repo {
                name: db.name().to_string(),
                servers: db.servers().iter().map(str::to_string).collect(),
                packages: db.pkgs().iter().map(|pkg| convert(pkg, db.name())).collect(),
            })
            .collect();

        let local: Vec<Package> = self
            .handle
            .localdb()
            .pkgs()
            .iter()
            .map(|pkg| convert(pkg, ""))
            .collect();

        log::info!(
            "ALPM snapshot: {} sync databases, {} installed packages",
            repos.len(),
            local.len()
        );

        DatabaseSnapshot {
            repos,
            local,
            config: self.repo_config(),
        }
    }
}

fn convert(pkg: &alpm::Package, repo: &str) -> Package {
    Package {
        name: pkg.name().to_string(),
        version: pkg.version().to_string(),
        repo: repo.to_string(),
        depends: pkg.depends().iter().map(|dep| dep.to_string()).collect(),
        provides: pkg.provides().iter().map(|dep| dep.to_string()).collect(),
        groups: pkg.groups().iter().map(str::to_string).collect(),
        filename: pkg.filename().unwrap_or_default().to_string(),
        size: u64::try_from(pkg.size()).unwrap_or_default(),
        desc: pkg.desc().unwrap_or_default().to_string(),
        sha256sum: pkg.sha256sum().map(str::to_string),
        md5sum: pkg.md5sum().map(str::to_string),
    }
}

/// ALPM log callback that routes messages to Rust's `log` crate.
fn log_cb(level: LogLevel, msg: &str, _: &mut ()) {
    // ALPM messages often have trailing newlines - strip them
    let msg = msg.trim_end();

    if level.contains(LogLevel::ERROR) {
        log::error!("[ALPM] {}", msg);
    } else if level.contains(LogLevel::WARNING) {
        log::warn!("[ALPM] {}", msg);
    } else if level.contains(LogLevel::DEBUG) {
        log::debug!("[ALPM] {}", msg);
    } else if level.contains(LogLevel::FUNCTION) {
        log::trace!("[ALPM] {}", msg);
    } else {
        log::info!("[ALPM] {}", msg);
    }
}
