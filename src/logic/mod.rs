//! Logic modules: the package side of the planner.
//!
//! Requested package and group names are resolved against prioritized sync
//! repositories into a download queue.
//!
//! # Modules
//!
//! - `version` — dependency specs and version ordering
//! - `pkgset` — packages and name-keyed package sets
//! - `repo` — repositories, pinning policy, database snapshots
//! - `cache` — package cache checksum verification
//! - `resolver` — dependency closure
//! - `queue` — download queue and signature policy

pub mod cache;
pub mod pkgset;
pub mod queue;
pub mod repo;
pub mod resolver;
pub mod version;
