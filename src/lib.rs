//! RebornOS installation planner library
//!
//! Two planners share this crate:
//!
//! - the disk side computes partition sizes and a role→device layout for a
//!   whole disk, then turns it into storage operations run by an executor;
//! - the package side resolves package and group names against prioritized
//!   repositories and writes the download queue as a metalink document.

pub mod cli;
pub mod config_file;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod hardware;
pub mod logic;
pub mod metalink;
#[cfg(feature = "alpm")]
pub mod package_manager;
pub mod privilege;
pub mod process_guard;
pub mod staging;
pub mod types;

// Re-export main types for convenience
pub use config_file::AutoPartitionConfig;
pub use error::{PlannerError, Result};
pub use events::{Event, EventKind, EventSink};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use types::{BootMode, Bootloader, DiskSpec, FeatureFlags, FsKind, PartitionTable, Role};

// Hardware detection
pub use hardware::{FirmwareMode, HardwareInfo};

// Disk planner
pub use engine::autopart::{AutoPartition, AutoPartitionOutcome};
pub use engine::layout::{Layout, LayoutPlanner, get_partition_path};
pub use engine::sizes::{SizeModel, SizePlan};
pub use engine::storage::StorageOp;
pub use executor::{DryRunExecutor, PlanExecutor, ShellExecutor, ShellProbe};
pub use privilege::PrivilegeScope;
pub use staging::StagingTable;

// Package planner
pub use logic::pkgset::{Package, PkgSet};
pub use logic::queue::{DownloadQueue, DownloadQueueBuilder};
pub use logic::repo::{DatabaseSnapshot, PinPolicy, Repo};
pub use logic::resolver::{DependencyResolver, Resolution, ResolveOptions};
pub use metalink::{get_info, to_metalink};
#[cfg(feature = "alpm")]
pub use package_manager::PackageManager;
