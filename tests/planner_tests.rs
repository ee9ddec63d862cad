//! End-to-end planner tests through the public library API
//!
//! Disk side: profile → job → dry-run execution against a scripted probe.
//! Package side: snapshot file → resolution → download queue → metalink.

use std::collections::BTreeSet;
use std::path::Path;

use reborn_planner::engine::reconcile::SystemProbe;
use reborn_planner::engine::storage::StorageOp;
use reborn_planner::error::Result;
use reborn_planner::logic::queue::{MAX_URLS, QueueOptions};
use reborn_planner::logic::repo::RepoConfig;
use reborn_planner::{
    AutoPartitionConfig, Bootloader, DatabaseSnapshot, DependencyResolver, DownloadQueueBuilder,
    DryRunExecutor, EventKind, EventSink, FirmwareMode, HardwareInfo, Package, PinPolicy,
    PlannerError, Repo, ResolveOptions, Role, get_info, get_partition_path, to_metalink,
};

// =============================================================================
// Disk planner
// =============================================================================

/// A live system where the previous attempt left the target mounted.
struct LeftoverProbe;

impl SystemProbe for LeftoverProbe {
    fn swaps(&self) -> Result<String> {
        Ok("/dev/sda4\n".to_string())
    }

    fn mounts(&self) -> Result<String> {
        Ok("/dev/sda3 on /install type ext4 (rw,relatime)\n\
            /dev/sda2 on /install/boot type ext4 (rw,relatime)\n"
            .to_string())
    }

    fn logical_volumes(&self) -> Result<String> {
        Ok(String::new())
    }

    fn volume_groups(&self) -> Result<String> {
        Ok(String::new())
    }

    fn physical_volumes(&self) -> Result<String> {
        Ok(String::new())
    }

    fn path_exists(&self, _path: &Path) -> bool {
        false
    }
}

fn uefi_machine() -> HardwareInfo {
    HardwareInfo {
        firmware: FirmwareMode::Uefi,
        ram_mib: Some(4096),
    }
}

fn home_profile() -> AutoPartitionConfig {
    AutoPartitionConfig {
        device: "/dev/sda".to_string(),
        use_home: true,
        size_mib: Some(20000),
        ..Default::default()
    }
}

#[test]
fn test_profile_to_dry_run() {
    let config = home_profile();
    config
        .validate(FirmwareMode::Uefi)
        .expect("valid profile"); // test: known-good profile
    let job = config
        .to_auto_partition(&uefi_machine())
        .expect("sizes given"); // test: size override avoids sysfs

    let mut executor = DryRunExecutor::new();
    let (mut sink, rx) = EventSink::bounded(64);
    let outcome = job
        .run(&LeftoverProbe, &mut executor, &mut sink)
        .expect("dry run"); // test: dry-run executor never fails
    drop(sink);

    assert_eq!(outcome.sizes.efi, 200);
    assert_eq!(outcome.sizes.swap, 2000);
    assert_eq!(outcome.sizes.root, 8000);
    assert_eq!(outcome.sizes.allocated(), 20000);
    assert_eq!(outcome.layout.devices.get(Role::Home), Some("/dev/sda4"));
    assert_eq!(outcome.layout.devices.get(Role::Swap), Some("/dev/sda5"));
    assert!(!outcome.resized);
    assert!(outcome.warnings.is_empty());
    assert_eq!(outcome.executed, executor.executed.len());

    // leftovers are torn down first, nested mounts before their parent
    assert_eq!(
        executor.executed[0],
        StorageOp::SwapOff {
            device: "/dev/sda4".into()
        }
    );
    let unmounts: Vec<&str> = executor
        .executed
        .iter()
        .filter_map(|op| match op {
            StorageOp::Unmount { target } => Some(target.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(unmounts[..2], ["/install/boot", "/install"]);

    let formatted: BTreeSet<&str> = executor
        .executed
        .iter()
        .filter_map(|op| match op {
            StorageOp::Format { device, .. } => Some(device.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        formatted,
        BTreeSet::from(["/dev/sda1", "/dev/sda2", "/dev/sda3", "/dev/sda4", "/dev/sda5"])
    );

    let events: Vec<_> = rx.try_iter().collect();
    assert!(events.iter().any(|e| e.kind == EventKind::Percent && e.text == "1.00"));
    assert!(events.iter().all(|e| e.kind != EventKind::Error));
}

#[test]
fn test_luks_lvm_profile_layout() {
    let config = AutoPartitionConfig {
        use_luks: true,
        use_lvm: true,
        ..home_profile()
    };
    let job = config
        .to_auto_partition(&uefi_machine())
        .expect("sizes given"); // test: size override avoids sysfs
    let (_, layout) = job.plan().expect("plan"); // test: 20 GB fits

    assert_eq!(layout.devices.get(Role::Root), Some("/dev/RebornVG/RebornRoot"));
    assert_eq!(layout.devices.get(Role::LuksRoot), Some("/dev/sda3"));
    assert_eq!(layout.devices.get(Role::Lvm), Some("/dev/mapper/cryptReborn"));
    assert!(job.luks_password.is_none());
}

#[test]
fn test_refind_on_bios_is_rejected() {
    let config = AutoPartitionConfig {
        bootloader: Bootloader::Refind,
        ..home_profile()
    };
    assert!(config.validate(FirmwareMode::Bios).is_err());
}

#[test]
fn test_partition_path_examples() {
    assert_eq!(get_partition_path("/dev/sda", 1), "/dev/sda1");
    assert_eq!(get_partition_path("/dev/nvme0n1", 2), "/dev/nvme0n1p2");
    assert_eq!(get_partition_path("/dev/mmcblk0", 3), "/dev/mmcblk0p3");
    assert_eq!(get_partition_path("/dev/vdb", 4), "/dev/vdb4");
}

// =============================================================================
// Package planner
// =============================================================================

fn mirrors(repo: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("https://mirror{}.example/{}/os/x86_64", i, repo))
        .collect()
}

fn snapshot() -> DatabaseSnapshot {
    let core = Repo::new("core", mirrors("core", 20))
        .with_package(Package::new("base", "3-2", "").with_depends(["bash", "glibc>=2.38"]))
        .with_package(Package::new("bash", "5.2.026-2", "").with_depends(["glibc", "readline>=7.0"]))
        .with_package(Package::new("glibc", "2.39-1", ""))
        .with_package(Package::new("readline", "8.2.010-1", "").with_depends(["glibc", "ncurses"]))
        .with_package(Package::new("ncurses", "6.5-3", "").with_depends(["glibc"]));
    let extra = Repo::new("extra", mirrors("extra", 2))
        .with_package(Package::new("a", "1-1", "").with_depends(["b"]))
        .with_package(Package::new("b", "1-1", "").with_depends(["a"]));

    DatabaseSnapshot {
        repos: vec![core, extra],
        local: vec![
            Package::new("glibc", "2.39-1", "local"),
            Package::new("ncurses", "6.5-3", "local"),
        ],
        config: RepoConfig::default(),
    }
}

fn names(set: &reborn_planner::PkgSet) -> Vec<&str> {
    set.names().collect()
}

#[test]
fn test_local_packages_satisfy_dependencies() {
    let db = snapshot();
    let resolution = DependencyResolver::new(&db, &PinPolicy::none())
        .resolve(&BTreeSet::from(["base".to_string()]), ResolveOptions::default());

    assert_eq!(names(&resolution.resolved), vec!["base", "bash", "readline"]);
    assert!(resolution.missing_deps.is_empty());
    assert!(resolution.is_complete());
}

#[test]
fn test_dependency_cycle_terminates() {
    let db = snapshot();
    let resolution = DependencyResolver::new(&db, &PinPolicy::none())
        .resolve(&BTreeSet::from(["a".to_string()]), ResolveOptions::default());
    assert_eq!(names(&resolution.resolved), vec!["a", "b"]);
}

#[test]
fn test_unknown_name_blocks_the_queue() {
    let db = snapshot();
    let resolution = DependencyResolver::new(&db, &PinPolicy::none()).resolve(
        &BTreeSet::from(["base".to_string(), "emacs".to_string()]),
        ResolveOptions::default(),
    );
    assert_eq!(resolution.not_found, BTreeSet::from(["emacs".to_string()]));

    let err = DownloadQueueBuilder::new(&db)
        .build(&resolution, QueueOptions::default())
        .unwrap_err();
    assert!(matches!(err, PlannerError::Unresolved { .. }));
}

#[test]
fn test_snapshot_file_to_metalink() {
    let dir = tempfile::tempdir().expect("tempdir"); // test: tmp is writable
    let path = dir.path().join("snapshot.json");
    snapshot().save_to_file(&path).expect("save"); // test: tmp is writable
    let db = DatabaseSnapshot::load_from_file(&path).expect("load"); // test: just written

    let resolution = DependencyResolver::new(&db, &PinPolicy::none()).resolve(
        &BTreeSet::from(["bash".to_string()]),
        ResolveOptions {
            alldeps: true,
            ..Default::default()
        },
    );
    let queue = DownloadQueueBuilder::new(&db)
        .build(
            &resolution,
            QueueOptions {
                download_databases: true,
                sigs: 2,
            },
        )
        .expect("complete"); // test: every dependency is in core

    let xml = to_metalink(&queue).expect("render"); // test: known-good queue
    let bash_file = xml
        .split("<file ")
        .find(|chunk| chunk.starts_with(r#"name="bash-5.2.026-2-x86_64.pkg.tar.zst""#))
        .expect("bash entry"); // test: bash was requested
    assert_eq!(bash_file.matches("<url>").count(), MAX_URLS);

    let info = get_info(&xml).expect("parse"); // test: own output
    let bash = &info["bash"];
    assert_eq!(bash.version.as_deref(), Some("5.2.026-2"));
    assert!(bash.urls.len() <= MAX_URLS);
    assert!(info.contains_key("core.db"));
    assert!(info.contains_key("core.db.sig"));
    assert!(info.contains_key("glibc"));
    assert!(info.contains_key("ncurses-6.5-3-x86_64.pkg.tar.zst.sig"));
}
