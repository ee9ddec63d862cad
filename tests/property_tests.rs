//! Property-based tests for the planners
//!
//! These tests verify:
//! - Size plans always fill the disk exactly and cap swap at 10%
//! - Layouts are deterministic and never reuse a raw partition
//! - Package set algebra
//! - Version ordering is a total order on well-formed versions

use std::cmp::Ordering;
use std::collections::BTreeSet;

use proptest::prelude::*;

use reborn_planner::logic::queue::{SigTarget, needs_sig};
use reborn_planner::logic::version::vercmp;
use reborn_planner::{
    Bootloader, DiskSpec, FeatureFlags, FirmwareMode, LayoutPlanner, Package, PartitionTable,
    PkgSet, SizeModel,
};

// =============================================================================
// Size model
// =============================================================================

fn bootloader_strategy() -> impl Strategy<Value = Bootloader> {
    prop_oneof![
        Just(Bootloader::Grub2),
        Just(Bootloader::SystemdBoot),
        Just(Bootloader::Refind),
    ]
}

fn flags_strategy() -> impl Strategy<Value = FeatureFlags> {
    (any::<bool>(), any::<bool>(), any::<bool>(), bootloader_strategy()).prop_map(
        |(use_luks, use_lvm, use_home, bootloader)| FeatureFlags {
            use_luks,
            use_lvm,
            use_home,
            bootloader,
        },
    )
}

fn table_strategy() -> impl Strategy<Value = PartitionTable> {
    prop_oneof![Just(PartitionTable::Gpt), Just(PartitionTable::Mbr)]
}

proptest! {
    /// Every MiB of the disk is assigned, and swap never exceeds a tenth of it
    #[test]
    fn size_plan_fills_disk(
        disk in 4_000u64..4_000_000,
        ram in 256u64..131_072,
        table in table_strategy(),
        flags in flags_strategy(),
    ) {
        match SizeModel::new(table).compute(disk, ram, &flags) {
            Ok(plan) => {
                prop_assert_eq!(plan.allocated(), disk);
                prop_assert!(plan.swap <= (disk as f64 * 0.1).ceil() as u64);
                prop_assert!(plan.root > 0);
                prop_assert_eq!(plan.lvm_pv, plan.swap + plan.root + plan.home);
                prop_assert_eq!(plan.home_enabled, plan.home > 0);
                if plan.home_enabled {
                    prop_assert!(flags.use_home);
                }
            }
            Err(e) => prop_assert!(e.is_configuration()),
        }
    }

    /// The same inputs always produce the same layout
    #[test]
    fn layout_is_deterministic(
        disk in 20_000u64..2_000_000,
        uefi in any::<bool>(),
        flags in flags_strategy(),
    ) {
        let firmware = if uefi { FirmwareMode::Uefi } else { FirmwareMode::Bios };
        let disk = DiskSpec::new("/dev/sda", disk, firmware);
        let sizes = SizeModel::new(disk.table())
            .compute(disk.size_mib, 4096, &flags)
            .expect("20 GB always fits"); // test: lower bound of the strategy
        let first = LayoutPlanner::layout(&disk, &sizes, &flags);
        let second = LayoutPlanner::layout(&disk, &sizes, &flags);
        prop_assert_eq!(&first, &second);

        // raw partitions are used by at most one role
        let raw: Vec<&str> = first
            .devices
            .iter()
            .map(|(_, device)| device)
            .filter(|device| device.starts_with("/dev/sda"))
            .collect();
        let unique: BTreeSet<&str> = raw.iter().copied().collect();
        prop_assert_eq!(raw.len(), unique.len());
    }
}

// =============================================================================
// Package sets
// =============================================================================

fn pkgset_strategy() -> impl Strategy<Value = PkgSet> {
    prop::collection::vec("[a-e]{1,2}", 0..8).prop_map(|names| {
        names
            .into_iter()
            .map(|name| Package::new(name, "1-1", "core"))
            .collect()
    })
}

proptest! {
    /// Union is commutative and idempotent (by name)
    #[test]
    fn union_laws(a in pkgset_strategy(), b in pkgset_strategy()) {
        prop_assert_eq!(a.union(&b), b.union(&a));
        prop_assert_eq!(a.union(&a), a.clone());
    }

    /// Intersection only keeps names present in both sets
    #[test]
    fn intersection_is_subset(a in pkgset_strategy(), b in pkgset_strategy()) {
        let both = a.intersection(&b);
        for name in both.names() {
            prop_assert!(a.contains(name) && b.contains(name));
        }
        prop_assert!(both.len() <= a.len().min(b.len()));
    }
}

// =============================================================================
// Versions and signature policy
// =============================================================================

proptest! {
    /// vercmp is reflexive and antisymmetric
    #[test]
    fn vercmp_is_consistent(a in "[0-9]{1,3}(\\.[0-9a-z]{1,3}){0,3}(-[0-9]{1,2})?",
                            b in "[0-9]{1,3}(\\.[0-9a-z]{1,3}){0,3}(-[0-9]{1,2})?") {
        prop_assert_eq!(vercmp(&a, &a), Ordering::Equal);
        prop_assert_eq!(vercmp(&a, &b), vercmp(&b, &a).reverse());
    }

    /// Two or more --sigs always fetch signatures, none never does
    #[test]
    fn sig_insistence_extremes(level in prop::option::of("[A-Za-z]{0,16}"), extra in 2u8..10) {
        for target in [SigTarget::Database, SigTarget::Package] {
            prop_assert!(needs_sig(level.as_deref(), extra, target));
            prop_assert!(!needs_sig(level.as_deref(), 0, target));
        }
    }
}
