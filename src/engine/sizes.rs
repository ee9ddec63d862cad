//! Partition size model
//!
//! Computes the per-role sizes (MiB) of the automatic layout from the disk
//! size, installed RAM and the user's feature flags. Pure and deterministic.
//!
//! Swap suggestions follow the Anaconda RAM tiers and are capped at 10% of
//! the disk. When a separate `/home` is requested, root keeps a fifth of the
//! available space clamped to [`MIN_ROOT_SIZE`, `MAX_ROOT_SIZE`] and `/home`
//! receives the rest. If that clamped root target does not fit, `/home` is
//! dropped and the plan reports it through [`SizePlan::home_enabled`].

use serde::Serialize;

use crate::error::{PlannerError, Result};
use crate::types::{Bootloader, FeatureFlags, PartitionTable};

/// Largest root filesystem carved out when `/home` is separate
pub const MAX_ROOT_SIZE: u64 = 30000;

/// Smallest root filesystem: a full desktop plus package cache needs ~8 GB
pub const MIN_ROOT_SIZE: u64 = 8000;

pub const BOOT_SIZE: u64 = 256;
pub const EFI_SIZE: u64 = 200;

/// First partition starts at 1 MiB for alignment
pub const START_OFFSET: u64 = 1;

/// Sizes in MiB for every role of the automatic layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizePlan {
    pub disk: u64,
    pub efi: u64,
    pub boot: u64,
    pub swap: u64,
    pub root: u64,
    pub home: u64,
    pub lvm_pv: u64,
    /// False when `/home` was not requested or did not fit
    pub home_enabled: bool,
}

impl SizePlan {
    /// Sum of all partitions plus the leading alignment gap
    pub fn allocated(&self) -> u64 {
        START_OFFSET + self.efi + self.boot + self.swap + self.root + self.home
    }

    pub fn log(&self, lvm: bool) {
        log::debug!("Total disk size: {}MiB", self.disk);
        if self.efi > 0 {
            log::debug!("EFI System Partition (ESP) size: {}MiB", self.efi);
        }
        log::debug!("Boot partition size: {}MiB", self.boot);
        if lvm {
            log::debug!("LVM physical volume size: {}MiB", self.lvm_pv);
        }
        log::debug!("Swap partition size: {}MiB", self.swap);
        log::debug!("Root partition size: {}MiB", self.root);
        if self.home_enabled {
            log::debug!("Home partition size: {}MiB", self.home);
        }
    }
}

/// Swap suggested for an amount of RAM, before the disk cap
pub fn suggested_swap_mib(ram_mib: u64) -> u64 {
    match ram_mib {
        0..2048 => 2 * ram_mib,
        2048..8192 => ram_mib,
        8192..65536 => ram_mib / 2,
        _ => 4096,
    }
}

/// Size model bound to a partition table kind.
#[derive(Debug, Clone, Copy)]
pub struct SizeModel {
    table: PartitionTable,
}

impl SizeModel {
    pub fn new(table: PartitionTable) -> Self {
        Self { table }
    }

    /// Compute the size plan for a disk.
    ///
    /// # Errors
    ///
    /// Returns `PlannerError::DiskTooSmall` when nothing is left for root
    /// after the fixed partitions and swap.
    pub fn compute(&self, disk_mib: u64, ram_mib: u64, flags: &FeatureFlags) -> Result<SizePlan> {
        let efi = if self.table == PartitionTable::Gpt && flags.bootloader == Bootloader::Grub2 {
            EFI_SIZE
        } else {
            0
        };
        let boot = BOOT_SIZE;

        let max_swap = disk_mib as f64 * 0.1;
        let swap = (suggested_swap_mib(ram_mib) as f64).min(max_swap).ceil() as u64;

        let reserved = START_OFFSET + efi + boot + swap;
        if disk_mib <= reserved {
            return Err(PlannerError::DiskTooSmall {
                disk_mib,
                required_mib: reserved,
            });
        }
        let mut root = disk_mib - reserved;

        let mut home = 0;
        let mut home_enabled = false;
        if flags.use_home {
            let root_target = (root / 5).clamp(MIN_ROOT_SIZE, MAX_ROOT_SIZE);
            if root_target >= root {
                log::warn!("There's not enough free space to have a separate /home partition");
            } else {
                home = root - root_target;
                root = root_target;
                home_enabled = true;
            }
        }

        Ok(SizePlan {
            disk: disk_mib,
            efi,
            boot,
            swap,
            root,
            home,
            lvm_pv: swap + root + home,
            home_enabled,
        })
    }
}
