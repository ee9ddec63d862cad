//! Layout planner
//!
//! Maps the abstract roles of the automatic layout (efi, boot, root, home,
//! swap, lvm, luks_root, luks_home) to concrete device paths, then derives the
//! filesystem and mount maps from them.
//!
//! # Numbering
//!
//! | Table | Order |
//! |-------|-------|
//! | GPT   | efi (grub2 only) → boot → root → home? → swap |
//! | MBR   | boot=1, root=2, home=3?, extended container, swap=5 (logical) |
//!
//! With LVM the partition that would hold root becomes the physical volume and
//! root/home/swap turn into logical volumes of `RebornVG`. With LUKS the raw
//! root (and home when not on LVM) is wrapped and the role points at the
//! mapper device instead.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::engine::sizes::SizePlan;
use crate::types::{Bootloader, DiskSpec, FeatureFlags, FsKind, Role};

pub const VOLUME_GROUP: &str = "RebornVG";
pub const LUKS_ROOT_NAME: &str = "cryptReborn";
pub const LUKS_HOME_NAME: &str = "cryptRebornHome";

/// Device-name families that separate the partition number with `p`
const P_SUFFIX_FAMILIES: [&str; 8] = [
    "rd/", "ida/", "cciss/", "sx8/", "mapper/", "mmcblk", "md", "nvme",
];

/// Derive a partition device path from a disk path and partition number.
///
/// `/dev/sda` + 3 → `/dev/sda3`, `/dev/nvme0n1` + 3 → `/dev/nvme0n1p3`.
pub fn get_partition_path(device: &str, part_num: u32) -> String {
    if uses_p_suffix(device) {
        format!("{}p{}", device, part_num)
    } else {
        format!("{}{}", device, part_num)
    }
}

fn uses_p_suffix(device: &str) -> bool {
    let name = device.strip_prefix("/dev/").unwrap_or(device);
    P_SUFFIX_FAMILIES.iter().any(|family| name.starts_with(family))
}

/// True for `device` itself or one of its partitions as
/// [`get_partition_path`] names them. `/dev/sdaa1` is not on `/dev/sda`.
pub fn is_on_device(path: &str, device: &str) -> bool {
    let Some(rest) = path.strip_prefix(device) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    let number = if uses_p_suffix(device) {
        match rest.strip_prefix('p') {
            Some(number) => number,
            None => return false,
        }
    } else {
        rest
    };
    !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit())
}

pub fn mapper_path(name: &str) -> String {
    format!("/dev/mapper/{}", name)
}

pub fn logical_volume_path(lv_name: &str) -> String {
    format!("/dev/{}/{}", VOLUME_GROUP, lv_name)
}

/// Partition numbers of the raw layout, before LUKS/LVM composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionNumbers {
    /// Only for BIOS+GPT, which the automatic layout never produces
    pub bios_boot: Option<u32>,
    pub efi: Option<u32>,
    pub boot: u32,
    /// Root partition, or the LVM physical volume when LVM is used
    pub root: u32,
    pub home: Option<u32>,
    pub swap: u32,
    /// MBR extended container holding the swap logical partition
    pub extended: Option<u32>,
}

impl PartitionNumbers {
    pub fn assign(disk: &DiskSpec, flags: &FeatureFlags, home_enabled: bool) -> Self {
        if disk.is_gpt() {
            let mut next = 1;
            let mut bios_boot = None;
            if disk.firmware.is_bios() {
                // unreachable while the table follows the firmware
                bios_boot = Some(next);
                next += 1;
            }
            let mut efi = None;
            if flags.bootloader == Bootloader::Grub2 {
                efi = Some(next);
                next += 1;
            }
            let boot = next;
            let root = boot + 1;
            next = root + 1;
            let mut home = None;
            if home_enabled {
                home = Some(next);
                next += 1;
            }
            Self {
                bios_boot,
                efi,
                boot,
                root,
                home,
                swap: next,
                extended: None,
            }
        } else {
            let home = home_enabled.then_some(3);
            let extended = (!flags.use_lvm).then(|| home.map_or(3, |h| h + 1));
            Self {
                bios_boot: None,
                efi: None,
                boot: 1,
                root: 2,
                home,
                swap: 5,
                extended,
            }
        }
    }
}

/// Role → block-device path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleDeviceMap(BTreeMap<Role, String>);

impl RoleDeviceMap {
    pub fn get(&self, role: Role) -> Option<&str> {
        self.0.get(&role).map(String::as_str)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains_key(&role)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, &str)> {
        self.0.iter().map(|(role, dev)| (*role, dev.as_str()))
    }

    fn set(&mut self, role: Role, device: impl Into<String>) {
        self.0.insert(role, device.into());
    }

    fn take(&mut self, role: Role) -> Option<String> {
        self.0.remove(&role)
    }
}

impl fmt::Display for RoleDeviceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (role, device) in &self.0 {
            writeln!(f, "{:<10} {}", role.to_string(), device)?;
        }
        Ok(())
    }
}

/// Device path → filesystem for every device that will be formatted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FsDeviceMap(BTreeMap<String, FsKind>);

impl FsDeviceMap {
    pub fn get(&self, device: &str) -> Option<FsKind> {
        self.0.get(device).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FsKind)> {
        self.0.iter().map(|(dev, fs)| (dev.as_str(), *fs))
    }
}

/// Mount point (or `swap`) → device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MountMap(BTreeMap<String, String>);

impl MountMap {
    pub fn get(&self, mount_point: &str) -> Option<&str> {
        self.0.get(mount_point).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(m, d)| (m.as_str(), d.as_str()))
    }
}

/// Complete device assignment for one disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layout {
    pub numbers: PartitionNumbers,
    pub devices: RoleDeviceMap,
    pub filesystems: FsDeviceMap,
    pub mounts: MountMap,
    pub home_enabled: bool,
}

/// Deterministic role→device planner.
pub struct LayoutPlanner;

impl LayoutPlanner {
    /// Build the role→device map for a disk.
    ///
    /// Whether `/home` exists is taken from the size plan, which may have
    /// dropped it when the disk is too small.
    pub fn plan(disk: &DiskSpec, sizes: &SizePlan, flags: &FeatureFlags) -> RoleDeviceMap {
        let home = sizes.home_enabled;
        let numbers = PartitionNumbers::assign(disk, flags, home);
        let part = |n: u32| get_partition_path(&disk.device, n);

        let mut devices = RoleDeviceMap::default();
        if let Some(efi) = numbers.efi {
            devices.set(Role::Efi, part(efi));
        }
        devices.set(Role::Boot, part(numbers.boot));
        devices.set(Role::Root, part(numbers.root));
        if let Some(n) = numbers.home {
            devices.set(Role::Home, part(n));
        }
        devices.set(Role::Swap, part(numbers.swap));

        if flags.use_luks {
            if let Some(raw_root) = devices.take(Role::Root) {
                devices.set(Role::LuksRoot, raw_root);
            }
            if flags.use_lvm {
                devices.set(Role::Lvm, mapper_path(LUKS_ROOT_NAME));
            } else {
                devices.set(Role::Root, mapper_path(LUKS_ROOT_NAME));
                if home {
                    if let Some(raw_home) = devices.take(Role::Home) {
                        devices.set(Role::LuksHome, raw_home);
                    }
                    devices.set(Role::Home, mapper_path(LUKS_HOME_NAME));
                }
            }
        } else if flags.use_lvm {
            devices.set(Role::Lvm, part(numbers.root));
        }

        if flags.use_lvm {
            devices.set(Role::Root, logical_volume_path("RebornRoot"));
            devices.set(Role::Swap, logical_volume_path("RebornSwap"));
            if home {
                devices.set(Role::Home, logical_volume_path("RebornHome"));
            }
        }

        for (role, device) in devices.iter() {
            log::debug!("{}: {}", role, device);
        }
        devices
    }

    /// Filesystems of every device that gets formatted.
    ///
    /// LUKS containers are never formatted directly, only the mapper device
    /// opened on top of them.
    pub fn filesystems(disk: &DiskSpec, devices: &RoleDeviceMap, flags: &FeatureFlags) -> FsDeviceMap {
        let mut fs = BTreeMap::new();
        let mut put = |role: Role, kind: FsKind| {
            if let Some(device) = devices.get(role) {
                fs.insert(device.to_string(), kind);
            }
        };

        if disk.is_gpt() {
            match flags.bootloader {
                Bootloader::Grub2 => {
                    put(Role::Efi, FsKind::Vfat);
                    put(Role::Boot, FsKind::Ext4);
                }
                Bootloader::SystemdBoot | Bootloader::Refind => put(Role::Boot, FsKind::Vfat),
            }
        } else if disk.firmware.is_uefi() {
            put(Role::Boot, FsKind::Vfat);
        } else {
            put(Role::Boot, FsKind::Ext4);
        }

        put(Role::Swap, FsKind::Swap);
        put(Role::Root, FsKind::Ext4);
        put(Role::Home, FsKind::Ext4);

        for (device, kind) in &fs {
            log::debug!("Device {} will have a {} filesystem", device, kind);
        }
        FsDeviceMap(fs)
    }

    /// Mount point of every mountable role.
    pub fn mounts(devices: &RoleDeviceMap) -> MountMap {
        let mut mounts = BTreeMap::new();
        for role in [Role::Efi, Role::Boot, Role::Root, Role::Home] {
            if let (Some(mount_point), Some(device)) = (role.mount_point(), devices.get(role)) {
                mounts.insert(mount_point.to_string(), device.to_string());
            }
        }
        if let Some(swap) = devices.get(Role::Swap) {
            mounts.insert("swap".to_string(), swap.to_string());
        }
        for (mount_point, device) in &mounts {
            log::debug!("{} assigned to be mounted in {}", device, mount_point);
        }
        MountMap(mounts)
    }

    /// Run all three derivations at once.
    pub fn layout(disk: &DiskSpec, sizes: &SizePlan, flags: &FeatureFlags) -> Layout {
        let devices = Self::plan(disk, sizes, flags);
        Layout {
            numbers: PartitionNumbers::assign(disk, flags, sizes.home_enabled),
            filesystems: Self::filesystems(disk, &devices, flags),
            mounts: Self::mounts(&devices),
            devices,
            home_enabled: sizes.home_enabled,
        }
    }
}
