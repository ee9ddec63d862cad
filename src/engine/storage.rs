//! Storage command plan
//!
//! Translates a [`Layout`] and [`SizePlan`] into the ordered sequence of
//! atomic `StorageOp` operations a [`PlanExecutor`](crate::executor::PlanExecutor)
//! issues against the disk.
//!
//! # Phases
//!
//! | Phase      | Operations Generated |
//! |------------|---------------------|
//! | Prepare    | Zap → ZeroFill → Wipefs → CreatePartitionTable |
//! | Partition  | CreatePartition (+ SetFlag on MBR) → Partprobe/UdevSettle |
//! | Encrypt    | ZeroFill header → GenerateKeyfile? → LuksFormat → LuksOpen |
//! | Volumes    | CreateLvmPv → CreateLvmVg, then CreateLvmLv per volume |
//! | Filesystem | Format → Mount / SwapOn, root first |
//! | Keyfiles   | InstallKeyfile (LUKS without password only) |
//!
//! The reconciliation phase that tears down a previous installation is built
//! in [`reconcile`](crate::engine::reconcile).
//!
//! # Design
//!
//! - **Pure logic**: No I/O, no side effects, only generates the plan
//! - **Typed output**: Each `StorageOp` maps to exactly one external command
//! - **Fatality is data**: teardown steps are best-effort, everything after
//!   partition-table creation aborts the plan on failure

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::engine::layout::{LUKS_HOME_NAME, LUKS_ROOT_NAME, Layout, VOLUME_GROUP};
use crate::engine::sizes::{SizePlan, START_OFFSET};
use crate::types::{Bootloader, DiskSpec, FeatureFlags, FsKind, PartitionTable, Role};

/// Cipher handed to `cryptsetup luksFormat`
pub const LUKS_CIPHER: &str = "aes-xts-plain64";

/// Key size in bits (XTS uses two 256-bit keys)
pub const LUKS_KEY_SIZE: u32 = 512;

/// Sectors zeroed before creating a LUKS header; the 512-bit header is 2 MiB
pub const LUKS_HEADER_WIPE_SECTORS: u64 = 20480;

/// Sectors zeroed at the start of the disk to drop stale signatures
pub const DISK_HEADER_WIPE_SECTORS: u64 = 2048;

pub const ROOT_KEYFILE: &str = "/tmp/.keyfile-root";
pub const HOME_KEYFILE: &str = "/tmp/.keyfile-home";

// ============================================================================
// Storage Operation Types
// ============================================================================

/// How a LUKS container is unlocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum KeySource {
    /// The passphrase held by the executor, fed on stdin
    Password,
    /// A random keyfile created by a preceding `GenerateKeyfile`
    Keyfile(PathBuf),
}

/// Partition entry kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PartitionKind {
    /// GPT partition with an sgdisk type code (`EF00`, `8300`, ...)
    Gpt { label: String, type_code: String },
    Primary,
    Extended,
    /// Logical partition inside the extended container
    Logical { swap: bool },
}

/// Logical volume size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LvSize {
    Mib(u64),
    /// Percentage of the free extents left in the volume group
    FreePercent(u8),
}

impl fmt::Display for LvSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mib(mib) => write!(f, "{}MiB", mib),
            Self::FreePercent(pct) => write!(f, "{}%FREE", pct),
        }
    }
}

/// A single atomic storage operation in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StorageOp {
    /// Deactivate a swap device
    SwapOff { device: String },

    /// Lazily unmount a directory or device
    Unmount { target: String },

    /// Erase filesystem signatures of a device (wipefs -a)
    WipeSignatures { device: String },

    LvRemove { device: String },

    VgRemove { vg_name: String },

    PvRemove { device: String },

    /// Close a previously opened LUKS mapper device
    LuksClose { device: String },

    /// Destroy GPT and MBR structures (sgdisk --zap-all)
    ZapDisk { disk: String },

    /// Overwrite the first sectors of a device with zeros
    ZeroFill { device: String, sectors: u64 },

    /// Create an empty partition table
    CreatePartitionTable { disk: String, table: PartitionTable },

    /// Create one partition; `size_mib == None` extends to the end of the disk
    CreatePartition {
        disk: String,
        number: u32,
        kind: PartitionKind,
        start_mib: u64,
        size_mib: Option<u64>,
    },

    /// Set an MBR partition flag (`boot`, `lvm`)
    SetFlag { disk: String, number: u32, flag: String },

    /// Tell the kernel to re-read the partition table
    Partprobe { disk: String },

    /// Wait until udev has created the new device nodes
    UdevSettle,

    /// Write 4 KiB of random key material with mode 0600
    GenerateKeyfile { path: PathBuf },

    LuksFormat {
        device: String,
        cipher: String,
        key_size: u32,
        key: KeySource,
    },

    LuksOpen {
        device: String,
        mapper_name: String,
        key: KeySource,
    },

    CreateLvmPv { device: String },

    CreateLvmVg { vg_name: String, pv_device: String },

    CreateLvmLv {
        vg_name: String,
        lv_name: String,
        size: LvSize,
    },

    /// mkfs / mkswap with a label
    Format {
        device: String,
        fs: FsKind,
        label: String,
    },

    SwapOn { device: String },

    /// Mount a formatted device, creating the mount point
    Mount {
        device: String,
        mountpoint: PathBuf,
        fs: FsKind,
        options: String,
    },

    /// Move a generated keyfile into the target system with mode 0400
    InstallKeyfile { source: PathBuf, dest_dir: PathBuf },
}

impl StorageOp {
    /// Failures of non-fatal ops are logged and the plan continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::SwapOff { .. }
                | Self::Unmount { .. }
                | Self::WipeSignatures { .. }
                | Self::LvRemove { .. }
                | Self::VgRemove { .. }
                | Self::PvRemove { .. }
                | Self::LuksClose { .. }
                | Self::SwapOn { .. }
                | Self::InstallKeyfile { .. }
        )
    }

    /// Returns true for operations that destroy existing data.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Self::WipeSignatures { .. }
                | Self::LvRemove { .. }
                | Self::VgRemove { .. }
                | Self::PvRemove { .. }
                | Self::ZapDisk { .. }
                | Self::ZeroFill { .. }
                | Self::CreatePartitionTable { .. }
                | Self::CreatePartition { .. }
                | Self::LuksFormat { .. }
                | Self::Format { .. }
        )
    }
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SwapOff { device } => write!(f, "SwapOff({})", device),
            Self::Unmount { target } => write!(f, "Unmount({})", target),
            Self::WipeSignatures { device } => write!(f, "WipeSignatures({})", device),
            Self::LvRemove { device } => write!(f, "LvRemove({})", device),
            Self::VgRemove { vg_name } => write!(f, "VgRemove({})", vg_name),
            Self::PvRemove { device } => write!(f, "PvRemove({})", device),
            Self::LuksClose { device } => write!(f, "LuksClose({})", device),
            Self::ZapDisk { disk } => write!(f, "ZapDisk({})", disk),
            Self::ZeroFill { device, sectors } => {
                write!(f, "ZeroFill({}, sectors={})", device, sectors)
            }
            Self::CreatePartitionTable { disk, table } => {
                write!(f, "CreatePartitionTable({}, {})", disk, table)
            }
            Self::CreatePartition {
                disk,
                number,
                kind,
                start_mib,
                size_mib,
            } => {
                let size = size_mib.map_or_else(|| "rest".to_string(), |s| format!("{}MiB", s));
                let kind = match kind {
                    PartitionKind::Gpt { label, type_code } => format!("{} {}", label, type_code),
                    PartitionKind::Primary => "primary".to_string(),
                    PartitionKind::Extended => "extended".to_string(),
                    PartitionKind::Logical { .. } => "logical".to_string(),
                };
                write!(
                    f,
                    "CreatePartition({} #{}, {}, start={}MiB, size={})",
                    disk, number, kind, start_mib, size
                )
            }
            Self::SetFlag { disk, number, flag } => {
                write!(f, "SetFlag({} #{}, {})", disk, number, flag)
            }
            Self::Partprobe { disk } => write!(f, "Partprobe({})", disk),
            Self::UdevSettle => write!(f, "UdevSettle"),
            Self::GenerateKeyfile { path } => write!(f, "GenerateKeyfile({})", path.display()),
            Self::LuksFormat {
                device,
                cipher,
                key_size,
                key,
            } => write!(
                f,
                "LuksFormat({}, cipher={}, key_size={}, key={})",
                device,
                cipher,
                key_size,
                key_label(key)
            ),
            Self::LuksOpen {
                device,
                mapper_name,
                key,
            } => write!(
                f,
                "LuksOpen({} -> /dev/mapper/{}, key={})",
                device,
                mapper_name,
                key_label(key)
            ),
            Self::CreateLvmPv { device } => write!(f, "CreateLvmPV({})", device),
            Self::CreateLvmVg { vg_name, pv_device } => {
                write!(f, "CreateLvmVG({} on {})", vg_name, pv_device)
            }
            Self::CreateLvmLv {
                vg_name,
                lv_name,
                size,
            } => write!(f, "CreateLvmLV({}/{}, size={})", vg_name, lv_name, size),
            Self::Format { device, fs, label } => {
                write!(f, "Format({}, fs={}, label={})", device, fs, label)
            }
            Self::SwapOn { device } => write!(f, "SwapOn({})", device),
            Self::Mount {
                device,
                mountpoint,
                options,
                ..
            } => write!(
                f,
                "Mount({} -> {}, opts={})",
                device,
                mountpoint.display(),
                options
            ),
            Self::InstallKeyfile { source, dest_dir } => write!(
                f,
                "InstallKeyfile({} -> {})",
                source.display(),
                dest_dir.display()
            ),
        }
    }
}

fn key_label(key: &KeySource) -> String {
    match key {
        KeySource::Password => "password".to_string(),
        KeySource::Keyfile(path) => path.display().to_string(),
    }
}

/// A complete storage plan: an ordered list of operations.
#[derive(Debug, Clone, Serialize)]
pub struct StoragePlan {
    pub ops: Vec<StorageOp>,
    pub disk: String,
    pub encrypted: bool,
    pub lvm: bool,
}

impl StoragePlan {
    /// Returns true if this plan includes destructive operations.
    pub fn is_destructive(&self) -> bool {
        self.ops.iter().any(StorageOp::is_destructive)
    }

    /// Returns a summary of the plan for logging/display.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Storage Plan: {}", self.disk),
            format!("  Encrypted: {}", self.encrypted),
            format!("  LVM: {}", self.lvm),
            format!("  Operations ({}):", self.ops.len()),
        ];
        for (i, op) in self.ops.iter().enumerate() {
            lines.push(format!("    {}. {}", i + 1, op));
        }
        lines.join("\n")
    }
}

// ============================================================================
// Plan Calculation
// ============================================================================

/// Wipe the disk and create a fresh partition table.
pub fn prepare_disk_ops(disk: &DiskSpec) -> Vec<StorageOp> {
    let device = disk.device.clone();
    let mut ops = Vec::new();
    if disk.is_gpt() {
        ops.push(StorageOp::ZapDisk {
            disk: device.clone(),
        });
    }
    ops.push(StorageOp::ZeroFill {
        device: device.clone(),
        sectors: DISK_HEADER_WIPE_SECTORS,
    });
    ops.push(StorageOp::WipeSignatures {
        device: device.clone(),
    });
    ops.push(StorageOp::CreatePartitionTable {
        disk: device,
        table: disk.table(),
    });
    ops
}

/// Sequential partition creation with a running start offset.
struct PartitionCursor<'a> {
    disk: &'a str,
    start: u64,
    ops: Vec<StorageOp>,
}

impl PartitionCursor<'_> {
    fn create(&mut self, number: u32, kind: PartitionKind, size_mib: Option<u64>) {
        self.ops.push(StorageOp::CreatePartition {
            disk: self.disk.to_string(),
            number,
            kind,
            start_mib: self.start,
            size_mib,
        });
        if let Some(size) = size_mib {
            self.start += size;
        }
    }

    fn flag(&mut self, number: u32, flag: &str) {
        self.ops.push(StorageOp::SetFlag {
            disk: self.disk.to_string(),
            number,
            flag: flag.to_string(),
        });
    }
}

fn gpt(label: &str, type_code: &str) -> PartitionKind {
    PartitionKind::Gpt {
        label: label.to_string(),
        type_code: type_code.to_string(),
    }
}

/// Create every raw partition of the layout and wait for the device nodes.
pub fn partition_ops(
    disk: &DiskSpec,
    layout: &Layout,
    sizes: &SizePlan,
    flags: &FeatureFlags,
) -> Vec<StorageOp> {
    let numbers = &layout.numbers;
    let mut cursor = PartitionCursor {
        disk: &disk.device,
        start: START_OFFSET,
        ops: Vec::new(),
    };

    if disk.is_gpt() {
        if let Some(n) = numbers.bios_boot {
            cursor.create(n, gpt("BIOS_BOOT", "EF02"), Some(2));
        }
        if let Some(n) = numbers.efi {
            cursor.create(n, gpt("UEFI_SYSTEM", "EF00"), Some(sizes.efi));
        }
        let boot_code = match flags.bootloader {
            Bootloader::SystemdBoot | Bootloader::Refind => "EF00",
            Bootloader::Grub2 => "8300",
        };
        cursor.create(numbers.boot, gpt("REBORN_BOOT", boot_code), Some(sizes.boot));

        if flags.use_lvm {
            cursor.create(numbers.root, gpt("REBORN_LVM", "8E00"), Some(sizes.lvm_pv));
        } else {
            cursor.create(numbers.root, gpt("REBORN_ROOT", "8300"), Some(sizes.root));
            if let Some(n) = numbers.home {
                cursor.create(n, gpt("REBORN_HOME", "8302"), Some(sizes.home));
            }
            cursor.create(numbers.swap, gpt("REBORN_SWAP", "8200"), None);
        }
        cursor.ops.push(StorageOp::Partprobe {
            disk: disk.device.clone(),
        });
    } else {
        cursor.create(numbers.boot, PartitionKind::Primary, Some(sizes.boot));
        cursor.flag(numbers.boot, "boot");

        if flags.use_lvm {
            cursor.create(numbers.root, PartitionKind::Primary, None);
            cursor.flag(numbers.root, "lvm");
        } else {
            cursor.create(numbers.root, PartitionKind::Primary, Some(sizes.root));
            if let Some(n) = numbers.home {
                cursor.create(n, PartitionKind::Primary, Some(sizes.home));
            }
            if let Some(n) = numbers.extended {
                cursor.create(n, PartitionKind::Extended, None);
            }
            // the logical partition needs 1 MiB for its EBR
            cursor.start += 1;
            cursor.create(numbers.swap, PartitionKind::Logical { swap: true }, None);
        }
    }

    let mut ops = cursor.ops;
    ops.push(StorageOp::UdevSettle);
    ops
}

/// LUKS setup for the root container and, without LVM, the home container.
pub fn luks_ops(layout: &Layout, flags: &FeatureFlags, has_password: bool) -> Vec<StorageOp> {
    let mut ops = Vec::new();
    if !flags.use_luks {
        return ops;
    }

    let mut wrap = |raw: &str, mapper_name: &str, keyfile: &str| {
        ops.push(StorageOp::ZeroFill {
            device: raw.to_string(),
            sectors: LUKS_HEADER_WIPE_SECTORS,
        });
        let key = if has_password {
            KeySource::Password
        } else {
            ops.push(StorageOp::GenerateKeyfile {
                path: PathBuf::from(keyfile),
            });
            KeySource::Keyfile(PathBuf::from(keyfile))
        };
        ops.push(StorageOp::LuksFormat {
            device: raw.to_string(),
            cipher: LUKS_CIPHER.to_string(),
            key_size: LUKS_KEY_SIZE,
            key: key.clone(),
        });
        ops.push(StorageOp::LuksOpen {
            device: raw.to_string(),
            mapper_name: mapper_name.to_string(),
            key,
        });
    };

    if let Some(raw_root) = layout.devices.get(Role::LuksRoot) {
        wrap(raw_root, LUKS_ROOT_NAME, ROOT_KEYFILE);
    }
    if let Some(raw_home) = layout.devices.get(Role::LuksHome) {
        wrap(raw_home, LUKS_HOME_NAME, HOME_KEYFILE);
    }
    ops
}

/// Physical volume and volume group on the layout's `lvm` device.
pub fn volume_group_ops(layout: &Layout) -> Vec<StorageOp> {
    let Some(pv) = layout.devices.get(Role::Lvm) else {
        return Vec::new();
    };
    vec![
        StorageOp::CreateLvmPv {
            device: pv.to_string(),
        },
        StorageOp::CreateLvmVg {
            vg_name: VOLUME_GROUP.to_string(),
            pv_device: pv.to_string(),
        },
    ]
}

/// Logical volumes: fixed root, then swap (fixed when home follows) and home.
pub fn logical_volume_ops(sizes: &SizePlan) -> Vec<StorageOp> {
    let lv = |name: &str, size: LvSize| StorageOp::CreateLvmLv {
        vg_name: VOLUME_GROUP.to_string(),
        lv_name: name.to_string(),
        size,
    };

    let mut ops = vec![lv("RebornRoot", LvSize::Mib(sizes.root))];
    if sizes.home_enabled {
        ops.push(lv("RebornSwap", LvSize::Mib(sizes.swap)));
        ops.push(lv("RebornHome", LvSize::FreePercent(100)));
    } else {
        ops.push(lv("RebornSwap", LvSize::FreePercent(100)));
    }
    ops
}

/// Format and mount every device, root first so the other mount points
/// land inside it.
pub fn filesystem_ops(layout: &Layout, dest_dir: &Path) -> Vec<StorageOp> {
    let mut ops = Vec::new();
    for role in [Role::Root, Role::Swap, Role::Boot, Role::Efi, Role::Home] {
        let Some(device) = layout.devices.get(role) else {
            continue;
        };
        let Some(fs) = layout.filesystems.get(device) else {
            continue;
        };
        let label = role.label().unwrap_or_default().to_string();

        ops.push(StorageOp::Format {
            device: device.to_string(),
            fs,
            label,
        });

        if fs == FsKind::Swap {
            ops.push(StorageOp::SwapOn {
                device: device.to_string(),
            });
        } else if let Some(mount_point) = role.mount_point() {
            ops.push(StorageOp::Mount {
                device: device.to_string(),
                mountpoint: join_target(dest_dir, mount_point),
                fs,
                options: fs.mount_options().to_string(),
            });
        }
    }
    ops
}

/// Keyfiles generated for a password-less LUKS setup are moved into the new
/// system: root's next to the kernel, home's under `/etc/luks-keys`.
pub fn keyfile_ops(layout: &Layout, has_password: bool, dest_dir: &Path) -> Vec<StorageOp> {
    let mut ops = Vec::new();
    if has_password {
        return ops;
    }
    if layout.devices.contains(Role::LuksRoot) {
        ops.push(StorageOp::InstallKeyfile {
            source: PathBuf::from(ROOT_KEYFILE),
            dest_dir: dest_dir.join("boot"),
        });
    }
    if layout.devices.contains(Role::LuksHome) {
        ops.push(StorageOp::InstallKeyfile {
            source: PathBuf::from(HOME_KEYFILE),
            dest_dir: dest_dir.join("etc/luks-keys"),
        });
    }
    ops
}

/// Full plan for a fresh disk, excluding teardown and the VG-size check.
///
/// This is what a dry run prints; [`autopart`](crate::engine::autopart)
/// issues the same phases and may shrink the logical volumes in between.
pub fn calculate_storage_plan(
    disk: &DiskSpec,
    layout: &Layout,
    sizes: &SizePlan,
    flags: &FeatureFlags,
    has_password: bool,
    dest_dir: &Path,
) -> StoragePlan {
    let mut ops = prepare_disk_ops(disk);
    ops.extend(partition_ops(disk, layout, sizes, flags));
    ops.extend(luks_ops(layout, flags, has_password));
    if flags.use_lvm {
        ops.extend(volume_group_ops(layout));
        ops.extend(logical_volume_ops(sizes));
    }
    ops.extend(filesystem_ops(layout, dest_dir));
    ops.extend(keyfile_ops(layout, has_password, dest_dir));

    StoragePlan {
        ops,
        disk: disk.device.clone(),
        encrypted: flags.use_luks,
        lvm: flags.use_lvm,
    }
}

/// Join an absolute mount point below the destination directory.
pub fn join_target(dest_dir: &Path, mount_point: &str) -> PathBuf {
    let relative = mount_point.trim_start_matches('/');
    if relative.is_empty() {
        dest_dir.to_path_buf()
    } else {
        dest_dir.join(relative)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::layout::LayoutPlanner;
    use crate::engine::sizes::SizeModel;
    use crate::hardware::FirmwareMode;

    fn plan(
        firmware: FirmwareMode,
        luks: bool,
        lvm: bool,
        home: bool,
        bootloader: Bootloader,
        has_password: bool,
    ) -> StoragePlan {
        let disk = DiskSpec::new("/dev/sda", 100_000, firmware);
        let flags = FeatureFlags {
            use_luks: luks,
            use_lvm: lvm,
            use_home: home,
            bootloader,
        };
        let sizes = SizeModel::new(disk.table())
            .compute(disk.size_mib, 4096, &flags)
            .expect("plan generation failed"); // test: known-good input
        let layout = LayoutPlanner::layout(&disk, &sizes, &flags);
        calculate_storage_plan(&disk, &layout, &sizes, &flags, has_password, Path::new("/install"))
    }

    #[test]
    fn test_gpt_plan_starts_with_zap_and_label() {
        let plan = plan(FirmwareMode::Uefi, false, false, true, Bootloader::Grub2, true);

        assert!(matches!(&plan.ops[0], StorageOp::ZapDisk { .. }));
        assert!(matches!(
            &plan.ops[3],
            StorageOp::CreatePartitionTable { table: PartitionTable::Gpt, .. }
        ));
        assert!(plan.is_destructive());
        assert!(!plan.encrypted);
    }

    #[test]
    fn test_gpt_type_codes() {
        let plan = plan(FirmwareMode::Uefi, false, false, true, Bootloader::Grub2, true);
        let codes: Vec<&str> = plan
            .ops
            .iter()
            .filter_map(|op| match op {
                StorageOp::CreatePartition {
                    kind: PartitionKind::Gpt { type_code, .. },
                    ..
                } => Some(type_code.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(codes, vec!["EF00", "8300", "8300", "8302", "8200"]);
    }

    #[test]
    fn test_systemd_boot_partition_is_esp() {
        let plan = plan(FirmwareMode::Uefi, false, false, false, Bootloader::SystemdBoot, true);
        assert!(plan.ops.iter().any(|op| matches!(
            op,
            StorageOp::CreatePartition { number: 1, kind: PartitionKind::Gpt { type_code, .. }, .. }
                if type_code == "EF00"
        )));
        assert!(plan.ops.iter().any(|op| matches!(
            op,
            StorageOp::Format { fs: FsKind::Vfat, label, .. } if label == "RebornBoot"
        )));
    }

    #[test]
    fn test_mbr_plan_has_extended_and_logical_swap() {
        let plan = plan(FirmwareMode::Bios, false, false, false, Bootloader::Grub2, true);

        assert!(!plan.ops.iter().any(|op| matches!(op, StorageOp::ZapDisk { .. })));
        assert!(plan.ops.iter().any(|op| matches!(
            op,
            StorageOp::CreatePartition { number: 3, kind: PartitionKind::Extended, .. }
        )));
        assert!(plan.ops.iter().any(|op| matches!(
            op,
            StorageOp::CreatePartition { number: 5, kind: PartitionKind::Logical { swap: true }, .. }
        )));
        assert!(plan.ops.iter().any(|op| matches!(
            op,
            StorageOp::SetFlag { number: 1, flag, .. } if flag == "boot"
        )));
    }

    #[test]
    fn test_luks_with_password_has_no_keyfiles() {
        let plan = plan(FirmwareMode::Uefi, true, false, true, Bootloader::Grub2, true);

        let opens: Vec<&StorageOp> = plan
            .ops
            .iter()
            .filter(|op| matches!(op, StorageOp::LuksOpen { .. }))
            .collect();
        assert_eq!(opens.len(), 2);
        assert!(!plan.ops.iter().any(|op| matches!(op, StorageOp::GenerateKeyfile { .. })));
        assert!(!plan.ops.iter().any(|op| matches!(op, StorageOp::InstallKeyfile { .. })));
        assert!(plan.ops.iter().any(|op| matches!(
            op,
            StorageOp::LuksFormat { cipher, key_size: 512, .. } if cipher == "aes-xts-plain64"
        )));
    }

    #[test]
    fn test_luks_without_password_installs_keyfiles() {
        let plan = plan(FirmwareMode::Uefi, true, false, true, Bootloader::Grub2, false);

        let keyfiles: Vec<&StorageOp> = plan
            .ops
            .iter()
            .filter(|op| matches!(op, StorageOp::InstallKeyfile { .. }))
            .collect();
        assert_eq!(keyfiles.len(), 2);
        assert!(plan.ops.iter().any(|op| matches!(
            op,
            StorageOp::InstallKeyfile { dest_dir, .. }
                if dest_dir == &PathBuf::from("/install/etc/luks-keys")
        )));
    }

    #[test]
    fn test_luks_format_before_open_before_pv() {
        let plan = plan(FirmwareMode::Uefi, true, true, true, Bootloader::Grub2, true);

        let format_idx = plan.ops.iter().position(|op| matches!(op, StorageOp::LuksFormat { .. }));
        let open_idx = plan.ops.iter().position(|op| matches!(op, StorageOp::LuksOpen { .. }));
        let pv_idx = plan.ops.iter().position(|op| matches!(op, StorageOp::CreateLvmPv { .. }));

        // all three asserted present by the comparisons below
        assert!(format_idx.is_some() && open_idx.is_some() && pv_idx.is_some());
        assert!(format_idx < open_idx);
        assert!(open_idx < pv_idx);
        assert!(plan.ops.iter().any(|op| matches!(
            op,
            StorageOp::CreateLvmPv { device } if device == "/dev/mapper/cryptReborn"
        )));
    }

    #[test]
    fn test_lv_sizes_with_and_without_home() {
        let with_home = plan(FirmwareMode::Bios, false, true, true, Bootloader::Grub2, true);
        assert!(with_home.ops.iter().any(|op| matches!(
            op,
            StorageOp::CreateLvmLv { lv_name, size: LvSize::FreePercent(100), .. }
                if lv_name == "RebornHome"
        )));
        assert!(with_home.ops.iter().any(|op| matches!(
            op,
            StorageOp::CreateLvmLv { lv_name, size: LvSize::Mib(_), .. } if lv_name == "RebornSwap"
        )));

        let without_home = plan(FirmwareMode::Bios, false, true, false, Bootloader::Grub2, true);
        assert!(without_home.ops.iter().any(|op| matches!(
            op,
            StorageOp::CreateLvmLv { lv_name, size: LvSize::FreePercent(100), .. }
                if lv_name == "RebornSwap"
        )));
    }

    #[test]
    fn test_root_is_formatted_and_mounted_first() {
        let plan = plan(FirmwareMode::Uefi, false, false, true, Bootloader::Grub2, true);
        let first_format = plan.ops.iter().find(|op| matches!(op, StorageOp::Format { .. }));
        assert!(matches!(
            first_format,
            Some(StorageOp::Format { label, fs: FsKind::Ext4, .. }) if label == "RebornRoot"
        ));
        assert!(plan.ops.iter().any(|op| matches!(
            op,
            StorageOp::Mount { mountpoint, options, .. }
                if mountpoint == &PathBuf::from("/install") && options == "rw,relatime,data=ordered"
        )));
        assert!(plan.ops.iter().any(|op| matches!(
            op,
            StorageOp::Mount { mountpoint, options, .. }
                if mountpoint == &PathBuf::from("/install/boot/efi") && options == "rw,relatime"
        )));
    }

    #[test]
    fn test_reconcile_ops_are_not_fatal() {
        assert!(!StorageOp::Unmount { target: "/install".into() }.is_fatal());
        assert!(!StorageOp::LuksClose { device: "/dev/mapper/cryptReborn".into() }.is_fatal());
        assert!(StorageOp::UdevSettle.is_fatal());
        assert!(!StorageOp::UdevSettle.is_destructive());
    }

    #[test]
    fn test_plan_summary_not_empty() {
        let plan = plan(FirmwareMode::Uefi, true, true, true, Bootloader::Refind, false);
        let summary = plan.summary();
        assert!(summary.contains("/dev/sda"));
        assert!(summary.contains("LuksFormat"));
        assert!(!summary.contains("password="));
    }

    #[test]
    fn test_join_target() {
        assert_eq!(join_target(Path::new("/install"), "/"), PathBuf::from("/install"));
        assert_eq!(
            join_target(Path::new("/install"), "/boot/efi"),
            PathBuf::from("/install/boot/efi")
        );
    }
}
