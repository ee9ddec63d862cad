//! Type-safe planning types
//!
//! Stringly-typed choices from the installer frontend (bootloader names, role
//! keys, filesystem names) are represented as enums with strum/serde mappings
//! so that the planners can match on them exhaustively.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::hardware::FirmwareMode;

/// Firmware selection in a partitioning profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    /// Detect from `/sys/firmware/efi`
    #[default]
    #[strum(serialize = "auto")]
    Auto,
    #[strum(serialize = "uefi")]
    Uefi,
    #[strum(serialize = "bios")]
    Bios,
}

impl BootMode {
    /// Resolve against a detected firmware mode.
    pub fn resolve(self, detected: FirmwareMode) -> FirmwareMode {
        match self {
            Self::Auto => detected,
            Self::Uefi => FirmwareMode::Uefi,
            Self::Bios => FirmwareMode::Bios,
        }
    }
}

/// Bootloader selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
pub enum Bootloader {
    #[default]
    #[strum(serialize = "grub2")]
    Grub2,
    #[strum(serialize = "systemd-boot")]
    SystemdBoot,
    #[strum(serialize = "refind")]
    Refind,
}

impl Bootloader {
    /// systemd-boot and rEFInd boot from a FAT ESP and only run on UEFI
    pub fn requires_uefi(self) -> bool {
        matches!(self, Self::SystemdBoot | Self::Refind)
    }
}

/// Partition table kind. GPT pairs with UEFI, MBR with BIOS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum PartitionTable {
    #[strum(serialize = "gpt")]
    Gpt,
    #[strum(serialize = "msdos")]
    Mbr,
}

impl From<FirmwareMode> for PartitionTable {
    fn from(mode: FirmwareMode) -> Self {
        match mode {
            FirmwareMode::Uefi => Self::Gpt,
            FirmwareMode::Bios => Self::Mbr,
        }
    }
}

/// Filesystem written to a planned device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum FsKind {
    #[strum(serialize = "ext4")]
    Ext4,
    #[strum(serialize = "vfat")]
    Vfat,
    #[strum(serialize = "swap")]
    Swap,
}

impl FsKind {
    /// Mount options used right after formatting
    pub fn mount_options(self) -> &'static str {
        match self {
            Self::Ext4 => "rw,relatime,data=ordered",
            Self::Vfat | Self::Swap => "rw,relatime",
        }
    }
}

/// Abstract role a block device plays in the automatic layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Efi,
    Boot,
    Root,
    Home,
    Swap,
    Lvm,
    LuksRoot,
    LuksHome,
}

impl Role {
    /// Filesystem label written by mkfs/mkswap
    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::Efi => Some("UEFI_SYSTEM"),
            Self::Boot => Some("RebornBoot"),
            Self::Root => Some("RebornRoot"),
            Self::Home => Some("RebornHome"),
            Self::Swap => Some("RebornSwap"),
            Self::Lvm | Self::LuksRoot | Self::LuksHome => None,
        }
    }

    /// Mount point relative to the destination directory
    pub fn mount_point(self) -> Option<&'static str> {
        match self {
            Self::Efi => Some("/boot/efi"),
            Self::Boot => Some("/boot"),
            Self::Root => Some("/"),
            Self::Home => Some("/home"),
            Self::Swap | Self::Lvm | Self::LuksRoot | Self::LuksHome => None,
        }
    }
}

/// User choices that shape the automatic layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub use_luks: bool,
    pub use_lvm: bool,
    pub use_home: bool,
    pub bootloader: Bootloader,
}

/// The disk the automatic layout is planned for.
///
/// The partition table kind is derived from the firmware mode, so a BIOS
/// machine never receives a GPT label and a UEFI machine never receives MBR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub device: String,
    pub size_mib: u64,
    pub firmware: FirmwareMode,
}

impl DiskSpec {
    pub fn new(device: impl Into<String>, size_mib: u64, firmware: FirmwareMode) -> Self {
        Self {
            device: device.into(),
            size_mib,
            firmware,
        }
    }

    pub fn table(&self) -> PartitionTable {
        PartitionTable::from(self.firmware)
    }

    pub fn is_gpt(&self) -> bool {
        self.table() == PartitionTable::Gpt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_bootloader_parsing() {
        assert_eq!(Bootloader::from_str("grub2").unwrap(), Bootloader::Grub2);
        assert_eq!(
            Bootloader::from_str("systemd-boot").unwrap(),
            Bootloader::SystemdBoot
        );
        assert_eq!(Bootloader::from_str("refind").unwrap(), Bootloader::Refind);
        assert!(Bootloader::from_str("lilo").is_err());
    }

    #[test]
    fn test_bootloader_requires_uefi() {
        assert!(!Bootloader::Grub2.requires_uefi());
        assert!(Bootloader::SystemdBoot.requires_uefi());
        assert!(Bootloader::Refind.requires_uefi());
    }

    #[test]
    fn test_partition_table_follows_firmware() {
        assert_eq!(PartitionTable::from(FirmwareMode::Uefi), PartitionTable::Gpt);
        assert_eq!(PartitionTable::from(FirmwareMode::Bios), PartitionTable::Mbr);
        assert_eq!(PartitionTable::Mbr.to_string(), "msdos");
    }

    #[test]
    fn test_role_names_are_snake_case() {
        let names: Vec<String> = Role::iter().map(|r| r.to_string()).collect();
        assert!(names.contains(&"luks_root".to_string()));
        assert!(names.contains(&"lvm".to_string()));
        assert_eq!(Role::from_str("luks_home").unwrap(), Role::LuksHome);
    }

    #[test]
    fn test_boot_mode_resolve() {
        assert_eq!(BootMode::Auto.resolve(FirmwareMode::Bios), FirmwareMode::Bios);
        assert_eq!(BootMode::Uefi.resolve(FirmwareMode::Bios), FirmwareMode::Uefi);
        assert_eq!(BootMode::Bios.resolve(FirmwareMode::Uefi), FirmwareMode::Bios);
    }

    #[test]
    fn test_serde_roundtrip() {
        let json = serde_json::to_string(&Bootloader::SystemdBoot).unwrap();
        assert_eq!(json, "\"systemd-boot\"");
        let parsed: Bootloader = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Bootloader::SystemdBoot);

        let role: Role = serde_json::from_str("\"luks_root\"").unwrap();
        assert_eq!(role, Role::LuksRoot);
    }

    #[test]
    fn test_disk_spec_table_never_mixes() {
        let uefi = DiskSpec::new("/dev/sda", 20000, FirmwareMode::Uefi);
        let bios = DiskSpec::new("/dev/sda", 20000, FirmwareMode::Bios);
        assert!(uefi.is_gpt());
        assert_eq!(bios.table(), PartitionTable::Mbr);
    }

    #[test]
    fn test_mount_options() {
        assert_eq!(FsKind::Ext4.mount_options(), "rw,relatime,data=ordered");
        assert_eq!(FsKind::Vfat.mount_options(), "rw,relatime");
    }
}
