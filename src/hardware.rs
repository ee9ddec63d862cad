//! Hardware environment detection
//!
//! Detects the facts the automatic layout depends on: firmware mode (UEFI vs
//! BIOS), installed RAM and the usable size of the target disk. All detection
//! reads procfs/sysfs directly; nothing is shelled out.
//!
//! # Design
//!
//! - **Safe default**: firmware detection never fails, a missing
//!   `/sys/firmware/efi` means BIOS
//! - **Fail fast on geometry**: an undetectable disk size is a configuration
//!   error, the caller must fall back to manual partitioning
//! - **Testable**: every reader has a pure parser or a root-relative variant

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};

/// Sectors kept free for the primary and backup partition table headers
pub const RESERVED_SECTORS: u64 = 68;

/// Detected firmware mode of the system.
///
/// Determined by checking for the existence of `/sys/firmware/efi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareMode {
    /// UEFI firmware: GPT label, ESP, systemd-boot/rEFInd possible
    Uefi,
    /// Legacy BIOS firmware: MBR label
    Bios,
}

impl FirmwareMode {
    /// Returns true if the system booted in UEFI mode.
    pub fn is_uefi(self) -> bool {
        matches!(self, Self::Uefi)
    }

    /// Returns true if the system booted in legacy BIOS mode.
    pub fn is_bios(self) -> bool {
        matches!(self, Self::Bios)
    }
}

impl fmt::Display for FirmwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uefi => write!(f, "UEFI"),
            Self::Bios => write!(f, "BIOS"),
        }
    }
}

/// Aggregated hardware detection results.
#[derive(Debug, Clone)]
pub struct HardwareInfo {
    pub firmware: FirmwareMode,
    /// Total RAM in MiB, `None` when `/proc/meminfo` is unreadable
    pub ram_mib: Option<u64>,
}

impl HardwareInfo {
    /// Detect the hardware environment. Never panics.
    pub fn detect() -> Self {
        let firmware = detect_firmware_mode();
        let ram_mib = match detect_ram_mib() {
            Ok(ram) => Some(ram),
            Err(e) => {
                log::warn!("RAM detection failed: {}", e);
                None
            }
        };

        log::info!(
            "Hardware detection: firmware={}, ram={:?} MiB",
            firmware,
            ram_mib
        );

        Self { firmware, ram_mib }
    }
}

impl fmt::Display for HardwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ram_mib {
            Some(ram) => write!(f, "Firmware: {}, RAM: {} MiB", self.firmware, ram),
            None => write!(f, "Firmware: {}, RAM: unknown", self.firmware),
        }
    }
}

// ============================================================================
// Detection Functions
// ============================================================================

/// Detect firmware mode by checking for the EFI sysfs directory.
///
/// The Linux kernel exposes `/sys/firmware/efi` only when booted in UEFI mode.
pub fn detect_firmware_mode() -> FirmwareMode {
    if Path::new("/sys/firmware/efi").exists() {
        log::info!("UEFI firmware detected (/sys/firmware/efi exists)");
        FirmwareMode::Uefi
    } else {
        log::info!("BIOS firmware detected (/sys/firmware/efi not found)");
        FirmwareMode::Bios
    }
}

/// Read total RAM from `/proc/meminfo`.
pub fn detect_ram_mib() -> Result<u64> {
    let meminfo = fs::read_to_string("/proc/meminfo")?;
    parse_meminfo_mib(&meminfo)
        .ok_or_else(|| PlannerError::config("MemTotal not found in /proc/meminfo"))
}

/// Extract `MemTotal` (reported in KiB) and convert it to MiB.
pub fn parse_meminfo_mib(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kib| kib.parse::<u64>().ok())
        .map(|kib| kib / 1024)
}

/// Usable size of a whole-disk block device in MiB.
pub fn disk_size_mib(device: &str) -> Result<u64> {
    disk_size_mib_in(Path::new("/sys/block"), device)
}

/// Same as [`disk_size_mib`] but reads below an arbitrary sysfs block root.
///
/// The size is `(sectors - 68) * logical_block_size`, where `sectors` is
/// always counted in 512-byte units by the kernel's `size` attribute and the
/// multiplier follows the historical installer behaviour.
pub fn disk_size_mib_in(sys_block: &Path, device: &str) -> Result<u64> {
    let name = device.rsplit('/').next().unwrap_or(device);
    let base = sys_block.join(name);
    let size_path = base.join("size");
    let block_path = base.join("queue/logical_block_size");

    if !size_path.exists() {
        log::error!("Cannot detect {} device size", device);
        return Err(PlannerError::config(format!(
            "cannot detect size of {}; use manual partitioning instead",
            device
        )));
    }

    let sectors = read_sysfs_u64(&size_path)?;
    let block_size = read_sysfs_u64(&block_path)?;
    let bytes = block_size * sectors.saturating_sub(RESERVED_SECTORS);
    let mib = bytes / 1024 / 1024;

    log::debug!("Total disk size of {}: {} MiB", device, mib);
    Ok(mib)
}

fn read_sysfs_u64(path: &Path) -> Result<u64> {
    let raw = fs::read_to_string(path).map_err(|e| {
        PlannerError::config(format!("cannot read {}: {}", path.display(), e))
    })?;
    raw.trim().parse::<u64>().map_err(|e| {
        PlannerError::config(format!("invalid value in {}: {}", path.display(), e))
    })
}

// ============================================================================
// Tests
// ============================================================================
