//! Partitioning profiles saved as JSON.
//!
//! A profile records the automatic-layout choices for one disk so that an
//! installation can be planned (or re-run) without the frontend.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::autopart::AutoPartition;
use crate::hardware::{FirmwareMode, HardwareInfo, disk_size_mib};
use crate::types::{BootMode, Bootloader, DiskSpec, FeatureFlags};

/// Where the target system is mounted during installation
pub const DEFAULT_DEST_DIR: &str = "/install";

/// Automatic partitioning profile that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoPartitionConfig {
    pub device: String, // Disk path like /dev/sda
    pub dest_dir: PathBuf,
    pub boot_mode: BootMode,
    pub bootloader: Bootloader,
    pub use_luks: bool,
    pub use_lvm: bool,
    pub use_home: bool,
    /// Empty or absent: keyfiles are generated
    pub luks_password: Option<String>,
    /// Overrides `/proc/meminfo`
    pub ram_mib: Option<u64>,
    /// Overrides the size read from sysfs
    pub size_mib: Option<u64>,
}

impl Default for AutoPartitionConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            dest_dir: PathBuf::from(DEFAULT_DEST_DIR),
            boot_mode: BootMode::Auto,
            bootloader: Bootloader::Grub2,
            use_luks: false,
            use_lvm: false,
            use_home: false,
            luks_password: None,
            ram_mib: None,
            size_mib: None,
        }
    }
}

impl AutoPartitionConfig {
    pub fn flags(&self) -> FeatureFlags {
        FeatureFlags {
            use_luks: self.use_luks,
            use_lvm: self.use_lvm,
            use_home: self.use_home,
            bootloader: self.bootloader,
        }
    }

    /// Save the profile to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize profile to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write profile to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load a profile from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read profile from {:?}", path.as_ref()))?;

        let config: Self = serde_json::from_str(&content).context("Failed to parse profile JSON")?;

        Ok(config)
    }

    /// Validate the profile against the machine's firmware
    pub fn validate(&self, detected: FirmwareMode) -> Result<()> {
        let device = self.device.trim();
        if device.is_empty() {
            anyhow::bail!("Target device must be specified");
        }
        if !device.starts_with("/dev/") {
            anyhow::bail!("Target device must be a path under /dev/: {}", device);
        }

        if !self.dest_dir.is_absolute() {
            anyhow::bail!("Destination directory must be absolute: {}", self.dest_dir.display());
        }

        let firmware = self.boot_mode.resolve(detected);
        if self.bootloader.requires_uefi() && !firmware.is_uefi() {
            anyhow::bail!("{} requires UEFI firmware", self.bootloader);
        }

        if let Some(password) = &self.luks_password {
            if !self.use_luks && !password.is_empty() {
                log::warn!("LUKS password given but encryption is disabled; ignoring it");
            }
        }

        Ok(())
    }

    /// Resolve the profile into a concrete partitioning job.
    ///
    /// Missing disk or RAM sizes are configuration errors.
    pub fn to_auto_partition(&self, hardware: &HardwareInfo) -> crate::error::Result<AutoPartition> {
        let firmware = self.boot_mode.resolve(hardware.firmware);
        let size_mib = match self.size_mib {
            Some(size) => size,
            None => disk_size_mib(&self.device)?,
        };
        let ram_mib = self
            .ram_mib
            .or(hardware.ram_mib)
            .ok_or_else(|| crate::error::PlannerError::config("RAM size is unknown; set ram_mib"))?;

        Ok(AutoPartition {
            disk: DiskSpec::new(self.device.trim(), size_mib, firmware),
            flags: self.flags(),
            ram_mib,
            dest_dir: self.dest_dir.clone(),
            luks_password: self
                .luks_password
                .clone()
                .filter(|p| self.use_luks && !p.is_empty()),
        })
    }
}
